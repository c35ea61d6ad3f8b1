//! [`Component`](super::component::Component) implementations, one per
//! component kind.

mod addon;
mod chain;
mod dashboard;
mod hub;
mod pipeline;
mod pipelines_as_code;
mod pruner;
mod result;
mod trigger;

pub use addon::{
    ADDON_CONDITIONS, CLUSTER_TASKS_AVAILABLE, PIPELINE_TEMPLATES_AVAILABLE,
    RESOLVER_TASKS_AVAILABLE,
};
pub use hub::{
    default_db_secret, missing_keys, API_AVAILABLE, DB_AVAILABLE, DB_MIGRATION_AVAILABLE,
    HUB_CONDITIONS, UI_AVAILABLE,
};
