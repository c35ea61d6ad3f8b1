//! Custom resources of the `operator.tekton.dev/v1alpha1` API.

pub mod conditions;
pub mod openshift_pipelines_as_code;
pub mod shared;
pub mod tekton_addon;
pub mod tekton_chain;
pub mod tekton_config;
pub mod tekton_dashboard;
pub mod tekton_hub;
pub mod tekton_installer_set;
pub mod tekton_pipeline;
pub mod tekton_pruner;
pub mod tekton_result;
pub mod tekton_trigger;

use std::fmt::Debug;

use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

use self::shared::{CommonSpec, ComponentStatus};

pub const GROUP: &str = "operator.tekton.dev";
pub const VERSION: &str = "v1alpha1";

/// Behaviour shared by every component custom resource.
pub trait TektonComponent:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// The only name the operator reconciles for this kind.
    const RESOURCE_NAME: &'static str;

    fn common(&self) -> &CommonSpec;

    fn common_mut(&mut self) -> &mut CommonSpec;

    fn component_status(&self) -> Option<&ComponentStatus>;

    fn target_namespace(&self) -> &str {
        &self.common().target_namespace
    }
}
