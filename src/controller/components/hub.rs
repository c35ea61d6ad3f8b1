//! TektonHub: database, database migration, API and UI, one installer set
//! each.
//!
//! The database is either run by the operator (its credentials live in the
//! `tekton-hub-db` secret, created with defaults) or brought by the user
//! through `spec.db.secret`.  Switching to a user database drops the
//! operator's database set and regenerates the migration and API sets once.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use tracing::info;

use crate::crd::conditions::ConditionSet;
use crate::crd::shared::{ComponentStatus, DEPENDENCIES_INSTALLED, POST_RECONCILE, PRE_RECONCILE};
use crate::crd::tekton_hub::{TektonHub, API_SECRET_KEYS, DB_SECRET_KEYS, DEFAULT_DB_SECRET_NAME};
use crate::error::{Error, Result};
use crate::manifest::client::{create_as, get_as, update_as};
use crate::manifest::filter::by_kind;
use crate::manifest::{Predicate, Transformer};

use super::super::component::{transition_key, Component, Slot, SlotPlan};
use super::super::context::Env;
use super::super::helpers::controller_owner_ref;
use super::super::transformers::add_config_map_values;

pub const DB_AVAILABLE: &str = "DbInstallerSetAvailable";
pub const DB_MIGRATION_AVAILABLE: &str = "DbMigrationInstallerSetAvailable";
pub const API_AVAILABLE: &str = "ApiInstallerSetAvailable";
pub const UI_AVAILABLE: &str = "UiInstallerSetAvailable";

pub const HUB_CONDITIONS: ConditionSet = ConditionSet::new(&[
    DEPENDENCIES_INSTALLED,
    PRE_RECONCILE,
    DB_AVAILABLE,
    DB_MIGRATION_AVAILABLE,
    API_AVAILABLE,
    UI_AVAILABLE,
    POST_RECONCILE,
]);

const DB_SLOT: &str = "db";
const DB_MIGRATION_SLOT: &str = "db-migration";
const API_SLOT: &str = "api";
const UI_SLOT: &str = "ui";

const API_CONFIG_MAP: &str = "tekton-hub-api";
const UI_CONFIG_MAP: &str = "tekton-hub-ui";

const DB_DEFAULTS: [(&str, &str); 5] = [
    ("POSTGRES_HOST", "tekton-hub-db"),
    ("POSTGRES_DB", "hub"),
    ("POSTGRES_USER", "hub"),
    ("POSTGRES_PASSWORD", "hub"),
    ("POSTGRES_PORT", "5432"),
];

fn secret_keys(secret: &Secret) -> impl Iterator<Item = &String> {
    secret
        .data
        .iter()
        .flat_map(|d| d.keys())
        .chain(secret.string_data.iter().flat_map(|d| d.keys()))
}

/// Keys of `required` that `secret` does not carry; all of them when the
/// secret is absent.
pub fn missing_keys(secret: Option<&Secret>, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|k| secret.is_none_or(|s| !secret_keys(s).any(|have| have == *k)))
        .map(|k| k.to_string())
        .collect()
}

/// The operator-run database secret: existing values kept, missing keys
/// filled with defaults.
pub fn default_db_secret(
    namespace: &str,
    existing: Option<&Secret>,
    owner: OwnerReference,
) -> Secret {
    let mut secret = existing.cloned().unwrap_or_else(|| Secret {
        metadata: ObjectMeta {
            name: Some(DEFAULT_DB_SECRET_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        ..Default::default()
    });
    secret
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert("app".to_string(), "db".to_string());
    secret.metadata.owner_references = Some(vec![owner]);

    let missing = missing_keys(Some(&secret), DB_SECRET_KEYS);
    let string_data = secret.string_data.get_or_insert_with(BTreeMap::new);
    for (key, value) in DB_DEFAULTS {
        if missing.iter().any(|m| m == key) {
            string_data.insert(key.to_string(), value.to_string());
        }
    }
    secret
}

impl TektonHub {
    async fn ensure_db_secret(&self, env: &Env) -> Result<()> {
        let ns = &self.spec.common.target_namespace;
        let existing = get_as::<Secret>(env.client(), DEFAULT_DB_SECRET_NAME, Some(ns)).await?;
        if existing.is_some() && missing_keys(existing.as_ref(), DB_SECRET_KEYS).is_empty() {
            return Ok(());
        }
        let secret = default_db_secret(ns, existing.as_ref(), controller_owner_ref(self));
        if existing.is_some() {
            info!(%ns, "filling defaults into hub database secret");
            update_as(env.client(), &secret).await?;
        } else {
            info!(%ns, "creating hub database secret");
            create_as(env.client(), &secret).await?;
        }
        Ok(())
    }

    async fn validate_secret(&self, env: &Env, name: &str, keys: &[&str]) -> Result<()> {
        let ns = &self.spec.common.target_namespace;
        let secret = get_as::<Secret>(env.client(), name, Some(ns)).await?;
        let missing = missing_keys(secret.as_ref(), keys);
        if missing.is_empty() {
            return Ok(());
        }
        Err(Error::DependencyMissing(match secret {
            None => format!("{name} secret is missing in {ns}"),
            Some(_) => format!("{name} secret is missing the keys: {}", missing.join(", ")),
        }))
    }
}

#[async_trait]
impl Component for TektonHub {
    const MANIFEST_DIR: &'static str = "tekton-hub";
    const IMAGE_PREFIX: &'static str = "IMAGE_HUB_";
    const INSTALLER_TYPE: &'static str = "hub";
    const OPERAND: &'static str = "tektoncd-hub";
    const CONDITIONS: ConditionSet = HUB_CONDITIONS;

    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::named(DB_SLOT, DB_AVAILABLE),
            Slot::named(DB_MIGRATION_SLOT, DB_MIGRATION_AVAILABLE),
            Slot::named(API_SLOT, API_AVAILABLE),
            Slot::named(UI_SLOT, UI_AVAILABLE),
        ]
    }

    fn transformers(&self, slot: &Slot) -> Vec<Transformer> {
        let api = &self.spec.api;
        match slot.name {
            Some(API_SLOT) => {
                let mut values = BTreeMap::new();
                if !api.catalog_refresh_interval.is_empty() {
                    values.insert(
                        "CATALOG_REFRESH_INTERVAL".to_string(),
                        api.catalog_refresh_interval.clone(),
                    );
                }
                if !api.hub_config_url.is_empty() {
                    values.insert("CONFIG_FILE_URL".to_string(), api.hub_config_url.clone());
                }
                vec![add_config_map_values(API_CONFIG_MAP, values)]
            }
            Some(UI_SLOT) if !api.route_host_url.is_empty() => {
                vec![add_config_map_values(
                    UI_CONFIG_MAP,
                    BTreeMap::from([("API_URL".to_string(), api.route_host_url.clone())]),
                )]
            }
            _ => Vec::new(),
        }
    }

    /// Both secrets are managed outside the installer sets.
    fn user_provided(&self, _slot: &Slot) -> Vec<Predicate> {
        vec![by_kind("Secret")]
    }

    async fn check_dependencies(&self, env: &Env) -> Result<()> {
        if self.external_db() {
            self.validate_secret(env, self.db_secret_name(), DB_SECRET_KEYS)
                .await?;
        } else {
            self.ensure_db_secret(env).await?;
        }
        self.validate_secret(env, self.api_secret_name(), API_SECRET_KEYS)
            .await
    }

    async fn prepare_slot(&self, env: &Env, slot: &Slot, status: &ComponentStatus) -> Result<SlotPlan> {
        match slot.name {
            Some(DB_SLOT) if self.external_db() => {
                if status.installer_sets.contains_key(DB_SLOT) {
                    info!("hub switched to a user database, regenerating dependents");
                    env.transitions.mark(&transition_key::<Self>(DB_MIGRATION_SLOT));
                    env.transitions.mark(&transition_key::<Self>(API_SLOT));
                }
                Ok(SlotPlan::Skip)
            }
            Some(name @ (DB_MIGRATION_SLOT | API_SLOT)) => {
                if env.transitions.take(&transition_key::<Self>(name)) {
                    Ok(SlotPlan::Regenerate)
                } else {
                    Ok(SlotPlan::Install)
                }
            }
            _ => Ok(SlotPlan::Install),
        }
    }
}
