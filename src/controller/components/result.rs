use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;

use crate::crd::shared::ComponentStatus;
use crate::crd::tekton_result::{TektonResult, DB_SECRET_KEYS, DB_SECRET_NAME};
use crate::error::{Error, Result};
use crate::manifest::client::get_as;
use crate::manifest::filter::{all, by_kind, by_name};
use crate::manifest::{Predicate, Transformer};

use super::super::component::{Component, Slot, SlotPlan};
use super::super::context::Env;
use super::super::transformers::add_config_map_values;
use super::hub::missing_keys;

/// Bundled database, dropped when the user runs their own.
const POSTGRES: &str = "tekton-results-postgres";
const API_CONFIG_MAP: &str = "tekton-results-api-config";

#[async_trait]
impl Component for TektonResult {
    const MANIFEST_DIR: &'static str = "tekton-results";
    const IMAGE_PREFIX: &'static str = "IMAGE_RESULTS_";
    const INSTALLER_TYPE: &'static str = "result";
    const OPERAND: &'static str = "tektoncd-results";

    /// Releases may ship `pre/` resources (database migrations) and `post/`
    /// resources installed once the API is up.
    fn slots(&self) -> Vec<Slot> {
        vec![Slot::pre(), Slot::single(), Slot::post()]
    }

    fn transformers(&self, _slot: &Slot) -> Vec<Transformer> {
        vec![add_config_map_values(API_CONFIG_MAP, self.spec.api_config.clone())]
    }

    fn user_provided(&self, _slot: &Slot) -> Vec<Predicate> {
        if !self.spec.is_external_db {
            return Vec::new();
        }
        vec![
            all(vec![by_kind("StatefulSet"), by_name(POSTGRES)]),
            all(vec![by_kind("Service"), by_name(POSTGRES)]),
            all(vec![by_kind("Secret"), by_name(DB_SECRET_NAME)]),
        ]
    }

    async fn prepare_slot(&self, env: &Env, _slot: &Slot, _status: &ComponentStatus) -> Result<SlotPlan> {
        if self.spec.disabled {
            return Ok(SlotPlan::Skip);
        }
        if self.spec.is_external_db {
            let ns = &self.spec.common.target_namespace;
            let secret = get_as::<Secret>(env.client(), DB_SECRET_NAME, Some(ns)).await?;
            let missing = missing_keys(secret.as_ref(), DB_SECRET_KEYS);
            if !missing.is_empty() {
                return Err(Error::DependencyMissing(format!(
                    "{DB_SECRET_NAME} secret in {ns} is missing keys: {}",
                    missing.join(", ")
                )));
            }
        }
        Ok(SlotPlan::Install)
    }
}
