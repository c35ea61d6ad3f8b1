use async_trait::async_trait;

use crate::crd::shared::ComponentStatus;
use crate::crd::tekton_pruner::TektonPruner;
use crate::error::Result;
use crate::manifest::Transformer;

use super::super::component::{Component, Slot, SlotPlan};
use super::super::context::Env;
use super::super::transformers::add_config_map_values;

const DEFAULT_SPEC_CONFIG_MAP: &str = "tekton-pruner-default-spec";

#[async_trait]
impl Component for TektonPruner {
    const MANIFEST_DIR: &'static str = "tekton-pruner";
    const IMAGE_PREFIX: &'static str = "IMAGE_PRUNER_";
    const INSTALLER_TYPE: &'static str = "pruner";
    const OPERAND: &'static str = "tektoncd-pruner";

    fn transformers(&self, _slot: &Slot) -> Vec<Transformer> {
        vec![add_config_map_values(
            DEFAULT_SPEC_CONFIG_MAP,
            self.spec.global_config.clone(),
        )]
    }

    async fn prepare_slot(&self, _env: &Env, _slot: &Slot, _status: &ComponentStatus) -> Result<SlotPlan> {
        Ok(if self.spec.disabled {
            SlotPlan::Skip
        } else {
            SlotPlan::Install
        })
    }
}
