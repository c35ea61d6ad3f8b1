use async_trait::async_trait;

use crate::crd::shared::ComponentStatus;
use crate::crd::tekton_chain::TektonChain;
use crate::error::Result;
use crate::manifest::Transformer;

use super::super::component::{Component, Slot, SlotPlan};
use super::super::context::Env;
use super::super::transformers::add_config_map_values;

#[async_trait]
impl Component for TektonChain {
    const MANIFEST_DIR: &'static str = "tekton-chains";
    const IMAGE_PREFIX: &'static str = "IMAGE_CHAINS_";
    const INSTALLER_TYPE: &'static str = "chain";
    const OPERAND: &'static str = "tektoncd-chains";

    fn transformers(&self, _slot: &Slot) -> Vec<Transformer> {
        vec![add_config_map_values(
            "chains-config",
            self.spec.chains_config.clone(),
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
