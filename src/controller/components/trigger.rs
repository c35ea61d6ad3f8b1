use crate::crd::tekton_trigger::TektonTrigger;
use crate::manifest::Transformer;

use super::super::component::{Component, Slot};
use super::super::transformers::add_config_map_values;

impl Component for TektonTrigger {
    const MANIFEST_DIR: &'static str = "tekton-trigger";
    const IMAGE_PREFIX: &'static str = "IMAGE_TRIGGERS_";
    const INSTALLER_TYPE: &'static str = "trigger";
    const OPERAND: &'static str = "tektoncd-triggers";

    fn transformers(&self, _slot: &Slot) -> Vec<Transformer> {
        vec![
            add_config_map_values(
                "feature-flags-triggers",
                self.spec.trigger.feature_flags.clone(),
            ),
            add_config_map_values("config-defaults-triggers", self.spec.trigger.defaults.clone()),
        ]
    }
}
