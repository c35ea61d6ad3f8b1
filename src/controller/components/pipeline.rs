use crate::crd::tekton_pipeline::TektonPipeline;
use crate::manifest::Transformer;

use super::super::component::{Component, Slot};
use super::super::transformers::add_config_map_values;

impl Component for TektonPipeline {
    const MANIFEST_DIR: &'static str = "tekton-pipeline";
    const IMAGE_PREFIX: &'static str = "IMAGE_PIPELINES_";
    const INSTALLER_TYPE: &'static str = "pipeline";
    const OPERAND: &'static str = "tektoncd-pipelines";

    fn transformers(&self, _slot: &Slot) -> Vec<Transformer> {
        vec![
            add_config_map_values("feature-flags", self.spec.pipeline.feature_flags.clone()),
            add_config_map_values("config-defaults", self.spec.pipeline.defaults.clone()),
        ]
    }
}
