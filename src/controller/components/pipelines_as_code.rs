use crate::crd::openshift_pipelines_as_code::OpenShiftPipelinesAsCode;
use crate::manifest::Transformer;

use super::super::component::{Component, Slot};
use super::super::transformers::add_config_map_values;

impl Component for OpenShiftPipelinesAsCode {
    const MANIFEST_DIR: &'static str = "pipelines-as-code";
    const IMAGE_PREFIX: &'static str = "IMAGE_PAC_";
    const INSTALLER_TYPE: &'static str = "pipelines-as-code";
    const OPERAND: &'static str = "pipelines-as-code";

    fn slots(&self) -> Vec<Slot> {
        vec![Slot::single(), Slot::post()]
    }

    fn transformers(&self, _slot: &Slot) -> Vec<Transformer> {
        vec![add_config_map_values(
            "pipelines-as-code",
            self.spec.settings.clone(),
        )]
    }
}
