use async_trait::async_trait;

use crate::crd::conditions::ConditionSet;
use crate::crd::shared::{ComponentStatus, POST_RECONCILE, PRE_RECONCILE};
use crate::crd::tekton_addon::{
    TektonAddon, CLUSTER_TASKS_PARAM, PIPELINE_TEMPLATES_PARAM, RESOLVER_TASKS_PARAM,
};
use crate::error::Result;

use super::super::component::{Component, Slot, SlotPlan};
use super::super::context::Env;

pub const CLUSTER_TASKS_AVAILABLE: &str = "ClusterTasksInstallerSetAvailable";
pub const PIPELINE_TEMPLATES_AVAILABLE: &str = "PipelineTemplatesInstallerSetAvailable";
pub const RESOLVER_TASKS_AVAILABLE: &str = "ResolverTasksInstallerSetAvailable";

pub const ADDON_CONDITIONS: ConditionSet = ConditionSet::new(&[
    PRE_RECONCILE,
    CLUSTER_TASKS_AVAILABLE,
    PIPELINE_TEMPLATES_AVAILABLE,
    RESOLVER_TASKS_AVAILABLE,
    POST_RECONCILE,
]);

/// Parameter switching each slot on or off.
fn slot_param(slot: &Slot) -> &'static str {
    match slot.name {
        Some("pipeline-templates") => PIPELINE_TEMPLATES_PARAM,
        Some("resolver-tasks") => RESOLVER_TASKS_PARAM,
        _ => CLUSTER_TASKS_PARAM,
    }
}

#[async_trait]
impl Component for TektonAddon {
    const MANIFEST_DIR: &'static str = "tekton-addon";
    const IMAGE_PREFIX: &'static str = "IMAGE_ADDONS_";
    const INSTALLER_TYPE: &'static str = "addon";
    const OPERAND: &'static str = "tektoncd-addons";
    const CONDITIONS: ConditionSet = ADDON_CONDITIONS;

    fn slots(&self) -> Vec<Slot> {
        vec![
            Slot::named("cluster-tasks", CLUSTER_TASKS_AVAILABLE),
            Slot::named("pipeline-templates", PIPELINE_TEMPLATES_AVAILABLE),
            Slot::named("resolver-tasks", RESOLVER_TASKS_AVAILABLE),
        ]
    }

    async fn prepare_slot(&self, _env: &Env, slot: &Slot, _status: &ComponentStatus) -> Result<SlotPlan> {
        Ok(if self.enabled(slot_param(slot)) {
            SlotPlan::Install
        } else {
            SlotPlan::Skip
        })
    }
}
