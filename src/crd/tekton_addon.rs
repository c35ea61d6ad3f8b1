use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::shared::{params_map, CommonSpec, ComponentStatus, Param};
use super::TektonComponent;

pub const CLUSTER_TASKS_PARAM: &str = "clusterTasks";
pub const PIPELINE_TEMPLATES_PARAM: &str = "pipelineTemplates";
pub const RESOLVER_TASKS_PARAM: &str = "resolverTasks";

/// TektonAddon installs optional cluster tasks and pipeline templates.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tekton.dev",
    version = "v1alpha1",
    kind = "TektonAddon",
    status = "ComponentStatus",
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TektonAddonSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

impl TektonAddon {
    /// Boolean addon parameter; anything but `false` counts as enabled.
    pub fn enabled(&self, param: &str) -> bool {
        params_map(&self.spec.params)
            .get(param)
            .is_none_or(|v| v != "false")
    }
}

impl TektonComponent for TektonAddon {
    const RESOURCE_NAME: &'static str = "addon";

    fn common(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn common_mut(&mut self) -> &mut CommonSpec {
        &mut self.spec.common
    }

    fn component_status(&self) -> Option<&ComponentStatus> {
        self.status.as_ref()
    }
}
