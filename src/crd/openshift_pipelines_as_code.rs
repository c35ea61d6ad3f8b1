use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::shared::{CommonSpec, ComponentStatus};
use super::TektonComponent;

/// OpenShiftPipelinesAsCode installs the pipelines-as-code controller,
/// watcher and webhook on OpenShift.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tekton.dev",
    version = "v1alpha1",
    kind = "OpenShiftPipelinesAsCode",
    status = "ComponentStatus",
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenShiftPipelinesAsCodeSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    /// Entries for the `pipelines-as-code` ConfigMap.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

impl TektonComponent for OpenShiftPipelinesAsCode {
    const RESOURCE_NAME: &'static str = "pipelines-as-code";

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
