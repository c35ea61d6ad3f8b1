use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::shared::{CommonSpec, ComponentStatus};
use super::TektonComponent;

/// TektonPruner installs the event based pruner for finished runs.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tekton.dev",
    version = "v1alpha1",
    kind = "TektonPruner",
    status = "ComponentStatus",
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TektonPrunerSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    #[serde(default)]
    pub disabled: bool,

    /// Entries for the `tekton-pruner-default-spec` ConfigMap.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub global_config: BTreeMap<String, String>,
}

impl TektonComponent for TektonPruner {
    const RESOURCE_NAME: &'static str = "pruner";

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
