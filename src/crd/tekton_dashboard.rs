use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::shared::{CommonSpec, ComponentStatus};
use super::TektonComponent;

/// TektonDashboard installs the web dashboard.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tekton.dev",
    version = "v1alpha1",
    kind = "TektonDashboard",
    status = "ComponentStatus",
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TektonDashboardSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    /// Install the read-only flavour.
    #[serde(default = "default_readonly")]
    pub readonly: bool,
}

fn default_readonly() -> bool {
    true
}

impl TektonDashboard {
    /// Manifest flavour directory for the requested mode.
    pub fn flavour(&self) -> &'static str {
        if self.spec.readonly {
            "read-only"
        } else {
            "read-write"
        }
    }
}

impl TektonComponent for TektonDashboard {
    const RESOURCE_NAME: &'static str = "dashboard";

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
