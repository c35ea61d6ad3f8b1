use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::shared::{CommonSpec, ComponentStatus};
use super::TektonComponent;

/// Secret holding the database credentials when the database is external.
pub const DB_SECRET_NAME: &str = "tekton-results-postgres";
pub const DB_SECRET_KEYS: &[&str] = &["POSTGRES_USER", "POSTGRES_PASSWORD"];

/// TektonResult installs the results API and watcher.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tekton.dev",
    version = "v1alpha1",
    kind = "TektonResult",
    status = "ComponentStatus",
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TektonResultSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    #[serde(default)]
    pub disabled: bool,

    /// Use a database the user runs instead of the bundled one.
    #[serde(default, rename = "is_external_db")]
    pub is_external_db: bool,

    /// Entries for the `tekton-results-api-config` ConfigMap.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub api_config: BTreeMap<String, String>,
}

impl TektonComponent for TektonResult {
    const RESOURCE_NAME: &'static str = "result";

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
