use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::shared::{CommonSpec, ComponentStatus};
use super::TektonComponent;

/// Name of the database secret the operator generates when the user does
/// not bring one.
pub const DEFAULT_DB_SECRET_NAME: &str = "tekton-hub-db";
/// Name of the API secret the user must provide.
pub const DEFAULT_API_SECRET_NAME: &str = "tekton-hub-api";

pub const DB_SECRET_KEYS: &[&str] = &[
    "POSTGRES_HOST",
    "POSTGRES_DB",
    "POSTGRES_USER",
    "POSTGRES_PASSWORD",
    "POSTGRES_PORT",
];
pub const API_SECRET_KEYS: &[&str] = &[
    "GH_CLIENT_ID",
    "GH_CLIENT_SECRET",
    "JWT_SIGNING_KEY",
    "ACCESS_JWT_EXPIRES_IN",
    "REFRESH_JWT_EXPIRES_IN",
];

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbSpec {
    /// User-provided database secret; empty means the operator runs its own
    /// database.
    #[serde(default, rename = "secret", skip_serializing_if = "String::is_empty")]
    pub db_secret_name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiSpec {
    #[serde(default, rename = "secret", skip_serializing_if = "String::is_empty")]
    pub api_secret_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hub_config_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route_host_url: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub catalog_refresh_interval: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub org: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
}

/// TektonHub installs the hub database, its migration job, API and UI.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tekton.dev",
    version = "v1alpha1",
    kind = "TektonHub",
    status = "TektonHubStatus",
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name": "ApiUrl", "type": "string", "jsonPath": ".status.apiUrl"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TektonHubSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    #[serde(default)]
    pub db: DbSpec,

    #[serde(default)]
    pub api: ApiSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub catalogs: Vec<Catalog>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TektonHubStatus {
    #[serde(flatten)]
    pub component: ComponentStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_url: Option<String>,
}

impl TektonHub {
    /// Whether the user supplies the database.
    pub fn external_db(&self) -> bool {
        !self.spec.db.db_secret_name.is_empty()
    }

    pub fn db_secret_name(&self) -> &str {
        if self.external_db() {
            &self.spec.db.db_secret_name
        } else {
            DEFAULT_DB_SECRET_NAME
        }
    }

    pub fn api_secret_name(&self) -> &str {
        if self.spec.api.api_secret_name.is_empty() {
            DEFAULT_API_SECRET_NAME
        } else {
            &self.spec.api.api_secret_name
        }
    }
}

impl TektonComponent for TektonHub {
    const RESOURCE_NAME: &'static str = "hub";

    fn common(&self) -> &CommonSpec {
        &self.spec.common
    }

    fn common_mut(&mut self) -> &mut CommonSpec {
        &mut self.spec.common
    }

    fn component_status(&self) -> Option<&ComponentStatus> {
        self.status.as_ref().map(|s| &s.component)
    }
}
