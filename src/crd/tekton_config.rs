use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::ConditionSet;
use super::shared::{CommonSpec, ComponentStatus, Param};
use super::tekton_hub::{ApiSpec, DbSpec};
use super::tekton_pipeline::PipelineProperties;
use super::tekton_trigger::TriggerProperties;
use super::TektonComponent;

pub const PROFILE_LITE: &str = "lite";
pub const PROFILE_BASIC: &str = "basic";
pub const PROFILE_ALL: &str = "all";

pub const PRE_INSTALL: &str = "PreInstall";
pub const COMPONENTS_READY: &str = "ComponentsReady";
pub const POST_INSTALL: &str = "PostInstall";
pub const PRE_UPGRADE: &str = "PreUpgrade";
pub const POST_UPGRADE: &str = "PostUpgrade";

pub const CONFIG_CONDITIONS: ConditionSet = ConditionSet::new(&[
    PRE_UPGRADE,
    PRE_INSTALL,
    COMPONENTS_READY,
    POST_INSTALL,
    POST_UPGRADE,
]);

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainOptions {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub chains_config: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultOptions {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, rename = "is_external_db")]
    pub is_external_db: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub api_config: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOptions {
    #[serde(default = "default_true")]
    pub readonly: bool,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self { readonly: true }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddonOptions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// Presence of this block requests a hub installation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HubOptions {
    #[serde(default)]
    pub db: DbSpec,
    #[serde(default)]
    pub api: ApiSpec,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrunerOptions {
    #[serde(default = "default_true")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub global_config: BTreeMap<String, String>,
}

impl Default for PrunerOptions {
    fn default() -> Self {
        Self {
            disabled: true,
            global_config: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelinesAsCodeOptions {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_profile() -> String {
    PROFILE_BASIC.to_string()
}

/// TektonConfig drives the whole stack from a single resource.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tekton.dev",
    version = "v1alpha1",
    kind = "TektonConfig",
    status = "TektonConfigStatus",
    printcolumn = r#"{"name": "Profile", "type": "string", "jsonPath": ".spec.profile"}"#,
    printcolumn = r#"{"name": "Version", "type": "string", "jsonPath": ".status.version"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name": "Reason", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TektonConfigSpec {
    #[serde(flatten)]
    pub common: CommonSpec,

    /// `lite`, `basic` or `all`.
    #[serde(default = "default_profile")]
    pub profile: String,

    #[serde(default)]
    pub pipeline: PipelineProperties,

    #[serde(default)]
    pub trigger: TriggerProperties,

    #[serde(default)]
    pub chain: ChainOptions,

    #[serde(default)]
    pub result: ResultOptions,

    #[serde(default)]
    pub dashboard: DashboardOptions,

    #[serde(default)]
    pub addon: AddonOptions,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<HubOptions>,

    #[serde(default)]
    pub pruner: PrunerOptions,

    #[serde(default)]
    pub pipelines_as_code: PipelinesAsCodeOptions,
}

impl Default for TektonConfigSpec {
    fn default() -> Self {
        Self {
            common: CommonSpec::default(),
            profile: default_profile(),
            pipeline: PipelineProperties::default(),
            trigger: TriggerProperties::default(),
            chain: ChainOptions::default(),
            result: ResultOptions::default(),
            dashboard: DashboardOptions::default(),
            addon: AddonOptions::default(),
            hub: None,
            pruner: PrunerOptions::default(),
            pipelines_as_code: PipelinesAsCodeOptions::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TektonConfigStatus {
    #[serde(flatten)]
    pub component: ComponentStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Operator release whose pre-upgrade steps have run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_upgrade_version: Option<String>,

    /// Operator release whose post-upgrade steps have run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_upgrade_version: Option<String>,
}

impl TektonComponent for TektonConfig {
    const RESOURCE_NAME: &'static str = "config";

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
