use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use schemars::gen::SchemaGenerator;
use schemars::schema::{ArrayValidation, InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conditions::ConditionSet;

// ── Schemas for free-form fields ──────────────────────────────────────────────

fn preserved_object() -> SchemaObject {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".into(), Value::Bool(true));
    schema
}

/// An object whose content the API server stores untouched.
pub fn preserve_unknown_object(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(preserved_object())
}

/// A list of untyped objects (rendered Kubernetes resources).
pub fn preserve_unknown_list(_: &mut SchemaGenerator) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::Array.into()),
        array: Some(Box::new(ArrayValidation {
            items: Some(Schema::Object(preserved_object()).into()),
            ..Default::default()
        })),
        ..Default::default()
    })
}

// ── Spec building blocks ──────────────────────────────────────────────────────

/// Fields every component custom resource carries.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommonSpec {
    /// Namespace the component is installed into.
    #[serde(default)]
    pub target_namespace: String,

    /// Release to install; the operator's own release when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// User overrides merged into the rendered resources last.
    #[serde(default, skip_serializing_if = "AdditionalOptions::is_empty")]
    pub options: AdditionalOptions,

    #[serde(default, skip_serializing_if = "Config::is_empty")]
    pub config: Config,
}

/// Scheduling knobs applied to every workload of a component.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

impl Config {
    pub fn is_empty(&self) -> bool {
        self.node_selector.is_empty()
            && self.tolerations.is_empty()
            && self.priority_class_name.is_none()
    }
}

/// Overrides keyed by resource name.  Deployment and StatefulSet entries are
/// partial objects merged strategically; ConfigMap entries either patch a
/// rendered ConfigMap or add a new one to the target namespace.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_maps: BTreeMap<String, ConfigMapOptions>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub deployments: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub stateful_sets: BTreeMap<String, Value>,
}

impl AdditionalOptions {
    pub fn is_empty(&self) -> bool {
        self.disabled.is_none()
            && self.config_maps.is_empty()
            && self.deployments.is_empty()
            && self.stateful_sets.is_empty()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ConfigMapOptions {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

/// A named string parameter.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: String,
}

pub fn params_map(params: &[Param]) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect()
}

// ── Status ────────────────────────────────────────────────────────────────────

pub const PRE_RECONCILE: &str = "PreReconcile";
pub const INSTALLER_SET_AVAILABLE: &str = "InstallerSetAvailable";
pub const POST_RECONCILE: &str = "PostReconcile";
pub const DEPENDENCIES_INSTALLED: &str = "DependenciesInstalled";

/// Conditions of a component with a single installer set.
pub const COMPONENT_CONDITIONS: ConditionSet =
    ConditionSet::new(&[PRE_RECONCILE, INSTALLER_SET_AVAILABLE, POST_RECONCILE]);

/// Status shared by every component custom resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Release currently installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Installer sets created for this component, keyed by slot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub installer_sets: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
