use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::conditions::{self, ConditionSet};
use super::shared::preserve_unknown_list;

// ── Labels & annotations ──────────────────────────────────────────────────────

pub const CREATED_BY_KEY: &str = "operator.tekton.dev/created-by";
pub const INSTALLER_TYPE_KEY: &str = "operator.tekton.dev/installer-type";
pub const COMPONENT_KEY: &str = "operator.tekton.dev/component";
pub const RELEASE_VERSION_KEY: &str = "operator.tekton.dev/release-version";
pub const TARGET_NAMESPACE_KEY: &str = "operator.tekton.dev/target-namespace";
pub const LAST_APPLIED_HASH_KEY: &str = "operator.tekton.dev/last-applied-hash";

pub const FINALIZER: &str = "operator.tekton.dev/installerset-finalizer";

// ── Conditions ────────────────────────────────────────────────────────────────

pub const CRDS_INSTALLED: &str = "CRDsInstalled";
pub const CLUSTER_SCOPED_INSTALLED: &str = "ClusterScopedInstalled";
pub const NAMESPACE_SCOPED_INSTALLED: &str = "NamespaceScopedInstalled";
pub const JOBS_INSTALLED: &str = "JobsInstalled";
pub const DEPLOYMENTS_AVAILABLE: &str = "DeploymentsAvailable";
pub const STATEFULSET_READY: &str = "StatefulSetReady";
pub const WEBHOOK_READY: &str = "WebhookReady";
pub const CONTROLLER_READY: &str = "ControllerReady";
pub const ALL_DEPLOYMENTS_READY: &str = "AllDeploymentsReady";

pub const INSTALLER_SET_CONDITIONS: ConditionSet = ConditionSet::new(&[
    CRDS_INSTALLED,
    CLUSTER_SCOPED_INSTALLED,
    NAMESPACE_SCOPED_INSTALLED,
    JOBS_INSTALLED,
    DEPLOYMENTS_AVAILABLE,
    STATEFULSET_READY,
    WEBHOOK_READY,
    CONTROLLER_READY,
    ALL_DEPLOYMENTS_READY,
]);

// ── CRD ───────────────────────────────────────────────────────────────────────

/// TektonInstallerSet carries a rendered manifest and converges the cluster
/// to it, phase by phase.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tekton.dev",
    version = "v1alpha1",
    kind = "TektonInstallerSet",
    shortname = "tis",
    status = "TektonInstallerSetStatus",
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name": "Reason", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].reason"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
pub struct TektonInstallerSetSpec {
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_list")]
    pub manifests: Vec<Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TektonInstallerSetStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl TektonInstallerSet {
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }

    pub fn ready_condition(&self) -> Option<&Condition> {
        conditions::find(self.conditions(), conditions::READY)
    }

    pub fn is_ready(&self) -> bool {
        conditions::is_ready(self.conditions())
    }
}
