//! Platform extension points.
//!
//! Component reconcilers call into an [`Extension`] around their own work:
//! extra transformers for every rendered resource, and hooks before and after
//! the installer sets are reconciled.  Kubernetes runs the [`NoopExtension`];
//! OpenShift swaps in [`OpenShiftExtension`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, KeyToPath, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use tracing::debug;

use crate::error::Result;
use crate::manifest::client::to_dynamic;
use crate::manifest::{ApplyOptions, Manifest, ResourceClient, Transformer};

use super::transformers::{add_config_map_values, annotate_pod_template, edit_pod_spec};

/// The component an extension hook runs for.
#[derive(Clone, Debug)]
pub struct ExtensionTarget {
    /// Kind of the component custom resource (`TektonPipeline`, ...).
    pub kind: String,
    pub name: String,
    pub target_namespace: String,
    /// Controller reference to the component custom resource.
    pub owner: OwnerReference,
}

#[async_trait]
pub trait Extension: Send + Sync {
    /// Extra transformers run after the common ones.
    fn transformers(&self, target: &ExtensionTarget) -> Vec<Transformer>;

    /// Runs before any installer set is touched.  `ReconcileAgain` requeues.
    async fn pre_reconcile(&self, client: &dyn ResourceClient, target: &ExtensionTarget)
        -> Result<()>;

    /// Runs once every installer set of the component is ready.
    async fn post_reconcile(
        &self,
        client: &dyn ResourceClient,
        target: &ExtensionTarget,
    ) -> Result<()>;

    /// Runs when the component custom resource is deleted.
    async fn finalize(&self, client: &dyn ResourceClient, target: &ExtensionTarget) -> Result<()>;
}

/// Baseline for vanilla Kubernetes.
pub struct NoopExtension;

#[async_trait]
impl Extension for NoopExtension {
    fn transformers(&self, _target: &ExtensionTarget) -> Vec<Transformer> {
        Vec::new()
    }

    async fn pre_reconcile(&self, _: &dyn ResourceClient, _: &ExtensionTarget) -> Result<()> {
        Ok(())
    }

    async fn post_reconcile(&self, _: &dyn ResourceClient, _: &ExtensionTarget) -> Result<()> {
        Ok(())
    }

    async fn finalize(&self, _: &dyn ResourceClient, _: &ExtensionTarget) -> Result<()> {
        Ok(())
    }
}

// ── OpenShift ─────────────────────────────────────────────────────────────────

pub const SCC_ANNOTATION: &str = "openshift.io/required-scc";
pub const PIPELINES_SCC: &str = "pipelines-scc";
pub const SCC_ROLE_BINDING: &str = "pipelines-scc-rolebinding";
pub const SCC_CLUSTER_ROLE: &str = "pipelines-scc-clusterrole";

pub const TRUSTED_CA_CONFIG_MAP: &str = "config-trusted-cabundle";
pub const TRUSTED_CA_LABEL: &str = "config.openshift.io/inject-trusted-cabundle";
pub const SERVICE_CA_CONFIG_MAP: &str = "config-service-cabundle";
pub const SERVICE_CA_ANNOTATION: &str = "service.beta.openshift.io/inject-cabundle";

const TRUSTED_CA_VOLUME: &str = "config-trusted-cabundle-volume";
const TRUSTED_CA_KEY: &str = "ca-bundle.crt";
const SERVICE_CA_VOLUME: &str = "config-service-cabundle-volume";
const SERVICE_CA_KEY: &str = "service-ca.crt";
const DEFAULT_CERT_DIR: &str = "/tekton-custom-certs";

const DEFAULT_SERVICE_ACCOUNT: &str = "pipeline";

/// OpenShift overlay: SCC annotations on workloads, CA bundle injection and
/// the pipelines SCC role binding in the target namespace.
pub struct OpenShiftExtension;

fn ca_volume(volume: &str, config_map: &str, key: &str) -> Volume {
    Volume {
        name: volume.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config_map.to_string(),
            items: Some(vec![KeyToPath {
                key: key.to_string(),
                path: key.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Mount the trusted and service CA bundles into every Deployment container,
/// under the first entry of its `SSL_CERT_DIR`.
pub fn apply_ca_bundles() -> Transformer {
    Box::new(|u| {
        edit_pod_spec(u, &["Deployment"], |spec| {
            let volumes = spec.volumes.get_or_insert_with(Vec::new);
            volumes.retain(|v| v.name != TRUSTED_CA_VOLUME && v.name != SERVICE_CA_VOLUME);
            volumes.push(ca_volume(TRUSTED_CA_VOLUME, TRUSTED_CA_CONFIG_MAP, TRUSTED_CA_KEY));
            volumes.push(ca_volume(SERVICE_CA_VOLUME, SERVICE_CA_CONFIG_MAP, SERVICE_CA_KEY));

            for container in spec.containers.iter_mut() {
                let cert_dir = container
                    .env
                    .iter()
                    .flatten()
                    .find(|e| e.name == "SSL_CERT_DIR")
                    .and_then(|e| e.value.as_deref())
                    .and_then(|v| v.split(':').next())
                    .filter(|v| !v.is_empty())
                    .unwrap_or(DEFAULT_CERT_DIR)
                    .trim_end_matches('/')
                    .to_string();
                let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
                mounts.retain(|m| m.name != TRUSTED_CA_VOLUME && m.name != SERVICE_CA_VOLUME);
                for (volume, key) in [
                    (TRUSTED_CA_VOLUME, TRUSTED_CA_KEY),
                    (SERVICE_CA_VOLUME, SERVICE_CA_KEY),
                ] {
                    mounts.push(VolumeMount {
                        name: volume.to_string(),
                        mount_path: format!("{cert_dir}/{key}"),
                        sub_path: Some(key.to_string()),
                        read_only: Some(true),
                        ..Default::default()
                    });
                }
            }
        })
    })
}

fn required_scc() -> Transformer {
    Box::new(|u| {
        annotate_pod_template(u, SCC_ANNOTATION, PIPELINES_SCC);
        Ok(())
    })
}

impl OpenShiftExtension {
    fn prerequisites(&self, target: &ExtensionTarget) -> Result<Manifest> {
        let ns = &target.target_namespace;
        let meta = |name: &str| ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.clone()),
            owner_references: Some(vec![target.owner.clone()]),
            ..Default::default()
        };

        let trusted = ConfigMap {
            metadata: ObjectMeta {
                labels: Some(BTreeMap::from([(TRUSTED_CA_LABEL.to_string(), "true".to_string())])),
                ..meta(TRUSTED_CA_CONFIG_MAP)
            },
            ..Default::default()
        };
        let service = ConfigMap {
            metadata: ObjectMeta {
                annotations: Some(BTreeMap::from([(
                    SERVICE_CA_ANNOTATION.to_string(),
                    "true".to_string(),
                )])),
                ..meta(SERVICE_CA_CONFIG_MAP)
            },
            ..Default::default()
        };
        let binding = RoleBinding {
            metadata: meta(SCC_ROLE_BINDING),
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: SCC_CLUSTER_ROLE.to_string(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: DEFAULT_SERVICE_ACCOUNT.to_string(),
                namespace: Some(ns.clone()),
                ..Default::default()
            }]),
        };

        Ok(Manifest::new(vec![
            to_dynamic(&trusted)?,
            to_dynamic(&service)?,
            to_dynamic(&binding)?,
        ]))
    }
}

#[async_trait]
impl Extension for OpenShiftExtension {
    fn transformers(&self, target: &ExtensionTarget) -> Vec<Transformer> {
        let mut out = vec![required_scc(), apply_ca_bundles()];
        if target.kind == "TektonPipeline" {
            out.push(add_config_map_values(
                "config-defaults",
                BTreeMap::from([(
                    "default-service-account".to_string(),
                    DEFAULT_SERVICE_ACCOUNT.to_string(),
                )]),
            ));
            out.push(add_config_map_values(
                "feature-flags",
                BTreeMap::from([("disable-affinity-assistant".to_string(), "true".to_string())]),
            ));
        }
        out
    }

    async fn pre_reconcile(&self, client: &dyn ResourceClient, target: &ExtensionTarget) -> Result<()> {
        debug!(kind = %target.kind, ns = %target.target_namespace, "ensuring CA bundles and SCC binding");
        self.prerequisites(target)?
            .apply(client, &ApplyOptions::default())
            .await
    }

    async fn post_reconcile(&self, _: &dyn ResourceClient, _: &ExtensionTarget) -> Result<()> {
        Ok(())
    }

    async fn finalize(&self, _: &dyn ResourceClient, _: &ExtensionTarget) -> Result<()> {
        Ok(())
    }
}
