//! Phase-ordered installation of an installer set's manifest.
//!
//! The manifest stored in `spec.manifests` is split into buckets (CRDs,
//! cluster-scoped, namespace-scoped, Jobs, Deployments with their Services,
//! StatefulSets) and each bucket is converged by one [`Phase`] in that order.
//! A phase that fails or is still waiting stops the pass; its condition says
//! why and the installer set controller requeues.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, OwnerReference};
use kube::api::PropagationPolicy;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::crd::tekton_installer_set::{TektonInstallerSet, INSTALLER_SET_CONDITIONS};
use crate::error::{Error, Result};
use crate::manifest::filter::{any, by_kind, crds, not};
use crate::manifest::{is_cluster_scoped, kind_of, DeleteOptions, Manifest, ResourceClient, Transformer};

use super::helpers::controller_owner_ref;
use super::phases::{phases, Outcome};

/// Cluster-scoped kinds outside the built-in table that still belong in the
/// cluster-scoped phase.
pub const EXTRA_CLUSTER_KINDS: &[&str] = &[
    "ClusterInterceptor",
    "ClusterTask",
    "ClusterTriggerBinding",
    "ConsoleCLIDownload",
    "ConsoleQuickStart",
    "ConsoleYAMLSample",
];

// ── Buckets ───────────────────────────────────────────────────────────────────

/// The manifest of one installer set, split by installation phase.
#[derive(Clone, Debug, Default)]
pub struct Buckets {
    pub crds: Manifest,
    pub cluster_scoped: Manifest,
    pub namespace_scoped: Manifest,
    pub jobs: Manifest,
    pub deployments: Manifest,
    pub stateful_sets: Manifest,
}

impl Buckets {
    pub fn split(manifest: &Manifest) -> Self {
        let mut buckets: [Vec<_>; 6] = Default::default();
        for resource in manifest.resources() {
            let kind = kind_of(resource);
            let slot = match kind {
                "CustomResourceDefinition" => 0,
                "Job" => 3,
                "Deployment" | "Service" => 4,
                "StatefulSet" => 5,
                "ClusterRoleBinding" => 2,
                k if EXTRA_CLUSTER_KINDS.contains(&k) || is_cluster_scoped(k) => 1,
                _ => 2,
            };
            buckets[slot].push(resource.clone());
        }
        let [crds, cluster_scoped, namespace_scoped, jobs, deployments, stateful_sets] =
            buckets.map(Manifest::new);
        Self {
            crds,
            cluster_scoped,
            namespace_scoped,
            jobs,
            deployments,
            stateful_sets,
        }
    }
}

// ── Progress ──────────────────────────────────────────────────────────────────

/// Condition writer handed to phases.
pub struct Progress<'a> {
    conditions: &'a mut Vec<Condition>,
    generation: Option<i64>,
}

impl<'a> Progress<'a> {
    pub fn new(conditions: &'a mut Vec<Condition>, generation: Option<i64>) -> Self {
        INSTALLER_SET_CONDITIONS.initialize(conditions, generation);
        Self {
            conditions,
            generation,
        }
    }

    pub fn mark_true(&mut self, type_: &str) {
        INSTALLER_SET_CONDITIONS.mark_true(self.conditions, type_, self.generation);
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        INSTALLER_SET_CONDITIONS.mark_false(self.conditions, type_, reason, message, self.generation);
    }

    pub fn mark_not_ready(&mut self, message: &str) {
        INSTALLER_SET_CONDITIONS.mark_not_ready(self.conditions, "Error", message, self.generation);
    }
}

// ── Ownership ─────────────────────────────────────────────────────────────────

const SET_OWNER_EXCLUDED: &[&str] = &[
    "CustomResourceDefinition",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
    "Namespace",
];

/// The installer set controls everything but CRDs, Namespaces and webhook
/// configurations.
fn inject_set_owner(owner: OwnerReference) -> Transformer {
    Box::new(move |u| {
        if !SET_OWNER_EXCLUDED.contains(&kind_of(u)) {
            u.metadata.owner_references = Some(vec![owner.clone()]);
        }
        Ok(())
    })
}

/// CRDs and Namespaces inherit the installer set's own owners so they
/// outlive the set.
fn inject_crd_and_namespace_owner(owners: Vec<OwnerReference>) -> Transformer {
    Box::new(move |u| {
        if !owners.is_empty() && matches!(kind_of(u), "CustomResourceDefinition" | "Namespace") {
            u.metadata.owner_references = Some(owners.clone());
        }
        Ok(())
    })
}

/// Rehydrate the stored manifest and stamp ownership.
pub fn owned_manifest(set: &TektonInstallerSet) -> Result<Manifest> {
    Manifest::from_values(set.spec.manifests.clone())?.transform(&[
        inject_set_owner(controller_owner_ref(set)),
        inject_crd_and_namespace_owner(set.owner_references().to_vec()),
    ])
}

// ── Install / uninstall ───────────────────────────────────────────────────────

/// Converge the cluster to the installer set, writing phase conditions into
/// `conditions`.  `ReconcileAgain` means a phase is waiting.
pub async fn install(
    client: &dyn ResourceClient,
    set: &TektonInstallerSet,
    conditions: &mut Vec<Condition>,
) -> Result<()> {
    let name = set.name_any();
    let mut progress = Progress::new(conditions, set.metadata.generation);

    let manifest = match owned_manifest(set) {
        Ok(m) => m,
        Err(e) => {
            progress.mark_not_ready(&format!("Internal Error: failed to create manifest: {e}"));
            return Err(e);
        }
    };
    let buckets = Buckets::split(&manifest);

    for phase in phases() {
        match phase.ensure(client, &buckets, &mut progress).await {
            Ok(Outcome::Done) => progress.mark_true(phase.condition()),
            Ok(Outcome::Waiting) => {
                debug!(%name, phase = phase.condition(), "waiting");
                return Err(Error::ReconcileAgain);
            }
            Err(e) => {
                info!(%name, phase = phase.condition(), %e, "phase failed");
                progress.mark_false(
                    phase.condition(),
                    "Error",
                    &format!("Install failed with message: {e}"),
                );
                return Err(e);
            }
        }
    }
    debug!(%name, "all phases converged");
    Ok(())
}

/// Remove what the installer set created, last first.  Namespaces, CRDs and
/// PersistentVolumeClaims are left in place.
pub async fn uninstall(client: &dyn ResourceClient, set: &TektonInstallerSet) -> Result<()> {
    let manifest = Manifest::from_values(set.spec.manifests.clone())?;
    let keep = any(vec![
        by_kind("Namespace"),
        crds(),
        by_kind("PersistentVolumeClaim"),
    ]);
    info!(name = %set.name_any(), "deleting installer set resources");
    manifest
        .filter(&[not(keep)])
        .delete(
            client,
            &DeleteOptions {
                propagation_policy: Some(PropagationPolicy::Foreground),
                ignore_not_found: true,
            },
        )
        .await
}

