//! Installer set registry.
//!
//! Installer sets are found by label: `created-by` (the component kind),
//! `installer-type` and, for components that produce several sets, the
//! `component` slot.  At most one set may match a selector; duplicates are
//! collapsed by deleting all of them and reconciling again.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::crd::conditions::{self, STATUS_FALSE, STATUS_TRUE};
use crate::crd::tekton_installer_set::{
    TektonInstallerSet, TektonInstallerSetSpec, COMPONENT_KEY, CREATED_BY_KEY, INSTALLER_TYPE_KEY,
    LAST_APPLIED_HASH_KEY, RELEASE_VERSION_KEY, TARGET_NAMESPACE_KEY,
};
use crate::error::{Error, Result};
use crate::manifest::client::{create_as, delete_as, get_as, list_as, update_as};
use crate::manifest::{Manifest, ObjectKey, ResourceClient};

/// Everything that identifies one installer set and what it must look like.
#[derive(Clone, Debug)]
pub struct SetRequest {
    /// Kind of the component custom resource.
    pub created_by: String,
    pub installer_type: String,
    /// Slot name, for components with several installer sets.
    pub component: Option<String>,
    pub version: String,
    pub target_namespace: String,
    /// Hash of the component spec the manifest was rendered from.
    pub spec_hash: String,
    pub owner: OwnerReference,
}

impl SetRequest {
    /// Selector matching every installer set of this slot, whatever its
    /// version.
    pub fn selector(&self) -> String {
        let mut selector = format!(
            "{CREATED_BY_KEY}={},{INSTALLER_TYPE_KEY}={}",
            self.created_by, self.installer_type
        );
        if let Some(component) = &self.component {
            selector.push_str(&format!(",{COMPONENT_KEY}={component}"));
        }
        selector
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::from([
            (CREATED_BY_KEY.to_string(), self.created_by.clone()),
            (INSTALLER_TYPE_KEY.to_string(), self.installer_type.clone()),
            (RELEASE_VERSION_KEY.to_string(), self.version.clone()),
        ]);
        if let Some(component) = &self.component {
            labels.insert(COMPONENT_KEY.to_string(), component.clone());
        }
        labels
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (RELEASE_VERSION_KEY.to_string(), self.version.clone()),
            (TARGET_NAMESPACE_KEY.to_string(), self.target_namespace.clone()),
            (LAST_APPLIED_HASH_KEY.to_string(), self.spec_hash.clone()),
        ])
    }

    /// Prefix the API server completes into a unique name.
    pub fn generate_name(&self) -> String {
        match &self.component {
            Some(component) => format!("{}-{component}-", self.installer_type),
            None => format!("{}-", self.installer_type),
        }
    }
}

/// Selector for every installer set a component kind created.
pub fn created_by_selector(kind: &str) -> String {
    format!("{CREATED_BY_KEY}={kind}")
}

/// Name of the single installer set matching `selector`.
///
/// No match yields `""`.  More than one match deletes all of them with one
/// collection delete and returns [`Error::ReconcileAgain`].
pub async fn current_installer_set_name(
    client: &dyn ResourceClient,
    selector: &str,
) -> Result<String> {
    let sets = list_as::<TektonInstallerSet>(client, None, selector).await?;
    match sets.as_slice() {
        [] => Ok(String::new()),
        [set] => Ok(set.name_any()),
        duplicates => {
            warn!(%selector, count = duplicates.len(), "duplicate installer sets, deleting all");
            delete_matching(client, selector).await?;
            Err(Error::ReconcileAgain)
        }
    }
}

/// Verify a found installer set against the request.
///
/// Fails with `InvalidState` when bookkeeping metadata is missing,
/// `VersionDifferent` / `NamespaceDifferent` when the set belongs to another
/// release or namespace, and `UpdateRequired` when only the spec hash moved.
pub fn check_installer_set(set: &TektonInstallerSet, req: &SetRequest) -> Result<()> {
    let meta_value = |key: &str| {
        set.annotations()
            .get(key)
            .or_else(|| set.labels().get(key))
            .cloned()
    };

    let version = meta_value(RELEASE_VERSION_KEY)
        .ok_or_else(|| Error::InvalidState(format!("{} has no release version", set.name_any())))?;
    if version != req.version {
        return Err(Error::VersionDifferent);
    }

    let namespace = meta_value(TARGET_NAMESPACE_KEY)
        .ok_or_else(|| Error::InvalidState(format!("{} has no target namespace", set.name_any())))?;
    if namespace != req.target_namespace {
        return Err(Error::NamespaceDifferent);
    }

    if set.annotations().get(LAST_APPLIED_HASH_KEY) != Some(&req.spec_hash) {
        return Err(Error::UpdateRequired);
    }
    Ok(())
}

/// Persist a new installer set carrying `manifest`, owned by the component.
pub async fn create_installer_set(
    client: &dyn ResourceClient,
    req: &SetRequest,
    manifest: &Manifest,
) -> Result<TektonInstallerSet> {
    let set = TektonInstallerSet {
        metadata: ObjectMeta {
            generate_name: Some(req.generate_name()),
            labels: Some(req.labels()),
            annotations: Some(req.annotations()),
            owner_references: Some(vec![req.owner.clone()]),
            ..Default::default()
        },
        spec: TektonInstallerSetSpec {
            manifests: manifest.to_values()?,
        },
        status: None,
    };
    let created = create_as(client, &set).await?;
    info!(
        name = %created.name_any(),
        kind = %req.created_by,
        version = %req.version,
        resources = manifest.len(),
        "created installer set"
    );
    Ok(created)
}

/// Replace the manifests of an existing set in place and record the new hash.
pub async fn update_installer_set(
    client: &dyn ResourceClient,
    set: &TektonInstallerSet,
    req: &SetRequest,
    manifest: &Manifest,
) -> Result<TektonInstallerSet> {
    let mut next = set.clone();
    next.spec.manifests = manifest.to_values()?;
    next.annotations_mut()
        .insert(LAST_APPLIED_HASH_KEY.to_string(), req.spec_hash.clone());
    let updated = update_as(client, &next).await?;
    info!(name = %updated.name_any(), kind = %req.created_by, "updated installer set manifests");
    Ok(updated)
}

pub async fn delete_installer_set(client: &dyn ResourceClient, name: &str) -> Result<()> {
    info!(%name, "deleting installer set");
    delete_as::<TektonInstallerSet>(client, name, None).await
}

/// Delete every installer set matching `selector` in one call.
pub async fn delete_matching(client: &dyn ResourceClient, selector: &str) -> Result<()> {
    client
        .delete_collection(
            &<TektonInstallerSet as kube::Resource>::api_version(&()),
            &<TektonInstallerSet as kube::Resource>::kind(&()),
            None,
            selector,
        )
        .await
}

/// Delete the installer sets matching `selector`, if there are any.
pub async fn remove_installer_sets(client: &dyn ResourceClient, selector: &str) -> Result<()> {
    let found = list_as::<TektonInstallerSet>(client, None, selector).await?;
    if found.is_empty() {
        return Ok(());
    }
    info!(%selector, count = found.len(), "removing installer sets");
    delete_matching(client, selector).await
}

/// Delete installer sets a component created before sets were typed.
pub async fn cleanup_obsolete(client: &dyn ResourceClient, created_by: &str) -> Result<()> {
    let selector = format!("{},!{INSTALLER_TYPE_KEY}", created_by_selector(created_by));
    let obsolete = list_as::<TektonInstallerSet>(client, None, &selector).await?;
    for set in obsolete {
        info!(name = %set.name_any(), kind = %created_by, "deleting obsolete installer set");
        delete_installer_set(client, &set.name_any()).await?;
    }
    Ok(())
}

/// Find, verify and if needed (re)create the installer set for `req`.
///
/// A set from another release or namespace is deleted; when it is gone
/// right away a fresh one is created in the same pass.  Otherwise the
/// caller reconciles again, told [`Error::UpgradePending`] for a release
/// change and [`Error::Reinstalling`] for anything else.  A spec hash mismatch updates the manifests in place.
pub async fn ensure_installer_set(
    client: &dyn ResourceClient,
    req: &SetRequest,
    manifest: &Manifest,
) -> Result<TektonInstallerSet> {
    let name = current_installer_set_name(client, &req.selector()).await?;
    if !name.is_empty() {
        let Some(set) = get_as::<TektonInstallerSet>(client, &name, None).await? else {
            return Err(Error::ReconcileAgain);
        };
        if set.metadata.deletion_timestamp.is_some() {
            debug!(%name, "installer set is being deleted");
            return Err(Error::ReconcileAgain);
        }
        match check_installer_set(&set, req) {
            Ok(()) => return Ok(set),
            Err(Error::UpdateRequired) => {
                return update_installer_set(client, &set, req, manifest).await;
            }
            Err(e @ (Error::VersionDifferent | Error::NamespaceDifferent | Error::InvalidState(_))) => {
                info!(%name, reason = %e, "replacing stale installer set");
                delete_installer_set(client, &name).await?;
                let key = ObjectKey::for_resource::<TektonInstallerSet>(&name, None);
                if client.get(&key).await?.is_some() {
                    return Err(match e {
                        Error::VersionDifferent => Error::UpgradePending,
                        _ => Error::Reinstalling,
                    });
                }
            }
            Err(e) => return Err(e),
        }
    }
    create_installer_set(client, req, manifest).await
}

/// Translate the `Ready` condition of an installer set: `True` passes,
/// `False` is `InstallerSetNotAvailable`, anything else (or a status from an
/// older generation) means wait.
pub fn check_ready(set: &TektonInstallerSet) -> Result<()> {
    let observed = set.status.as_ref().and_then(|s| s.observed_generation);
    if observed.is_some() && observed < set.metadata.generation {
        debug!(name = %set.name_any(), "installer set status is stale");
        return Err(Error::ReconcileAgain);
    }
    match conditions::status(set.conditions(), conditions::READY) {
        Some(STATUS_TRUE) => Ok(()),
        Some(STATUS_FALSE) => {
            let message = set
                .ready_condition()
                .map(|c| c.message.clone())
                .unwrap_or_default();
            Err(Error::InstallerSetNotAvailable(message))
        }
        _ => {
            debug!(name = %set.name_any(), "installer set status not set yet");
            Err(Error::ReconcileAgain)
        }
    }
}
