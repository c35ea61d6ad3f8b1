//! PersistentVolumeClaims are kept out of installer sets so data survives a
//! set being replaced.  They are applied on their own, owned by the
//! component custom resource.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use tracing::info;

use crate::error::Result;
use crate::manifest::filter::by_kind;
use crate::manifest::{ApplyOptions, Manifest, ObjectKey, ResourceClient, Transformer};

pub const PVC_KIND: &str = "PersistentVolumeClaim";

fn own_by(owner: OwnerReference) -> Transformer {
    Box::new(move |u| {
        u.metadata.owner_references = Some(vec![owner.clone()]);
        Ok(())
    })
}

/// Re-home a live claim whose controller points at another kind, typically
/// an installer set from before claims were split out.
pub async fn migrate_owner(
    client: &dyn ResourceClient,
    claim: &ObjectKey,
    owner: &OwnerReference,
) -> Result<bool> {
    let Some(mut live) = client.get(claim).await? else {
        return Ok(false);
    };
    let legacy = live
        .owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && r.kind != owner.kind);
    if !legacy {
        return Ok(false);
    }
    info!(name = %claim.name, ns = ?claim.namespace, "moving claim ownership to {}", owner.kind);
    live.metadata.owner_references = Some(vec![owner.clone()]);
    client.update(&live).await?;
    Ok(true)
}

/// Apply the claims in `manifest` owned by `owner`, migrating legacy owners
/// first.
pub async fn apply_claims(
    client: &dyn ResourceClient,
    manifest: &Manifest,
    owner: &OwnerReference,
) -> Result<()> {
    let claims = manifest
        .filter(&[by_kind(PVC_KIND)])
        .transform(&[own_by(owner.clone())])?;
    for claim in claims.resources() {
        migrate_owner(client, &ObjectKey::of(claim)?, owner).await?;
    }
    claims.apply(client, &ApplyOptions::default()).await
}
