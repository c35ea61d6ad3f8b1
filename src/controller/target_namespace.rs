//! Target namespace bookkeeping.
//!
//! Namespaces a component installs into carry the
//! `operator.tekton.dev/targetNamespace=true` label and the component custom
//! resource as owner.  When a component moves to another namespace, the
//! namespaces it owned before are deleted.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::manifest::client::{create_as, delete_as, get_as, list_as, update_as};
use crate::manifest::ResourceClient;

pub const TARGET_NAMESPACE_LABEL: &str = "operator.tekton.dev/targetNamespace";

/// Make sure `namespace` exists, is labelled and has an owner.
///
/// Returns [`Error::ReconcileAgain`] while any involved namespace is still
/// terminating.
pub async fn reconcile_target_namespace(
    client: &dyn ResourceClient,
    namespace: &str,
    owner: &OwnerReference,
    labels: &BTreeMap<String, String>,
) -> Result<()> {
    let selector = format!("{TARGET_NAMESPACE_LABEL}=true");
    let labelled = list_as::<Namespace>(client, None, &selector).await?;

    let mut deletion_in_progress = false;
    for ns in &labelled {
        let name = ns.name_any();
        if name == namespace {
            continue;
        }
        let owned_by_us = ns
            .owner_references()
            .first()
            .is_some_and(|r| r.name == owner.name && r.kind == owner.kind);
        if ns.metadata.deletion_timestamp.is_some() {
            debug!(%name, "namespace is terminating");
            deletion_in_progress = true;
        } else if owned_by_us {
            info!(%name, "deleting previous target namespace");
            delete_as::<Namespace>(client, &name, None).await?;
        }
    }
    if deletion_in_progress {
        return Err(Error::ReconcileAgain);
    }

    let mut wanted = labels.clone();
    wanted.insert(TARGET_NAMESPACE_LABEL.to_string(), "true".to_string());

    match get_as::<Namespace>(client, namespace, None).await? {
        Some(ns) if ns.metadata.deletion_timestamp.is_some() => {
            info!(%namespace, "target namespace is terminating");
            Err(Error::ReconcileAgain)
        }
        Some(mut ns) => {
            let mut changed = false;
            if ns.owner_references().is_empty() {
                ns.metadata.owner_references = Some(vec![owner.clone()]);
                changed = true;
            }
            for (k, v) in &wanted {
                if ns.labels().get(k) != Some(v) {
                    ns.labels_mut().insert(k.clone(), v.clone());
                    changed = true;
                }
            }
            if changed {
                debug!(%namespace, "updating target namespace");
                update_as(client, &ns).await?;
            }
            Ok(())
        }
        None => {
            info!(%namespace, "creating target namespace");
            let ns = Namespace {
                metadata: ObjectMeta {
                    name: Some(namespace.to_string()),
                    labels: Some(wanted),
                    owner_references: Some(vec![owner.clone()]),
                    ..Default::default()
                },
                ..Default::default()
            };
            create_as(client, &ns).await?;
            Ok(())
        }
    }
}
