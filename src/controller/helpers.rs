//! Shared helpers for controller modules.
//!
//! Owner references, event publishing and the requeue policy every
//! reconciler uses.  Pure utility functions (hashing, versions, selectors)
//! live in `crate::helpers` instead.

use std::time::Duration;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::runtime::events::{Event as KubeEvent, EventType, Recorder, Reporter};
use kube::runtime::finalizer;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, warn};

use crate::error::Error;

/// Delay used for the reconcile-again sentinel and readiness polling.
pub const REQUEUE_AFTER: Duration = Duration::from_secs(10);

/// Delay after an unexpected error.
pub const ERROR_REQUEUE_AFTER: Duration = Duration::from_secs(30);

/// Build a controller OwnerReference for any kube-rs `Resource`.
pub fn controller_owner_ref<K: Resource<DynamicType = ()>>(obj: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: obj.name_any(),
        uid: obj.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Whether `owner` is the controller reference of `obj`.
pub fn is_controlled_by(refs: &[OwnerReference], owner: &OwnerReference) -> bool {
    refs.iter()
        .any(|r| r.controller == Some(true) && r.uid == owner.uid && r.kind == owner.kind)
}

/// Build an ObjectReference from any kube Resource.
pub fn kube_object_ref<K: Resource<DynamicType = ()>>(obj: &K) -> ObjectReference {
    ObjectReference {
        api_version: Some(K::api_version(&()).to_string()),
        kind: Some(K::kind(&()).to_string()),
        name: Some(obj.name_any()),
        namespace: obj.namespace(),
        uid: obj.meta().uid.clone(),
        resource_version: obj.meta().resource_version.clone(),
        ..Default::default()
    }
}

/// Publish a Kubernetes event attached to the given resource.
/// Errors are logged but never block reconciliation.
pub async fn publish_event<K: Resource<DynamicType = ()>>(
    client: &Client,
    reporter: &Reporter,
    obj: &K,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    let rec = Recorder::new(client.clone(), reporter.clone());
    let oref = kube_object_ref(obj);
    if let Err(e) = rec
        .publish(
            &KubeEvent {
                type_,
                reason: reason.to_string(),
                note,
                action: action.to_string(),
                secondary: None,
            },
            &oref,
        )
        .await
    {
        warn!(%e, "failed to publish event");
    }
}

/// Requeue policy shared by every controller's `error_policy`.
pub fn requeue_for(err: &Error) -> Action {
    if err.is_transient() {
        debug!(%err, "requeueing");
        Action::requeue(REQUEUE_AFTER)
    } else {
        warn!(%err, "reconcile failed");
        Action::requeue(ERROR_REQUEUE_AFTER)
    }
}

/// Unwrap reconcile failures raised inside the finalizer helper so the
/// error policy sees the original error (and the sentinel stays visible).
pub fn from_finalizer_error(err: finalizer::Error<Error>) -> Error {
    match err {
        finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => e,
        other => Error::Finalizer(Box::new(other)),
    }
}
