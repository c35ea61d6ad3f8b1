//! Manifests: ordered sets of unstructured Kubernetes resources.
//!
//! A [`Manifest`] is parsed from YAML/JSON (see [`source`]), narrowed with
//! [`filter`] predicates, rewritten with [`transform`] functions and finally
//! written to the cluster through a [`ResourceClient`].  Applying computes a
//! three-way patch ([`patch`]) against the live object so that re-applying an
//! unchanged manifest issues no writes.

pub mod client;
pub mod filter;
pub mod patch;
pub mod source;
pub mod transform;

use kube::api::{DynamicObject, GroupVersionKind, PropagationPolicy};
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

pub use client::{KubeResourceClient, ObjectKey, ResourceClient};
pub use filter::Predicate;
pub use source::Source;
pub use transform::Transformer;

use crate::error::{Error, Result};

/// Annotation holding the serialized form of the last rendered spec.
pub const LAST_APPLIED_ANNOTATION: &str = "operator.tekton.dev/last-applied-configuration";

/// Marker written on objects the engine created (as opposed to adopted).
pub const CREATED_MARKER_ANNOTATION: &str = "manifestival";
pub const CREATED_MARKER_VALUE: &str = "new";

/// Lower-cased kinds that are never namespaced.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "componentstatus",
    "namespace",
    "node",
    "persistentvolume",
    "mutatingwebhookconfiguration",
    "validatingwebhookconfiguration",
    "customresourcedefinition",
    "apiservice",
    "meshpolicy",
    "tokenreview",
    "selfsubjectaccessreview",
    "selfsubjectrulesreview",
    "subjectaccessreview",
    "certificatesigningrequest",
    "podsecuritypolicy",
    "clusterrolebinding",
    "clusterrole",
    "priorityclass",
    "storageclass",
    "volumeattachment",
];

pub fn is_cluster_scoped(kind: &str) -> bool {
    let kind = kind.to_ascii_lowercase();
    CLUSTER_SCOPED_KINDS.contains(&kind.as_str())
}

// ── Unstructured accessors ────────────────────────────────────────────────────

pub fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

pub fn api_version_of(obj: &DynamicObject) -> &str {
    obj.types
        .as_ref()
        .map(|t| t.api_version.as_str())
        .unwrap_or_default()
}

/// Split an apiVersion into (group, version); the core group is `""`.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

pub fn gvk_of(obj: &DynamicObject) -> GroupVersionKind {
    let (group, version) = parse_api_version(api_version_of(obj));
    GroupVersionKind {
        group,
        version,
        kind: kind_of(obj).to_string(),
    }
}

/// Serialize `obj` with the last-applied annotation stripped.
pub fn last_applied(obj: &DynamicObject) -> Result<String> {
    let mut copy = obj.clone();
    if let Some(annotations) = copy.metadata.annotations.as_mut() {
        annotations.remove(LAST_APPLIED_ANNOTATION);
        if annotations.is_empty() {
            copy.metadata.annotations = None;
        }
    }
    Ok(serde_json::to_string(&copy)?)
}

fn with_last_applied(obj: &DynamicObject) -> Result<DynamicObject> {
    let serialized = last_applied(obj)?;
    let mut copy = obj.clone();
    copy.annotations_mut()
        .insert(LAST_APPLIED_ANNOTATION.to_string(), serialized);
    Ok(copy)
}

fn to_object(value: Value) -> Result<DynamicObject> {
    Ok(serde_json::from_value(value)?)
}

// ── Manifest ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct Manifest {
    resources: Vec<DynamicObject>,
}

/// Outcome of applying a single resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Replaced,
    Unchanged,
}

#[derive(Clone, Debug)]
pub struct ApplyOptions {
    /// On an `Invalid` update, overlay the rendered spec onto the live object
    /// and retry once.
    pub overwrite: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

#[derive(Clone, Debug)]
pub struct DeleteOptions {
    pub propagation_policy: Option<PropagationPolicy>,
    pub ignore_not_found: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            propagation_policy: None,
            ignore_not_found: true,
        }
    }
}

impl Manifest {
    pub fn new(resources: Vec<DynamicObject>) -> Self {
        Self { resources }
    }

    pub fn resources(&self) -> &[DynamicObject] {
        &self.resources
    }

    pub fn into_resources(self) -> Vec<DynamicObject> {
        self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Render every resource back to JSON, e.g. for storage in an installer set.
    pub fn to_values(&self) -> Result<Vec<Value>> {
        self.resources
            .iter()
            .map(|r| serde_json::to_value(r).map_err(Error::from))
            .collect()
    }

    /// Concatenate two manifests, keeping order.
    pub fn append(mut self, other: Manifest) -> Manifest {
        self.resources.extend(other.resources);
        self
    }

    /// Keep the resources for which every predicate holds.
    pub fn filter(&self, predicates: &[Predicate]) -> Manifest {
        Manifest {
            resources: self
                .resources
                .iter()
                .filter(|r| predicates.iter().all(|p| p(r)))
                .cloned()
                .collect(),
        }
    }

    /// Run each resource through `transformers` in order. Works on deep
    /// copies: on error `self` is untouched and no partial result escapes.
    pub fn transform(&self, transformers: &[Transformer]) -> Result<Manifest> {
        let mut out = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            let mut copy = resource.clone();
            for t in transformers {
                t(&mut copy)?;
            }
            out.push(copy);
        }
        Ok(Manifest { resources: out })
    }

    pub async fn apply(&self, client: &dyn ResourceClient, opts: &ApplyOptions) -> Result<()> {
        for spec in &self.resources {
            apply_resource(client, spec, opts).await?;
        }
        Ok(())
    }

    /// Delete every resource, last first.  Namespaces the engine did not
    /// create are left alone.
    pub async fn delete(&self, client: &dyn ResourceClient, opts: &DeleteOptions) -> Result<()> {
        for spec in self.resources.iter().rev() {
            delete_resource(client, spec, opts).await?;
        }
        Ok(())
    }
}

/// Create or three-way-merge a single resource.
pub async fn apply_resource(
    client: &dyn ResourceClient,
    spec: &DynamicObject,
    opts: &ApplyOptions,
) -> Result<ApplyOutcome> {
    let key = ObjectKey::of(spec)?;
    let Some(live) = client.get(&key).await? else {
        let mut obj = with_last_applied(spec)?;
        obj.annotations_mut().insert(
            CREATED_MARKER_ANNOTATION.to_string(),
            CREATED_MARKER_VALUE.to_string(),
        );
        info!(kind = %key.kind, name = %key.name, ns = ?key.namespace, "creating");
        client.create(&obj).await?;
        return Ok(ApplyOutcome::Created);
    };

    if live.metadata.deletion_timestamp.is_some() {
        debug!(kind = %key.kind, name = %key.name, "resource is terminating");
        return Err(Error::ReconcileAgain);
    }

    let modified = serde_json::to_value(with_last_applied(spec)?)?;
    let current = serde_json::to_value(&live)?;
    let original = live
        .annotations()
        .get(LAST_APPLIED_ANNOTATION)
        .and_then(|s| serde_json::from_str::<Value>(s).ok());

    let strategy = patch::Strategy::for_gvk(&gvk_of(spec));
    let Some(diff) = patch::Patch::three_way(original.as_ref(), &modified, &current, strategy)
    else {
        debug!(kind = %key.kind, name = %key.name, "unchanged");
        return Ok(ApplyOutcome::Unchanged);
    };

    let mut merged = current.clone();
    diff.merge_into(&mut merged);
    info!(kind = %key.kind, name = %key.name, ns = ?key.namespace, "merging");
    match client.update(&to_object(merged)?).await {
        Ok(_) => Ok(ApplyOutcome::Updated),
        Err(e) if e.is_invalid() && opts.overwrite => {
            info!(kind = %key.kind, name = %key.name, %e, "merged object invalid, replacing");
            let replaced = patch::overwrite(&current, &modified);
            client.update(&to_object(replaced)?).await?;
            Ok(ApplyOutcome::Replaced)
        }
        Err(e) => Err(e),
    }
}

pub async fn delete_resource(
    client: &dyn ResourceClient,
    spec: &DynamicObject,
    opts: &DeleteOptions,
) -> Result<()> {
    let key = ObjectKey::of(spec)?;
    let Some(live) = client.get(&key).await? else {
        return Ok(());
    };
    if key.kind == "Namespace"
        && live.annotations().get(CREATED_MARKER_ANNOTATION).map(String::as_str)
            != Some(CREATED_MARKER_VALUE)
    {
        debug!(name = %key.name, "not deleting namespace the engine did not create");
        return Ok(());
    }
    info!(kind = %key.kind, name = %key.name, ns = ?key.namespace, "deleting");
    match client.delete(&key, opts.propagation_policy.clone()).await {
        Err(e) if e.is_not_found() && opts.ignore_not_found => Ok(()),
        other => other,
    }
}
