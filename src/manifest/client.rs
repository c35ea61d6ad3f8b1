//! The resource client seam.
//!
//! Everything the engine writes to the cluster goes through
//! [`ResourceClient`].  [`KubeResourceClient`] talks to the API server through
//! kube's dynamic API, resolving kinds with discovery.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams, PropagationPolicy, TypeMeta,
};
use kube::discovery::{ApiCapabilities, ApiResource, Scope};
use kube::{Client, Resource};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{api_version_of, is_cluster_scoped, kind_of, parse_api_version};
use crate::error::{Error, Result};

// ── Keys ──────────────────────────────────────────────────────────────────────

/// Identity of an object: (apiVersion, kind, namespace, name).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<&str>,
        name: impl Into<String>,
    ) -> Self {
        let kind = kind.into();
        let namespace = namespace
            .filter(|ns| !ns.is_empty() && !is_cluster_scoped(&kind))
            .map(str::to_string);
        Self {
            api_version: api_version.into(),
            kind,
            namespace,
            name: name.into(),
        }
    }

    pub fn of(obj: &DynamicObject) -> Result<Self> {
        let kind = kind_of(obj);
        if kind.is_empty() {
            return Err(Error::manifest("resource has no kind"));
        }
        let name = obj
            .metadata
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::manifest(format!("{kind} has no metadata.name")))?;
        Ok(Self::new(
            api_version_of(obj),
            kind,
            obj.metadata.namespace.as_deref(),
            name,
        ))
    }

    /// Key for a statically typed resource.
    pub fn for_resource<K: Resource<DynamicType = ()>>(name: &str, namespace: Option<&str>) -> Self {
        Self::new(K::api_version(&()), K::kind(&()), namespace, name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

// ── Client trait ──────────────────────────────────────────────────────────────

/// Generic, unstructured access to cluster objects.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>>;

    /// List objects of a kind; `namespace = None` lists across namespaces.
    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Merge `status` into the object's status subresource.
    async fn patch_status(&self, key: &ObjectKey, status: &Value) -> Result<DynamicObject>;

    async fn delete(&self, key: &ObjectKey, propagation: Option<PropagationPolicy>) -> Result<()>;

    async fn delete_collection(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<()>;
}

// ── Typed helpers ─────────────────────────────────────────────────────────────

/// Convert a typed resource into its unstructured form.
pub fn to_dynamic<K>(obj: &K) -> Result<DynamicObject>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    let mut dynamic: DynamicObject = serde_json::from_value(serde_json::to_value(obj)?)?;
    dynamic.types = Some(TypeMeta {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
    });
    Ok(dynamic)
}

pub fn from_dynamic<K: DeserializeOwned>(obj: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub async fn get_as<K>(
    client: &dyn ResourceClient,
    name: &str,
    namespace: Option<&str>,
) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .get(&ObjectKey::for_resource::<K>(name, namespace))
        .await?
        .map(from_dynamic)
        .transpose()
}

pub async fn list_as<K>(
    client: &dyn ResourceClient,
    namespace: Option<&str>,
    label_selector: &str,
) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    client
        .list(&K::api_version(&()), &K::kind(&()), namespace, label_selector)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}

pub async fn create_as<K>(client: &dyn ResourceClient, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    from_dynamic(client.create(&to_dynamic(obj)?).await?)
}

pub async fn update_as<K>(client: &dyn ResourceClient, obj: &K) -> Result<K>
where
    K: Resource<DynamicType = ()> + Serialize + DeserializeOwned,
{
    from_dynamic(client.update(&to_dynamic(obj)?).await?)
}

pub async fn delete_as<K>(
    client: &dyn ResourceClient,
    name: &str,
    namespace: Option<&str>,
) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    match client
        .delete(&ObjectKey::for_resource::<K>(name, namespace), None)
        .await
    {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

// ── Kubernetes implementation ─────────────────────────────────────────────────

/// [`ResourceClient`] backed by the API server.
pub struct KubeResourceClient {
    client: Client,
    resolved: RwLock<HashMap<String, (ApiResource, ApiCapabilities)>>,
}

impl KubeResourceClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the plural and scope of a kind, caching successful lookups.
    /// Misses are not cached so CRDs installed later resolve on retry.
    async fn resolve(&self, api_version: &str, kind: &str) -> Result<(ApiResource, ApiCapabilities)> {
        let cache_key = format!("{api_version}/{kind}");
        let cached = self.resolved.read().get(&cache_key).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let (group, version) = parse_api_version(api_version);
        let gvk = GroupVersionKind::gvk(&group, &version, kind);
        let resolved = kube::discovery::pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| Error::from_kube(e, format!("discovering {api_version} {kind}")))?;
        debug!(%api_version, %kind, plural = %resolved.0.plural, "resolved kind");
        self.resolved.write().insert(cache_key, resolved.clone());
        Ok(resolved)
    }

    async fn api(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>> {
        let (ar, caps) = self.resolve(api_version, kind).await?;
        Ok(match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        })
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        let api = self
            .api(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        api.get_opt(&key.name)
            .await
            .map_err(|e| Error::from_kube(e, key.to_string()))
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>> {
        let api = self.api(api_version, kind, namespace).await?;
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| Error::from_kube(e, format!("listing {kind}")))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj)?;
        let api = self
            .api(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, key.to_string()))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj)?;
        let api = self
            .api(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        api.replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| Error::from_kube(e, key.to_string()))
    }

    async fn patch_status(&self, key: &ObjectKey, status: &Value) -> Result<DynamicObject> {
        let api = self
            .api(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        api.patch_status(
            &key.name,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "status": status })),
        )
        .await
        .map_err(|e| Error::from_kube(e, key.to_string()))
    }

    async fn delete(&self, key: &ObjectKey, propagation: Option<PropagationPolicy>) -> Result<()> {
        let api = self
            .api(&key.api_version, &key.kind, key.namespace.as_deref())
            .await?;
        let params = DeleteParams {
            propagation_policy: propagation,
            ..DeleteParams::default()
        };
        api.delete(&key.name, &params)
            .await
            .map(|_| ())
            .map_err(|e| Error::from_kube(e, key.to_string()))
    }

    async fn delete_collection(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<()> {
        let api = self.api(api_version, kind, namespace).await?;
        api.delete_collection(
            &DeleteParams::default(),
            &ListParams::default().labels(label_selector),
        )
        .await
        .map(|_| ())
        .map_err(|e| Error::from_kube(e, format!("deleting {kind} collection")))
    }
}
