//! In-memory stand-in for the API server.
//!
//! A small object store with just enough API server behaviour (resource
//! versions, generations, finalizers, owner-reference garbage collection) to
//! drive the reconcilers without a cluster.  Every write is recorded so tests
//! can assert on what a pass did.

#![allow(dead_code)]

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DynamicObject, PropagationPolicy};
use kube::ResourceExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tekton_operator::error::{Error, Result};
use tekton_operator::helpers::selector_matches;
use tekton_operator::manifest::{is_cluster_scoped, kind_of, ObjectKey, ResourceClient};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Create,
    Update,
    PatchStatus,
    Delete,
    DeleteCollection,
}

/// One recorded write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Operation {
    pub verb: Verb,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

type ErrorFactory = Box<dyn FnOnce() -> Error + Send>;

struct Injected {
    verb: Verb,
    kind: String,
    name: String,
    error: ErrorFactory,
}

#[derive(Default)]
struct Store {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    operations: Vec<Operation>,
    failures: Vec<Injected>,
    next_uid: u64,
    next_version: u64,
}

/// Object store standing in for the API server in tests.
#[derive(Default)]
pub struct InMemoryClient {
    store: Mutex<Store>,
    workloads_ready: bool,
}

impl InMemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp readiness on workloads as they are written: Deployments become
    /// `Available`, Jobs `Complete`, StatefulSets report all replicas ready.
    pub fn with_workloads_ready() -> Self {
        Self {
            workloads_ready: true,
            ..Self::default()
        }
    }

    /// Make the next matching call fail with the error built by `error`.
    pub fn fail_once<F>(&self, verb: Verb, kind: &str, name: &str, error: F)
    where
        F: FnOnce() -> Error + Send + 'static,
    {
        self.store.lock().failures.push(Injected {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
            error: Box::new(error),
        });
    }

    /// Overwrite the status of a stored object (what a kubelet or another
    /// controller would do).
    pub fn set_status(&self, key: &ObjectKey, status: Value) -> Result<()> {
        let mut store = self.store.lock();
        let obj = store
            .objects
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        obj.data["status"] = status;
        Ok(())
    }

    /// Insert an object as-is, bypassing the operation log.
    pub fn seed(&self, obj: DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(&obj)?;
        let mut store = self.store.lock();
        let stored = store.stamp_new(obj);
        store.objects.insert(key, stored.clone());
        Ok(stored)
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.store.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.store.lock().operations.clear();
    }

    pub fn objects(&self) -> Vec<DynamicObject> {
        self.store.lock().objects.values().cloned().collect()
    }

    pub fn get_sync(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.store.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.store.lock().objects.contains_key(key)
    }

    fn stamp_ready(&self, obj: &mut DynamicObject) {
        if !self.workloads_ready {
            return;
        }
        match kind_of(obj) {
            "Deployment" => {
                obj.data["status"] = json!({
                    "conditions": [{ "type": "Available", "status": "True" }]
                });
            }
            "Job" => {
                obj.data["status"] = json!({
                    "conditions": [{ "type": "Complete", "status": "True" }]
                });
            }
            "StatefulSet" => {
                let replicas = obj.data["spec"]["replicas"].as_i64().unwrap_or(1);
                obj.data["status"] = json!({ "readyReplicas": replicas, "replicas": replicas });
            }
            _ => {}
        }
    }
}

impl Store {
    fn record(&mut self, verb: Verb, key: &ObjectKey) {
        self.operations.push(Operation {
            verb,
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        });
    }

    fn injected(&mut self, verb: Verb, kind: &str, name: &str) -> Option<Error> {
        let pos = self
            .failures
            .iter()
            .position(|f| f.verb == verb && f.kind == kind && (f.name.is_empty() || f.name == name))?;
        Some((self.failures.remove(pos).error)())
    }

    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn stamp_new(&mut self, mut obj: DynamicObject) -> DynamicObject {
        self.next_uid += 1;
        obj.metadata.uid = Some(format!("uid-{}", self.next_uid));
        obj.metadata.resource_version = Some(self.bump_version());
        obj.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        obj.metadata.generation = Some(1);
        if is_cluster_scoped(kind_of(&obj)) {
            obj.metadata.namespace = None;
        }
        obj
    }

    fn remove(&mut self, key: &ObjectKey) {
        self.objects.remove(key);
        self.collect_garbage();
    }

    /// Drop every object whose owners are all gone, until nothing changes.
    fn collect_garbage(&mut self) {
        loop {
            let live: Vec<String> = self
                .objects
                .values()
                .filter_map(|o| o.metadata.uid.clone())
                .collect();
            let orphans: Vec<ObjectKey> = self
                .objects
                .iter()
                .filter(|(_, o)| {
                    let owners = o.owner_references();
                    !owners.is_empty() && owners.iter().all(|r| !live.contains(&r.uid))
                })
                .map(|(k, _)| k.clone())
                .collect();
            if orphans.is_empty() {
                return;
            }
            for key in orphans {
                self.objects.remove(&key);
            }
        }
    }
}

#[async_trait]
impl ResourceClient for InMemoryClient {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        Ok(self.store.lock().objects.get(key).cloned())
    }

    async fn list(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>> {
        let store = self.store.lock();
        Ok(store
            .objects
            .iter()
            .filter(|(k, _)| k.api_version == api_version && k.kind == kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, o)| selector_matches(label_selector, o.labels()))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let mut obj = obj.clone();
        let mut store = self.store.lock();
        if obj.metadata.name.as_deref().unwrap_or_default().is_empty() {
            if let Some(prefix) = obj.metadata.generate_name.clone() {
                store.next_uid += 1;
                obj.metadata.name = Some(format!("{prefix}{:05x}", store.next_uid));
            }
        }
        let key = ObjectKey::of(&obj)?;
        if let Some(err) = store.injected(Verb::Create, &key.kind, &key.name) {
            return Err(err);
        }
        if store.objects.contains_key(&key) {
            return Err(Error::Conflict(format!("{key} already exists")));
        }
        let mut stored = store.stamp_new(obj);
        self.stamp_ready(&mut stored);
        store.record(Verb::Create, &key);
        store.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj)?;
        let mut store = self.store.lock();
        if let Some(err) = store.injected(Verb::Update, &key.kind, &key.name) {
            return Err(err);
        }
        let live = store
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            if live.metadata.resource_version.as_deref() != Some(rv) {
                return Err(Error::Conflict(format!("{key} was modified")));
            }
        }

        let mut next = obj.clone();
        next.metadata.uid = live.metadata.uid.clone();
        next.metadata.creation_timestamp = live.metadata.creation_timestamp.clone();
        next.metadata.deletion_timestamp = live.metadata.deletion_timestamp.clone();
        next.metadata.resource_version = Some(store.bump_version());
        let spec_changed = next.data.get("spec") != live.data.get("spec");
        next.metadata.generation = live
            .metadata
            .generation
            .map(|g| if spec_changed { g + 1 } else { g });
        match live.data.get("status") {
            Some(status) => next.data["status"] = status.clone(),
            None => {
                if let Some(map) = next.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        self.stamp_ready(&mut next);
        store.record(Verb::Update, &key);

        let released = next.metadata.deletion_timestamp.is_some() && next.finalizers().is_empty();
        if released {
            store.remove(&key);
        } else {
            store.objects.insert(key, next.clone());
        }
        Ok(next)
    }

    async fn patch_status(&self, key: &ObjectKey, status: &Value) -> Result<DynamicObject> {
        let mut store = self.store.lock();
        if let Some(err) = store.injected(Verb::PatchStatus, &key.kind, &key.name) {
            return Err(err);
        }
        let version = store.bump_version();
        let updated = {
            let obj = store
                .objects
                .get_mut(key)
                .ok_or_else(|| Error::NotFound(key.to_string()))?;
            json_patch::merge(&mut obj.data, &json!({ "status": status }));
            obj.metadata.resource_version = Some(version);
            obj.clone()
        };
        store.record(Verb::PatchStatus, key);
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey, _propagation: Option<PropagationPolicy>) -> Result<()> {
        let mut store = self.store.lock();
        if let Some(err) = store.injected(Verb::Delete, &key.kind, &key.name) {
            return Err(err);
        }
        let live = store
            .objects
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(key.to_string()))?;
        let finalized = live.finalizers().is_empty();
        if !finalized && live.metadata.deletion_timestamp.is_none() {
            live.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
        store.record(Verb::Delete, key);
        if finalized {
            store.remove(key);
        }
        Ok(())
    }

    async fn delete_collection(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<()> {
        let mut store = self.store.lock();
        if let Some(err) = store.injected(Verb::DeleteCollection, kind, "") {
            return Err(err);
        }
        let matching: Vec<ObjectKey> = store
            .objects
            .iter()
            .filter(|(k, _)| k.api_version == api_version && k.kind == kind)
            .filter(|(k, _)| namespace.is_none() || k.namespace.as_deref() == namespace)
            .filter(|(_, o)| selector_matches(label_selector, o.labels()))
            .map(|(k, _)| k.clone())
            .collect();
        store.operations.push(Operation {
            verb: Verb::DeleteCollection,
            kind: kind.to_string(),
            namespace: namespace.map(str::to_string),
            name: label_selector.to_string(),
        });
        for key in matching {
            let finalized = store
                .objects
                .get(&key)
                .is_some_and(|o| o.finalizers().is_empty());
            if finalized {
                store.remove(&key);
            } else if let Some(obj) = store.objects.get_mut(&key) {
                obj.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            }
        }
        Ok(())
    }
}
