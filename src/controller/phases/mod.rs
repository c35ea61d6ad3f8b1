//! Installation phases of an installer set.
//!
//! Each phase is a zero-sized struct that implements [`Phase`].  [`phases`]
//! returns them in installation order; the installer stops at the first one
//! that fails or is still waiting.

use async_trait::async_trait;
use kube::api::DynamicObject;
use serde_json::Value;

use crate::error::Result;
use crate::manifest::{ObjectKey, ResourceClient};

use super::installer::{Buckets, Progress};

mod cluster_scoped;
mod crds;
mod deployments;
mod jobs;
mod namespace_scoped;
mod stateful_sets;

pub use cluster_scoped::ClusterScoped;
pub use crds::Crds;
pub use deployments::Deployments;
pub use jobs::Jobs;
pub use namespace_scoped::NamespaceScoped;
pub use stateful_sets::StatefulSets;

/// What a phase reports when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The phase converged; its condition is marked `True`.
    Done,
    /// Resources are applied but not ready yet.  The phase already recorded
    /// why on its own condition.
    Waiting,
}

#[async_trait]
pub trait Phase: Send + Sync {
    /// Condition this phase owns.
    fn condition(&self) -> &'static str;

    async fn ensure(
        &self,
        client: &dyn ResourceClient,
        buckets: &Buckets,
        progress: &mut Progress<'_>,
    ) -> Result<Outcome>;
}

/// All phases, in installation order.
pub fn phases() -> [&'static dyn Phase; 6] {
    [
        &Crds,
        &ClusterScoped,
        &NamespaceScoped,
        &Jobs,
        &Deployments,
        &StatefulSets,
    ]
}

/// Read back the live copy of a rendered resource.
async fn live(client: &dyn ResourceClient, rendered: &DynamicObject) -> Result<Option<DynamicObject>> {
    client.get(&ObjectKey::of(rendered)?).await
}

/// Whether `obj` reports a `status.conditions` entry of `type_` with status
/// `True`.
fn condition_true(obj: &DynamicObject, type_: &str) -> bool {
    find_condition(obj, type_)
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str)
        == Some("True")
}

fn find_condition<'a>(obj: &'a DynamicObject, type_: &str) -> Option<&'a Value> {
    obj.data
        .pointer("/status/conditions")
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(type_))
}
