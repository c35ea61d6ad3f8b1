use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use crate::crd::tekton_installer_set::STATEFULSET_READY;
use crate::error::Result;
use crate::manifest::{ApplyOptions, ResourceClient};

use super::{live, Buckets, Outcome, Phase, Progress};

/// StatefulSets are ready once every desired replica reports ready.
pub struct StatefulSets;

#[async_trait]
impl Phase for StatefulSets {
    fn condition(&self) -> &'static str {
        STATEFULSET_READY
    }

    async fn ensure(
        &self,
        client: &dyn ResourceClient,
        buckets: &Buckets,
        progress: &mut Progress<'_>,
    ) -> Result<Outcome> {
        buckets
            .stateful_sets
            .apply(client, &ApplyOptions::default())
            .await?;

        let mut pending = Vec::new();
        for rendered in buckets.stateful_sets.resources() {
            let ready = live(client, rendered).await?.is_some_and(|obj| {
                let desired = obj.data.pointer("/spec/replicas").and_then(|v| v.as_i64()).unwrap_or(1);
                let ready = obj
                    .data
                    .pointer("/status/readyReplicas")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                ready == desired
            });
            if !ready {
                pending.push(rendered.name_any());
            }
        }

        if pending.is_empty() {
            return Ok(Outcome::Done);
        }
        debug!(statefulsets = ?pending, "statefulsets not ready");
        progress.mark_false(
            STATEFULSET_READY,
            "NotReady",
            &format!("StatefulSets not ready: {}", pending.join(", ")),
        );
        Ok(Outcome::Waiting)
    }
}
