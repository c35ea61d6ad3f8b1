use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use crate::crd::tekton_installer_set::JOBS_INSTALLED;
use crate::error::{Error, Result};
use crate::manifest::{ApplyOptions, ResourceClient};

use super::{condition_true, live, Buckets, Outcome, Phase, Progress};

/// Jobs run to completion before any Deployment starts; migrations and
/// database setup live here.
pub struct Jobs;

#[async_trait]
impl Phase for Jobs {
    fn condition(&self) -> &'static str {
        JOBS_INSTALLED
    }

    async fn ensure(
        &self,
        client: &dyn ResourceClient,
        buckets: &Buckets,
        progress: &mut Progress<'_>,
    ) -> Result<Outcome> {
        buckets.jobs.apply(client, &ApplyOptions::default()).await?;

        let mut pending = Vec::new();
        for job in buckets.jobs.resources() {
            let name = job.name_any();
            let Some(obj) = live(client, job).await? else {
                pending.push(name);
                continue;
            };
            if condition_true(&obj, "Failed") {
                return Err(Error::reconcile(format!("job {name} failed")));
            }
            if !condition_true(&obj, "Complete") {
                pending.push(name);
            }
        }

        if pending.is_empty() {
            return Ok(Outcome::Done);
        }
        debug!(jobs = ?pending, "jobs not complete");
        progress.mark_false(
            JOBS_INSTALLED,
            "NotReady",
            &format!("Jobs not completed: {}", pending.join(", ")),
        );
        Ok(Outcome::Waiting)
    }
}
