use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, info};

use crate::crd::tekton_installer_set::{
    ALL_DEPLOYMENTS_READY, CONTROLLER_READY, DEPLOYMENTS_AVAILABLE, WEBHOOK_READY,
};
use crate::error::{Error, Result};
use crate::manifest::{delete_resource, ApplyOptions, DeleteOptions, ResourceClient};

use super::{condition_true, find_condition, live, Buckets, Outcome, Phase, Progress};

/// Deployments and their Services.  Applying them marks
/// `DeploymentsAvailable`; readiness is then reported in three steps:
/// webhooks, controllers, everything else.
pub struct Deployments;

/// A Deployment whose ReplicaSet cannot create pods (quota, admission) stays
/// stuck until it is recreated.
fn replica_failure(obj: &DynamicObject) -> bool {
    find_condition(obj, "ReplicaFailure").is_some_and(|c| {
        c.get("status").and_then(Value::as_str) == Some("True")
            && c.get("reason").and_then(Value::as_str) == Some("FailedCreate")
    })
}

#[async_trait]
impl Phase for Deployments {
    fn condition(&self) -> &'static str {
        DEPLOYMENTS_AVAILABLE
    }

    async fn ensure(
        &self,
        client: &dyn ResourceClient,
        buckets: &Buckets,
        progress: &mut Progress<'_>,
    ) -> Result<Outcome> {
        buckets
            .deployments
            .apply(client, &ApplyOptions::default())
            .await?;

        let mut live_deployments = Vec::new();
        let mut recreated = false;
        for rendered in buckets
            .deployments
            .resources()
            .iter()
            .filter(|r| crate::manifest::kind_of(r) == "Deployment")
        {
            let Some(obj) = live(client, rendered).await? else {
                live_deployments.push((rendered.name_any(), None));
                continue;
            };
            if replica_failure(&obj) {
                info!(name = %obj.name_any(), "deleting deployment stuck on FailedCreate");
                delete_resource(client, rendered, &DeleteOptions::default()).await?;
                recreated = true;
                continue;
            }
            live_deployments.push((obj.name_any(), Some(obj)));
        }
        if recreated {
            return Err(Error::ReconcileAgain);
        }
        progress.mark_true(DEPLOYMENTS_AVAILABLE);

        let groups: [(&str, &str, fn(&str) -> bool); 3] = [
            (WEBHOOK_READY, "Webhook", |n| n.contains("webhook")),
            (CONTROLLER_READY, "Controller", |n| n.contains("controller")),
            (ALL_DEPLOYMENTS_READY, "Deployments", |n| {
                !n.contains("webhook") && !n.contains("controller")
            }),
        ];
        for (condition, label, member) in groups {
            let not_ready: Vec<&str> = live_deployments
                .iter()
                .filter(|(name, _)| member(name))
                .filter(|(_, obj)| !obj.as_ref().is_some_and(|o| condition_true(o, "Available")))
                .map(|(name, _)| name.as_str())
                .collect();
            if !not_ready.is_empty() {
                debug!(?not_ready, condition, "deployments not available");
                progress.mark_false(
                    condition,
                    "NotReady",
                    &format!("{label}: {} not available", not_ready.join(", ")),
                );
                return Ok(Outcome::Waiting);
            }
            progress.mark_true(condition);
        }
        Ok(Outcome::Done)
    }
}
