//! TektonInstallerSet controller.
//!
//! Converges the cluster to the manifest an installer set carries (see
//! [`super::installer`]) and publishes per-phase conditions.  The finalizer
//! removes what the set created.  This controller never writes the
//! component that owns the set.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, ResourceExt};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::EventType;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config as WatcherConfig;
use tracing::{debug, info, warn};

use crate::crd::tekton_installer_set::{TektonInstallerSet, TektonInstallerSetStatus, FINALIZER};
use crate::error::{Error, Result};
use crate::manifest::patch::merge_diff;
use crate::manifest::ObjectKey;

use super::context::{Context, Env};
use super::helpers::{from_finalizer_error, publish_event, requeue_for, REQUEUE_AFTER};
use super::installer;

/// Start the TektonInstallerSet controller. Returns a future that runs forever.
pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let sets: Api<TektonInstallerSet> = Api::all(client.clone());

    Controller::new(sets, WatcherConfig::default())
        .owns(Api::<Deployment>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<StatefulSet>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<Job>::all(client), WatcherConfig::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((_obj, _action)) => {}
                Err(e) => {
                    let msg = format!("{e:?}");
                    if msg.contains("ObjectNotFound") {
                        debug!("reconcile: object already deleted");
                    } else {
                        warn!("installer set reconcile failed: {msg}");
                    }
                }
            }
        })
        .await;
}

async fn reconcile(set: Arc<TektonInstallerSet>, ctx: Arc<Context>) -> Result<Action> {
    let api: Api<TektonInstallerSet> = Api::all(ctx.client.clone());
    let result = finalizer(&api, FINALIZER, set.clone(), |event| async {
        match event {
            FinalizerEvent::Apply(set) => apply(&ctx.env, &set).await,
            FinalizerEvent::Cleanup(set) => cleanup(&ctx.env, &set).await,
        }
    })
    .await
    .map_err(from_finalizer_error);

    if let Err(e) = &result {
        if !e.is_transient() {
            publish_event(
                &ctx.client,
                &ctx.reporter,
                set.as_ref(),
                EventType::Warning,
                "InstallFailed",
                "Reconcile",
                Some(e.to_string()),
            )
            .await;
        }
    }
    result
}

fn error_policy(set: Arc<TektonInstallerSet>, error: &Error, _ctx: Arc<Context>) -> Action {
    if matches!(error, Error::Finalizer(e) if e.to_string().contains("ObjectNotFound")) {
        debug!(name = %set.name_any(), "object already deleted, skipping requeue");
        return Action::await_change();
    }
    requeue_for(error)
}

/// One installation pass.  Status is written whether or not a phase failed;
/// the sentinel becomes a short requeue.
pub async fn apply(env: &Env, set: &TektonInstallerSet) -> Result<Action> {
    let name = set.name_any();
    debug!(%name, "reconciling installer set");

    let mut conditions = set.conditions().to_vec();
    let result = installer::install(env.client(), set, &mut conditions).await;

    let status = TektonInstallerSetStatus {
        conditions,
        observed_generation: set.metadata.generation,
    };
    if set.status.as_ref() != Some(&status) {
        let before = serde_json::to_value(&set.status)?;
        let patch = merge_diff(&before, &serde_json::to_value(&status)?);
        env.client()
            .patch_status(
                &ObjectKey::for_resource::<TektonInstallerSet>(&name, None),
                &patch,
            )
            .await?;
    }

    match result {
        Ok(()) => Ok(Action::await_change()),
        Err(e) if e.is_reconcile_again() => Ok(Action::requeue(REQUEUE_AFTER)),
        Err(e) => Err(e),
    }
}

pub async fn cleanup(env: &Env, set: &TektonInstallerSet) -> Result<Action> {
    info!(name = %set.name_any(), "finalizing installer set");
    installer::uninstall(env.client(), set).await?;
    Ok(Action::await_change())
}
