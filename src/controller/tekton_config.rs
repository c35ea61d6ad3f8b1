//! TektonConfig reconciler.
//!
//! The `config` singleton expands its profile into component custom
//! resources, owns them as controller and waits for them in dependency order:
//! pipeline first, then triggers, then everything else.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::EventType;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

use crate::crd::conditions::{self, STATUS_FALSE, STATUS_TRUE};
use crate::crd::openshift_pipelines_as_code::{
    OpenShiftPipelinesAsCode, OpenShiftPipelinesAsCodeSpec,
};
use crate::crd::tekton_addon::{TektonAddon, TektonAddonSpec};
use crate::crd::tekton_chain::{TektonChain, TektonChainSpec};
use crate::crd::tekton_config::{
    TektonConfig, TektonConfigSpec, TektonConfigStatus, COMPONENTS_READY, CONFIG_CONDITIONS,
    POST_INSTALL, PRE_INSTALL, PROFILE_ALL, PROFILE_BASIC, PROFILE_LITE,
};
use crate::crd::tekton_dashboard::{TektonDashboard, TektonDashboardSpec};
use crate::crd::tekton_hub::{TektonHub, TektonHubSpec};
use crate::crd::tekton_pipeline::{TektonPipeline, TektonPipelineSpec};
use crate::crd::tekton_pruner::{TektonPruner, TektonPrunerSpec};
use crate::crd::tekton_result::{TektonResult, TektonResultSpec};
use crate::crd::tekton_trigger::{TektonTrigger, TektonTriggerSpec};
use crate::crd::TektonComponent;
use crate::error::{Error, Result};
use crate::manifest::client::{create_as, delete_as, get_as, update_as};
use crate::manifest::patch::merge_diff;
use crate::manifest::{ObjectKey, ResourceClient};
use crate::platform::Platform;

use super::component::record;
use super::context::{Context, Env};
use super::extension::ExtensionTarget;
use super::helpers::{
    controller_owner_ref, from_finalizer_error, is_controlled_by, publish_event, requeue_for,
    REQUEUE_AFTER,
};
use super::target_namespace::reconcile_target_namespace;
use super::upgrade;

pub const FINALIZER: &str = "tektonconfigs.operator.tekton.dev";

// ── Desired children ──────────────────────────────────────────────────────────

/// Component custom resources a config asks for.  `None` means the kind is
/// not enabled and an existing instance owned by the config is removed.
#[derive(Clone, Debug, Default)]
pub struct Children {
    pub pipeline: Option<TektonPipeline>,
    pub trigger: Option<TektonTrigger>,
    pub chain: Option<TektonChain>,
    pub result: Option<TektonResult>,
    pub dashboard: Option<TektonDashboard>,
    pub addon: Option<TektonAddon>,
    pub pipelines_as_code: Option<OpenShiftPipelinesAsCode>,
    pub hub: Option<TektonHub>,
    pub pruner: Option<TektonPruner>,
}

impl Children {
    /// Kinds present, in install order.
    pub fn kinds(&self) -> Vec<&'static str> {
        let present = [
            ("TektonPipeline", self.pipeline.is_some()),
            ("TektonTrigger", self.trigger.is_some()),
            ("TektonChain", self.chain.is_some()),
            ("TektonResult", self.result.is_some()),
            ("TektonDashboard", self.dashboard.is_some()),
            ("TektonAddon", self.addon.is_some()),
            ("OpenShiftPipelinesAsCode", self.pipelines_as_code.is_some()),
            ("TektonHub", self.hub.is_some()),
            ("TektonPruner", self.pruner.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(kind, on)| on.then_some(kind))
            .collect()
    }
}

pub fn validate_profile(profile: &str) -> Result<()> {
    match profile {
        PROFILE_LITE | PROFILE_BASIC | PROFILE_ALL => Ok(()),
        other => Err(Error::config(format!(
            "unknown profile {other:?}, expected one of {PROFILE_LITE}, {PROFILE_BASIC}, {PROFILE_ALL}"
        ))),
    }
}

fn owned<C: TektonComponent>(mut child: C, owner: &OwnerReference) -> C {
    child.meta_mut().owner_references = Some(vec![owner.clone()]);
    child
}

/// Expand a config into the component resources it enables on `platform`.
pub fn desired_children(cfg: &TektonConfig, platform: Platform) -> Result<Children> {
    let spec: &TektonConfigSpec = &cfg.spec;
    validate_profile(&spec.profile)?;
    let owner = controller_owner_ref(cfg);
    let common = &spec.common;
    let basic = spec.profile != PROFILE_LITE;
    let all = spec.profile == PROFILE_ALL;
    let openshift = platform == Platform::OpenShift;

    let mut children = Children {
        pipeline: Some(owned(
            TektonPipeline::new(
                TektonPipeline::RESOURCE_NAME,
                TektonPipelineSpec {
                    common: common.clone(),
                    pipeline: spec.pipeline.clone(),
                },
            ),
            &owner,
        )),
        ..Default::default()
    };

    if basic {
        children.trigger = Some(owned(
            TektonTrigger::new(
                TektonTrigger::RESOURCE_NAME,
                TektonTriggerSpec {
                    common: common.clone(),
                    trigger: spec.trigger.clone(),
                },
            ),
            &owner,
        ));
        if !spec.chain.disabled {
            children.chain = Some(owned(
                TektonChain::new(
                    TektonChain::RESOURCE_NAME,
                    TektonChainSpec {
                        common: common.clone(),
                        disabled: false,
                        chains_config: spec.chain.chains_config.clone(),
                    },
                ),
                &owner,
            ));
        }
        if !spec.result.disabled {
            children.result = Some(owned(
                TektonResult::new(
                    TektonResult::RESOURCE_NAME,
                    TektonResultSpec {
                        common: common.clone(),
                        disabled: false,
                        is_external_db: spec.result.is_external_db,
                        api_config: spec.result.api_config.clone(),
                    },
                ),
                &owner,
            ));
        }
    }

    if all && !openshift {
        children.dashboard = Some(owned(
            TektonDashboard::new(
                TektonDashboard::RESOURCE_NAME,
                TektonDashboardSpec {
                    common: common.clone(),
                    readonly: spec.dashboard.readonly,
                },
            ),
            &owner,
        ));
    }
    if all && openshift {
        children.addon = Some(owned(
            TektonAddon::new(
                TektonAddon::RESOURCE_NAME,
                TektonAddonSpec {
                    common: common.clone(),
                    params: spec.addon.params.clone(),
                },
            ),
            &owner,
        ));
        if !spec.pipelines_as_code.disabled {
            children.pipelines_as_code = Some(owned(
                OpenShiftPipelinesAsCode::new(
                    OpenShiftPipelinesAsCode::RESOURCE_NAME,
                    OpenShiftPipelinesAsCodeSpec {
                        common: common.clone(),
                        settings: spec.pipelines_as_code.settings.clone(),
                    },
                ),
                &owner,
            ));
        }
    }

    if let Some(hub) = &spec.hub {
        children.hub = Some(owned(
            TektonHub::new(
                TektonHub::RESOURCE_NAME,
                TektonHubSpec {
                    common: common.clone(),
                    db: hub.db.clone(),
                    api: hub.api.clone(),
                    ..Default::default()
                },
            ),
            &owner,
        ));
    }
    if !spec.pruner.disabled {
        children.pruner = Some(owned(
            TektonPruner::new(
                TektonPruner::RESOURCE_NAME,
                TektonPrunerSpec {
                    common: common.clone(),
                    disabled: false,
                    global_config: spec.pruner.global_config.clone(),
                },
            ),
            &owner,
        ));
    }
    Ok(children)
}

// ── Child bookkeeping ─────────────────────────────────────────────────────────

/// Create `desired` or bring the live object's spec and owner in line.
pub async fn ensure_child<C: TektonComponent>(client: &dyn ResourceClient, desired: &C) -> Result<C> {
    let kind = C::kind(&());
    let name = desired.name_any();
    let owner = desired.owner_references().to_vec();

    let Some(live) = get_as::<C>(client, &name, None).await? else {
        info!(%kind, %name, "creating component");
        return create_as(client, desired).await;
    };
    if live.meta().deletion_timestamp.is_some() {
        debug!(%kind, %name, "component is being deleted");
        return Err(Error::ReconcileAgain);
    }

    let wanted = serde_json::to_value(desired)?;
    let mut current = serde_json::to_value(&live)?;
    let owned = owner.iter().all(|o| is_controlled_by(live.owner_references(), o));
    if current["spec"] == wanted["spec"] && owned {
        return Ok(live);
    }

    current["spec"] = wanted["spec"].clone();
    let mut next: C = serde_json::from_value(current)?;
    next.meta_mut().owner_references = Some(owner);
    info!(%kind, %name, "updating component");
    update_as(client, &next).await
}

/// Delete the singleton of kind `C` when the config controls it.
pub async fn remove_child<C: TektonComponent>(
    client: &dyn ResourceClient,
    owner: &OwnerReference,
) -> Result<()> {
    let Some(live) = get_as::<C>(client, C::RESOURCE_NAME, None).await? else {
        return Ok(());
    };
    if !is_controlled_by(live.owner_references(), owner) {
        debug!(kind = %C::kind(&()), "component not owned by config, leaving it");
        return Ok(());
    }
    if live.meta().deletion_timestamp.is_none() {
        info!(kind = %C::kind(&()), "removing component no longer enabled");
        delete_as::<C>(client, C::RESOURCE_NAME, None).await?;
    }
    Ok(())
}

async fn sync_child<C: TektonComponent>(
    client: &dyn ResourceClient,
    owner: &OwnerReference,
    desired: Option<&C>,
) -> Result<Option<C>> {
    match desired {
        Some(desired) => ensure_child(client, desired).await.map(Some),
        None => remove_child::<C>(client, owner).await.map(|_| None),
    }
}

/// `Ready=True` passes, `False` fails with the child's message, anything
/// else (or a status from an older generation) waits.
pub fn child_ready<C: TektonComponent>(child: &C) -> Result<()> {
    let kind = C::kind(&());
    let Some(status) = child.component_status() else {
        return Err(Error::ReconcileAgain);
    };
    if status.observed_generation < child.meta().generation {
        return Err(Error::ReconcileAgain);
    }
    match conditions::find(&status.conditions, conditions::READY) {
        Some(c) if c.status == STATUS_TRUE => Ok(()),
        Some(c) if c.status == STATUS_FALSE => {
            Err(Error::reconcile(format!("{kind}: {}", c.message)))
        }
        _ => {
            debug!(%kind, "waiting for component");
            Err(Error::ReconcileAgain)
        }
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let mut controller = Controller::new(Api::<TektonConfig>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<TektonPipeline>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<TektonTrigger>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<TektonChain>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<TektonResult>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<TektonHub>::all(client.clone()), WatcherConfig::default())
        .owns(Api::<TektonPruner>::all(client.clone()), WatcherConfig::default());
    controller = match ctx.env.config.platform {
        Platform::Kubernetes => controller
            .owns(Api::<TektonDashboard>::all(client.clone()), WatcherConfig::default()),
        Platform::OpenShift => controller
            .owns(Api::<TektonAddon>::all(client.clone()), WatcherConfig::default())
            .owns(Api::<OpenShiftPipelinesAsCode>::all(client), WatcherConfig::default()),
    };

    controller
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                let msg = format!("{e:?}");
                if msg.contains("ObjectNotFound") {
                    debug!("reconcile: TektonConfig already deleted");
                } else {
                    warn!("reconcile failed: {msg}");
                }
            }
        })
        .await;
}

async fn reconcile(cfg: Arc<TektonConfig>, ctx: Arc<Context>) -> Result<Action> {
    let api: Api<TektonConfig> = Api::all(ctx.client.clone());
    let result = finalizer(&api, FINALIZER, cfg.clone(), |event| async {
        match event {
            FinalizerEvent::Apply(cfg) => apply(&ctx.env, cfg.as_ref()).await,
            FinalizerEvent::Cleanup(cfg) => cleanup(&ctx.env, cfg.as_ref()).await,
        }
    })
    .await
    .map_err(from_finalizer_error);

    if let Err(e) = &result {
        if !e.is_transient() {
            publish_event(
                &ctx.client,
                &ctx.reporter,
                cfg.as_ref(),
                EventType::Warning,
                "ReconcileFailed",
                "Reconcile",
                Some(e.to_string()),
            )
            .await;
        }
    }
    result
}

fn error_policy(cfg: Arc<TektonConfig>, error: &Error, _ctx: Arc<Context>) -> Action {
    debug!(name = %cfg.name_any(), %error, "error policy");
    requeue_for(error)
}

// ── Reconcile pass ────────────────────────────────────────────────────────────

fn extension_target(cfg: &TektonConfig) -> ExtensionTarget {
    ExtensionTarget {
        kind: TektonConfig::kind(&()).to_string(),
        name: cfg.name_any(),
        target_namespace: cfg.target_namespace().to_string(),
        owner: controller_owner_ref(cfg),
    }
}

fn set_defaults(cfg: &mut TektonConfig, platform: Platform) {
    if cfg.spec.common.target_namespace.is_empty() {
        cfg.spec.common.target_namespace = platform.default_target_namespace().to_string();
    }
}

/// One reconcile pass over the config.  Status is written back whatever the
/// outcome; the sentinel becomes a short requeue.
pub async fn apply(env: &Env, cfg: &TektonConfig) -> Result<Action> {
    let name = cfg.name_any();
    let generation = cfg.meta().generation;
    let mut status = cfg.status.clone().unwrap_or_default();
    CONFIG_CONDITIONS.initialize(&mut status.component.conditions, generation);

    let result = if name != TektonConfig::RESOURCE_NAME {
        let message = format!(
            "Resource ignored, Expected Name: {}, Got Name: {name}",
            TektonConfig::RESOURCE_NAME
        );
        warn!("{message}");
        CONFIG_CONDITIONS.mark_not_ready(&mut status.component.conditions, "Ignored", &message, generation);
        Ok(())
    } else {
        let mut cfg = cfg.clone();
        set_defaults(&mut cfg, env.config.platform);
        pass(env, &cfg, &mut status).await
    };

    status.component.observed_generation = generation;
    if cfg.status.as_ref() != Some(&status) {
        let before = serde_json::to_value(&cfg.status)?;
        let patch = merge_diff(&before, &serde_json::to_value(&status)?);
        env.client()
            .patch_status(&ObjectKey::for_resource::<TektonConfig>(&name, None), &patch)
            .await?;
    }

    match result {
        Ok(()) => Ok(Action::await_change()),
        Err(e) if e.is_reconcile_again() => Ok(Action::requeue(REQUEUE_AFTER)),
        Err(e) => Err(e),
    }
}

async fn pass(env: &Env, cfg: &TektonConfig, status: &mut TektonConfigStatus) -> Result<()> {
    let client = env.client();
    let generation = cfg.meta().generation;
    let target = extension_target(cfg);
    upgrade::pre_upgrade(env, status, generation).await?;
    let conditions = &mut status.component;

    let children = desired_children(cfg, env.config.platform);
    let children = record(CONFIG_CONDITIONS, conditions, PRE_INSTALL, generation, children)?;

    reconcile_target_namespace(client, &target.target_namespace, &target.owner, &Default::default())
        .await?;
    let pre = env.extension.pre_reconcile(client, &target).await;
    record(CONFIG_CONDITIONS, conditions, PRE_INSTALL, generation, pre)?;

    let ready = sync_children(client, &target.owner, &children, env.config.platform).await;
    record(CONFIG_CONDITIONS, conditions, COMPONENTS_READY, generation, ready)?;

    let post = env.extension.post_reconcile(client, &target).await;
    record(CONFIG_CONDITIONS, conditions, POST_INSTALL, generation, post)?;

    upgrade::post_upgrade(env, status, generation).await?;

    status.profile = Some(cfg.spec.profile.clone());
    status.component.version = Some(env.config.target_version(cfg.spec.common.version.as_deref()));
    Ok(())
}

/// Bring every child in line and wait for it, in dependency order.
async fn sync_children(
    client: &dyn ResourceClient,
    owner: &OwnerReference,
    children: &Children,
    platform: Platform,
) -> Result<()> {
    if let Some(pipeline) = sync_child(client, owner, children.pipeline.as_ref()).await? {
        child_ready(&pipeline)?;
    }
    if let Some(trigger) = sync_child(client, owner, children.trigger.as_ref()).await? {
        child_ready(&trigger)?;
    }

    let mut rest = vec![
        sync_child(client, owner, children.chain.as_ref())
            .await?
            .map(|c| child_ready(&c)),
        sync_child(client, owner, children.result.as_ref())
            .await?
            .map(|c| child_ready(&c)),
        sync_child(client, owner, children.hub.as_ref())
            .await?
            .map(|c| child_ready(&c)),
        sync_child(client, owner, children.pruner.as_ref())
            .await?
            .map(|c| child_ready(&c)),
    ];
    match platform {
        Platform::Kubernetes => {
            rest.push(
                sync_child(client, owner, children.dashboard.as_ref())
                    .await?
                    .map(|c| child_ready(&c)),
            );
        }
        Platform::OpenShift => {
            rest.push(
                sync_child(client, owner, children.addon.as_ref())
                    .await?
                    .map(|c| child_ready(&c)),
            );
            rest.push(
                sync_child(client, owner, children.pipelines_as_code.as_ref())
                    .await?
                    .map(|c| child_ready(&c)),
            );
        }
    }
    rest.into_iter().flatten().collect()
}

/// Finalizer cleanup: remove every component the config controls.
pub async fn cleanup(env: &Env, cfg: &TektonConfig) -> Result<Action> {
    let client = env.client();
    let owner = controller_owner_ref(cfg);
    info!(name = %cfg.name_any(), "finalizing TektonConfig");

    remove_child::<TektonTrigger>(client, &owner).await?;
    remove_child::<TektonChain>(client, &owner).await?;
    remove_child::<TektonResult>(client, &owner).await?;
    remove_child::<TektonHub>(client, &owner).await?;
    remove_child::<TektonPruner>(client, &owner).await?;
    match env.config.platform {
        Platform::Kubernetes => remove_child::<TektonDashboard>(client, &owner).await?,
        Platform::OpenShift => {
            remove_child::<TektonAddon>(client, &owner).await?;
            remove_child::<OpenShiftPipelinesAsCode>(client, &owner).await?;
        }
    }
    remove_child::<TektonPipeline>(client, &owner).await?;

    env.extension.finalize(client, &extension_target(cfg)).await?;
    Ok(Action::await_change())
}
