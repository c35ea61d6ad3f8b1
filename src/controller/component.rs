//! Shared reconciler for component custom resources.
//!
//! Every component kind (TektonPipeline, TektonTrigger, ...) runs the same
//! pass; a [`Component`] implementation only supplies where its manifests
//! live, which installer set slots it produces and its own transformers.
//!
//! One pass:
//!
//! 1. ignore anything but the singleton name,
//! 2. seed defaults and ensure the target namespace,
//! 3. run the platform extension's pre-reconcile hook,
//! 4. validate dependencies (components that have any),
//! 5. per slot: render, look up / create / replace the installer set and
//!    check its `Ready` condition,
//! 6. run the post-reconcile hook and roll the status up.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::EventType;
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::crd::conditions::ConditionSet;
use crate::crd::shared::{
    ComponentStatus, COMPONENT_CONDITIONS, DEPENDENCIES_INSTALLED, INSTALLER_SET_AVAILABLE,
    POST_RECONCILE, PRE_RECONCILE,
};
use crate::crd::tekton_installer_set::TektonInstallerSet;
use crate::crd::{TektonComponent, GROUP};
use crate::error::{Error, Result};
use crate::helpers::compute_hash;
use crate::manifest::filter::{by_kind, none};
use crate::manifest::patch::merge_diff;
use crate::manifest::{Manifest, ObjectKey, Predicate, Transformer};
use crate::platform::Platform;

use super::context::{Context, Env};
use super::extension::ExtensionTarget;
use super::helpers::{
    controller_owner_ref, from_finalizer_error, publish_event, requeue_for, REQUEUE_AFTER,
};
use super::pvc;
use super::registry::{self, SetRequest};
use super::target_namespace::reconcile_target_namespace;
use super::transformers::{apply_additional_options, common};

// ── Slots ─────────────────────────────────────────────────────────────────────

/// Role of a slot's installer set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    /// The component release itself.
    Main,
    /// Installed before the main sets, from `pre/`.
    Pre,
    /// Installed once the main sets are ready, from `post/`.
    Post,
    /// An extra set with its own installer type, e.g. `custom-<name>`.
    Custom(&'static str),
}

/// One installer set a component produces.
#[derive(Clone, Debug)]
pub struct Slot {
    /// Value of the `component` label; `None` for single-set components.
    pub name: Option<&'static str>,
    /// Manifest directory below `<kodata>/<component>/<version>`.
    pub dir: String,
    /// Condition marked when the slot's installer set is ready.
    pub condition: &'static str,
    pub kind: SlotKind,
}

impl Slot {
    /// The only slot of a single-set component.
    pub fn single() -> Self {
        Self {
            name: None,
            dir: String::new(),
            condition: INSTALLER_SET_AVAILABLE,
            kind: SlotKind::Main,
        }
    }

    pub fn named(name: &'static str, condition: &'static str) -> Self {
        Self {
            name: Some(name),
            dir: name.to_string(),
            condition,
            kind: SlotKind::Main,
        }
    }

    /// Main slot read from a subdirectory.
    pub fn in_dir(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::single()
        }
    }

    pub fn pre() -> Self {
        Self {
            name: None,
            dir: "pre".to_string(),
            condition: PRE_RECONCILE,
            kind: SlotKind::Pre,
        }
    }

    pub fn post() -> Self {
        Self {
            name: None,
            dir: "post".to_string(),
            condition: POST_RECONCILE,
            kind: SlotKind::Post,
        }
    }

    pub fn custom(name: &'static str, condition: &'static str) -> Self {
        Self {
            name: None,
            dir: name.to_string(),
            condition,
            kind: SlotKind::Custom(name),
        }
    }

    /// Value of the `installer-type` label for this slot.
    pub fn installer_type(&self, main: &str) -> String {
        match self.kind {
            SlotKind::Main => main.to_string(),
            SlotKind::Pre => "pre".to_string(),
            SlotKind::Post => "post".to_string(),
            SlotKind::Custom(name) => format!("custom-{}", name.to_lowercase()),
        }
    }

    /// Pre, post and custom sets are only installed when the release ships
    /// their directory.
    pub fn is_optional(&self) -> bool {
        self.kind != SlotKind::Main
    }

    /// Key of the slot in the status `installerSets` map.
    pub fn key(&self, main: &str) -> String {
        match self.name {
            Some(name) => name.to_string(),
            None => self.installer_type(main),
        }
    }
}

/// What to do with a slot this pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotPlan {
    /// Look up the installer set and create it when missing.
    Install,
    /// Delete the current installer set first, then install.
    Regenerate,
    /// The slot is not wanted; delete its installer set if any.
    Skip,
}

// ── Component trait ───────────────────────────────────────────────────────────

#[async_trait]
pub trait Component: TektonComponent {
    /// Directory below the kodata root holding this component's releases.
    const MANIFEST_DIR: &'static str;
    /// Prefix of the environment variables overriding images.
    const IMAGE_PREFIX: &'static str;
    /// Value of the `installer-type` label.
    const INSTALLER_TYPE: &'static str;
    /// Value of the operand-name label on rendered resources.
    const OPERAND: &'static str;
    const CONDITIONS: ConditionSet = COMPONENT_CONDITIONS;

    fn slots(&self) -> Vec<Slot> {
        vec![Slot::single()]
    }

    /// Fill unset fields.  Only the in-memory copy of a pass is changed.
    fn set_defaults(&mut self, platform: Platform) {
        let common = self.common_mut();
        if common.target_namespace.is_empty() {
            common.target_namespace = platform.default_target_namespace().to_string();
        }
    }

    /// Transformers run after the common and extension ones.
    fn transformers(&self, _slot: &Slot) -> Vec<Transformer> {
        Vec::new()
    }

    /// Resources of a slot the user provides; never put in an installer set.
    fn user_provided(&self, _slot: &Slot) -> Vec<Predicate> {
        Vec::new()
    }

    /// Verify or create prerequisites before any slot is installed.
    async fn check_dependencies(&self, _env: &Env) -> Result<()> {
        Ok(())
    }

    async fn prepare_slot(
        &self,
        _env: &Env,
        _slot: &Slot,
        _status: &ComponentStatus,
    ) -> Result<SlotPlan> {
        Ok(SlotPlan::Install)
    }

    /// Write the component status.  The status subresource of every
    /// component embeds [`ComponentStatus`] at its root.
    fn status_patch(&self, status: &ComponentStatus) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(status)?)
    }
}

/// Finalizer a component kind registers, e.g.
/// `tektonpipelines.operator.tekton.dev`.
pub fn finalizer_name<C: Component>() -> String {
    format!("{}s.{GROUP}", C::kind(&()).to_lowercase())
}

/// Transition key for a component slot.
pub fn transition_key<C: Component>(slot: &str) -> String {
    format!("{}/{slot}", C::RESOURCE_NAME)
}

// ── Controller ────────────────────────────────────────────────────────────────

/// Start the controller for component kind `C`.  Returns a future that runs
/// forever.
pub async fn run<C: Component>(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let components: Api<C> = Api::all(client.clone());

    Controller::new(components, WatcherConfig::default())
        .owns(Api::<TektonInstallerSet>::all(client), WatcherConfig::default())
        .run(reconcile::<C>, error_policy::<C>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((_obj, _action)) => {}
                Err(e) => {
                    let msg = format!("{e:?}");
                    if msg.contains("ObjectNotFound") {
                        debug!("reconcile: object already deleted");
                    } else {
                        warn!(kind = %C::kind(&()), "reconcile failed: {msg}");
                    }
                }
            }
        })
        .await;
}

async fn reconcile<C: Component>(cr: Arc<C>, ctx: Arc<Context>) -> Result<Action> {
    let api: Api<C> = Api::all(ctx.client.clone());
    let finalizer_name = finalizer_name::<C>();
    let result = finalizer(&api, &finalizer_name, cr.clone(), |event| async {
        match event {
            FinalizerEvent::Apply(cr) => apply(&ctx.env, cr.as_ref()).await,
            FinalizerEvent::Cleanup(cr) => cleanup(&ctx.env, cr.as_ref()).await,
        }
    })
    .await
    .map_err(from_finalizer_error);

    if let Err(e) = &result {
        if !e.is_transient() {
            publish_event(
                &ctx.client,
                &ctx.reporter,
                cr.as_ref(),
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

fn error_policy<C: Component>(cr: Arc<C>, error: &Error, _ctx: Arc<Context>) -> Action {
    debug!(kind = %C::kind(&()), name = %cr.name_any(), %error, "error policy");
    requeue_for(error)
}

// ── Reconcile pass ────────────────────────────────────────────────────────────

/// One reconcile pass over a component.  The status is written back whether
/// or not the pass succeeded; the sentinel becomes a short requeue.
pub async fn apply<C: Component>(env: &Env, cr: &C) -> Result<Action> {
    let name = cr.name_any();
    let generation = cr.meta().generation;
    let mut status = cr.component_status().cloned().unwrap_or_default();
    C::CONDITIONS.initialize(&mut status.conditions, generation);

    let result = if name != C::RESOURCE_NAME {
        let message = format!(
            "Resource ignored, Expected Name: {}, Got Name: {name}",
            C::RESOURCE_NAME
        );
        warn!(kind = %C::kind(&()), "{message}");
        C::CONDITIONS.mark_not_ready(&mut status.conditions, "Ignored", &message, generation);
        Ok(())
    } else {
        let mut cr = cr.clone();
        cr.set_defaults(env.config.platform);
        pass(env, &cr, &mut status).await
    };

    status.observed_generation = generation;
    if cr.component_status() != Some(&status) {
        let before = match cr.component_status() {
            Some(old) => cr.status_patch(old)?,
            None => serde_json::Value::Null,
        };
        let patch = merge_diff(&before, &cr.status_patch(&status)?);
        env.client()
            .patch_status(&ObjectKey::for_resource::<C>(&name, None), &patch)
            .await?;
    }

    match result {
        Ok(()) => Ok(Action::await_change()),
        Err(e) if e.is_reconcile_again() => Ok(Action::requeue(REQUEUE_AFTER)),
        Err(e) => Err(e),
    }
}

fn extension_target<C: Component>(cr: &C) -> ExtensionTarget {
    ExtensionTarget {
        kind: C::kind(&()).to_string(),
        name: cr.name_any(),
        target_namespace: cr.target_namespace().to_string(),
        owner: controller_owner_ref(cr),
    }
}

/// Mark `condition` from the outcome of a step: the sentinels leave it
/// `Unknown`, any other error marks it `False`.
pub(super) fn record<T>(
    set: ConditionSet,
    status: &mut ComponentStatus,
    condition: &str,
    generation: Option<i64>,
    result: Result<T>,
) -> Result<T> {
    match &result {
        Ok(_) => set.mark_true(&mut status.conditions, condition, generation),
        Err(Error::ReconcileAgain) => set.mark_unknown(
            &mut status.conditions,
            condition,
            "Waiting",
            "waiting for resources to become ready",
            generation,
        ),
        Err(e @ Error::UpgradePending) => set.mark_unknown(
            &mut status.conditions,
            condition,
            "UpgradePending",
            &e.to_string(),
            generation,
        ),
        Err(e @ Error::Reinstalling) => set.mark_unknown(
            &mut status.conditions,
            condition,
            "Reinstalling",
            &e.to_string(),
            generation,
        ),
        Err(e) => {
            let reason = match e {
                Error::DependencyMissing(_) => "DependencyMissing",
                Error::InstallerSetNotAvailable(_) => "InstallerSetNotAvailable",
                _ => "Error",
            };
            set.mark_false(&mut status.conditions, condition, reason, &e.to_string(), generation);
        }
    }
    result
}

async fn pass<C: Component>(env: &Env, cr: &C, status: &mut ComponentStatus) -> Result<()> {
    let client = env.client();
    let kind = C::kind(&()).to_string();
    let generation = cr.meta().generation;
    let target = extension_target(cr);
    let version = env.config.target_version(cr.common().version.as_deref());

    reconcile_target_namespace(
        client,
        &target.target_namespace,
        &target.owner,
        &BTreeMap::new(),
    )
    .await?;
    registry::cleanup_obsolete(client, &kind).await?;

    let pre = env.extension.pre_reconcile(client, &target).await;
    record(C::CONDITIONS, status, PRE_RECONCILE, generation, pre)?;

    if C::CONDITIONS.dependents().contains(&DEPENDENCIES_INSTALLED) {
        let deps = cr.check_dependencies(env).await;
        record(C::CONDITIONS, status, DEPENDENCIES_INSTALLED, generation, deps)?;
    }

    let spec_hash = compute_hash(&serde_json::to_value(cr)?["spec"])?;
    for slot in cr.slots() {
        let req = SetRequest {
            created_by: kind.clone(),
            installer_type: slot.installer_type(C::INSTALLER_TYPE),
            component: slot.name.map(str::to_string),
            version: version.clone(),
            target_namespace: target.target_namespace.clone(),
            spec_hash: spec_hash.clone(),
            owner: target.owner.clone(),
        };
        let slot_key = slot.key(C::INSTALLER_TYPE);

        let shipped = !slot.is_optional()
            || tokio::fs::try_exists(manifest_dir::<C>(env, &version, &slot))
                .await
                .unwrap_or(false);
        let plan = if shipped {
            match cr.prepare_slot(env, &slot, status).await {
                Ok(plan) => plan,
                Err(e) => return record(C::CONDITIONS, status, slot.condition, generation, Err(e)),
            }
        } else {
            SlotPlan::Skip
        };
        match plan {
            SlotPlan::Skip => {
                debug!(%kind, slot = %slot_key, "slot not wanted");
                registry::remove_installer_sets(client, &req.selector()).await?;
                status.installer_sets.remove(&slot_key);
                C::CONDITIONS.mark_true(&mut status.conditions, slot.condition, generation);
                continue;
            }
            SlotPlan::Regenerate => {
                info!(%kind, slot = %slot_key, "regenerating installer set");
                registry::remove_installer_sets(client, &req.selector()).await?;
            }
            SlotPlan::Install => {}
        }

        let set = match install_slot(env, cr, &slot, &req, &target).await {
            Ok(set) => set,
            Err(e) => return record(C::CONDITIONS, status, slot.condition, generation, Err(e)),
        };
        status.installer_sets.insert(slot_key, set.name_any());

        let ready = registry::check_ready(&set);
        record(C::CONDITIONS, status, slot.condition, generation, ready)?;
    }

    let post = env.extension.post_reconcile(client, &target).await;
    record(C::CONDITIONS, status, POST_RECONCILE, generation, post)?;

    status.version = Some(version);
    Ok(())
}

/// Render the slot, apply its claims and make sure its installer set exists.
async fn install_slot<C: Component>(
    env: &Env,
    cr: &C,
    slot: &Slot,
    req: &SetRequest,
    target: &ExtensionTarget,
) -> Result<TektonInstallerSet> {
    let rendered = render(env, cr, slot, &req.version, target).await?;
    pvc::apply_claims(env.client(), &rendered, &target.owner).await?;

    let mut excluded = vec![by_kind("Namespace"), by_kind(pvc::PVC_KIND)];
    excluded.extend(cr.user_provided(slot));
    let manifest = rendered.filter(&[none(excluded)]);
    registry::ensure_installer_set(env.client(), req, &manifest).await
}

/// On-disk location of a slot's manifests.
pub fn manifest_dir<C: Component>(env: &Env, version: &str, slot: &Slot) -> PathBuf {
    let dir = env.config.kodata_path.join(C::MANIFEST_DIR).join(version);
    if slot.dir.is_empty() {
        dir
    } else {
        dir.join(&slot.dir)
    }
}

/// Load and transform a slot's manifests.  Additional options run last so
/// user overrides win.
pub async fn render<C: Component>(
    env: &Env,
    cr: &C,
    slot: &Slot,
    version: &str,
    target: &ExtensionTarget,
) -> Result<Manifest> {
    let dir = manifest_dir::<C>(env, version, slot);
    debug!(kind = %target.kind, dir = %dir.display(), "loading manifests");
    let manifest = Manifest::load_dir(dir).await?;

    let mut transformers = common(
        C::OPERAND,
        target.owner.clone(),
        &target.target_namespace,
        env.config.images(C::IMAGE_PREFIX),
        &cr.common().config,
    );
    transformers.extend(env.extension.transformers(target));
    transformers.extend(cr.transformers(slot));

    let transformed = manifest.transform(&transformers)?;
    apply_additional_options(&transformed, &target.target_namespace, &cr.common().options)
}

/// Finalizer cleanup: run the extension hook and delete every installer set
/// the component created.
pub async fn cleanup<C: Component>(env: &Env, cr: &C) -> Result<Action> {
    let kind = C::kind(&()).to_string();
    info!(%kind, name = %cr.name_any(), "finalizing component");
    env.extension
        .finalize(env.client(), &extension_target(cr))
        .await?;
    registry::delete_matching(env.client(), &registry::created_by_selector(&kind)).await?;
    for slot in cr.slots() {
        env.transitions
            .forget(&transition_key::<C>(&slot.key(C::INSTALLER_TYPE)));
    }
    Ok(Action::await_change())
}
