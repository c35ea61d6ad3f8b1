//! Version gated upgrade steps of the TektonConfig.
//!
//! Pre-upgrade steps run before anything is installed, post-upgrade steps
//! once every component is ready.  Each phase runs at most once per operator
//! release: the release it last ran for is recorded on the config status.

use kube::ResourceExt;
use tracing::info;

use crate::crd::tekton_config::{
    TektonConfigStatus, CONFIG_CONDITIONS, POST_UPGRADE, PRE_UPGRADE,
};
use crate::crd::tekton_installer_set::{TektonInstallerSet, INSTALLER_TYPE_KEY};
use crate::error::Result;
use crate::manifest::client::list_as;
use crate::manifest::ResourceClient;
use crate::platform::Platform;

use super::component::record;
use super::context::Env;
use super::registry;

/// Installer types of cluster task sets older releases created.
pub const OBSOLETE_CLUSTER_TASK_TYPES: [&str; 3] = [
    "custom-clustertask",
    "custom-communityclustertask",
    "custom-versionedclustertask",
];

/// Installer types of per-release resolver sets, trimmed to the newest few.
pub const VERSIONED_RESOLVER_TYPES: [&str; 2] = [
    "custom-versionedresolvertask",
    "custom-versionedresolverstepaction",
];

pub const KEEP_VERSIONED_SETS: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeStep {
    /// Drop every condition so the new release reports from scratch.
    ResetConditions,
    /// Delete cluster task sets the current release no longer ships.
    DeleteObsoleteClusterTasks,
    /// Keep only the newest versioned resolver sets.
    TrimVersionedResolvers,
}

impl UpgradeStep {
    pub async fn run(self, client: &dyn ResourceClient, status: &mut TektonConfigStatus) -> Result<()> {
        match self {
            Self::ResetConditions => {
                status.component.conditions.clear();
                Ok(())
            }
            Self::DeleteObsoleteClusterTasks => {
                for installer_type in OBSOLETE_CLUSTER_TASK_TYPES {
                    registry::remove_installer_sets(client, &type_selector(installer_type)).await?;
                }
                Ok(())
            }
            Self::TrimVersionedResolvers => {
                for installer_type in VERSIONED_RESOLVER_TYPES {
                    trim_sets(client, installer_type, KEEP_VERSIONED_SETS).await?;
                }
                Ok(())
            }
        }
    }
}

pub fn pre_upgrade_steps(_platform: Platform) -> Vec<UpgradeStep> {
    vec![UpgradeStep::ResetConditions]
}

pub fn post_upgrade_steps(platform: Platform) -> Vec<UpgradeStep> {
    match platform {
        Platform::Kubernetes => Vec::new(),
        Platform::OpenShift => vec![
            UpgradeStep::DeleteObsoleteClusterTasks,
            UpgradeStep::TrimVersionedResolvers,
        ],
    }
}

fn type_selector(installer_type: &str) -> String {
    format!("{INSTALLER_TYPE_KEY}={installer_type}")
}

/// Delete all but the `keep` sets of `installer_type` whose names sort last.
async fn trim_sets(client: &dyn ResourceClient, installer_type: &str, keep: usize) -> Result<()> {
    let mut names: Vec<String> = list_as::<TektonInstallerSet>(client, None, &type_selector(installer_type))
        .await?
        .iter()
        .map(|s| s.name_any())
        .collect();
    names.sort_unstable_by(|a, b| b.cmp(a));
    for name in names.into_iter().skip(keep) {
        registry::delete_installer_set(client, &name).await?;
    }
    Ok(())
}

/// Run `steps` unless they already ran for the operator release, then
/// record the release in `applied`.
async fn run_phase(
    env: &Env,
    phase: &str,
    steps: Vec<UpgradeStep>,
    status: &mut TektonConfigStatus,
    applied: fn(&mut TektonConfigStatus) -> &mut Option<String>,
) -> Result<()> {
    let version = env.config.operator_version.clone();
    if applied(status).as_deref() == Some(version.as_str()) {
        return Ok(());
    }
    info!(
        %phase,
        from = applied(status).as_deref().unwrap_or("none"),
        to = %version,
        steps = steps.len(),
        "running upgrade steps"
    );
    for step in steps {
        step.run(env.client(), status).await?;
    }
    *applied(status) = Some(version);
    Ok(())
}

fn pre_upgrade_version(status: &mut TektonConfigStatus) -> &mut Option<String> {
    &mut status.pre_upgrade_version
}

fn post_upgrade_version(status: &mut TektonConfigStatus) -> &mut Option<String> {
    &mut status.post_upgrade_version
}

/// Pre-upgrade phase; marks `PreUpgrade`.
pub async fn pre_upgrade(env: &Env, status: &mut TektonConfigStatus, generation: Option<i64>) -> Result<()> {
    let steps = pre_upgrade_steps(env.config.platform);
    let result = run_phase(env, PRE_UPGRADE, steps, status, pre_upgrade_version).await;
    CONFIG_CONDITIONS.initialize(&mut status.component.conditions, generation);
    record(CONFIG_CONDITIONS, &mut status.component, PRE_UPGRADE, generation, result)
}

/// Post-upgrade phase; marks `PostUpgrade`.
pub async fn post_upgrade(env: &Env, status: &mut TektonConfigStatus, generation: Option<i64>) -> Result<()> {
    let steps = post_upgrade_steps(env.config.platform);
    let result = run_phase(env, POST_UPGRADE, steps, status, post_upgrade_version).await;
    record(CONFIG_CONDITIONS, &mut status.component, POST_UPGRADE, generation, result)
}
