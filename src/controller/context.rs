//! Shared context passed to every reconcile call.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use kube::runtime::events::Reporter;
use kube::Client;
use parking_lot::Mutex;

use crate::helpers::{images_from_env, normalize_version, override_registry};
use crate::manifest::ResourceClient;
use crate::platform::Platform;

use super::extension::Extension;

/// Process-wide settings resolved once at startup.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Root of the on-disk release payloads.
    pub kodata_path: PathBuf,
    /// Release installed when a component does not pin a version.
    pub operator_version: String,
    pub platform: Platform,
    /// Snapshot of the `IMAGE_*` environment.
    pub image_env: Vec<(String, String)>,
    pub registry_override: Option<String>,
}

impl OperatorConfig {
    /// Capture image overrides from the process environment.
    pub fn from_env(kodata_path: PathBuf, operator_version: String, platform: Platform) -> Self {
        let image_env = std::env::vars()
            .filter(|(k, _)| k.starts_with("IMAGE_"))
            .collect();
        let registry_override = std::env::var(crate::helpers::IMAGE_REGISTRY_OVERRIDE)
            .ok()
            .filter(|v| !v.is_empty());
        Self {
            kodata_path,
            operator_version,
            platform,
            image_env,
            registry_override,
        }
    }

    /// Directory name of the release to install for a requested version.
    pub fn target_version(&self, requested: Option<&str>) -> String {
        match requested.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => normalize_version(v),
            None => normalize_version(&self.operator_version),
        }
    }

    /// Image overrides for one component, registry rewrite applied.
    pub fn images(&self, prefix: &str) -> BTreeMap<String, String> {
        let images = images_from_env(prefix, self.image_env.iter().cloned());
        override_registry(images, self.registry_override.as_deref())
    }
}

/// One-shot regenerate flags keyed by `<component>/<slot>`.
///
/// Losing this map on restart only costs one extra regeneration check.
#[derive(Debug, Default)]
pub struct Transitions {
    flags: Mutex<HashMap<String, bool>>,
}

impl Transitions {
    /// Record that `key` needs a regeneration.
    pub fn mark(&self, key: &str) {
        self.flags.lock().insert(key.to_string(), true);
    }

    /// Consume the flag for `key`; true at most once per `mark`.
    pub fn take(&self, key: &str) -> bool {
        self.flags
            .lock()
            .get_mut(key)
            .map(std::mem::take)
            .unwrap_or(false)
    }

    pub fn forget(&self, key: &str) {
        self.flags.lock().remove(key);
    }
}

/// Everything a reconcile pass needs besides the object itself.  Free of the
/// kube client so passes can run against an in-memory store.
#[derive(Clone)]
pub struct Env {
    pub resources: Arc<dyn ResourceClient>,
    pub config: Arc<OperatorConfig>,
    pub extension: Arc<dyn Extension>,
    pub transitions: Arc<Transitions>,
}

impl Env {
    pub fn client(&self) -> &dyn ResourceClient {
        self.resources.as_ref()
    }
}

pub struct Context {
    pub client: Client,
    pub reporter: Reporter,
    pub env: Env,
}
