//! Platform registry.
//!
//! Each platform maps controller names onto constructors.  The process runs
//! the subset named in its configuration, all of them when none are named.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::controller::component::{self, Component};
use crate::controller::context::Context;
use crate::controller::extension::{Extension, NoopExtension, OpenShiftExtension};
use crate::controller::{installer_set, tekton_config};
use crate::crd::openshift_pipelines_as_code::OpenShiftPipelinesAsCode;
use crate::crd::tekton_addon::TektonAddon;
use crate::crd::tekton_chain::TektonChain;
use crate::crd::tekton_dashboard::TektonDashboard;
use crate::crd::tekton_hub::TektonHub;
use crate::crd::tekton_pipeline::TektonPipeline;
use crate::crd::tekton_pruner::TektonPruner;
use crate::crd::tekton_result::TektonResult;
use crate::crd::tekton_trigger::TektonTrigger;
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Platform {
    #[default]
    Kubernetes,
    OpenShift,
}

impl Platform {
    pub fn default_target_namespace(self) -> &'static str {
        match self {
            Platform::Kubernetes => "tekton-pipelines",
            Platform::OpenShift => "openshift-pipelines",
        }
    }

    pub fn extension(self) -> Arc<dyn Extension> {
        match self {
            Platform::Kubernetes => Arc::new(NoopExtension),
            Platform::OpenShift => Arc::new(OpenShiftExtension),
        }
    }

    /// Controllers available on this platform, in start order.
    pub fn controllers(self) -> Vec<(&'static str, ControllerFn)> {
        let mut out: Vec<(&'static str, ControllerFn)> = vec![
            ("tektonconfig", config_controller),
            ("tektonpipeline", component_controller::<TektonPipeline>),
            ("tektontrigger", component_controller::<TektonTrigger>),
            ("tektonhub", component_controller::<TektonHub>),
            ("tektonchain", component_controller::<TektonChain>),
            ("tektonresult", component_controller::<TektonResult>),
        ];
        match self {
            Platform::Kubernetes => {
                out.push(("tektondashboard", component_controller::<TektonDashboard>));
            }
            Platform::OpenShift => {
                out.push(("tektonaddon", component_controller::<TektonAddon>));
                out.push((
                    "openshift-pipelines-as-code",
                    component_controller::<OpenShiftPipelinesAsCode>,
                ));
            }
        }
        out.push(("tektonpruner", component_controller::<TektonPruner>));
        out.push(("tektoninstallerset", installer_set_controller));
        out
    }
}

fn config_controller(ctx: Arc<Context>) -> BoxFuture<'static, ()> {
    tekton_config::run(ctx).boxed()
}

fn installer_set_controller(ctx: Arc<Context>) -> BoxFuture<'static, ()> {
    installer_set::run(ctx).boxed()
}

fn component_controller<C: Component>(ctx: Arc<Context>) -> BoxFuture<'static, ()> {
    component::run::<C>(ctx).boxed()
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Platform::Kubernetes => "kubernetes",
            Platform::OpenShift => "openshift",
        })
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "kubernetes" | "k8s" => Ok(Platform::Kubernetes),
            "openshift" => Ok(Platform::OpenShift),
            other => Err(Error::config(format!("unknown platform {other:?}"))),
        }
    }
}

/// Starts one controller; the future runs until the process stops.
pub type ControllerFn = fn(Arc<Context>) -> BoxFuture<'static, ()>;

/// Validated process configuration.
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub platform: Platform,
    pub unique_process_name: String,
    pub controllers: Vec<String>,
}

impl PlatformConfig {
    /// `controllers` is a comma separated list; empty selects every
    /// controller of the platform.
    pub fn new(platform: Platform, unique_process_name: &str, controllers: &str) -> Result<Self> {
        let unique_process_name = unique_process_name.trim();
        if unique_process_name.is_empty() {
            return Err(Error::config("a unique process name is required"));
        }

        let available: Vec<&str> = platform.controllers().iter().map(|(n, _)| *n).collect();
        let requested: Vec<String> = controllers
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        let unknown: Vec<&str> = requested
            .iter()
            .map(String::as_str)
            .filter(|n| !available.contains(n))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::config(format!(
                "controllers not available on {platform}: {}",
                unknown.join(", ")
            )));
        }

        let controllers = if requested.is_empty() {
            available.iter().map(|n| n.to_string()).collect()
        } else {
            requested
        };
        Ok(Self {
            platform,
            unique_process_name: unique_process_name.to_string(),
            controllers,
        })
    }

    /// Constructors of the selected controllers, in platform order.
    pub fn selected(&self) -> Vec<(&'static str, ControllerFn)> {
        self.platform
            .controllers()
            .into_iter()
            .filter(|(name, _)| self.controllers.iter().any(|c| c == name))
            .collect()
    }
}
