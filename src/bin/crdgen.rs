//! Generate CRD YAML from Rust types.
//!
//! Usage:
//!   cargo run --bin crdgen              # all CRDs to stdout
//!   cargo run --bin crdgen -- --out-dir ./crds   # one file per CRD

use std::path::PathBuf;

use anyhow::Context;
use kube::CustomResourceExt;
use tekton_operator::crd::{
    openshift_pipelines_as_code::OpenShiftPipelinesAsCode, tekton_addon::TektonAddon,
    tekton_chain::TektonChain, tekton_config::TektonConfig, tekton_dashboard::TektonDashboard,
    tekton_hub::TektonHub, tekton_installer_set::TektonInstallerSet,
    tekton_pipeline::TektonPipeline, tekton_pruner::TektonPruner, tekton_result::TektonResult,
    tekton_trigger::TektonTrigger,
};

fn main() -> anyhow::Result<()> {
    let out_dir: Option<PathBuf> = std::env::args()
        .skip_while(|a| a != "--out-dir")
        .nth(1)
        .map(PathBuf::from);

    let crds = vec![
        ("tektonconfig-crd.yaml", serde_yaml::to_string(&TektonConfig::crd())?),
        ("tektonpipeline-crd.yaml", serde_yaml::to_string(&TektonPipeline::crd())?),
        ("tektontrigger-crd.yaml", serde_yaml::to_string(&TektonTrigger::crd())?),
        ("tektonchain-crd.yaml", serde_yaml::to_string(&TektonChain::crd())?),
        ("tektonresult-crd.yaml", serde_yaml::to_string(&TektonResult::crd())?),
        ("tektondashboard-crd.yaml", serde_yaml::to_string(&TektonDashboard::crd())?),
        ("tektonaddon-crd.yaml", serde_yaml::to_string(&TektonAddon::crd())?),
        ("tektonhub-crd.yaml", serde_yaml::to_string(&TektonHub::crd())?),
        ("tektonpruner-crd.yaml", serde_yaml::to_string(&TektonPruner::crd())?),
        (
            "openshiftpipelinesascode-crd.yaml",
            serde_yaml::to_string(&OpenShiftPipelinesAsCode::crd())?,
        ),
        (
            "tektoninstallerset-crd.yaml",
            serde_yaml::to_string(&TektonInstallerSet::crd())?,
        ),
    ];

    match out_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir).context("failed to create output directory")?;
            for (name, yaml) in &crds {
                let path = dir.join(name);
                std::fs::write(&path, format!("---\n{yaml}"))
                    .with_context(|| format!("failed to write {}", path.display()))?;
                eprintln!("wrote {}", path.display());
            }
        }
        None => {
            for (_name, yaml) in &crds {
                println!("---\n{yaml}");
            }
        }
    }
    Ok(())
}
