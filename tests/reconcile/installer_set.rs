//! Installer set reconciler: phase ordering, failures and uninstall.

use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;

use tekton_operator::controller::helpers::REQUEUE_AFTER;
use tekton_operator::controller::installer_set;
use tekton_operator::crd::conditions::{self, STATUS_FALSE, STATUS_TRUE};
use tekton_operator::crd::tekton_installer_set::{
    TektonInstallerSet, TektonInstallerSetSpec, CLUSTER_SCOPED_INSTALLED, CONTROLLER_READY,
    CRDS_INSTALLED, DEPLOYMENTS_AVAILABLE, JOBS_INSTALLED, NAMESPACE_SCOPED_INSTALLED,
};
use tekton_operator::error::Error;
use tekton_operator::manifest::transform::inject_namespace;
use tekton_operator::manifest::{Manifest, ObjectKey};
use tekton_operator::platform::Platform;

use super::common::*;

const NS: &str = "tekton-pipelines";

fn installer_set(name: &str, yaml: &str) -> TektonInstallerSet {
    let manifest = Manifest::from_bytes(yaml.as_bytes())
        .expect("fixture parses")
        .transform(&[inject_namespace(NS)])
        .expect("namespace injected");
    TektonInstallerSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: TektonInstallerSetSpec {
            manifests: manifest.to_values().expect("values"),
        },
        status: None,
    }
}

fn condition(set: &TektonInstallerSet, type_: &str) -> (String, String, String) {
    let c = conditions::find(set.conditions(), type_)
        .unwrap_or_else(|| panic!("{type_} is missing"));
    (c.status.clone(), c.reason.clone(), c.message.clone())
}

#[tokio::test]
async fn test_phases_stop_at_incomplete_job() {
    let t = TestEnv::with_store(Platform::Kubernetes, InMemoryClient::new());
    let set = t.seed(&installer_set("pipeline-main", &release_yaml("pipeline", VERSION)));

    let action = installer_set::apply(&t.env, &set).await.expect("first pass");
    assert_eq!(action, Action::requeue(REQUEUE_AFTER));
    assert!(t.contains("batch/v1", "Job", Some(NS), "pipeline-migrate"));
    assert!(
        !t.contains("apps/v1", "Deployment", Some(NS), "pipeline-controller"),
        "deployments wait for jobs"
    );

    let set = t.reload(&set).await;
    assert_eq!(condition(&set, CRDS_INSTALLED).0, STATUS_TRUE);
    assert_eq!(condition(&set, CLUSTER_SCOPED_INSTALLED).0, STATUS_TRUE);
    assert_eq!(condition(&set, NAMESPACE_SCOPED_INSTALLED).0, STATUS_TRUE);
    assert_eq!(
        condition(&set, JOBS_INSTALLED),
        (
            STATUS_FALSE.to_string(),
            "NotReady".to_string(),
            "Jobs not completed: pipeline-migrate".to_string()
        )
    );
    assert!(!set.is_ready());

    t.store
        .set_status(
            &ObjectKey::new("batch/v1", "Job", Some(NS), "pipeline-migrate"),
            json!({ "conditions": [{ "type": "Complete", "status": "True" }] }),
        )
        .expect("job exists");
    let action = installer_set::apply(&t.env, &set).await.expect("second pass");
    assert_eq!(action, Action::requeue(REQUEUE_AFTER));

    let set = t.reload(&set).await;
    assert_eq!(condition(&set, JOBS_INSTALLED).0, STATUS_TRUE);
    assert_eq!(condition(&set, DEPLOYMENTS_AVAILABLE).0, STATUS_TRUE);
    let (status, reason, message) = condition(&set, CONTROLLER_READY);
    assert_eq!((status.as_str(), reason.as_str()), (STATUS_FALSE, "NotReady"));
    assert!(message.contains("pipeline-controller"));

    t.store
        .set_status(
            &ObjectKey::new("apps/v1", "Deployment", Some(NS), "pipeline-controller"),
            json!({ "conditions": [{ "type": "Available", "status": "True" }] }),
        )
        .expect("deployment exists");
    let action = installer_set::apply(&t.env, &set).await.expect("third pass");
    assert_eq!(action, Action::await_change());
    let set = t.reload(&set).await;
    assert!(set.is_ready());
    assert_eq!(set.status.as_ref().and_then(|s| s.observed_generation), Some(1));
}

#[tokio::test]
async fn test_failed_phase_is_reported_and_retried() {
    let t = TestEnv::new();
    let set = t.seed(&installer_set("pipeline-main", &release_yaml("pipeline", VERSION)));
    t.store.fail_once(Verb::Create, "ClusterRole", "", || {
        Error::Invalid("rules are malformed".to_string())
    });

    let err = installer_set::apply(&t.env, &set).await.expect_err("injected failure");
    assert!(err.is_invalid());

    let failed = t.reload(&set).await;
    let (status, reason, message) = condition(&failed, CLUSTER_SCOPED_INSTALLED);
    assert_eq!(status, STATUS_FALSE);
    assert_eq!(reason, "Error");
    assert_eq!(
        message,
        "Install failed with message: Invalid resource: rules are malformed"
    );
    assert_eq!(condition(&failed, conditions::READY).0, STATUS_FALSE);
    assert!(!t.contains("v1", "ServiceAccount", Some(NS), "pipeline-controller"));

    let action = installer_set::apply(&t.env, &failed).await.expect("retry");
    assert_eq!(action, Action::await_change());
    assert!(t.reload(&set).await.is_ready());
}

#[tokio::test]
async fn test_owned_resources_follow_the_set() {
    let t = TestEnv::new();
    let set = t.seed(&installer_set("pipeline-main", &release_yaml("pipeline", VERSION)));
    installer_set::apply(&t.env, &set).await.expect("install");

    let deployment = t
        .store
        .get_sync(&ObjectKey::new("apps/v1", "Deployment", Some(NS), "pipeline-controller"))
        .expect("deployment");
    let owners = deployment.owner_references();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "TektonInstallerSet");
    assert_eq!(owners[0].name, "pipeline-main");

    let crd = t
        .store
        .get_sync(&ObjectKey::new(
            "apiextensions.k8s.io/v1",
            "CustomResourceDefinition",
            None,
            "pipelines.tekton.dev",
        ))
        .expect("crd");
    assert!(crd.owner_references().is_empty(), "CRDs are not owned by the set");
}

#[tokio::test]
async fn test_uninstall_keeps_namespaces_crds_and_claims() {
    let t = TestEnv::new();
    let extra = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: tekton-pipelines
---
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: data
spec:
  accessModes: [ReadWriteOnce]
"#;
    let yaml = format!("{extra}---\n{}", release_yaml("pipeline", VERSION));
    let set = t.seed(&installer_set("pipeline-main", &yaml));
    installer_set::apply(&t.env, &set).await.expect("install");
    assert!(t.contains("v1", "PersistentVolumeClaim", Some(NS), "data"));

    installer_set::cleanup(&t.env, &t.reload(&set).await)
        .await
        .expect("cleanup");

    assert!(t.contains("v1", "Namespace", None, NS));
    assert!(t.contains("v1", "PersistentVolumeClaim", Some(NS), "data"));
    assert!(t.contains(
        "apiextensions.k8s.io/v1",
        "CustomResourceDefinition",
        None,
        "pipelines.tekton.dev"
    ));
    for (api_version, kind, name) in [
        ("apps/v1", "Deployment", "pipeline-controller"),
        ("v1", "Service", "pipeline-controller"),
        ("batch/v1", "Job", "pipeline-migrate"),
        ("v1", "ServiceAccount", "pipeline-controller"),
    ] {
        assert!(!t.contains(api_version, kind, Some(NS), name), "{kind} {name} is deleted");
    }
    assert!(!t.contains(
        "rbac.authorization.k8s.io/v1",
        "ClusterRole",
        None,
        "pipeline-controller-role"
    ));
}
