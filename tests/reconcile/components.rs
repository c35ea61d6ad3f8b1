//! Component reconciler scenarios against the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, PersistentVolumeClaim};
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;

use tekton_operator::controller::component::{self, Slot};
use tekton_operator::controller::context::OperatorConfig;
use tekton_operator::controller::extension::{
    PIPELINES_SCC, SCC_ANNOTATION, SCC_ROLE_BINDING, SERVICE_CA_CONFIG_MAP, TRUSTED_CA_CONFIG_MAP,
};
use tekton_operator::controller::helpers::REQUEUE_AFTER;
use tekton_operator::crd::conditions::{self, STATUS_FALSE, STATUS_TRUE};
use tekton_operator::crd::shared::{CommonSpec, INSTALLER_SET_AVAILABLE};
use tekton_operator::crd::tekton_chain::{TektonChain, TektonChainSpec};
use tekton_operator::crd::tekton_installer_set::{
    TektonInstallerSet, TektonInstallerSetSpec, CREATED_BY_KEY, INSTALLER_TYPE_KEY,
    RELEASE_VERSION_KEY, TARGET_NAMESPACE_KEY,
};
use tekton_operator::crd::tekton_pipeline::{TektonPipeline, TektonPipelineSpec};
use tekton_operator::crd::tekton_result::{TektonResult, TektonResultSpec};
use tekton_operator::error::Error;
use tekton_operator::manifest::{ObjectKey, ResourceClient};
use tekton_operator::platform::Platform;

use super::common::*;

const NS: &str = "tekton-pipelines";
const PIPELINE_SELECTOR: &str =
    "operator.tekton.dev/created-by=TektonPipeline,operator.tekton.dev/installer-type=pipeline";

fn common_spec(version: &str) -> CommonSpec {
    CommonSpec {
        target_namespace: NS.to_string(),
        version: Some(version.to_string()),
        ..Default::default()
    }
}

fn pipeline(name: &str, version: &str) -> TektonPipeline {
    TektonPipeline::new(
        name,
        TektonPipelineSpec {
            common: common_spec(version),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_fresh_install_creates_one_set_and_installs_by_phase() {
    let t = TestEnv::new();
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    let cr = t.seed(&pipeline("pipeline", VERSION));

    let action = component::apply(&t.env, &cr).await.expect("first pass");
    assert_eq!(action, Action::requeue(REQUEUE_AFTER));

    let sets = t.installer_sets().await;
    assert_eq!(sets.len(), 1, "exactly one installer set");
    let set = &sets[0];
    assert!(set.name_any().starts_with("pipeline-"));
    assert_eq!(set.labels().get(CREATED_BY_KEY).map(String::as_str), Some("TektonPipeline"));
    assert_eq!(set.labels().get(INSTALLER_TYPE_KEY).map(String::as_str), Some("pipeline"));
    assert_eq!(set.labels().get(RELEASE_VERSION_KEY).map(String::as_str), Some(VERSION));
    assert_eq!(set.annotations().get(TARGET_NAMESPACE_KEY).map(String::as_str), Some(NS));
    assert!(t.contains("v1", "Namespace", None, NS), "target namespace is created");

    t.store.clear_operations();
    t.settle_installer_sets().await;
    assert_eq!(
        t.created_kinds(),
        vec![
            "CustomResourceDefinition",
            "ClusterRole",
            "ServiceAccount",
            "ConfigMap",
            "Job",
            "Deployment",
            "Service",
        ]
    );

    let cr = t.reload(&cr).await;
    let action = component::apply(&t.env, &cr).await.expect("second pass");
    assert_eq!(action, Action::await_change());

    let status = t.reload(&cr).await.status.expect("status is written");
    assert!(conditions::is_ready(&status.conditions));
    assert_eq!(status.version.as_deref(), Some(VERSION));
    assert_eq!(status.installer_sets.get("pipeline"), Some(&set.name_any()));
    assert_eq!(status.observed_generation, Some(1));
}

#[tokio::test]
async fn test_rendered_workloads_land_in_target_namespace_with_overrides() {
    let mut t = TestEnv::new();
    t.env.config = Arc::new(OperatorConfig {
        image_env: vec![(
            "IMAGE_PIPELINES_PIPELINE_CONTROLLER".to_string(),
            "quay.io/mirror/controller:v1".to_string(),
        )],
        ..(*t.env.config).clone()
    });
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    let mut cr = pipeline("pipeline", VERSION);
    cr.spec.pipeline.feature_flags =
        BTreeMap::from([("enable-api-fields".to_string(), "beta".to_string())]);
    cr.spec.common.options.deployments.insert(
        "pipeline-controller".to_string(),
        json!({ "spec": { "replicas": 3 } }),
    );
    let cr = t.seed(&cr);

    t.converge(&cr).await;

    let deployment = t
        .get::<Deployment>("pipeline-controller", Some(NS))
        .await
        .expect("deployment installed");
    let spec = deployment.spec.expect("deployment spec");
    assert_eq!(spec.replicas, Some(3), "additional options win");
    let container = &spec.template.spec.expect("pod spec").containers[0];
    assert_eq!(container.image.as_deref(), Some("quay.io/mirror/controller:v1"));
    assert_eq!(
        deployment.metadata.owner_references.expect("owner")[0].kind,
        "TektonInstallerSet"
    );

    let flags = t
        .get::<ConfigMap>("feature-flags", Some(NS))
        .await
        .expect("feature flags installed");
    assert_eq!(
        flags.data.expect("data").get("enable-api-fields").map(String::as_str),
        Some("beta")
    );
}

#[tokio::test]
async fn test_version_upgrade_replaces_installer_set() {
    let t = TestEnv::new();
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    t.write_manifest("tekton-pipeline", "v0.51.0", "", "release.yaml", &release_yaml("pipeline", "v0.51.0"));
    let cr = t.converge(&t.seed(&pipeline("pipeline", VERSION))).await;
    let old_set = cr.status.as_ref().expect("status").installer_sets["pipeline"].clone();

    let mut next = cr.clone();
    next.spec.common.version = Some("v0.51.0".to_string());
    let next = t.update(&next).await;

    let action = component::apply(&t.env, &next).await.expect("upgrade pass");
    assert_eq!(action, Action::requeue(REQUEUE_AFTER));

    let sets = t.installer_sets().await;
    assert_eq!(sets.len(), 1);
    assert_ne!(sets[0].name_any(), old_set, "stale set is replaced");
    assert_eq!(
        sets[0].labels().get(RELEASE_VERSION_KEY).map(String::as_str),
        Some("v0.51.0")
    );

    let upgraded = t.converge(&next).await;
    let status = upgraded.status.expect("status");
    assert_eq!(status.version.as_deref(), Some("v0.51.0"));
    let deployment = t
        .get::<Deployment>("pipeline-controller", Some(NS))
        .await
        .expect("deployment reinstalled");
    assert_eq!(
        deployment.labels().get("app.kubernetes.io/version").map(String::as_str),
        Some("v0.51.0")
    );
}

#[tokio::test]
async fn test_duplicate_sets_are_deleted_in_one_call() {
    let t = TestEnv::new();
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    let cr = t.seed(&pipeline("pipeline", VERSION));

    for name in ["pipeline-aaaaa", "pipeline-bbbbb"] {
        t.seed(&TektonInstallerSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([
                    (CREATED_BY_KEY.to_string(), "TektonPipeline".to_string()),
                    (INSTALLER_TYPE_KEY.to_string(), "pipeline".to_string()),
                ])),
                ..Default::default()
            },
            spec: TektonInstallerSetSpec::default(),
            status: None,
        });
    }

    let action = component::apply(&t.env, &cr).await.expect("duplicate pass");
    assert_eq!(action, Action::requeue(REQUEUE_AFTER));

    let collection_deletes: Vec<_> = t
        .store
        .operations()
        .into_iter()
        .filter(|op| op.verb == Verb::DeleteCollection)
        .collect();
    assert_eq!(collection_deletes.len(), 1);
    assert_eq!(collection_deletes[0].kind, "TektonInstallerSet");
    assert_eq!(collection_deletes[0].name, PIPELINE_SELECTOR);
    assert_eq!(t.count(Verb::Create, "TektonInstallerSet"), 0);
    assert!(t.installer_sets().await.is_empty());

    component::apply(&t.env, &t.reload(&cr).await)
        .await
        .expect("recovery pass");
    assert_eq!(t.installer_sets().await.len(), 1);
}

#[tokio::test]
async fn test_crds_outlive_installer_set_but_not_component() {
    let t = TestEnv::new();
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    let cr = t.converge(&t.seed(&pipeline("pipeline", VERSION))).await;
    let set = cr.status.as_ref().expect("status").installer_sets["pipeline"].clone();
    let crd_api = "apiextensions.k8s.io/v1";

    t.store
        .delete(
            &ObjectKey::for_resource::<TektonInstallerSet>(&set, None),
            None,
        )
        .await
        .expect("delete set");
    assert!(t.contains(crd_api, "CustomResourceDefinition", None, "pipelines.tekton.dev"));
    assert!(!t.contains("apps/v1", "Deployment", Some(NS), "pipeline-controller"));

    t.store
        .delete(
            &ObjectKey::for_resource::<TektonPipeline>("pipeline", None),
            None,
        )
        .await
        .expect("delete component");
    assert!(!t.contains(crd_api, "CustomResourceDefinition", None, "pipelines.tekton.dev"));
}

#[tokio::test]
async fn test_converged_component_writes_nothing() {
    let t = TestEnv::new();
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    let cr = t.converge(&t.seed(&pipeline("pipeline", VERSION))).await;

    t.store.clear_operations();
    let action = component::apply(&t.env, &cr).await.expect("steady pass");
    t.settle_installer_sets().await;

    assert_eq!(action, Action::await_change());
    assert!(
        t.store.operations().is_empty(),
        "unexpected writes: {:?}",
        t.store.operations()
    );
}

#[tokio::test]
async fn test_non_singleton_name_is_ignored() {
    let t = TestEnv::new();
    let cr = t.seed(&pipeline("my-pipeline", VERSION));

    let action = component::apply(&t.env, &cr).await.expect("ignored pass");
    assert_eq!(action, Action::await_change());
    assert!(t.installer_sets().await.is_empty());

    let status = t.reload(&cr).await.status.expect("status");
    let ready = conditions::find(&status.conditions, conditions::READY).expect("ready");
    assert_eq!(ready.status, STATUS_FALSE);
    assert_eq!(ready.reason, "Ignored");
    assert!(ready.message.contains("Expected Name: pipeline, Got Name: my-pipeline"));
}

#[tokio::test]
async fn test_disabling_chain_removes_its_installer_set() {
    let t = TestEnv::new();
    t.write_manifest("tekton-chains", VERSION, "", "release.yaml", &release_yaml("chain", VERSION));
    let cr = t.seed(&TektonChain::new(
        "chain",
        TektonChainSpec {
            common: common_spec(VERSION),
            ..Default::default()
        },
    ));
    let cr = t.converge(&cr).await;
    assert_eq!(t.installer_sets().await.len(), 1);

    let mut disabled = cr.clone();
    disabled.spec.disabled = true;
    let disabled = t.update(&disabled).await;
    let action = component::apply(&t.env, &disabled).await.expect("disabled pass");

    assert_eq!(action, Action::await_change());
    assert!(t.installer_sets().await.is_empty());
    let status = t.reload(&disabled).await.status.expect("status");
    assert!(status.installer_sets.is_empty());
    assert!(conditions::is_true(&status.conditions, INSTALLER_SET_AVAILABLE));
}

#[tokio::test]
async fn test_external_result_db_requires_secret() {
    let t = TestEnv::new();
    t.write_manifest("tekton-results", VERSION, "", "release.yaml", &release_yaml("result", VERSION));
    let cr = t.seed(&TektonResult::new(
        "result",
        TektonResultSpec {
            common: common_spec(VERSION),
            is_external_db: true,
            ..Default::default()
        },
    ));

    let err = component::apply(&t.env, &cr).await.expect_err("secret is missing");
    assert!(matches!(err, Error::DependencyMissing(_)), "got {err:?}");
    assert!(t.installer_sets().await.is_empty());

    let status = t.reload(&cr).await.status.expect("status");
    let available = conditions::find(&status.conditions, INSTALLER_SET_AVAILABLE).expect("condition");
    assert_eq!(available.status, STATUS_FALSE);
    assert_eq!(available.reason, "DependencyMissing");

    t.seed_value(secret_json(
        "tekton-results-postgres",
        NS,
        &["POSTGRES_USER", "POSTGRES_PASSWORD"],
    ));
    let action = component::apply(&t.env, &t.reload(&cr).await)
        .await
        .expect("secret present");
    assert_eq!(action, Action::requeue(REQUEUE_AFTER));
    assert_eq!(t.installer_sets().await.len(), 1);
}

#[tokio::test]
async fn test_claims_stay_out_of_sets_and_move_to_component() {
    let t = TestEnv::new();
    let claim = r#"
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: results-data
  namespace: placeholder
spec:
  accessModes: [ReadWriteOnce]
  resources:
    requests:
      storage: 1Gi
"#;
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    t.write_manifest("tekton-pipeline", VERSION, "", "claim.yaml", claim);

    let legacy = t.seed(&TektonInstallerSet {
        metadata: ObjectMeta {
            name: Some("pipeline-legacy".to_string()),
            ..Default::default()
        },
        spec: TektonInstallerSetSpec::default(),
        status: None,
    });
    t.seed_value(json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": {
            "name": "results-data",
            "namespace": NS,
            "ownerReferences": [{
                "apiVersion": "operator.tekton.dev/v1alpha1",
                "kind": "TektonInstallerSet",
                "name": legacy.name_any(),
                "uid": legacy.uid().expect("uid"),
                "controller": true,
            }],
        },
        "spec": { "accessModes": ["ReadWriteOnce"] },
    }));
    let cr = t.seed(&pipeline("pipeline", VERSION));

    t.converge(&cr).await;

    let claim = t
        .get::<PersistentVolumeClaim>("results-data", Some(NS))
        .await
        .expect("claim kept");
    let owners = claim.owner_references();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "TektonPipeline");

    for set in t.installer_sets().await {
        assert!(set
            .spec
            .manifests
            .iter()
            .all(|m| m["kind"] != "PersistentVolumeClaim" && m["kind"] != "Namespace"));
    }
}

#[tokio::test]
async fn test_moving_target_namespace_deletes_the_old_one() {
    let t = TestEnv::new();
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    let cr = t.converge(&t.seed(&pipeline("pipeline", VERSION))).await;
    let old_set = cr.status.as_ref().expect("status").installer_sets["pipeline"].clone();

    let mut moved = cr.clone();
    moved.spec.common.target_namespace = "tekton-ci".to_string();
    let moved = t.converge(&t.update(&moved).await).await;

    assert!(!t.contains("v1", "Namespace", None, NS));
    let ns = t.get::<Namespace>("tekton-ci", None).await.expect("new namespace");
    assert_eq!(ns.owner_references()[0].kind, "TektonPipeline");

    let sets = t.installer_sets().await;
    assert_eq!(sets.len(), 1);
    assert_ne!(sets[0].name_any(), old_set);
    assert_eq!(
        sets[0].annotations().get(TARGET_NAMESPACE_KEY).map(String::as_str),
        Some("tekton-ci")
    );
    assert!(t.contains("apps/v1", "Deployment", Some("tekton-ci"), "pipeline-controller"));
    assert!(conditions::is_ready(&moved.status.expect("status").conditions));
}

#[tokio::test]
async fn test_openshift_overlay_adds_scc_and_ca_bundles() {
    let t = TestEnv::on(Platform::OpenShift);
    let ns = "openshift-pipelines";
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    let mut cr = pipeline("pipeline", VERSION);
    cr.spec.common.target_namespace = String::new();
    let cr = t.converge(&t.seed(&cr)).await;

    assert!(t.contains("v1", "Namespace", None, ns), "platform default namespace");
    assert!(t.contains("v1", "ConfigMap", Some(ns), TRUSTED_CA_CONFIG_MAP));
    assert!(t.contains("v1", "ConfigMap", Some(ns), SERVICE_CA_CONFIG_MAP));
    assert!(t.contains("rbac.authorization.k8s.io/v1", "RoleBinding", Some(ns), SCC_ROLE_BINDING));

    let deployment = t
        .get::<Deployment>("pipeline-controller", Some(ns))
        .await
        .expect("deployment installed");
    let template = deployment.spec.expect("spec").template;
    let annotations = template.metadata.expect("template metadata").annotations.expect("annotations");
    assert_eq!(annotations.get(SCC_ANNOTATION).map(String::as_str), Some(PIPELINES_SCC));
    let mounts = template.spec.expect("pod spec").containers[0]
        .volume_mounts
        .clone()
        .unwrap_or_default();
    assert!(mounts.iter().any(|m| m.mount_path == "/tekton-custom-certs/ca-bundle.crt"));

    let status = cr.status.expect("status");
    let ready = conditions::find(&status.conditions, conditions::READY).expect("ready");
    assert_eq!(ready.status, STATUS_TRUE);
}

fn config_map_yaml(name: &str) -> String {
    format!(
        r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: {name}
  namespace: placeholder
data:
  stage: {name}
"#
    )
}

fn result(version: &str) -> TektonResult {
    TektonResult::new(
        "result",
        TektonResultSpec {
            common: common_spec(version),
            ..Default::default()
        },
    )
}

#[tokio::test]
async fn test_result_installs_pre_and_post_sets_around_main() {
    let t = TestEnv::new();
    t.write_manifest("tekton-results", VERSION, "", "release.yaml", &release_yaml("result", VERSION));
    t.write_manifest("tekton-results", VERSION, "pre", "pre.yaml", &config_map_yaml("results-pre"));
    t.write_manifest("tekton-results", VERSION, "post", "post.yaml", &config_map_yaml("results-post"));
    let cr = t.seed(&result(VERSION));

    // The pre set is created alone; main waits until it is ready.
    component::apply(&t.env, &cr).await.expect("first pass");
    let sets = t.installer_sets().await;
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].labels().get(INSTALLER_TYPE_KEY).map(String::as_str), Some("pre"));

    let cr = t.converge(&cr).await;
    let mut types: Vec<String> = t
        .installer_sets()
        .await
        .iter()
        .filter_map(|s| s.labels().get(INSTALLER_TYPE_KEY).cloned())
        .collect();
    types.sort();
    assert_eq!(types, vec!["post", "pre", "result"]);

    let status = cr.status.expect("status");
    let mut keys: Vec<&str> = status.installer_sets.keys().map(String::as_str).collect();
    keys.sort();
    assert_eq!(keys, vec!["post", "pre", "result"]);
    assert!(t.contains("v1", "ConfigMap", Some(NS), "results-pre"));
    assert!(t.contains("v1", "ConfigMap", Some(NS), "results-post"));
}

#[tokio::test]
async fn test_missing_pre_and_post_dirs_only_install_main() {
    let t = TestEnv::new();
    t.write_manifest("tekton-results", VERSION, "", "release.yaml", &release_yaml("result", VERSION));
    let cr = t.converge(&t.seed(&result(VERSION))).await;

    let sets = t.installer_sets().await;
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].labels().get(INSTALLER_TYPE_KEY).map(String::as_str), Some("result"));
    let status = cr.status.expect("status");
    assert_eq!(status.installer_sets.keys().collect::<Vec<_>>(), vec!["result"]);
}

#[test]
fn test_slot_installer_types() {
    assert_eq!(Slot::single().installer_type("result"), "result");
    assert_eq!(Slot::pre().installer_type("result"), "pre");
    assert_eq!(Slot::post().installer_type("result"), "post");
    let custom = Slot::custom("VersionedResolverTask", INSTALLER_SET_AVAILABLE);
    assert_eq!(custom.installer_type("addon"), "custom-versionedresolvertask");
    assert_eq!(custom.key("addon"), "custom-versionedresolvertask");
    assert!(custom.is_optional());
    assert!(!Slot::named("api", INSTALLER_SET_AVAILABLE).is_optional());
}

/// Hold `set` in the store after a delete, the way a finalizer does.
async fn hold_on_delete(t: &TestEnv, set: &TektonInstallerSet) {
    let mut held = set.clone();
    held.finalizers_mut().push("test.tekton.dev/hold".to_string());
    t.update(&held).await;
}

#[tokio::test]
async fn test_terminating_set_of_old_release_marks_upgrade_pending() {
    let t = TestEnv::new();
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    t.write_manifest("tekton-pipeline", "v0.51.0", "", "release.yaml", &release_yaml("pipeline", "v0.51.0"));
    let cr = t.converge(&t.seed(&pipeline("pipeline", VERSION))).await;
    hold_on_delete(&t, &t.installer_sets().await[0]).await;

    let mut next = cr.clone();
    next.spec.common.version = Some("v0.51.0".to_string());
    let next = t.update(&next).await;

    let action = component::apply(&t.env, &next).await.expect("upgrade pass");
    assert_eq!(action, Action::requeue(REQUEUE_AFTER));
    let sets = t.installer_sets().await;
    assert_eq!(sets.len(), 1, "no new set while the old one terminates");
    assert!(sets[0].metadata.deletion_timestamp.is_some());

    let status = t.reload(&next).await.status.expect("status");
    let available = conditions::find(&status.conditions, INSTALLER_SET_AVAILABLE).expect("condition");
    assert_eq!(available.status, conditions::STATUS_UNKNOWN);
    assert_eq!(available.reason, "UpgradePending");
    assert!(!conditions::is_ready(&status.conditions));
}

#[tokio::test]
async fn test_terminating_set_without_bookkeeping_marks_reinstalling() {
    let t = TestEnv::new();
    t.write_manifest("tekton-pipeline", VERSION, "", "release.yaml", &release_yaml("pipeline", VERSION));
    let cr = t.converge(&t.seed(&pipeline("pipeline", VERSION))).await;

    let mut damaged = t.installer_sets().await.remove(0);
    damaged.annotations_mut().remove(TARGET_NAMESPACE_KEY);
    hold_on_delete(&t, &damaged).await;

    component::apply(&t.env, &t.reload(&cr).await)
        .await
        .expect("reinstall pass");
    let status = t.reload(&cr).await.status.expect("status");
    let available = conditions::find(&status.conditions, INSTALLER_SET_AVAILABLE).expect("condition");
    assert_eq!(available.status, conditions::STATUS_UNKNOWN);
    assert_eq!(available.reason, "Reinstalling");
}
