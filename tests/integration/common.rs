//! Shared test harness and helpers for envtest-based integration tests.
//!
//! A single envtest server and one set of controllers are shared across all
//! tests in this binary.  Installer set tests get their own namespace; the
//! component custom resources are cluster-scoped singletons, so each
//! component kind is exercised by exactly one test with its own target
//! namespace.
//!
//! There is no kubelet, scheduler or controller manager in envtest:
//! Deployment availability and Job completion are faked by patching status
//! subresources, and nothing garbage-collects dependents of a foreground
//! delete.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use envtest::Environment;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::runtime::events::Reporter;
use kube::{Client, Config, CustomResourceExt};
use serde_json::json;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use tekton_operator::controller::component;
use tekton_operator::controller::context::{Context, Env, OperatorConfig, Transitions};
use tekton_operator::controller::installer_set;
use tekton_operator::crd::tekton_chain::TektonChain;
use tekton_operator::crd::tekton_installer_set::TektonInstallerSet;
use tekton_operator::crd::tekton_pipeline::TektonPipeline;
use tekton_operator::manifest::KubeResourceClient;
use tekton_operator::platform::Platform;

pub const TIMEOUT: Duration = Duration::from_secs(30);
pub const POLL: Duration = Duration::from_millis(500);
pub const VERSION: &str = "v0.50.0";

/// Counter for generating unique namespace names.
static NS_COUNTER: AtomicU32 = AtomicU32::new(0);

// ═══════════════════════════════════════════════════════════════════════════════
// Shared environment (one envtest server + controllers per test binary)
// ═══════════════════════════════════════════════════════════════════════════════

/// Holds the envtest server, a kube Client, the release payload directory
/// and the tokio runtime that drives the controllers.  All of them live for
/// the entire process.
struct SharedEnv {
    client: Client,
    kodata: TempDir,
    // The runtime keeps the controller tasks and kube HTTP connections alive
    // across individual `#[tokio::test]` runtimes.
    _runtime: tokio::runtime::Runtime,
    _server: envtest::Server,
}

// SAFETY: envtest::Server only wraps the kubeconfig string.
unsafe impl Send for SharedEnv {}
unsafe impl Sync for SharedEnv {}

/// Initialised on first use and never torn down; process exit cleans up.
static SHARED: OnceLock<SharedEnv> = OnceLock::new();

fn init_shared() -> SharedEnv {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn,tekton_operator=debug"))
        .try_init();

    // Build a multi-threaded runtime that outlives every `#[tokio::test]`.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build shared runtime");

    let (client, server) = rt.block_on(async {
        let mut env = Environment::default();
        let env = env
            .with_crds(vec![
                TektonInstallerSet::crd(),
                TektonPipeline::crd(),
                TektonChain::crd(),
            ])
            .expect("failed to configure CRDs");

        let server = env.create().expect("failed to start envtest server");
        let kubeconfig = server.kubeconfig().expect("failed to get kubeconfig");
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .expect("failed to build config");
        let client = Client::try_from(config).expect("failed to create client");
        (client, server)
    });

    let kodata = tempfile::tempdir().expect("failed to create kodata dir");

    // Spawn the controllers on the shared runtime so they outlive test runtimes.
    let ctx = test_context(client.clone(), kodata.path());
    rt.spawn(installer_set::run(ctx.clone()));
    rt.spawn(component::run::<TektonPipeline>(ctx.clone()));
    rt.spawn(component::run::<TektonChain>(ctx));

    SharedEnv {
        client,
        kodata,
        _runtime: rt,
        _server: server,
    }
}

/// Get (or create) the shared envtest environment.
///
/// Initialization runs on a dedicated OS thread to avoid the "cannot start a
/// runtime from within a runtime" panic that would occur if `block_on` were
/// called from inside a `#[tokio::test]` context.
fn shared() -> &'static SharedEnv {
    SHARED.get_or_init(|| {
        std::thread::spawn(init_shared)
            .join()
            .expect("shared env init thread panicked")
    })
}

fn test_context(client: Client, kodata: &Path) -> Arc<Context> {
    Arc::new(Context {
        client: client.clone(),
        reporter: Reporter {
            controller: "tekton-operator-test".into(),
            instance: None,
        },
        env: Env {
            resources: Arc::new(KubeResourceClient::new(client)),
            config: Arc::new(OperatorConfig {
                kodata_path: kodata.to_path_buf(),
                operator_version: VERSION.to_string(),
                platform: Platform::Kubernetes,
                image_env: Vec::new(),
                registry_override: None,
            }),
            extension: Platform::Kubernetes.extension(),
            transitions: Arc::new(Transitions::default()),
        },
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Per-test context
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-test context: owns a unique namespace and provides a kube Client.
pub struct TestContext {
    pub client: Client,
    pub ns: String,
}

impl TestContext {
    pub async fn new() -> Self {
        let env = shared();
        let client = env.client.clone();

        // Unique namespace per test.
        let id = NS_COUNTER.fetch_add(1, Ordering::SeqCst);
        let ns = format!("test-{id}");
        create_namespace(&client, &ns).await;

        Self { client, ns }
    }

    /// A context for a component test.  The namespace is left for the
    /// component to create as its target namespace.
    pub fn for_component(target_namespace: &str) -> Self {
        Self {
            client: shared().client.clone(),
            ns: target_namespace.to_string(),
        }
    }

    /// Write `yaml` to `<kodata>/<component>/<version>/<file>`.
    pub fn write_manifest(&self, component: &str, version: &str, file: &str, yaml: &str) {
        let dir: PathBuf = shared().kodata.path().join(component).join(version);
        fs::create_dir_all(&dir).expect("failed to create manifest dir");
        fs::write(dir.join(file), yaml).expect("failed to write manifest");
    }
}

async fn create_namespace(client: &Client, name: &str) {
    let ns_api: Api<Namespace> = Api::all(client.clone());
    let ns_obj: Namespace = serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    }))
    .unwrap();
    ns_api
        .create(&PostParams::default(), &ns_obj)
        .await
        .expect("failed to create test namespace");
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Poll until a condition is true, or timeout.
pub async fn wait_for<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait until an installer set reports `Ready=True`.
pub async fn wait_for_set_ready(client: &Client, name: &str) -> bool {
    let api: Api<TektonInstallerSet> = Api::all(client.clone());
    wait_for(TIMEOUT, POLL, || {
        let api = api.clone();
        let name = name.to_string();
        async move { api.get(&name).await.is_ok_and(|s| s.is_ready()) }
    })
    .await
}

/// Names of the installer sets matching `selector`.
pub async fn installer_set_names(client: &Client, selector: &str) -> Vec<String> {
    let api: Api<TektonInstallerSet> = Api::all(client.clone());
    api.list(&ListParams::default().labels(selector))
        .await
        .expect("failed to list installer sets")
        .items
        .into_iter()
        .filter_map(|s| s.metadata.name)
        .collect()
}

/// Wait for a Deployment to exist, then report it available.
pub async fn fake_deployment_ready(client: &Client, ns: &str, name: &str) {
    let deps: Api<Deployment> = Api::namespaced(client.clone(), ns);
    assert!(
        wait_for(TIMEOUT, POLL, || {
            let api = deps.clone();
            let n = name.to_string();
            async move { api.get(&n).await.is_ok() }
        })
        .await,
        "deployment {name} never appeared"
    );
    let patch = json!({
        "status": {
            "replicas": 1,
            "readyReplicas": 1,
            "availableReplicas": 1,
            "updatedReplicas": 1,
            "conditions": [{
                "type": "Available",
                "status": "True",
                "reason": "MinimumReplicasAvailable",
                "message": "Deployment has minimum availability.",
            }],
        }
    });
    deps.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .expect("failed to patch deployment status");
}

/// Wait for a batch/v1 Job to exist, then report it complete.
pub async fn fake_job_succeeded(client: &Client, ns: &str, name: &str) {
    let jobs: Api<Job> = Api::namespaced(client.clone(), ns);
    assert!(
        wait_for(TIMEOUT, POLL, || {
            let api = jobs.clone();
            let n = name.to_string();
            async move { api.get(&n).await.is_ok() }
        })
        .await,
        "job {name} never appeared"
    );
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let patch = json!({
        "status": {
            "startTime": now,
            "completionTime": now,
            "succeeded": 1,
            "conditions": [
                { "type": "SuccessCriteriaMet", "status": "True", "lastTransitionTime": now },
                { "type": "Complete", "status": "True", "lastTransitionTime": now },
            ],
        }
    });
    jobs.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .expect("failed to patch job status");
}

/// Whether an object is gone or on its way out.  Without a garbage
/// collector a foreground delete never completes.
pub fn deleted_or_terminating<K: kube::Resource>(obj: Option<&K>) -> bool {
    obj.is_none_or(|o| o.meta().deletion_timestamp.is_some())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Manifest fixtures
// ═══════════════════════════════════════════════════════════════════════════════

/// A small release with one resource per installation phase.  `name` keeps
/// cluster-scoped objects apart between tests; `kind` names the CRD.
pub fn release_yaml(name: &str, kind: &str, namespace: &str, version: &str) -> String {
    format!(
        r#"
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: {name}things.it.tekton.dev
spec:
  group: it.tekton.dev
  names:
    kind: {kind}
    plural: {name}things
  scope: Namespaced
  versions:
    - name: v1
      served: true
      storage: true
      schema:
        openAPIV3Schema:
          type: object
          x-kubernetes-preserve-unknown-fields: true
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: {name}-controller-role
rules: []
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: {name}-controller
  namespace: {namespace}
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: feature-flags
  namespace: {namespace}
data:
  enable-api-fields: stable
---
apiVersion: batch/v1
kind: Job
metadata:
  name: {name}-migrate
  namespace: {namespace}
spec:
  template:
    spec:
      restartPolicy: Never
      containers:
        - name: migrate
          image: gcr.io/tekton/{name}-migrate:{version}
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}-controller
  namespace: {namespace}
  labels:
    app.kubernetes.io/version: "{version}"
spec:
  replicas: 1
  selector:
    matchLabels:
      app: {name}-controller
  template:
    metadata:
      labels:
        app: {name}-controller
    spec:
      containers:
        - name: {name}-controller
          image: gcr.io/tekton/{name}-controller:{version}
---
apiVersion: v1
kind: Service
metadata:
  name: {name}-controller
  namespace: {namespace}
spec:
  selector:
    app: {name}-controller
  ports:
    - port: 9090
"#
    )
}
