//! tekton-operator: installs and manages the Tekton stack.
//!
//! Every selected controller runs as a concurrent tokio task within a single
//! binary, sharing one Context.  Controllers only start once this process
//! holds the leader lease and stop when it is lost.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use futures::future::select_all;
use kube::runtime::events::Reporter;
use kube::Client;
use tracing::info;
use warp::Filter;

use tekton_operator::controller::context::{Context, Env, OperatorConfig, Transitions};
use tekton_operator::leader::{LeaderConfig, LeaderElector};
use tekton_operator::manifest::client::KubeResourceClient;
use tekton_operator::platform::{Platform, PlatformConfig};

#[derive(Parser, Debug)]
#[command(
    name = "tekton-operator",
    about = "Kubernetes operator for the Tekton CI/CD stack"
)]
struct Args {
    /// Comma separated controllers to run; empty runs all of the platform's.
    #[arg(long, default_value = "", env = "CONTROLLER_NAMES")]
    controllers: String,

    /// Name identifying this operator process.
    #[arg(long, default_value = "", env = "UNIQUE_PROCESS_NAME")]
    unique_process_name: String,

    /// "kubernetes" or "openshift".
    #[arg(long, default_value = "kubernetes", env = "PLATFORM")]
    platform: String,

    /// Root of the release payloads shipped with the operator image.
    #[arg(long, default_value = "/var/run/ko", env = "KO_DATA_PATH")]
    kodata_path: PathBuf,

    /// Release installed when a component does not pin one.
    #[arg(long, default_value = "latest", env = "VERSION")]
    operator_version: String,

    /// Bind address for health probe endpoints (/healthz, /readyz).
    #[arg(long, default_value = ":8081", env = "HEALTH_PROBE_BIND_ADDRESS")]
    health_probe_bind_address: String,

    /// Log format: "text" for human-readable, "json" for structured.
    #[arg(long, default_value = "text", env = "LOG_FORMAT")]
    log_format: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,kube=warn,hyper=warn,tower=warn,warp=warn".into());

    if args.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let platform: Platform = args.platform.parse()?;
    let platform_config =
        PlatformConfig::new(platform, &args.unique_process_name, &args.controllers)?;

    // Accept ":8081" as well as "0.0.0.0:8081".
    let health_addr: std::net::SocketAddr = args
        .health_probe_bind_address
        .strip_prefix(':')
        .map(|port| format!("0.0.0.0:{port}"))
        .unwrap_or_else(|| args.health_probe_bind_address.clone())
        .parse()
        .context("invalid --health-probe-bind-address")?;

    let client = Client::try_default().await?;

    info!(
        %platform,
        process = %platform_config.unique_process_name,
        version = %args.operator_version,
        controllers = %platform_config.controllers.join(","),
        "starting tekton-operator"
    );

    let elector = LeaderElector::new(
        client.clone(),
        LeaderConfig::from_env(&platform_config.unique_process_name),
    );

    let ctx = Arc::new(Context {
        client: client.clone(),
        reporter: Reporter {
            controller: platform_config.unique_process_name.clone(),
            instance: std::env::var("POD_NAME").ok(),
        },
        env: Env {
            resources: Arc::new(KubeResourceClient::new(client)),
            config: Arc::new(OperatorConfig::from_env(
                args.kodata_path,
                args.operator_version,
                platform,
            )),
            extension: platform.extension(),
            transitions: Arc::new(Transitions::default()),
        },
    });

    let healthz = warp::get()
        .and(warp::path("healthz"))
        .and(warp::path::end())
        .map(|| warp::reply::with_status("ok", warp::http::StatusCode::OK));
    let readyz = warp::get()
        .and(warp::path("readyz"))
        .and(warp::path::end())
        .map(|| warp::reply::with_status("ok", warp::http::StatusCode::OK));
    let health_routes = healthz.or(readyz);

    let health = tokio::spawn(warp::serve(health_routes).run(health_addr));

    tokio::select! {
        res = elector.acquire() => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down before acquiring the leader lease");
            return Ok(());
        }
    }

    let controllers = platform_config
        .selected()
        .into_iter()
        .map(|(name, start)| {
            info!(controller = name, "starting controller");
            start(ctx.clone())
        })
        .collect::<Vec<_>>();

    tokio::select! {
        _ = select_all(controllers) => {},
        res = elector.hold() => res?,
        _ = health => {},
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    Ok(())
}
