//! capv - Cluster API infrastructure provider for Viettel Cloud

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use capv::cloud::{CloudConfig, HttpCloudClient};
use capv::config::ReconcileConfig;
use capv::controller::{
    control_plane_error_policy, error_policy, nested_cluster_error_policy, reconcile,
    reconcile_control_plane, reconcile_nested_cluster, Context,
};
use capv::controller::watch::{infrastructure_for_cluster, nested_cluster_for_control_plane};
use capv::crd::{
    Cluster, DataStore, Etcd, NestedCluster, NestedControlPlane, TenantControlPlane,
    ViettelCluster,
};
use capv::retry::BackoffPolicy;

/// Watcher timeout (seconds), kept below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// capv - reconciles Viettel Cloud infrastructure for Cluster API clusters
#[derive(Parser, Debug)]
#[command(name = "capv", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controllers (default mode)
    ///
    /// Watches ViettelCluster, NestedControlPlane and NestedCluster objects
    /// and reconciles each of them until shutdown.
    Controller(ControllerArgs),
}

/// Controller mode arguments
#[derive(Parser, Debug)]
struct ControllerArgs {
    /// Viettel Cloud API root URL
    #[arg(long, env = "VIETTEL_CLOUD_AUTH_URL")]
    cloud_url: String,

    /// Viettel Cloud API user
    #[arg(long, env = "VIETTEL_CLOUD_USER_NAME")]
    cloud_username: String,

    /// Viettel Cloud API password
    #[arg(long, env = "VIETTEL_CLOUD_PASS_WORD", hide_env_values = true)]
    cloud_password: String,

    /// Deadline of a single cloud API call in seconds
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,

    /// Number of readiness reads before a resource counts as stuck
    #[arg(long, default_value = "30")]
    poll_steps: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Both kube and reqwest link rustls; pick the provider explicitly
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if cli.crd {
        for crd in [
            ViettelCluster::crd(),
            NestedControlPlane::crd(),
            NestedCluster::crd(),
        ] {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => ControllerArgs::parse_from(["capv"]),
    };
    run_controller(args).await
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

/// Ensure the provider's CRDs are installed
///
/// Uses server-side apply so upgrades pick up schema changes.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(capv::FIELD_MANAGER).force();

    for crd in [
        ViettelCluster::crd(),
        NestedControlPlane::crd(),
        NestedCluster::crd(),
    ] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD...");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All capv CRDs installed/updated");
    Ok(())
}

/// Run the ViettelCluster, NestedControlPlane and NestedCluster controllers
async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Starting capv controller...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let cloud_config = CloudConfig {
        base_url: args.cloud_url,
        username: args.cloud_username,
        password: args.cloud_password,
        request_timeout: Duration::from_secs(args.request_timeout_secs),
    };
    tracing::info!(config = ?cloud_config, "Connecting to Viettel Cloud");
    let cloud = HttpCloudClient::new(cloud_config)
        .map_err(|e| anyhow::anyhow!("Failed to create cloud client: {}", e))?;

    let config = ReconcileConfig {
        poll: BackoffPolicy::with_steps(args.poll_steps),
        call_timeout: Duration::from_secs(args.request_timeout_secs),
        ..Default::default()
    };
    let ctx = Arc::new(
        Context::builder(client.clone(), Arc::new(cloud))
            .config(config)
            .build(),
    );

    let viettel_clusters: Api<ViettelCluster> = Api::all(client.clone());
    let control_planes: Api<NestedControlPlane> = Api::all(client.clone());
    let nested_clusters: Api<NestedCluster> = Api::all(client.clone());
    let clusters: Api<Cluster> = Api::all(client.clone());

    // Cluster cache used to map control plane events to their NestedCluster
    let (cluster_store, cluster_writer) = reflector::store::<Cluster>();
    let cluster_cache = reflector(
        cluster_writer,
        watcher(clusters.clone(), watcher_config()).default_backoff(),
    )
    .for_each(|event| async move {
        if let Err(e) = event {
            tracing::warn!(error = %e, "Cluster cache watch error");
        }
    });

    tracing::info!("Starting controllers:");
    tracing::info!("  - ViettelCluster controller");
    tracing::info!("  - NestedControlPlane controller");
    tracing::info!("  - NestedCluster controller");

    let cluster_controller = Controller::new(viettel_clusters, watcher_config())
        .watches(clusters.clone(), watcher_config(), |cluster| {
            infrastructure_for_cluster::<ViettelCluster>(&cluster)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "ViettelCluster reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "ViettelCluster reconciliation error");
                }
            }
        });

    let control_plane_controller = Controller::new(control_planes.clone(), watcher_config())
        .owns(Api::<Etcd>::all(client.clone()), watcher_config())
        .owns(Api::<DataStore>::all(client.clone()), watcher_config())
        .owns(Api::<TenantControlPlane>::all(client.clone()), watcher_config())
        .shutdown_on_signal()
        .run(
            reconcile_control_plane,
            control_plane_error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "NestedControlPlane reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "NestedControlPlane reconciliation error");
                }
            }
        });

    let nested_cluster_controller = Controller::new(nested_clusters, watcher_config())
        .watches(clusters, watcher_config(), |cluster| {
            infrastructure_for_cluster::<NestedCluster>(&cluster)
        })
        .watches(control_planes, watcher_config(), move |control_plane| {
            nested_cluster_for_control_plane(&control_plane, &cluster_store)
        })
        .shutdown_on_signal()
        .run(
            reconcile_nested_cluster,
            nested_cluster_error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "NestedCluster reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "NestedCluster reconciliation error");
                }
            }
        });

    tokio::select! {
        _ = cluster_controller => {
            tracing::info!("ViettelCluster controller completed");
        }
        _ = control_plane_controller => {
            tracing::info!("NestedControlPlane controller completed");
        }
        _ = nested_cluster_controller => {
            tracing::info!("NestedCluster controller completed");
        }
        _ = cluster_cache => {
            tracing::info!("Cluster cache watch completed");
        }
    }

    tracing::info!("capv controller shutting down");
    Ok(())
}
