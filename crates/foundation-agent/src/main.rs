//! Foundation agent - runs on every managed cluster

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;

use foundation_agent::clusterinfo::LoggingSettings;
use foundation_agent::controller_runner::{
    build_cluster_controllers, build_work_controllers, AgentSettings,
};
use foundation_common::health::{serve_health, Readiness};
use foundation_common::kube_utils::{client_from_config, create_client, load_config};
use foundation_common::kubecontrol::{DynamicKubeControl, KubeControl, RateLimiter};
use foundation_common::leader_election::LeaderElector;
use foundation_common::mapper::{RestMapper, DEFAULT_RESET_INTERVAL};
use foundation_common::telemetry::{init_telemetry, TelemetryConfig};

const LEASE_NAME: &str = "foundation-agent-lock";

/// Per-cluster agent: executes actions, refreshes views, synthesizes cluster info and claims
#[derive(Parser, Debug)]
#[command(name = "foundation-agent", version, about, long_about = None)]
struct Cli {
    /// Kubeconfig of the hub; in-cluster config when unset
    #[arg(long, env = "HUB_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig of the managed cluster; in-cluster config when unset
    #[arg(long, env = "MANAGED_KUBECONFIG")]
    managed_kubeconfig: Option<PathBuf>,

    /// Name of this cluster on the hub
    #[arg(long, env = "CLUSTER_NAME")]
    cluster_name: String,

    /// Address of the health endpoints
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    /// Run controllers only while holding the lease
    #[arg(long, env = "LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace of the leader election lease
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "open-cluster-management-agent-addon")]
    leader_election_namespace: String,

    /// Execute actions as the user recorded on them
    #[arg(long, env = "ENABLE_IMPERSONATION")]
    enable_impersonation: bool,

    /// Reflect ManagedClusterInfo labels into ClusterClaims
    #[arg(long, env = "ENABLE_SYNC_LABELS_TO_CLUSTERCLAIMS")]
    enable_sync_labels_to_clusterclaims: bool,

    /// Name of the agent service
    #[arg(long, env = "AGENT_NAME", default_value = "klusterlet-addon-workmgr")]
    agent_name: String,

    /// Namespace of the agent service
    #[arg(long, env = "AGENT_NAMESPACE", default_value = "open-cluster-management-agent-addon")]
    agent_namespace: String,

    /// Port of the agent's log endpoint
    #[arg(long, env = "AGENT_PORT", default_value_t = 443)]
    agent_port: i32,

    /// Address published for the log endpoint, IP or hostname
    #[arg(long, env = "AGENT_ADDRESS")]
    agent_address: Option<String>,

    /// Client-side request rate against the managed cluster
    #[arg(long, env = "QPS", default_value_t = 50.0)]
    qps: f32,

    /// Client-side burst against the managed cluster
    #[arg(long, env = "BURST", default_value_t = 100)]
    burst: u32,

    /// OTLP collector endpoint
    #[arg(long, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let _telemetry = init_telemetry(TelemetryConfig::new("foundation-agent", cli.otlp_endpoint.clone()))
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;

    let hub = create_client(cli.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("failed to create hub client: {e}"))?;
    let managed_config = load_config(cli.managed_kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("failed to load managed cluster config: {e}"))?;
    let managed = client_from_config(managed_config.clone())
        .map_err(|e| anyhow::anyhow!("failed to create managed cluster client: {e}"))?;

    let mapper = Arc::new(RestMapper::for_client(managed.clone()));
    let _reset = mapper.clone().spawn_periodic_reset(DEFAULT_RESET_INTERVAL);
    let limiter = Arc::new(RateLimiter::new(cli.qps, cli.burst));
    let control: Arc<dyn KubeControl> = Arc::new(
        DynamicKubeControl::new(managed_config, mapper, limiter)
            .map_err(|e| anyhow::anyhow!("failed to create managed cluster control: {e}"))?,
    );

    let readiness = Readiness::default();
    let health_addr = cli.metrics_bind_address;
    let health_readiness = readiness.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_health(health_addr, health_readiness).await {
            tracing::error!(error = %e, "health server failed");
        }
    });

    let mut leadership = if cli.leader_elect {
        let identity = std::env::var("POD_NAME").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let elector = Arc::new(LeaderElector::new(
            managed.clone(),
            LEASE_NAME,
            &cli.leader_election_namespace,
            &identity,
        ));
        Some(
            elector
                .acquire()
                .await
                .map_err(|e| anyhow::anyhow!("failed to acquire leadership: {e}"))?,
        )
    } else {
        None
    };

    let settings = AgentSettings {
        cluster_name: cli.cluster_name.clone(),
        enable_impersonation: cli.enable_impersonation,
        sync_labels_to_claims: cli.enable_sync_labels_to_clusterclaims,
        logging: LoggingSettings {
            cluster_name: cli.cluster_name.clone(),
            agent_name: cli.agent_name.clone(),
            agent_namespace: cli.agent_namespace.clone(),
            agent_port: cli.agent_port,
            agent_address: cli.agent_address.clone(),
        },
    };

    tracing::info!(cluster = %settings.cluster_name, "starting foundation agent controllers");
    let mut controllers = build_work_controllers(hub.clone(), control.clone(), &settings);
    controllers.extend(build_cluster_controllers(hub, managed, control, &settings));
    readiness.set_ready();

    let lost = async {
        match leadership.as_mut() {
            Some(guard) => guard.lost().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = join_all(controllers) => {
            tracing::info!("controllers stopped");
        }
        _ = lost => {
            tracing::error!("leadership lost, exiting");
            std::process::exit(2);
        }
    }

    if let Some(guard) = leadership {
        if let Err(e) = guard.release_leadership().await {
            tracing::warn!(error = %e, "failed to release leadership");
        }
    }
    tracing::info!("foundation agent shutting down");
    Ok(())
}
