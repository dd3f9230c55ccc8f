//! Foundation hub controller manager

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use base64::Engine;
use clap::Parser;
use futures::future::join_all;

use foundation_common::health::{serve_health, Readiness};
use foundation_common::kube_utils::create_client;
use foundation_common::leader_election::LeaderElector;
use foundation_common::telemetry::{init_telemetry, TelemetryConfig};
use foundation_hub::controller_runner::{
    build_background_tasks, build_cluster_controllers, build_namespace_controllers, HubSettings,
};

const LEASE_NAME: &str = "foundation-hub-lock";

/// Hub controllers: cluster info lifecycle, labels, capacity, RBAC and GC
#[derive(Parser, Debug)]
#[command(name = "foundation-hub", version, about, long_about = None)]
struct Cli {
    /// Kubeconfig of the hub; in-cluster config when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Address of the health endpoints
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    /// Run controllers only while holding the lease
    #[arg(long, env = "LEADER_ELECT")]
    leader_elect: bool,

    /// Namespace of the leader election lease
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "open-cluster-management")]
    leader_election_namespace: String,

    /// PEM bundle agents present on their log endpoint
    #[arg(long, env = "AGENT_CA_FILE")]
    agent_ca_file: Option<PathBuf>,

    /// Image of the agent addon
    #[arg(long, env = "ADDON_IMAGE")]
    addon_image: Option<String>,

    /// Client-side request rate (recorded only, the hub has no dynamic client)
    #[arg(long, env = "QPS", default_value_t = 50.0)]
    qps: f32,

    /// Client-side burst (recorded only)
    #[arg(long, env = "BURST", default_value_t = 100)]
    burst: u32,

    /// OTLP collector endpoint
    #[arg(long, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

fn read_logging_ca(path: Option<&PathBuf>) -> anyhow::Result<Option<String>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let pem = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("failed to read agent CA {}: {e}", path.display()))?;
    Ok(Some(base64::engine::general_purpose::STANDARD.encode(pem)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let _telemetry = init_telemetry(TelemetryConfig::new("foundation-hub", cli.otlp_endpoint.clone()))
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;

    let settings = HubSettings {
        logging_ca: read_logging_ca(cli.agent_ca_file.as_ref())?,
    };
    tracing::info!(
        addon_image = cli.addon_image.as_deref().unwrap_or("<unset>"),
        qps = cli.qps,
        burst = cli.burst,
        agent_ca = settings.logging_ca.is_some(),
        "starting foundation hub"
    );

    let client = create_client(cli.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("failed to create hub client: {e}"))?;

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
            client.clone(),
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

    let mut controllers = build_cluster_controllers(client.clone(), &settings);
    controllers.extend(build_namespace_controllers(client.clone()));
    controllers.extend(build_background_tasks(client));
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
    tracing::info!("foundation hub shutting down");
    Ok(())
}
