//! Foundation proxy server

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use foundation_common::controller::shutdown_signal;
use foundation_common::health::{serve_health, Readiness};
use foundation_common::kube_utils::create_client;
use foundation_common::telemetry::{init_telemetry, TelemetryConfig};
use foundation_proxy::auth::{
    Authenticator, KubeReviewer, RequestHeaderConfig, DEFAULT_EXTRA_HEADER_PREFIX,
    DEFAULT_GROUP_HEADER, DEFAULT_USERNAME_HEADER,
};
use foundation_proxy::client::KubeClientImpl;
use foundation_proxy::controller::{self, Context, DEFAULT_LABEL_SELECTOR};
use foundation_proxy::log::LogProxy;
use foundation_proxy::routing::RoutingTable;
use foundation_proxy::server::{self, AppState, ServerConfig};

/// Aggregated API server for cluster subresources and pod logs
#[derive(Parser, Debug)]
#[command(name = "foundation-proxy", version, about, long_about = None)]
struct Cli {
    /// Kubeconfig of the hub; in-cluster config when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Address of the health endpoints
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    /// HTTPS port of the aggregated API
    #[arg(long, env = "SECURE_PORT", default_value_t = 6443)]
    secure_port: u16,

    /// Serving certificate; self-signed when unset
    #[arg(long, env = "TLS_CERT_FILE", requires = "tls_private_key_file")]
    tls_cert_file: Option<PathBuf>,

    /// Serving key
    #[arg(long, env = "TLS_PRIVATE_KEY_FILE", requires = "tls_cert_file")]
    tls_private_key_file: Option<PathBuf>,

    /// CA bundle verifying front-proxy client certificates; without it only
    /// bearer tokens are accepted
    #[arg(long, env = "REQUESTHEADER_CLIENT_CA_FILE")]
    requestheader_client_ca_file: Option<PathBuf>,

    /// Common names allowed on front-proxy certificates; any when empty
    #[arg(long, env = "REQUESTHEADER_ALLOWED_NAMES", value_delimiter = ',')]
    requestheader_allowed_names: Vec<String>,

    /// Headers carrying the user name
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_USERNAME_HEADER)]
    requestheader_username_headers: Vec<String>,

    /// Headers carrying the groups
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_GROUP_HEADER)]
    requestheader_group_headers: Vec<String>,

    /// Prefixes of headers carrying extra user attributes
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_EXTRA_HEADER_PREFIX)]
    requestheader_extra_headers_prefix: Vec<String>,

    /// Label selector of proxy configmaps
    #[arg(long, env = "PROXY_SERVICE_LABEL_SELECTOR", default_value = DEFAULT_LABEL_SELECTOR)]
    proxy_service_label_selector: String,

    /// Cluster-proxy service used for pod logs, as namespace/name
    #[arg(
        long,
        env = "LOG_PROXY_SERVICE",
        default_value = "open-cluster-management-addon/cluster-proxy-addon-user"
    )]
    log_proxy_service: String,

    /// Port of the cluster-proxy service
    #[arg(long, env = "LOG_PROXY_PORT", default_value_t = 9092)]
    log_proxy_port: u16,

    /// CA bundle of the cluster-proxy service
    #[arg(long, env = "LOG_PROXY_CA_FILE", default_value = "/var/run/clusterproxy/service-ca.crt")]
    log_proxy_ca_file: PathBuf,

    /// OTLP collector endpoint
    #[arg(long, env = "OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,
}

/// `{name}.{namespace}.svc:{port}` from `namespace/name`
fn log_proxy_host(service: &str, port: u16) -> anyhow::Result<String> {
    match service.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
            Ok(format!("{}.{}.svc:{}", name, ns, port))
        }
        _ => anyhow::bail!("--log-proxy-service must be namespace/name, got {service:?}"),
    }
}

async fn serving_certificate(cli: &Cli) -> anyhow::Result<(String, String)> {
    match (&cli.tls_cert_file, &cli.tls_private_key_file) {
        (Some(cert), Some(key)) => {
            let cert_pem = tokio::fs::read_to_string(cert)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", cert.display()))?;
            let key_pem = tokio::fs::read_to_string(key)
                .await
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", key.display()))?;
            Ok((cert_pem, key_pem))
        }
        _ => {
            tracing::info!("no serving certificate configured, generating a self-signed one");
            Ok(server::self_signed()?)
        }
    }
}

/// Front-proxy CA and header layout, when a CA file is configured
async fn request_header(cli: &Cli) -> anyhow::Result<Option<(Vec<u8>, RequestHeaderConfig)>> {
    let Some(path) = &cli.requestheader_client_ca_file else {
        tracing::warn!("no request-header CA configured, only bearer tokens are accepted");
        return Ok(None);
    };
    let ca = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let config = RequestHeaderConfig {
        allowed_names: cli.requestheader_allowed_names.clone(),
        username_headers: cli.requestheader_username_headers.clone(),
        group_headers: cli.requestheader_group_headers.clone(),
        extra_header_prefixes: cli.requestheader_extra_headers_prefix.clone(),
    };
    Ok(Some((ca, config)))
}

async fn read_log_proxy_ca(path: &Path) -> Vec<u8> {
    match tokio::fs::read(path).await {
        Ok(pem) => pem,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cluster-proxy CA not readable, using system roots");
            Vec::new()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install crypto provider: {e:?}");
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let _telemetry = init_telemetry(TelemetryConfig::new("foundation-proxy", cli.otlp_endpoint.clone()))
        .map_err(|e| anyhow::anyhow!("failed to initialize telemetry: {e}"))?;

    let proxy_host = log_proxy_host(&cli.log_proxy_service, cli.log_proxy_port)?;
    let (cert_pem, key_pem) = serving_certificate(&cli).await?;
    let log_ca = read_log_proxy_ca(&cli.log_proxy_ca_file).await;
    let (client_ca_pem, request_header) = match request_header(&cli).await? {
        Some((ca, config)) => (Some(ca), Some(config)),
        None => (None, None),
    };

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

    let table = Arc::new(RoutingTable::new());
    let ctx = Arc::new(Context::new(client.clone(), table.clone()));
    let events = controller::watch(client.clone(), &cli.proxy_service_label_selector);
    tracing::info!(
        selector = %cli.proxy_service_label_selector,
        log_proxy = %proxy_host,
        "starting foundation proxy"
    );

    let state = AppState {
        table,
        logs: Arc::new(LogProxy::new(
            Arc::new(KubeClientImpl::new(client.clone())),
            proxy_host,
            log_ca,
        )),
        auth: Arc::new(Authenticator::new(
            request_header,
            Arc::new(KubeReviewer::new(client)),
        )),
    };
    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], cli.secure_port)),
        cert_pem,
        key_pem,
        client_ca_pem,
    };
    readiness.set_ready();

    let watcher = controller::run(ctx, events, shutdown_signal());
    tokio::select! {
        result = server::serve(config, state, shutdown_signal()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "proxy server failed");
                std::process::exit(2);
            }
        }
        _ = watcher => {
            tracing::info!("configmap watcher stopped");
        }
    }

    tracing::info!("foundation proxy shutting down");
    Ok(())
}
