//! Aggregated API server
//!
//! Every route except `/healthz` sits behind [`require_auth`]. With a
//! request-header CA configured, client certificates are requested during
//! the handshake and the verified chain travels with each request of the
//! connection as [`PeerCertificates`].

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{any, get};
use axum::{middleware, Extension, Router};
use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use futures::future::BoxFuture;
use rcgen::{CertificateParams, KeyPair};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tracing::info;

use crate::auth::{require_auth, Authenticator, PeerCertificates};
use crate::error::Error;
use crate::log::{log_handler, LogProxy};
use crate::path::{API_GROUP, API_VERSION, RESOURCE};
use crate::proxy::aggregator_handler;
use crate::routing::RoutingTable;
use crate::{api, ca_bundle};

/// Time in-flight requests get to finish on shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Names in the self-signed serving certificate
pub const SELF_SIGNED_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the server
    pub addr: SocketAddr,
    /// TLS certificate PEM
    pub cert_pem: String,
    /// TLS private key PEM
    pub key_pem: String,
    /// CA that signs front-proxy client certificates
    pub client_ca_pem: Option<Vec<u8>>,
}

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// Sub-resource routing
    pub table: Arc<RoutingTable>,
    /// Pod log streaming
    pub logs: Arc<LogProxy>,
    /// Caller authentication and authorization
    pub auth: Arc<Authenticator>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    let version = format!("/apis/{}/{}", API_GROUP, API_VERSION);
    let statuses = format!("{}/namespaces/{{namespace}}/{}", version, RESOURCE);
    let status = format!("{}/{{name}}", statuses);

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/apis", get(api::group_list))
        .route(&format!("/apis/{}", API_GROUP), get(api::group))
        .route(&version, get(api::resources))
        .route(&statuses, get(api::list_cluster_statuses))
        .route(&status, get(api::get_cluster_status))
        // the handler rejects too-short paths itself
        .route(&format!("{}/aggregator", status), any(aggregator_handler))
        .route(&format!("{}/aggregator/{{*path}}", status), any(aggregator_handler))
        .route(&format!("{}/log", status), any(log_handler))
        .route(&format!("{}/log/{{*path}}", status), any(log_handler))
        .layer(middleware::from_fn_with_state(state.auth.clone(), require_auth))
        .with_state(state)
}

/// Generate a self-signed serving certificate, returning (cert, key) PEM
pub fn self_signed() -> Result<(String, String), Error> {
    let hosts: Vec<String> = SELF_SIGNED_HOSTS.iter().map(|h| h.to_string()).collect();
    let params = CertificateParams::new(hosts)
        .map_err(|e| Error::Certificate(format!("invalid certificate names: {}", e)))?;
    let key = KeyPair::generate()
        .map_err(|e| Error::Certificate(format!("failed to generate key: {}", e)))?;
    let cert = params
        .self_signed(&key)
        .map_err(|e| Error::Certificate(format!("failed to self-sign: {}", e)))?;
    Ok((cert.pem(), key.serialize_pem()))
}

/// Serving TLS configuration
///
/// With a client CA, client certificates are requested and verified
/// against it but remain optional; bearer-token callers connect without one.
pub fn tls_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    client_ca_pem: Option<&[u8]>,
) -> Result<rustls::ServerConfig, Error> {
    let chain: Vec<CertificateDer<'static>> = ca_bundle::certificates(cert_pem)?
        .into_iter()
        .map(CertificateDer::from)
        .collect();
    if chain.is_empty() {
        return Err(Error::Certificate("serving certificate PEM holds no certificate".into()));
    }
    let key = PrivateKeyDer::from_pem_slice(key_pem)
        .map_err(|e| Error::Certificate(format!("invalid serving key: {}", e)))?;

    let builder = rustls::ServerConfig::builder();
    let builder = match client_ca_pem {
        Some(ca) => {
            let mut roots = RootCertStore::empty();
            for der in ca_bundle::certificates(ca)? {
                roots
                    .add(CertificateDer::from(der))
                    .map_err(|e| Error::Certificate(format!("invalid client CA: {}", e)))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(|e| Error::Certificate(format!("client certificate verifier: {}", e)))?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(chain, key)
        .map_err(|e| Error::Certificate(format!("TLS config error: {}", e)))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(config)
}

/// Rustls acceptor attaching the client certificate chain of each
/// connection to the requests it carries
#[derive(Clone)]
pub struct PeerCertAcceptor {
    inner: RustlsAcceptor,
}

impl PeerCertAcceptor {
    /// Wrap a rustls configuration
    pub fn new(config: RustlsConfig) -> Self {
        Self {
            inner: RustlsAcceptor::new(config),
        }
    }
}

impl Accept<TcpStream, Router> for PeerCertAcceptor {
    type Stream = <RustlsAcceptor as Accept<TcpStream, Router>>::Stream;
    type Service = Router;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: TcpStream, service: Router) -> Self::Future {
        let handshake = self.inner.accept(stream, service);
        Box::pin(async move {
            let (stream, service) = handshake.await?;
            let peer = PeerCertificates::from_chain(stream.get_ref().1.peer_certificates());
            Ok((stream, service.layer(Extension(peer))))
        })
    }
}

/// Serve the aggregated API until `shutdown` resolves
pub async fn serve(
    config: ServerConfig,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let handle = Handle::new();
    let stopper = handle.clone();
    tokio::spawn(async move {
        shutdown.await;
        info!("stopping proxy server");
        stopper.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });

    serve_with_handle(config, state, handle).await
}

/// Serve the aggregated API until `handle` stops it
pub async fn serve_with_handle(
    config: ServerConfig,
    state: AppState,
    handle: Handle,
) -> Result<(), Error> {
    let tls = tls_config(
        config.cert_pem.as_bytes(),
        config.key_pem.as_bytes(),
        config.client_ca_pem.as_deref(),
    )?;
    let acceptor = PeerCertAcceptor::new(RustlsConfig::from_config(Arc::new(tls)));

    info!(
        addr = %config.addr,
        client_ca = config.client_ca_pem.is_some(),
        "starting proxy server"
    );
    axum_server::bind(config.addr)
        .acceptor(acceptor)
        .handle(handle)
        .serve(router(state).into_make_service())
        .await
        .map_err(|e| Error::Internal(format!("server error: {}", e)))
}
