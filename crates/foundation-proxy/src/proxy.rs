//! Aggregator subresource: streams requests to the backing service of a
//! sub-resource

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use tracing::{debug, warn};

use foundation_common::metrics::ProxyTimer;

use crate::error::{Error, Result};
use crate::path::AggregatorPath;
use crate::routing::RoutingTable;
use crate::server::AppState;

/// Methods the aggregator connects
pub const CONNECT_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];

/// Headers that belong to a single hop and are not forwarded
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Copy headers minus hop-by-hop ones
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP {
        forwarded.remove(name);
    }
    forwarded
}

/// Handle `/clusterstatuses/{cluster}/aggregator/...`
pub async fn aggregator_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let target = AggregatorPath::parse(&path);
    let label = target
        .as_ref()
        .map(|t| t.sub_resource.clone())
        .unwrap_or_else(|_| "unknown".to_string());
    let timer = ProxyTimer::start(label, method.as_str());

    let response = match target {
        Ok(target) => match aggregate(&state.table, target, request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(path = %path, error = %e, "aggregator request failed");
                e.into_response()
            }
        },
        Err(e) => {
            debug!(path = %path, "aggregator path rejected");
            e.into_response()
        }
    };

    timer.complete(response.status().as_u16());
    response
}

/// Forward `request` to the service registered for its sub-resource
pub async fn aggregate(
    table: &RoutingTable,
    target: AggregatorPath,
    request: Request<Body>,
) -> Result<Response> {
    if !CONNECT_METHODS.contains(request.method()) {
        return Err(Error::MethodNotAllowed(request.method().to_string()));
    }

    let route = table
        .get(&target.sub_resource)
        .ok_or_else(|| Error::ServiceNotFound {
            sub_resource: target.sub_resource.clone(),
        })?;

    let url = route
        .info
        .upstream_url(&target.cluster, &target.tail, request.uri().query());
    debug!(
        sub_resource = %target.sub_resource,
        cluster = %target.cluster,
        upstream = %url,
        "proxying aggregator request"
    );

    let client = route.client()?;
    let method = request.method().clone();
    let headers = forwardable_headers(request.headers());

    let mut upstream = client.request(method.clone(), &url).headers(headers);
    if method == Method::POST || method == Method::PUT {
        upstream = upstream.body(reqwest::Body::wrap_stream(
            request.into_body().into_data_stream(),
        ));
    }

    let response = upstream
        .send()
        .await
        .map_err(|e| Error::Proxy(format!("failed to reach {}: {}", route.info.host(), e)))?;

    stream_response(response)
}

/// Relay an upstream response without buffering it
fn stream_response(response: reqwest::Response) -> Result<Response> {
    let status = response.status();
    let headers = forwardable_headers(response.headers());
    let stream = response.bytes_stream().map_err(std::io::Error::other);

    let mut builder = Response::builder().status(status);
    if let Some(h) = builder.headers_mut() {
        h.extend(headers);
    }
    builder
        .body(Body::from_stream(stream))
        .map_err(|e| Error::Internal(format!("failed to build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::test_info::info;
    use axum::http::StatusCode;

    const PREFIX: &str =
        "/apis/proxy.open-cluster-management.io/v1beta1/namespaces/c1/clusterstatuses/c1/aggregator";

    fn request(method: Method, path: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .expect("request")
    }

    fn target(sub_resource: &str) -> AggregatorPath {
        AggregatorPath::parse(&format!("{PREFIX}/{sub_resource}/probe")).expect("path")
    }

    #[tokio::test]
    async fn unknown_sub_resource_is_not_found() {
        let table = RoutingTable::new();
        let err = aggregate(&table, target("sync"), request(Method::GET, PREFIX))
            .await
            .expect_err("not found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "the proxy service (sync) is not found");
    }

    #[tokio::test]
    async fn unsupported_methods_are_refused() {
        let table = RoutingTable::new();
        table.upsert(info("default/cm", "sync"));
        let err = aggregate(&table, target("sync"), request(Method::DELETE, PREFIX))
            .await
            .expect_err("method");
        assert_eq!(err.status_code(), StatusCode::METHOD_NOT_ALLOWED);
    }

    mod upstream {
        use super::*;
        use crate::ca_bundle::fixtures::TestCa;
        use axum_server::tls_rustls::RustlsConfig;
        use parking_lot::Mutex;
        use rstest::rstest;
        use std::net::SocketAddr;
        use std::sync::Arc;

        const SERVICE_HOST: &str = "s.default.svc";

        /// What the backend saw of one request
        #[derive(Debug, Clone)]
        struct Received {
            method: Method,
            path: String,
            query: Option<String>,
            body: Vec<u8>,
        }

        type Log = Arc<Mutex<Vec<Received>>>;

        /// Serve a recording backend over TLS with a certificate from `ca`
        async fn spawn_backend(ca: &TestCa) -> (SocketAddr, Log) {
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
            let (cert, key) = ca.issue("backend", &[SERVICE_HOST]);
            let tls = RustlsConfig::from_pem(cert.into_bytes(), key.into_bytes())
                .await
                .expect("tls config");

            let log: Log = Arc::default();
            let record = log.clone();
            let app = axum::Router::new().fallback(move |request: Request<Body>| {
                let record = record.clone();
                async move {
                    let (parts, body) = request.into_parts();
                    let body = axum::body::to_bytes(body, usize::MAX).await.expect("body");
                    record.lock().push(Received {
                        method: parts.method,
                        path: parts.uri.path().to_string(),
                        query: parts.uri.query().map(str::to_string),
                        body: body.to_vec(),
                    });
                    (StatusCode::CREATED, [("x-backend", "sync")], "from backend")
                }
            });

            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            let addr = listener.local_addr().expect("addr");
            tokio::spawn(async move {
                axum_server::from_tcp_rustls(listener, tls)
                    .serve(app.into_make_service())
                    .await
                    .expect("backend");
            });
            (addr, log)
        }

        /// Register the backend under `sync`, trusting only `ca`
        fn register(table: &RoutingTable, ca: &TestCa, backend: SocketAddr) {
            let mut service = info("default/cm", "sync");
            service.service_port = backend.port().to_string();
            service.ca_bundle = ca.pem().into_bytes();
            let client = service
                .transport_builder()
                .expect("builder")
                .resolve(SERVICE_HOST, backend)
                .build()
                .expect("client");
            table.insert_with_client(service, client);
        }

        fn with_body(method: Method, path: &str, body: &'static str) -> Request<Body> {
            Request::builder()
                .method(method)
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .expect("request")
        }

        async fn body_text(response: Response) -> String {
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .expect("body");
            String::from_utf8(bytes.to_vec()).expect("utf8")
        }

        /// Story: a GET on the aggregator lands on the service's root path
        /// with its query intact, and the service's answer is relayed
        #[tokio::test]
        async fn story_request_reaches_the_backend() {
            let ca = TestCa::new("service-ca");
            let (addr, log) = spawn_backend(&ca).await;
            let table = RoutingTable::new();
            register(&table, &ca, addr);

            let response = aggregate(
                &table,
                target("sync"),
                request(Method::GET, &format!("{PREFIX}/sync/probe?watch=true&limit=5")),
            )
            .await
            .expect("proxied");

            assert_eq!(response.status(), StatusCode::CREATED);
            assert_eq!(response.headers()["x-backend"], "sync");
            assert_eq!(body_text(response).await, "from backend");

            let seen = log.lock().clone();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].method, Method::GET);
            assert_eq!(seen[0].path, "/api/probe");
            assert_eq!(seen[0].query.as_deref(), Some("watch=true&limit=5"));
            assert!(seen[0].body.is_empty());
        }

        #[rstest]
        #[case(Method::POST)]
        #[case(Method::PUT)]
        #[tokio::test]
        async fn bodies_are_forwarded(#[case] method: Method) {
            let ca = TestCa::new("service-ca");
            let (addr, log) = spawn_backend(&ca).await;
            let table = RoutingTable::new();
            register(&table, &ca, addr);

            let response = aggregate(
                &table,
                target("sync"),
                with_body(method.clone(), &format!("{PREFIX}/sync/probe"), r#"{"spec":{}}"#),
            )
            .await
            .expect("proxied");
            assert_eq!(response.status(), StatusCode::CREATED);

            let seen = log.lock().clone();
            assert_eq!(seen[0].method, method);
            assert_eq!(seen[0].path, "/api/probe");
            assert_eq!(seen[0].body, br#"{"spec":{}}"#.to_vec());
        }

        /// Story: a backend whose certificate is not signed by the
        /// registered CA is never trusted
        #[tokio::test]
        async fn foreign_serving_ca_is_a_bad_gateway() {
            let ca = TestCa::new("service-ca");
            let (addr, log) = spawn_backend(&ca).await;
            let table = RoutingTable::new();
            register(&table, &TestCa::new("someone-else"), addr);

            let err = aggregate(&table, target("sync"), request(Method::GET, PREFIX))
                .await
                .expect_err("untrusted");
            assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
            assert!(log.lock().is_empty());
        }
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", "keep-alive".parse().expect("value"));
        headers.insert("host", "hub".parse().expect("value"));
        headers.insert("accept", "application/json".parse().expect("value"));

        let forwarded = forwardable_headers(&headers);
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded.contains_key("accept"));
    }
}
