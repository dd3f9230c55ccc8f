//! Log subresource
//!
//! `/clusterstatuses/{cluster}/log/{podNamespace}/{pod}/{container}` reads
//! a container's log on a managed cluster through the cluster-proxy
//! service, authenticating with the log service account token kept in the
//! cluster's namespace on the hub.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use once_cell::sync::OnceCell;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use foundation_common::kube_utils::secret_data;
use foundation_common::metrics::ProxyTimer;

use crate::ca_bundle;
use crate::client::KubeClient;
use crate::error::{Error, Result};
use crate::server::AppState;

/// Secret holding the log service account token, in each cluster namespace
pub const LOG_TOKEN_SECRET: &str = "klusterlet-addon-workmgr-log";

/// Key of the token inside [`LOG_TOKEN_SECRET`]
pub const TOKEN_KEY: &str = "token";

/// Label used for log requests in proxy metrics
const METRICS_LABEL: &str = "log";

/// The container a log request addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    /// Namespace of the pod on the managed cluster
    pub pod_namespace: String,
    /// Pod name
    pub pod: String,
    /// Container name
    pub container: String,
}

impl LogTarget {
    /// Parse `{podNamespace}/{pod}/{container}`; any other arity is rejected
    pub fn parse(path: &str) -> Result<Self> {
        let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        match parts.as_slice() {
            [ns, pod, container] if !ns.is_empty() && !pod.is_empty() && !container.is_empty() => {
                Ok(Self {
                    pod_namespace: ns.to_string(),
                    pod: pod.to_string(),
                    container: container.to_string(),
                })
            }
            _ => Err(Error::InvalidLogPath(format!("/{}", path.trim_start_matches('/')))),
        }
    }
}

/// Pod log query options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Lines from the end to return
    pub tail_lines: Option<i64>,
    /// Keep streaming
    pub follow: bool,
    /// Log of the previous container instance
    pub previous: bool,
    /// Prefix lines with timestamps
    pub timestamps: bool,
    /// Only lines newer than this many seconds
    pub since_seconds: Option<i64>,
}

impl LogOptions {
    /// Read options from query parameters; malformed numbers are ignored
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let flag = |key: &str| query.get(key).is_some_and(|v| v == "true");
        let number = |key: &str| query.get(key).and_then(|v| v.parse::<i64>().ok());
        Self {
            tail_lines: number("tailLines"),
            follow: flag("follow"),
            previous: flag("previous"),
            timestamps: flag("timestamps"),
            since_seconds: number("sinceSeconds"),
        }
    }
}

/// Pod logs URL through the cluster-proxy service
pub fn log_url(
    proxy_host: &str,
    cluster: &str,
    target: &LogTarget,
    options: &LogOptions,
) -> Result<Url> {
    let raw = format!(
        "https://{}/{}/api/v1/namespaces/{}/pods/{}/log",
        proxy_host, cluster, target.pod_namespace, target.pod
    );
    let mut url = Url::parse(&raw)
        .map_err(|e| Error::LogStream(format!("invalid log URL {}: {}", raw, e)))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("container", &target.container);
        if options.follow {
            query.append_pair("follow", "true");
        }
        if options.previous {
            query.append_pair("previous", "true");
        }
        if options.timestamps {
            query.append_pair("timestamps", "true");
        }
        if let Some(lines) = options.tail_lines {
            query.append_pair("tailLines", &lines.to_string());
        }
        if let Some(seconds) = options.since_seconds {
            query.append_pair("sinceSeconds", &seconds.to_string());
        }
    }
    Ok(url)
}

/// Streams pod logs from managed clusters
pub struct LogProxy {
    kube: Arc<dyn KubeClient>,
    /// `{service}.{namespace}.svc:{port}` of the cluster-proxy service
    proxy_host: String,
    ca_bundle: Vec<u8>,
    transport: OnceCell<reqwest::Client>,
}

impl LogProxy {
    /// Create a log proxy towards `proxy_host`, trusting `ca_bundle`
    pub fn new(kube: Arc<dyn KubeClient>, proxy_host: impl Into<String>, ca_bundle: Vec<u8>) -> Self {
        Self {
            kube,
            proxy_host: proxy_host.into(),
            ca_bundle,
            transport: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::Client> {
        self.transport.get_or_try_init(|| {
            let mut builder = reqwest::Client::builder().use_rustls_tls();
            for der in ca_bundle::certificates(&self.ca_bundle)? {
                let cert = reqwest::Certificate::from_der(&der)
                    .map_err(|e| Error::Certificate(format!("invalid CA certificate: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            }
            builder
                .build()
                .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))
        })
    }

    async fn token(&self, cluster: &str) -> Result<String> {
        let secret = self
            .kube
            .get_secret(cluster, LOG_TOKEN_SECRET)
            .await
            .map_err(|e| {
                Error::LogStream(format!(
                    "failed to get log token secret in cluster {}. {}",
                    cluster, e
                ))
            })?
            .ok_or_else(|| {
                Error::LogStream(format!(
                    "log token secret {}/{} not found",
                    cluster, LOG_TOKEN_SECRET
                ))
            })?;
        let token = secret_data(&secret, TOKEN_KEY)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::LogStream(format!(
                    "log token secret {}/{} has no {}",
                    cluster, LOG_TOKEN_SECRET, TOKEN_KEY
                ))
            })?;
        String::from_utf8(token.to_vec())
            .map_err(|e| Error::LogStream(format!("log token is not UTF-8: {}", e)))
    }

    /// Stream one container's log
    #[instrument(skip(self, options), fields(pod = %target.pod, container = %target.container))]
    pub async fn stream(
        &self,
        cluster: &str,
        target: &LogTarget,
        options: &LogOptions,
    ) -> Result<Response> {
        let token = self.token(cluster).await?;
        let url = log_url(&self.proxy_host, cluster, target, options)?;
        debug!(url = %url, "streaming pod log");

        let client = self.client().map_err(|e| Error::LogStream(e.to_string()))?;
        let response = client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::LogStream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::LogStream(format!("{}: {}", status, body.trim())));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| header::HeaderValue::from_static("text/plain"));
        let stream = response.bytes_stream().map_err(std::io::Error::other);

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::TRANSFER_ENCODING, "chunked")
            .body(Body::from_stream(stream))
            .map_err(|e| Error::Internal(format!("failed to build log response: {}", e)))
    }
}

/// Path parameters of the log subresource
#[derive(Debug, Deserialize)]
pub struct LogPath {
    /// Cluster namespace
    pub namespace: String,
    /// Cluster name
    pub name: String,
    /// `{podNamespace}/{pod}/{container}`
    #[serde(default)]
    pub path: String,
}

/// Handle `/clusterstatuses/{cluster}/log/...`
pub async fn log_handler(
    State(state): State<AppState>,
    method: Method,
    Path(params): Path<LogPath>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let timer = ProxyTimer::start(METRICS_LABEL, method.as_str());
    let response = match serve_log(&state, &method, &params, &query).await {
        Ok(response) => response,
        Err(e) => {
            warn!(cluster = %params.name, error = %e, "log request failed");
            e.into_response()
        }
    };
    timer.complete(response.status().as_u16());
    response
}

async fn serve_log(
    state: &AppState,
    method: &Method,
    params: &LogPath,
    query: &HashMap<String, String>,
) -> Result<Response> {
    if method != Method::GET && method != Method::OPTIONS {
        return Err(Error::MethodNotAllowed(method.to_string()));
    }
    let target = LogTarget::parse(&params.path)?;
    let options = LogOptions::from_query(query);
    state.logs.stream(&params.name, &target, &options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeClient;
    use k8s_openapi::api::core::v1::Secret;
    use rstest::rstest;

    #[rstest]
    #[case("kube-system/etcd/etcd", true)]
    #[case("/kube-system/etcd/etcd", true)]
    #[case("kube-system/etcd", false)]
    #[case("kube-system/etcd/etcd/extra", false)]
    #[case("kube-system//etcd", false)]
    #[case("", false)]
    fn log_path_arity(#[case] path: &str, #[case] valid: bool) {
        assert_eq!(LogTarget::parse(path).is_ok(), valid, "{path}");
    }

    #[test]
    fn query_options_are_parsed() {
        let query: HashMap<String, String> = [
            ("tailLines", "10"),
            ("follow", "true"),
            ("previous", "false"),
            ("timestamps", "true"),
            ("sinceSeconds", "soon"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(
            LogOptions::from_query(&query),
            LogOptions {
                tail_lines: Some(10),
                follow: true,
                previous: false,
                timestamps: true,
                since_seconds: None,
            }
        );
    }

    #[test]
    fn url_goes_through_cluster_proxy() {
        let target = LogTarget::parse("default/web/nginx").expect("target");
        let options = LogOptions {
            tail_lines: Some(5),
            follow: true,
            ..Default::default()
        };
        let url = log_url("cluster-proxy-addon-user.ocm.svc:9092", "c1", &target, &options)
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://cluster-proxy-addon-user.ocm.svc:9092/c1/api/v1/namespaces/default/pods/web/log?container=nginx&follow=true&tailLines=5"
        );
    }

    /// Story: without the log token secret the request fails with 400
    #[tokio::test]
    async fn missing_token_secret_is_a_bad_request() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_secret()
            .withf(|ns, name| ns == "c1" && name == LOG_TOKEN_SECRET)
            .returning(|_, _| Ok(None));
        let logs = LogProxy::new(Arc::new(kube), "proxy:9092", Vec::new());

        let target = LogTarget::parse("default/web/nginx").expect("target");
        let err = logs
            .stream("c1", &target, &LogOptions::default())
            .await
            .expect_err("no token");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("failed to stream log. "));
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_secret()
            .returning(|_, _| Ok(Some(Secret::default())));
        let logs = LogProxy::new(Arc::new(kube), "proxy:9092", Vec::new());

        let err = logs.token("c1").await.expect_err("no token");
        assert!(err.to_string().contains("has no token"));
    }
}
