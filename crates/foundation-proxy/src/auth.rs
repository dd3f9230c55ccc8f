//! Authentication and authorization of API requests
//!
//! Requests relayed by the kube-apiserver arrive on a connection that
//! presented a front-proxy client certificate signed by the request-header
//! CA; the user is then read from the `X-Remote-*` headers. Any other
//! request must carry a bearer token, which is checked with a TokenReview.
//! Every authenticated request is authorized with a SubjectAccessReview
//! before it reaches a handler.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use k8s_openapi::api::authentication::v1::{TokenReview, TokenReviewSpec, TokenReviewStatus};
use k8s_openapi::api::authorization::v1::{
    NonResourceAttributes, ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use kube::{Api, Client};
use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::error::{Error, Result};
use crate::path::{API_GROUP, API_VERSION, RESOURCE};

/// Default header carrying the user name
pub const DEFAULT_USERNAME_HEADER: &str = "X-Remote-User";
/// Default header carrying group memberships, one per value
pub const DEFAULT_GROUP_HEADER: &str = "X-Remote-Group";
/// Default prefix of headers carrying extra user attributes
pub const DEFAULT_EXTRA_HEADER_PREFIX: &str = "X-Remote-Extra-";

/// Paths served without credentials
pub const UNAUTHENTICATED_PATHS: [&str; 1] = ["/healthz"];

/// Client certificate chain the peer presented during the handshake,
/// leaf first; empty when none was sent
#[derive(Debug, Clone, Default)]
pub struct PeerCertificates(pub Vec<Vec<u8>>);

impl PeerCertificates {
    /// Copy the chain of a TLS session
    pub fn from_chain(chain: Option<&[CertificateDer<'_>]>) -> Self {
        Self(
            chain
                .unwrap_or_default()
                .iter()
                .map(|der| der.as_ref().to_vec())
                .collect(),
        )
    }

    /// Common name of the leaf certificate
    pub fn common_name(&self) -> Option<String> {
        let leaf = self.0.first()?;
        let (_, parsed) = x509_parser::parse_x509_certificate(leaf).ok()?;
        let cn = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);
        cn
    }
}

/// An authenticated user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    /// User name
    pub username: String,
    /// User id, when the authenticator knows one
    pub uid: Option<String>,
    /// Group memberships
    pub groups: Vec<String>,
    /// Extra attributes, keys lower-cased
    pub extra: BTreeMap<String, Vec<String>>,
}

/// Which front proxies are trusted and where they put the user
#[derive(Debug, Clone)]
pub struct RequestHeaderConfig {
    /// Common names a front-proxy certificate may carry; any when empty
    pub allowed_names: Vec<String>,
    /// Headers checked in order for the user name
    pub username_headers: Vec<String>,
    /// Headers whose values are groups
    pub group_headers: Vec<String>,
    /// Prefixes of extra attribute headers
    pub extra_header_prefixes: Vec<String>,
}

impl Default for RequestHeaderConfig {
    fn default() -> Self {
        Self {
            allowed_names: Vec::new(),
            username_headers: vec![DEFAULT_USERNAME_HEADER.to_string()],
            group_headers: vec![DEFAULT_GROUP_HEADER.to_string()],
            extra_header_prefixes: vec![DEFAULT_EXTRA_HEADER_PREFIX.to_string()],
        }
    }
}

impl RequestHeaderConfig {
    fn allows(&self, common_name: &str) -> bool {
        self.allowed_names.is_empty() || self.allowed_names.iter().any(|n| n == common_name)
    }

    /// User named by the request headers, `None` without a user name
    pub fn user_from_headers(&self, headers: &HeaderMap) -> Option<UserInfo> {
        let username = self
            .username_headers
            .iter()
            .filter_map(|h| headers.get(h.as_str()))
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .find(|v| !v.is_empty())?
            .to_string();

        let groups = self
            .group_headers
            .iter()
            .flat_map(|h| headers.get_all(h.as_str()))
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();

        let mut extra: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            let Some(key) = self.extra_key(name) else {
                continue;
            };
            if let Ok(value) = value.to_str() {
                extra.entry(key).or_default().push(value.to_string());
            }
        }

        Some(UserInfo {
            username,
            uid: None,
            groups,
            extra,
        })
    }

    fn extra_key(&self, name: &HeaderName) -> Option<String> {
        let name = name.as_str();
        self.extra_header_prefixes.iter().find_map(|prefix| {
            let prefix = prefix.to_ascii_lowercase();
            name.strip_prefix(prefix.as_str())
                .filter(|key| !key.is_empty())
                .map(str::to_string)
        })
    }

    fn is_identity_header(&self, name: &HeaderName) -> bool {
        let name = name.as_str();
        self.username_headers
            .iter()
            .chain(&self.group_headers)
            .any(|h| h.eq_ignore_ascii_case(name))
            || self.extra_key_prefix_matches(name)
    }

    fn extra_key_prefix_matches(&self, name: &str) -> bool {
        self.extra_header_prefixes
            .iter()
            .any(|p| name.starts_with(p.to_ascii_lowercase().as_str()))
    }

    /// Replace every identity header with the authenticated user
    ///
    /// Identity headers sent by the caller never reach a backing service.
    pub fn stamp_user(&self, headers: &mut HeaderMap, user: &UserInfo) {
        let stale: Vec<HeaderName> = headers
            .keys()
            .filter(|name| self.is_identity_header(name))
            .cloned()
            .collect();
        for name in stale {
            headers.remove(&name);
        }

        let mut append = |name: String, value: &str| match (
            HeaderName::try_from(name),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!(value = %value, "identity value is not a valid header"),
        };

        if let Some(header) = self.username_headers.first() {
            append(header.clone(), &user.username);
        }
        if let Some(header) = self.group_headers.first() {
            for group in &user.groups {
                append(header.clone(), group);
            }
        }
        if let Some(prefix) = self.extra_header_prefixes.first() {
            for (key, values) in &user.extra {
                for value in values {
                    append(format!("{prefix}{key}"), value);
                }
            }
        }
    }
}

/// What a request asks to do, in SubjectAccessReview terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestAttributes {
    /// A cluster status or one of its subresources
    Resource {
        /// Kubernetes verb
        verb: String,
        /// Cluster namespace
        namespace: String,
        /// Cluster name, absent on lists
        name: Option<String>,
        /// `aggregator` or `log`
        subresource: Option<String>,
    },
    /// Discovery and other non-resource paths
    NonResource {
        /// Kubernetes verb
        verb: String,
        /// Request path
        path: String,
    },
}

fn verb(method: &Method, named: bool) -> String {
    match *method {
        Method::GET | Method::HEAD if named => "get".to_string(),
        Method::GET | Method::HEAD => "list".to_string(),
        Method::POST => "create".to_string(),
        Method::PUT => "update".to_string(),
        Method::PATCH => "patch".to_string(),
        Method::DELETE => "delete".to_string(),
        ref other => other.as_str().to_ascii_lowercase(),
    }
}

impl RequestAttributes {
    /// Attributes of a request on `path`
    pub fn from_request(method: &Method, path: &str) -> Self {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        match parts.as_slice() {
            ["apis", group, version, "namespaces", namespace, resource, rest @ ..]
                if *group == API_GROUP && *version == API_VERSION && *resource == RESOURCE =>
            {
                let name = rest.first().filter(|n| !n.is_empty()).map(|n| n.to_string());
                let subresource = rest.get(1).map(|s| s.to_string());
                Self::Resource {
                    verb: verb(method, name.is_some()),
                    namespace: namespace.to_string(),
                    name,
                    subresource,
                }
            }
            _ => Self::NonResource {
                verb: verb(method, true),
                path: path.to_string(),
            },
        }
    }
}

impl fmt::Display for RequestAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource {
                verb,
                namespace,
                subresource,
                ..
            } => {
                let resource = match subresource {
                    Some(sub) => format!("{RESOURCE}/{sub}"),
                    None => RESOURCE.to_string(),
                };
                write!(
                    f,
                    "{verb} resource \"{resource}\" in API group \"{API_GROUP}\" in the namespace \"{namespace}\""
                )
            }
            Self::NonResource { verb, path } => write!(f, "{verb} path \"{path}\""),
        }
    }
}

/// Outcome of a SubjectAccessReview
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The user may proceed
    Allowed,
    /// The user may not, with the authorizer's reason
    Denied(String),
}

/// Review calls against the hub's authentication and authorization APIs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Reviewer: Send + Sync {
    /// Resolve a bearer token, `None` when the token is not valid
    async fn review_token(&self, token: &str) -> Result<Option<UserInfo>>;

    /// Ask whether `user` may do what `attributes` describe
    async fn review_access(&self, user: &UserInfo, attributes: &RequestAttributes)
        -> Result<Decision>;
}

/// Reviewer backed by TokenReview and SubjectAccessReview
pub struct KubeReviewer {
    client: Client,
}

impl KubeReviewer {
    /// Create a new reviewer
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// User of an authenticated TokenReview
pub fn reviewed_user(status: &TokenReviewStatus) -> Option<UserInfo> {
    if !status.authenticated.unwrap_or(false) {
        return None;
    }
    let user = status.user.as_ref()?;
    Some(UserInfo {
        username: user.username.clone().filter(|u| !u.is_empty())?,
        uid: user.uid.clone(),
        groups: user.groups.clone().unwrap_or_default(),
        extra: user.extra.clone().unwrap_or_default(),
    })
}

/// SubjectAccessReview asking about `user` and `attributes`
pub fn access_review(user: &UserInfo, attributes: &RequestAttributes) -> SubjectAccessReview {
    let (resource_attributes, non_resource_attributes) = match attributes {
        RequestAttributes::Resource {
            verb,
            namespace,
            name,
            subresource,
        } => (
            Some(ResourceAttributes {
                group: Some(API_GROUP.to_string()),
                version: Some(API_VERSION.to_string()),
                resource: Some(RESOURCE.to_string()),
                subresource: subresource.clone(),
                namespace: Some(namespace.clone()),
                name: name.clone(),
                verb: Some(verb.clone()),
                ..Default::default()
            }),
            None,
        ),
        RequestAttributes::NonResource { verb, path } => (
            None,
            Some(NonResourceAttributes {
                path: Some(path.clone()),
                verb: Some(verb.clone()),
            }),
        ),
    };

    SubjectAccessReview {
        metadata: Default::default(),
        spec: SubjectAccessReviewSpec {
            user: Some(user.username.clone()),
            uid: user.uid.clone(),
            groups: Some(user.groups.clone()),
            extra: (!user.extra.is_empty()).then(|| user.extra.clone()),
            resource_attributes,
            non_resource_attributes,
        },
        status: None,
    }
}

#[async_trait]
impl Reviewer for KubeReviewer {
    async fn review_token(&self, token: &str) -> Result<Option<UserInfo>> {
        let api: Api<TokenReview> = Api::all(self.client.clone());
        let review = TokenReview {
            metadata: Default::default(),
            spec: TokenReviewSpec {
                token: Some(token.to_string()),
                audiences: None,
            },
            status: None,
        };

        let result = api.create(&Default::default(), &review).await?;
        let status = result
            .status
            .ok_or_else(|| Error::Internal("TokenReview returned no status".into()))?;
        if let Some(error) = status.error.as_deref().filter(|e| !e.is_empty()) {
            debug!(error = %error, "token rejected");
        }
        Ok(reviewed_user(&status))
    }

    async fn review_access(
        &self,
        user: &UserInfo,
        attributes: &RequestAttributes,
    ) -> Result<Decision> {
        let api: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let result = api
            .create(&Default::default(), &access_review(user, attributes))
            .await?;
        let status = result
            .status
            .ok_or_else(|| Error::Internal("SubjectAccessReview returned no status".into()))?;

        if let Some(error) = status.evaluation_error.as_deref().filter(|e| !e.is_empty()) {
            warn!(user = %user.username, error = %error, "access review evaluation error");
        }
        if status.allowed {
            Ok(Decision::Allowed)
        } else {
            Ok(Decision::Denied(status.reason.unwrap_or_default()))
        }
    }
}

/// Bearer token of the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Authenticates callers and authorizes their requests
pub struct Authenticator {
    request_header: Option<RequestHeaderConfig>,
    reviewer: Arc<dyn Reviewer>,
}

impl Authenticator {
    /// Create an authenticator; front proxies are trusted only with a
    /// request-header configuration
    pub fn new(request_header: Option<RequestHeaderConfig>, reviewer: Arc<dyn Reviewer>) -> Self {
        Self {
            request_header,
            reviewer,
        }
    }

    /// Identify the caller of a request
    pub async fn authenticate(
        &self,
        peer: Option<&PeerCertificates>,
        headers: &HeaderMap,
    ) -> Result<UserInfo> {
        if let Some(user) = self.front_proxy_user(peer, headers) {
            return Ok(user);
        }

        let Some(token) = bearer_token(headers) else {
            return Err(Error::Unauthorized);
        };
        self.reviewer
            .review_token(token)
            .await?
            .ok_or(Error::Unauthorized)
    }

    fn front_proxy_user(
        &self,
        peer: Option<&PeerCertificates>,
        headers: &HeaderMap,
    ) -> Option<UserInfo> {
        let config = self.request_header.as_ref()?;
        // only certificates verified against the request-header CA reach here
        let common_name = peer?.common_name()?;
        if !config.allows(&common_name) {
            debug!(cn = %common_name, "client certificate is not an allowed front proxy");
            return None;
        }
        config.user_from_headers(headers)
    }

    /// Check `user` may do what `attributes` describe
    pub async fn authorize(&self, user: &UserInfo, attributes: &RequestAttributes) -> Result<()> {
        match self.reviewer.review_access(user, attributes).await? {
            Decision::Allowed => Ok(()),
            Decision::Denied(reason) => {
                debug!(user = %user.username, request = %attributes, reason = %reason, "access denied");
                Err(Error::AccessDenied {
                    user: user.username.clone(),
                    action: attributes.to_string(),
                })
            }
        }
    }

    /// Header layout used when stamping the user on forwarded requests
    pub fn identity_headers(&self) -> RequestHeaderConfig {
        self.request_header.clone().unwrap_or_default()
    }
}

/// Middleware running authentication and authorization before handlers
pub async fn require_auth(
    State(auth): State<Arc<Authenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if UNAUTHENTICATED_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let user = match auth
        .authenticate(request.extensions().get::<PeerCertificates>(), request.headers())
        .await
    {
        Ok(user) => user,
        Err(e) => {
            debug!(path = %path, error = %e, "request not authenticated");
            return e.into_response();
        }
    };

    let attributes = RequestAttributes::from_request(request.method(), &path);
    if let Err(e) = auth.authorize(&user, &attributes).await {
        return e.into_response();
    }

    auth.identity_headers().stamp_user(request.headers_mut(), &user);
    request.extensions_mut().insert(user);
    next.run(request).await
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca_bundle::fixtures::TestCa;
    use rstest::rstest;

    const LOG_PATH: &str = "/apis/proxy.open-cluster-management.io/v1beta1/namespaces/c1/clusterstatuses/c1/log/kube-system/etcd/etcd";

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::try_from(*name).expect("name"),
                HeaderValue::from_str(value).expect("value"),
            );
        }
        map
    }

    fn peer(ca: &TestCa, common_name: &str) -> PeerCertificates {
        let (cert, _) = ca.issue(common_name, &[]);
        PeerCertificates(crate::ca_bundle::certificates(cert.as_bytes()).expect("der"))
    }

    fn front_proxy(allowed: &[&str]) -> RequestHeaderConfig {
        RequestHeaderConfig {
            allowed_names: allowed.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    mod attributes {
        use super::*;

        #[rstest]
        #[case(Method::GET, LOG_PATH, "get", Some("c1"), Some("log"))]
        #[case(Method::POST, "/apis/proxy.open-cluster-management.io/v1beta1/namespaces/c1/clusterstatuses/c1/aggregator/sync", "create", Some("c1"), Some("aggregator"))]
        #[case(Method::GET, "/apis/proxy.open-cluster-management.io/v1beta1/namespaces/c1/clusterstatuses", "list", None, None)]
        #[case(Method::GET, "/apis/proxy.open-cluster-management.io/v1beta1/namespaces/c1/clusterstatuses/c1", "get", Some("c1"), None)]
        #[case(Method::OPTIONS, "/apis/proxy.open-cluster-management.io/v1beta1/namespaces/c1/clusterstatuses/c1/aggregator/sync", "options", Some("c1"), Some("aggregator"))]
        fn resource_requests(
            #[case] method: Method,
            #[case] path: &str,
            #[case] expected_verb: &str,
            #[case] expected_name: Option<&str>,
            #[case] expected_sub: Option<&str>,
        ) {
            assert_eq!(
                RequestAttributes::from_request(&method, path),
                RequestAttributes::Resource {
                    verb: expected_verb.to_string(),
                    namespace: "c1".to_string(),
                    name: expected_name.map(str::to_string),
                    subresource: expected_sub.map(str::to_string),
                }
            );
        }

        #[rstest]
        #[case("/apis")]
        #[case("/apis/proxy.open-cluster-management.io/v1beta1")]
        #[case("/apis/other.io/v1/namespaces/c1/clusterstatuses/c1")]
        fn discovery_is_non_resource(#[case] path: &str) {
            assert_eq!(
                RequestAttributes::from_request(&Method::GET, path),
                RequestAttributes::NonResource {
                    verb: "get".to_string(),
                    path: path.to_string(),
                }
            );
        }

        #[test]
        fn access_review_names_the_subresource() {
            let user = UserInfo {
                username: "alice".to_string(),
                groups: vec!["devs".to_string()],
                ..Default::default()
            };
            let review = access_review(&user, &RequestAttributes::from_request(&Method::GET, LOG_PATH));
            let spec = review.spec;
            assert_eq!(spec.user.as_deref(), Some("alice"));
            assert_eq!(spec.groups, Some(vec!["devs".to_string()]));
            assert!(spec.extra.is_none());
            let resource = spec.resource_attributes.expect("resource attributes");
            assert_eq!(resource.group.as_deref(), Some(API_GROUP));
            assert_eq!(resource.resource.as_deref(), Some("clusterstatuses"));
            assert_eq!(resource.subresource.as_deref(), Some("log"));
            assert_eq!(resource.namespace.as_deref(), Some("c1"));
            assert_eq!(resource.name.as_deref(), Some("c1"));
            assert_eq!(resource.verb.as_deref(), Some("get"));
        }

        #[test]
        fn denial_message_reads_like_the_apiserver() {
            let attributes = RequestAttributes::from_request(&Method::GET, LOG_PATH);
            assert_eq!(
                attributes.to_string(),
                "get resource \"clusterstatuses/log\" in API group \"proxy.open-cluster-management.io\" in the namespace \"c1\""
            );
        }
    }

    mod token_reviews {
        use super::*;
        use k8s_openapi::api::authentication::v1::UserInfo as ReviewedUser;

        #[test]
        fn authenticated_review_yields_the_user() {
            let status = TokenReviewStatus {
                authenticated: Some(true),
                user: Some(ReviewedUser {
                    username: Some("system:serviceaccount:default:reader".to_string()),
                    uid: Some("u-1".to_string()),
                    groups: Some(vec!["system:serviceaccounts".to_string()]),
                    extra: None,
                }),
                ..Default::default()
            };
            let user = reviewed_user(&status).expect("user");
            assert_eq!(user.username, "system:serviceaccount:default:reader");
            assert_eq!(user.uid.as_deref(), Some("u-1"));
            assert_eq!(user.groups, vec!["system:serviceaccounts".to_string()]);
        }

        #[test]
        fn rejected_review_yields_nobody() {
            let status = TokenReviewStatus {
                authenticated: Some(false),
                error: Some("token expired".to_string()),
                ..Default::default()
            };
            assert!(reviewed_user(&status).is_none());
        }

        #[rstest]
        #[case("Bearer abc", Some("abc"))]
        #[case("Basic abc", None)]
        #[case("Bearer ", None)]
        fn bearer_tokens(#[case] value: &str, #[case] expected: Option<&str>) {
            let map = headers(&[("authorization", value)]);
            assert_eq!(bearer_token(&map), expected);
        }
    }

    mod authentication {
        use super::*;

        fn no_reviews() -> Arc<MockReviewer> {
            Arc::new(MockReviewer::new())
        }

        /// Story: the apiserver relays a user over its front-proxy
        /// certificate and the user comes from the headers
        #[tokio::test]
        async fn story_front_proxy_user_from_headers() {
            let ca = TestCa::new("front-proxy-ca");
            let auth = Authenticator::new(Some(front_proxy(&["front-proxy-client"])), no_reviews());
            let request = headers(&[
                ("x-remote-user", "alice"),
                ("x-remote-group", "devs"),
                ("x-remote-group", "system:authenticated"),
                ("x-remote-extra-scopes", "view"),
            ]);

            let user = auth
                .authenticate(Some(&peer(&ca, "front-proxy-client")), &request)
                .await
                .expect("authenticated");
            assert_eq!(user.username, "alice");
            assert_eq!(user.groups, vec!["devs".to_string(), "system:authenticated".to_string()]);
            assert_eq!(user.extra["scopes"], vec!["view".to_string()]);
        }

        #[tokio::test]
        async fn front_proxy_name_must_be_allowed() {
            let ca = TestCa::new("front-proxy-ca");
            let auth = Authenticator::new(Some(front_proxy(&["front-proxy-client"])), no_reviews());
            let err = auth
                .authenticate(Some(&peer(&ca, "somebody")), &headers(&[("x-remote-user", "admin")]))
                .await
                .expect_err("not a front proxy");
            assert!(matches!(err, Error::Unauthorized));
        }

        #[tokio::test]
        async fn any_name_is_allowed_when_none_are_listed() {
            let ca = TestCa::new("front-proxy-ca");
            let auth = Authenticator::new(Some(front_proxy(&[])), no_reviews());
            let user = auth
                .authenticate(Some(&peer(&ca, "aggregator")), &headers(&[("x-remote-user", "bob")]))
                .await
                .expect("authenticated");
            assert_eq!(user.username, "bob");
        }

        /// Story: identity headers without a front-proxy certificate are
        /// not trusted
        #[tokio::test]
        async fn story_spoofed_headers_are_ignored() {
            let auth = Authenticator::new(Some(front_proxy(&[])), no_reviews());
            let err = auth
                .authenticate(None, &headers(&[("x-remote-user", "system:admin")]))
                .await
                .expect_err("anonymous");
            assert!(matches!(err, Error::Unauthorized));
            assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
        }

        #[tokio::test]
        async fn bearer_token_is_reviewed() {
            let mut reviewer = MockReviewer::new();
            reviewer
                .expect_review_token()
                .withf(|token| token == "sa-token")
                .times(1)
                .returning(|_| {
                    Ok(Some(UserInfo {
                        username: "system:serviceaccount:default:reader".to_string(),
                        ..Default::default()
                    }))
                });
            let auth = Authenticator::new(None, Arc::new(reviewer));

            let user = auth
                .authenticate(None, &headers(&[("authorization", "Bearer sa-token")]))
                .await
                .expect("authenticated");
            assert_eq!(user.username, "system:serviceaccount:default:reader");
        }

        #[tokio::test]
        async fn invalid_token_is_unauthorized() {
            let mut reviewer = MockReviewer::new();
            reviewer.expect_review_token().returning(|_| Ok(None));
            let auth = Authenticator::new(None, Arc::new(reviewer));

            let err = auth
                .authenticate(None, &headers(&[("authorization", "Bearer stale")]))
                .await
                .expect_err("unauthorized");
            assert!(matches!(err, Error::Unauthorized));
        }

        #[tokio::test]
        async fn denied_review_is_forbidden() {
            let mut reviewer = MockReviewer::new();
            reviewer
                .expect_review_access()
                .returning(|_, _| Ok(Decision::Denied("no RBAC policy matched".to_string())));
            let auth = Authenticator::new(None, Arc::new(reviewer));
            let user = UserInfo {
                username: "alice".to_string(),
                ..Default::default()
            };

            let err = auth
                .authorize(&user, &RequestAttributes::from_request(&Method::GET, LOG_PATH))
                .await
                .expect_err("denied");
            assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
            assert!(err.to_string().starts_with("user \"alice\" cannot get resource \"clusterstatuses/log\""));
        }
    }

    mod forwarding {
        use super::*;

        /// Story: whatever identity headers the caller sent are replaced
        /// by the authenticated user before the request is forwarded
        #[test]
        fn story_identity_headers_are_restamped() {
            let config = RequestHeaderConfig::default();
            let mut forwarded = headers(&[
                ("x-remote-user", "system:admin"),
                ("x-remote-group", "system:masters"),
                ("x-remote-extra-scopes", "all"),
                ("accept", "application/json"),
            ]);
            let user = UserInfo {
                username: "alice".to_string(),
                groups: vec!["devs".to_string()],
                ..Default::default()
            };

            config.stamp_user(&mut forwarded, &user);
            assert_eq!(forwarded["x-remote-user"], "alice");
            let groups: Vec<_> = forwarded.get_all("x-remote-group").iter().collect();
            assert_eq!(groups, vec!["devs"]);
            assert!(!forwarded.contains_key("x-remote-extra-scopes"));
            assert_eq!(forwarded["accept"], "application/json");
        }
    }
}
