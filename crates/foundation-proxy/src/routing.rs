//! Routing table of the aggregator
//!
//! Every proxy configmap becomes a [`ProxyServiceInfo`] stored under its
//! sub-resource. The table is shared by the configmap watcher (writer)
//! and every request handler (reader).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::warn;

use crate::ca_bundle;
use crate::error::{Error, Result};

/// Connect timeout towards backing services
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How to reach the service behind one sub-resource
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyServiceInfo {
    /// Owning configmap as namespace/name
    pub owner: String,
    /// Logical name exposed under `/aggregator/`
    pub sub_resource: String,
    /// Backing service name
    pub service_name: String,
    /// Backing service namespace
    pub service_namespace: String,
    /// Backing service port
    pub service_port: String,
    /// Path prefix on the service, without surrounding slashes
    pub root_path: String,
    /// Append the cluster name to the root path
    pub use_id: bool,
    /// Client certificate PEM
    pub client_cert: Vec<u8>,
    /// Client key PEM
    pub client_key: Vec<u8>,
    /// Trust anchors for the service's serving certificate
    pub ca_bundle: Vec<u8>,
}

impl std::fmt::Debug for ProxyServiceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyServiceInfo")
            .field("owner", &self.owner)
            .field("sub_resource", &self.sub_resource)
            .field("service", &format!("{}/{}", self.service_namespace, self.service_name))
            .field("port", &self.service_port)
            .field("root_path", &self.root_path)
            .field("use_id", &self.use_id)
            .finish_non_exhaustive()
    }
}

impl ProxyServiceInfo {
    /// `{service}.{namespace}.svc:{port}`
    pub fn host(&self) -> String {
        format!(
            "{}.{}.svc:{}",
            self.service_name, self.service_namespace, self.service_port
        )
    }

    /// Upstream URL for a request on `cluster` with the remaining `tail`
    ///
    /// Always https, whatever scheme the request came in on.
    pub fn upstream_url(&self, cluster: &str, tail: &str, query: Option<&str>) -> String {
        let mut segments: Vec<&str> = Vec::new();
        segments.extend(self.root_path.split('/').filter(|s| !s.is_empty()));
        if self.use_id {
            segments.push(cluster);
        }
        segments.extend(tail.split('/').filter(|s| !s.is_empty()));

        let mut url = format!("https://{}/{}", self.host(), segments.join("/"));
        if tail.ends_with('/') && !segments.is_empty() {
            url.push('/');
        }
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }
        url
    }

    /// Build an HTTPS client presenting the client certificate and
    /// trusting only the CA bundle
    pub fn transport(&self) -> Result<reqwest::Client> {
        self.transport_builder()?
            .build()
            .map_err(|e| Error::Internal(format!("failed to create HTTP client: {}", e)))
    }

    /// Client builder carrying this service's identity and trust anchors
    pub fn transport_builder(&self) -> Result<reqwest::ClientBuilder> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT);

        if !self.client_cert.is_empty() && !self.client_key.is_empty() {
            let mut identity_pem = self.client_cert.clone();
            if !identity_pem.ends_with(b"\n") {
                identity_pem.push(b'\n');
            }
            identity_pem.extend_from_slice(&self.client_key);
            let identity = reqwest::Identity::from_pem(&identity_pem)
                .map_err(|e| Error::Certificate(format!("invalid client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        let anchors = ca_bundle::certificates(&self.ca_bundle)?;
        if !anchors.is_empty() {
            builder = builder.tls_built_in_root_certs(false);
            for der in anchors {
                let cert = reqwest::Certificate::from_der(&der)
                    .map_err(|e| Error::Certificate(format!("invalid CA certificate: {}", e)))?;
                builder = builder.add_root_certificate(cert);
            }
        }

        Ok(builder)
    }
}

/// A routing entry with its lazily built transport
pub struct Route {
    /// Service description
    pub info: ProxyServiceInfo,
    transport: OnceCell<reqwest::Client>,
}

impl Route {
    fn new(info: ProxyServiceInfo) -> Self {
        Self {
            info,
            transport: OnceCell::new(),
        }
    }

    /// Client for this route, built on first use
    pub fn client(&self) -> Result<&reqwest::Client> {
        self.transport.get_or_try_init(|| self.info.transport())
    }
}

/// Result of registering a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// The sub-resource was free
    Inserted,
    /// The owner changed its entry
    Updated,
    /// Nothing changed
    Unchanged,
    /// Another configmap holds the sub-resource
    Conflict {
        /// Configmap that keeps the slot
        holder: String,
    },
}

/// Sub-resource → service map guarded by a read-write lock
#[derive(Default)]
pub struct RoutingTable {
    routes: RwLock<HashMap<String, Arc<Route>>>,
}

impl RoutingTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the route of a sub-resource
    pub fn get(&self, sub_resource: &str) -> Option<Arc<Route>> {
        self.routes.read().get(sub_resource).cloned()
    }

    /// Register a service
    ///
    /// First writer wins a sub-resource. When the owner updates its entry
    /// the previous and new CA bundles are merged.
    pub fn upsert(&self, mut info: ProxyServiceInfo) -> Upsert {
        let mut routes = self.routes.write();

        let existing = routes.get(&info.sub_resource).cloned();
        if let Some(existing) = &existing {
            if existing.info.owner != info.owner {
                return Upsert::Conflict {
                    holder: existing.info.owner.clone(),
                };
            }
        }

        // the owner may have moved to another sub-resource
        routes.retain(|sub, route| route.info.owner != info.owner || *sub == info.sub_resource);

        match existing {
            Some(existing) => {
                info.ca_bundle = merged_bundle(&existing.info, &info);
                if existing.info == info {
                    return Upsert::Unchanged;
                }
                routes.insert(info.sub_resource.clone(), Arc::new(Route::new(info)));
                Upsert::Updated
            }
            None => {
                info.ca_bundle = ca_bundle::prune(&info.ca_bundle).unwrap_or_else(|e| {
                    warn!(configmap = %info.owner, error = %e, "keeping unparsed CA bundle");
                    info.ca_bundle.clone()
                });
                routes.insert(info.sub_resource.clone(), Arc::new(Route::new(info)));
                Upsert::Inserted
            }
        }
    }

    /// Drop every entry owned by a configmap, returning their sub-resources
    pub fn remove_owner(&self, owner: &str) -> Vec<String> {
        let mut routes = self.routes.write();
        let removed: Vec<String> = routes
            .iter()
            .filter(|(_, route)| route.info.owner == owner)
            .map(|(sub, _)| sub.clone())
            .collect();
        for sub in &removed {
            routes.remove(sub);
        }
        removed
    }

    /// Keep only entries whose owner is in `owners`
    pub fn retain_owners(&self, owners: &HashSet<String>) -> Vec<String> {
        let mut routes = self.routes.write();
        let stale: Vec<String> = routes
            .iter()
            .filter(|(_, route)| !owners.contains(&route.info.owner))
            .map(|(sub, _)| sub.clone())
            .collect();
        for sub in &stale {
            routes.remove(sub);
        }
        stale
    }

    /// Registered sub-resources, sorted
    pub fn sub_resources(&self) -> Vec<String> {
        let mut subs: Vec<String> = self.routes.read().keys().cloned().collect();
        subs.sort();
        subs
    }

    /// Number of registered sub-resources
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Whether no sub-resource is registered
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    /// Register a route whose transport is already built
    #[cfg(test)]
    pub(crate) fn insert_with_client(&self, info: ProxyServiceInfo, client: reqwest::Client) {
        let route = Route::new(info);
        let _ = route.transport.set(client);
        self.routes
            .write()
            .insert(route.info.sub_resource.clone(), Arc::new(route));
    }
}

fn merged_bundle(previous: &ProxyServiceInfo, current: &ProxyServiceInfo) -> Vec<u8> {
    match ca_bundle::merge(&previous.ca_bundle, &current.ca_bundle) {
        Ok(merged) => merged,
        Err(e) => {
            warn!(configmap = %current.owner, error = %e, "CA bundles could not be merged, using the new one");
            current.ca_bundle.clone()
        }
    }
}
