//! Generic dynamic client with optional impersonation
//!
//! `KubeControl` performs CRUD against any resource the REST mapper can
//! resolve. Objects travel as raw JSON so callers never need compile-time
//! types for the resources they touch.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::header::{HeaderName, HeaderValue, ACCEPT};
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams, PropagationPolicy,
};
use kube::{Client, Config, Resource};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::mapper::{RestMapper, RestMapping};
use crate::{kube_utils, Error};

/// Accept header asking the server to render a list as a Table
pub const TABLE_ACCEPT: &str = "application/json;as=Table;v=v1beta1;g=meta.k8s.io, application/json";

const IMPERSONATE_USER: &str = "impersonate-user";
const IMPERSONATE_GROUP: &str = "impersonate-group";

/// Options for [`KubeControl::list`]
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    /// Label selector, as accepted by the API server
    pub label_selector: Option<String>,
    /// Render the list as a server-side Table
    pub server_print: bool,
}

/// CRUD over dynamically mapped resources
///
/// An empty `namespace` addresses cluster-scoped objects, or every namespace
/// for `list`. It is ignored for resources that are not namespaced.
#[async_trait]
pub trait KubeControl: Send + Sync {
    /// Resolve a resource argument (plural, kind, or `{resource}.{version}.{group}`)
    async fn mapping_for_resource(&self, resource: &str) -> Result<RestMapping, Error>;

    /// Resolve a group/version/kind
    async fn mapping_for_kind(&self, gvk: &GroupVersionKind) -> Result<RestMapping, Error>;

    /// Create an object
    async fn create(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        obj: &serde_json::Value,
    ) -> Result<serde_json::Value, Error>;

    /// Get an object by name
    async fn get(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        name: &str,
    ) -> Result<serde_json::Value, Error>;

    /// List objects, optionally as a server-printed Table
    async fn list(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        options: &ListOptions,
    ) -> Result<serde_json::Value, Error>;

    /// Delete an object with foreground propagation
    async fn delete(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error>;

    /// Apply a JSON merge patch
    async fn patch(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<serde_json::Value, Error>;

    /// Replace an object wholesale
    async fn replace(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        name: &str,
        obj: &serde_json::Value,
    ) -> Result<serde_json::Value, Error>;

    /// A handle that performs every call as `user` in `groups`
    ///
    /// The receiver is unaffected; dropping the handle ends the impersonation.
    fn with_user(&self, user: &str, groups: &[String]) -> Result<Arc<dyn KubeControl>, Error>;
}

/// Client-side token bucket shared by a control and its impersonating handles
pub struct RateLimiter {
    qps: f64,
    burst: f64,
    state: Mutex<(f64, Instant)>,
}

impl RateLimiter {
    /// Create a limiter allowing `burst` calls at once, refilled at `qps` per second
    pub fn new(qps: f32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: f64::from(qps.max(0.1)),
            burst,
            state: Mutex::new((burst, Instant::now())),
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let (tokens, last) = *state;
                let now = Instant::now();
                let refilled =
                    (tokens + now.duration_since(last).as_secs_f64() * self.qps).min(self.burst);
                if refilled >= 1.0 {
                    *state = (refilled - 1.0, now);
                    None
                } else {
                    *state = (refilled, now);
                    Some(Duration::from_secs_f64((1.0 - refilled) / self.qps))
                }
            };
            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

/// [`KubeControl`] backed by `Api<DynamicObject>`
pub struct DynamicKubeControl {
    client: Client,
    config: Config,
    mapper: Arc<RestMapper>,
    limiter: Arc<RateLimiter>,
}

impl DynamicKubeControl {
    /// Create a control from a config, sharing the given mapper
    pub fn new(config: Config, mapper: Arc<RestMapper>, limiter: Arc<RateLimiter>) -> Result<Self, Error> {
        let client = kube_utils::client_from_config(config.clone())?;
        Ok(Self {
            client,
            config,
            mapper,
            limiter,
        })
    }

    fn api(&self, mapping: &RestMapping, namespace: &str) -> Api<DynamicObject> {
        match Some(namespace).filter(|ns| mapping.namespaced && !ns.is_empty()) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &mapping.resource),
            None => Api::all_with(self.client.clone(), &mapping.resource),
        }
    }
}

fn to_dynamic(obj: &serde_json::Value) -> Result<DynamicObject, Error> {
    serde_json::from_value(obj.clone()).map_err(|e| Error::serialization(e.to_string()))
}

fn to_raw(obj: &DynamicObject) -> Result<serde_json::Value, Error> {
    serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))
}

/// Headers that make the API server act as `user` in `groups`
pub fn impersonation_headers(
    user: &str,
    groups: &[String],
) -> Result<Vec<(HeaderName, HeaderValue)>, Error> {
    let value = |v: &str| {
        HeaderValue::from_str(v)
            .map_err(|e| Error::validation(format!("invalid impersonation value {v:?}: {e}")))
    };
    let mut headers = vec![(HeaderName::from_static(IMPERSONATE_USER), value(user)?)];
    for group in groups {
        headers.push((HeaderName::from_static(IMPERSONATE_GROUP), value(group)?));
    }
    Ok(headers)
}

#[async_trait]
impl KubeControl for DynamicKubeControl {
    async fn mapping_for_resource(&self, resource: &str) -> Result<RestMapping, Error> {
        self.mapper.mapping_for_resource(resource).await
    }

    async fn mapping_for_kind(&self, gvk: &GroupVersionKind) -> Result<RestMapping, Error> {
        self.mapper.mapping_for_kind(gvk).await
    }

    async fn create(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        obj: &serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        self.limiter.acquire().await;
        let created = self
            .api(mapping, namespace)
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await?;
        to_raw(&created)
    }

    async fn get(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        name: &str,
    ) -> Result<serde_json::Value, Error> {
        self.limiter.acquire().await;
        let obj = self.api(mapping, namespace).get(name).await?;
        to_raw(&obj)
    }

    async fn list(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        options: &ListOptions,
    ) -> Result<serde_json::Value, Error> {
        self.limiter.acquire().await;
        let mut params = ListParams::default();
        if let Some(selector) = &options.label_selector {
            params = params.labels(selector);
        }
        let ns = Some(namespace).filter(|ns| mapping.namespaced && !ns.is_empty());
        let url = DynamicObject::url_path(&mapping.resource, ns);
        let mut request = kube::core::Request::new(url)
            .list(&params)
            .map_err(|e| Error::internal_with_context("kubecontrol", e.to_string()))?;
        if options.server_print {
            request
                .headers_mut()
                .insert(ACCEPT, HeaderValue::from_static(TABLE_ACCEPT));
        }
        Ok(self.client.request::<serde_json::Value>(request).await?)
    }

    async fn delete(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        self.limiter.acquire().await;
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        };
        self.api(mapping, namespace).delete(name, &params).await?;
        Ok(())
    }

    async fn patch(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        self.limiter.acquire().await;
        let patched = self
            .api(mapping, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        to_raw(&patched)
    }

    async fn replace(
        &self,
        mapping: &RestMapping,
        namespace: &str,
        name: &str,
        obj: &serde_json::Value,
    ) -> Result<serde_json::Value, Error> {
        self.limiter.acquire().await;
        let replaced = self
            .api(mapping, namespace)
            .replace(name, &PostParams::default(), &to_dynamic(obj)?)
            .await?;
        to_raw(&replaced)
    }

    fn with_user(&self, user: &str, groups: &[String]) -> Result<Arc<dyn KubeControl>, Error> {
        let mut config = self.config.clone();
        config.headers.extend(impersonation_headers(user, groups)?);
        debug!(user, groups = ?groups, "building impersonating client");
        Ok(Arc::new(DynamicKubeControl::new(
            config,
            self.mapper.clone(),
            self.limiter.clone(),
        )?))
    }
}
