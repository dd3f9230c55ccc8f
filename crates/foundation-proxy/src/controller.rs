//! Proxy configmap watcher
//!
//! Keeps the routing table in step with the configmaps that match the
//! proxy label selector. A configmap that cannot be resolved yet (its
//! secret or CA configmap is missing, or another configmap holds its
//! sub-resource) is retried periodically until it resolves or goes away.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

use foundation_common::controller::WATCH_TIMEOUT_SECS;
use foundation_common::kube_utils::secret_data;

use crate::client::{KubeClient, KubeClientImpl};
use crate::error::{Error, Result};
use crate::routing::{ProxyServiceInfo, RoutingTable, Upsert};

/// Label selector of proxy configmaps unless configured otherwise
pub const DEFAULT_LABEL_SELECTOR: &str = "config=acm-proxyserver";

/// How often unresolved configmaps are retried
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Backing service as namespace/name
pub const KEY_SERVICE: &str = "service";
/// Backing service port
pub const KEY_PORT: &str = "port";
/// Root path on the backing service
pub const KEY_PATH: &str = "path";
/// Name exposed under `/aggregator/`
pub const KEY_SUB_RESOURCE: &str = "sub-resource";
/// Client certificate secret as [namespace/]name
pub const KEY_SECRET: &str = "secret";
/// Trust anchor configmap as [namespace/]name
pub const KEY_CA_CONFIGMAP: &str = "caConfigMap";
/// `"true"` appends the cluster name to the root path
pub const KEY_USE_ID: &str = "use-id";

/// Key of the CA bundle inside the CA configmap
pub const SERVICE_CA_KEY: &str = "service-ca.crt";

const REQUIRED_KEYS: [&str; 6] = [
    KEY_SERVICE,
    KEY_PORT,
    KEY_PATH,
    KEY_SUB_RESOURCE,
    KEY_SECRET,
    KEY_CA_CONFIGMAP,
];

/// Stream of configmap watch events
pub type ConfigMapEvents = BoxStream<'static, std::result::Result<Event<ConfigMap>, watcher::Error>>;

/// Context for the configmap watcher
pub struct Context {
    /// Hub client
    pub kube: Arc<dyn KubeClient>,
    /// Table the request handlers read
    pub table: Arc<RoutingTable>,
}

impl Context {
    /// Create a context over the hub
    pub fn new(client: Client, table: Arc<RoutingTable>) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
            table,
        }
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, table: Arc<RoutingTable>) -> Self {
        Self { kube, table }
    }
}

/// Watch the configmaps matching `selector` across all namespaces
pub fn watch(client: Client, selector: &str) -> ConfigMapEvents {
    let config = WatcherConfig::default()
        .labels(selector)
        .timeout(WATCH_TIMEOUT_SECS);
    watcher::watcher(Api::<ConfigMap>::all(client), config)
        .default_backoff()
        .boxed()
}

fn owner_of(cm: &ConfigMap) -> String {
    format!("{}/{}", cm.namespace().unwrap_or_default(), cm.name_any())
}

/// Split `ns/name`, or `name` with `default_namespace`
fn split_ref(value: &str, default_namespace: &str) -> Option<(String, String)> {
    let (namespace, name) = match value.split_once('/') {
        Some((ns, name)) if !name.contains('/') => (ns, name),
        Some(_) => return None,
        None => (default_namespace, value),
    };
    if name.is_empty() {
        return None;
    }
    let namespace = if namespace.is_empty() {
        default_namespace
    } else {
        namespace
    };
    Some((namespace.to_string(), name.to_string()))
}

/// Validate a proxy configmap and resolve what it references
pub async fn service_info(kube: &dyn KubeClient, cm: &ConfigMap) -> Result<ProxyServiceInfo> {
    let owner = owner_of(cm);
    let empty = BTreeMap::new();
    let data = cm.data.as_ref().unwrap_or(&empty);

    for key in REQUIRED_KEYS {
        if !data.contains_key(key) {
            return Err(Error::configmap(
                &owner,
                format!("the '{}' key is required", key),
            ));
        }
    }
    let value = |key: &str| data.get(key).map(String::as_str).unwrap_or_default();

    let (service_namespace, service_name) = match value(KEY_SERVICE).split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            (ns.to_string(), name.to_string())
        }
        _ => {
            return Err(Error::configmap(
                &owner,
                format!("the service format is wrong: {:?}", value(KEY_SERVICE)),
            ))
        }
    };

    let sub_resource = value(KEY_SUB_RESOURCE).trim_matches('/').to_string();
    if sub_resource.is_empty() {
        return Err(Error::configmap(&owner, "the sub-resource is empty"));
    }

    let (secret_namespace, secret_name) = split_ref(value(KEY_SECRET), &service_namespace)
        .ok_or_else(|| {
            Error::configmap(
                &owner,
                format!("the secret format is wrong: {:?}", value(KEY_SECRET)),
            )
        })?;
    let secret = kube
        .get_secret(&secret_namespace, &secret_name)
        .await?
        .ok_or_else(|| {
            Error::configmap(
                &owner,
                format!("secret {}/{} not found", secret_namespace, secret_name),
            )
        })?;
    let (Some(client_cert), Some(client_key)) = (
        secret_data(&secret, "tls.crt"),
        secret_data(&secret, "tls.key"),
    ) else {
        return Err(Error::configmap(
            &owner,
            format!(
                "secret {}/{} must contain tls.crt and tls.key",
                secret_namespace, secret_name
            ),
        ));
    };

    let (ca_namespace, ca_name) = split_ref(value(KEY_CA_CONFIGMAP), &service_namespace)
        .ok_or_else(|| {
            Error::configmap(
                &owner,
                format!("the caConfigMap format is wrong: {:?}", value(KEY_CA_CONFIGMAP)),
            )
        })?;
    let ca_bundle = kube
        .get_config_map(&ca_namespace, &ca_name)
        .await?
        .and_then(|ca| ca.data.and_then(|mut d| d.remove(SERVICE_CA_KEY)))
        .ok_or_else(|| {
            Error::configmap(
                &owner,
                format!(
                    "configmap {}/{} with key {} not found",
                    ca_namespace, ca_name, SERVICE_CA_KEY
                ),
            )
        })?;

    Ok(ProxyServiceInfo {
        owner,
        sub_resource,
        service_name,
        service_namespace,
        service_port: value(KEY_PORT).to_string(),
        root_path: value(KEY_PATH).trim_matches('/').to_string(),
        use_id: value(KEY_USE_ID) == "true",
        client_cert: client_cert.to_vec(),
        client_key: client_key.to_vec(),
        ca_bundle: ca_bundle.into_bytes(),
    })
}

/// Resolve one configmap into the table
#[instrument(skip(ctx, cm), fields(configmap = %owner_of(cm)))]
pub async fn sync(ctx: &Context, cm: &ConfigMap) -> Result<Upsert> {
    let info = service_info(ctx.kube.as_ref(), cm).await?;
    let sub_resource = info.sub_resource.clone();
    let outcome = ctx.table.upsert(info);
    match &outcome {
        Upsert::Inserted => info!(sub_resource = %sub_resource, "proxy service registered"),
        Upsert::Updated => info!(sub_resource = %sub_resource, "proxy service updated"),
        Upsert::Unchanged => debug!(sub_resource = %sub_resource, "proxy service unchanged"),
        Upsert::Conflict { holder } => warn!(
            sub_resource = %sub_resource,
            holder = %holder,
            "sub-resource already claimed by another configmap, ignoring"
        ),
    }
    Ok(outcome)
}

/// Watcher state carried between events
#[derive(Default)]
pub struct WatchState {
    /// Configmaps to retry, by owner
    pub pending: BTreeMap<String, ConfigMap>,
    relist: Option<HashSet<String>>,
}

async fn apply(ctx: &Context, cm: ConfigMap, state: &mut WatchState) {
    let owner = owner_of(&cm);
    match sync(ctx, &cm).await {
        Ok(Upsert::Conflict { .. }) => {
            state.pending.insert(owner, cm);
        }
        Ok(_) => {
            state.pending.remove(&owner);
        }
        Err(e) => {
            warn!(configmap = %owner, error = %e, "proxy configmap not usable yet");
            state.pending.insert(owner, cm);
        }
    }
}

/// Apply one watch event
pub async fn handle_event(ctx: &Context, event: Event<ConfigMap>, state: &mut WatchState) {
    match event {
        Event::Init => state.relist = Some(HashSet::new()),
        Event::InitApply(cm) => {
            if let Some(live) = state.relist.as_mut() {
                live.insert(owner_of(&cm));
            }
            apply(ctx, cm, state).await;
        }
        Event::InitDone => {
            if let Some(live) = state.relist.take() {
                for sub_resource in ctx.table.retain_owners(&live) {
                    info!(sub_resource = %sub_resource, "proxy service dropped after relist");
                }
                state.pending.retain(|owner, _| live.contains(owner));
            }
        }
        Event::Apply(cm) => apply(ctx, cm, state).await,
        Event::Delete(cm) => {
            let owner = owner_of(&cm);
            state.pending.remove(&owner);
            for sub_resource in ctx.table.remove_owner(&owner) {
                info!(configmap = %owner, sub_resource = %sub_resource, "proxy service removed");
            }
        }
    }
}

/// Retry every pending configmap once
pub async fn retry_pending(ctx: &Context, state: &mut WatchState) {
    let pending: Vec<ConfigMap> = state.pending.values().cloned().collect();
    for cm in pending {
        apply(ctx, cm, state).await;
    }
}

/// Drive the routing table from configmap events until `shutdown` resolves
pub async fn run(ctx: Arc<Context>, mut events: ConfigMapEvents, shutdown: impl Future<Output = ()>) {
    let mut state = WatchState::default();
    let mut ticker = tokio::time::interval(RETRY_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            event = events.next() => match event {
                Some(Ok(event)) => handle_event(&ctx, event, &mut state).await,
                Some(Err(e)) => warn!(error = %e, "proxy configmap watch failed"),
                None => break,
            },
            _ = ticker.tick() => retry_pending(&ctx, &mut state).await,
        }
    }
    info!("proxy configmap watcher stopped");
}
