//! Controller runner - builds the agent's controller futures
//!
//! Actions and views are watched on the hub in the cluster's namespace and
//! executed against the managed cluster. The info synthesizer is keyed on
//! the cluster's own ManagedClusterInfo and re-triggered by changes on the
//! managed cluster. The claim syncer is a plain loop driven by ClusterClaim
//! events, so it keeps running while the hub is away.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client};

use foundation_common::controller::{log_reconcile_result, shutdown_signal, WATCH_TIMEOUT_SECS};
use foundation_common::crd::{ClusterClaim, ManagedClusterAction, ManagedClusterInfo, ManagedClusterView};
use foundation_common::kubecontrol::KubeControl;

use crate::clusterclaim;
use crate::clusterinfo::{self, LoggingSettings};
use crate::managed::{ManagedClusterReader, ManagedClusterReaderImpl};
use crate::{action, view};

/// A boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Everything the agent's controllers need
pub struct AgentSettings {
    /// Name of this cluster on the hub, also its namespace there
    pub cluster_name: String,
    /// Execute actions as the requesting user
    pub enable_impersonation: bool,
    /// Reflect ManagedClusterInfo labels into claims
    pub sync_labels_to_claims: bool,
    /// Log endpoint publication settings
    pub logging: LoggingSettings,
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Watch only this cluster's own ManagedClusterInfo
fn own_info_config(cluster_name: &str) -> WatcherConfig {
    watcher_config().fields(&format!("metadata.name={cluster_name}"))
}

/// Build action and view controller futures
pub fn build_work_controllers(
    hub: Client,
    control: Arc<dyn KubeControl>,
    settings: &AgentSettings,
) -> Vec<ControllerFuture> {
    let actions: Api<ManagedClusterAction> = Api::namespaced(hub.clone(), &settings.cluster_name);
    let views: Api<ManagedClusterView> = Api::namespaced(hub.clone(), &settings.cluster_name);

    let action_ctx = Arc::new(action::Context::new(
        hub.clone(),
        control.clone(),
        settings.enable_impersonation,
    ));
    let view_ctx = Arc::new(view::Context::new(hub, control));

    tracing::info!("- ManagedClusterAction controller");
    tracing::info!("- ManagedClusterView controller");

    vec![
        Box::pin(
            Controller::new(actions, watcher_config())
                .shutdown_on_signal()
                .run(action::reconcile, action::error_policy, action_ctx)
                .for_each(log_reconcile_result("ManagedClusterAction")),
        ),
        Box::pin(
            Controller::new(views, watcher_config())
                .shutdown_on_signal()
                .run(view::reconcile, view::error_policy, view_ctx)
                .for_each(log_reconcile_result("ManagedClusterView")),
        ),
    ]
}

/// Build the info synthesizer and claim syncer futures
pub fn build_cluster_controllers(
    hub: Client,
    managed: Client,
    control: Arc<dyn KubeControl>,
    settings: &AgentSettings,
) -> Vec<ControllerFuture> {
    let cluster = settings.cluster_name.clone();
    let reader: Arc<dyn ManagedClusterReader> =
        Arc::new(ManagedClusterReaderImpl::new(managed.clone(), control));
    let own_info = move || ObjectRef::<ManagedClusterInfo>::new(&cluster).within(&cluster);

    let info_ctx = Arc::new(clusterinfo::Context::new(
        hub.clone(),
        reader.clone(),
        settings.logging.clone(),
    ));
    let claim_ctx = Arc::new(clusterclaim::Context::new(
        managed.clone(),
        hub.clone(),
        &settings.cluster_name,
        reader,
        settings.sync_labels_to_claims,
    ));

    let info_for_claims = own_info.clone();
    let info_for_nodes = own_info;
    let info_ctrl = Controller::new(
        Api::<ManagedClusterInfo>::namespaced(hub.clone(), &settings.cluster_name),
        own_info_config(&settings.cluster_name),
    )
    .watches(
        Api::<ClusterClaim>::all(managed.clone()),
        watcher_config(),
        move |_claim| Some(info_for_claims()),
    )
    .watches(
        Api::<Node>::all(managed.clone()),
        watcher_config(),
        move |_node| Some(info_for_nodes()),
    )
    .shutdown_on_signal()
    .run(clusterinfo::reconcile, clusterinfo::error_policy, info_ctx)
    .for_each(log_reconcile_result("ManagedClusterInfo"));

    let claim_events = watcher::watcher(Api::<ClusterClaim>::all(managed), watcher_config())
        .default_backoff()
        .touched_objects()
        .map(|_| ());
    let claim_triggers = if settings.sync_labels_to_claims {
        let label_events = watcher::watcher(
            Api::<ManagedClusterInfo>::namespaced(hub, &settings.cluster_name),
            own_info_config(&settings.cluster_name),
        )
        .default_backoff()
        .touched_objects()
        .map(|_| ());
        futures::stream::select(claim_events, label_events).boxed()
    } else {
        claim_events.boxed()
    };
    let claim_ctrl = clusterclaim::run(claim_ctx, claim_triggers, shutdown_signal());

    tracing::info!("- ManagedClusterInfo controller");
    tracing::info!("- ClusterClaim controller");

    vec![Box::pin(info_ctrl), Box::pin(claim_ctrl)]
}
