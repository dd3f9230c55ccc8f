//! Controller runner - builds the hub's controller futures
//!
//! Cluster-keyed controllers watch ManagedCluster and are re-triggered by
//! changes to the cluster's ManagedClusterInfo (or, for cluster roles, by
//! edits to the roles themselves). The clusterset projection and the
//! finalizer cleanup are plain loops stopped by the shutdown signal.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, ResourceExt};

use foundation_common::controller::{log_reconcile_result, shutdown_signal, WATCH_TIMEOUT_SECS};
use foundation_common::crd::{ManagedCluster, ManagedClusterAction, ManagedClusterInfo};

use crate::clusterrole::cluster_for_role;
use crate::{autodetect, capacity, clusterinfo, clusterrole, clusterset, gc, rbac};

/// A boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Everything the hub's controllers need beyond a client
#[derive(Clone, Debug, Default)]
pub struct HubSettings {
    /// Base64 PEM written into every info's `spec.loggingCA`
    pub logging_ca: Option<String>,
}

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn cluster_of_info(info: ManagedClusterInfo) -> Option<ObjectRef<ManagedCluster>> {
    Some(ObjectRef::new(&info.name_any()))
}

/// Build the ManagedCluster-keyed controllers
pub fn build_cluster_controllers(client: Client, settings: &HubSettings) -> Vec<ControllerFuture> {
    let clusters: Api<ManagedCluster> = Api::all(client.clone());
    let infos: Api<ManagedClusterInfo> = Api::all(client.clone());

    let info_ctx = Arc::new(clusterinfo::Context::new(
        client.clone(),
        settings.logging_ca.clone(),
    ));
    let autodetect_ctx = Arc::new(autodetect::Context::new(client.clone()));
    let capacity_ctx = Arc::new(capacity::Context::new(client.clone()));
    let role_ctx = Arc::new(clusterrole::Context::new(client.clone()));

    tracing::info!("- ManagedClusterInfo lifecycle controller");
    tracing::info!("- label auto-detect controller");
    tracing::info!("- capacity controller");
    tracing::info!("- cluster role controller");

    vec![
        Box::pin(
            Controller::new(clusters.clone(), watcher_config())
                .watches(infos.clone(), watcher_config(), cluster_of_info)
                .shutdown_on_signal()
                .run(clusterinfo::reconcile, clusterinfo::error_policy, info_ctx)
                .for_each(log_reconcile_result("ManagedClusterInfo")),
        ),
        Box::pin(
            Controller::new(clusters.clone(), watcher_config())
                .watches(infos.clone(), watcher_config(), cluster_of_info)
                .shutdown_on_signal()
                .run(autodetect::reconcile, autodetect::error_policy, autodetect_ctx)
                .for_each(log_reconcile_result("AutoDetect")),
        ),
        Box::pin(
            Controller::new(clusters.clone(), watcher_config())
                .watches(infos, watcher_config(), cluster_of_info)
                .shutdown_on_signal()
                .run(capacity::reconcile, capacity::error_policy, capacity_ctx)
                .for_each(log_reconcile_result("Capacity")),
        ),
        Box::pin(
            Controller::new(clusters, watcher_config())
                .watches(
                    Api::<ClusterRole>::all(client),
                    watcher_config(),
                    |role: ClusterRole| {
                        cluster_for_role(&role.name_any()).map(ObjectRef::<ManagedCluster>::new)
                    },
                )
                .shutdown_on_signal()
                .run(clusterrole::reconcile, clusterrole::error_policy, role_ctx)
                .for_each(log_reconcile_result("ClusterRole")),
        ),
    ]
}

/// Build the agent RBAC and action garbage collection controllers
pub fn build_namespace_controllers(client: Client) -> Vec<ControllerFuture> {
    let rbac_ctx = Arc::new(rbac::Context::new(client.clone()));
    let gc_ctx = Arc::new(gc::Context::new(client.clone()));

    tracing::info!("- agent RBAC controller");
    tracing::info!("- action garbage collector");

    vec![
        Box::pin(
            Controller::new(Api::<ManagedClusterInfo>::all(client.clone()), watcher_config())
                .shutdown_on_signal()
                .run(rbac::reconcile, rbac::error_policy, rbac_ctx)
                .for_each(log_reconcile_result("ClusterRBAC")),
        ),
        Box::pin(
            Controller::new(Api::<ManagedClusterAction>::all(client), watcher_config())
                .shutdown_on_signal()
                .run(gc::reconcile, gc::error_policy, gc_ctx)
                .for_each(log_reconcile_result("ActionGC")),
        ),
    ]
}

/// Build the clusterset projection and finalizer cleanup loops
pub fn build_background_tasks(client: Client) -> Vec<ControllerFuture> {
    let bindings = watcher::watcher(Api::<ClusterRoleBinding>::all(client.clone()), watcher_config())
        .default_backoff()
        .touched_objects()
        .map(|_| ());
    let clusters = watcher::watcher(Api::<ManagedCluster>::all(client.clone()), watcher_config())
        .default_backoff()
        .touched_objects()
        .map(|_| ());
    let triggers = futures::stream::select(bindings, clusters).boxed();

    let clusterset_ctx = Arc::new(clusterset::Context::new(client.clone()));
    let cleanup_ctx = Arc::new(gc::Context::new(client));

    tracing::info!("- clusterset binding projection");
    tracing::info!("- stale finalizer cleanup");

    vec![
        Box::pin(clusterset::run(clusterset_ctx, triggers, shutdown_signal())),
        Box::pin(gc::run_finalizer_cleanup(cleanup_ctx, shutdown_signal())),
    ]
}
