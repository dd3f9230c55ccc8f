//! Worker capacity summary on ManagedCluster status
//!
//! Writes `core_worker` and `socket_worker` into the cluster's capacity. On
//! OpenShift both are summed over worker nodes from the info's node list;
//! elsewhere the core count is the cluster's cpu capacity and sockets are
//! not known.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, error, instrument};

#[cfg(test)]
use mockall::automock;

use foundation_common::controller::requeue_for;
use foundation_common::crd::{ManagedCluster, ManagedClusterInfo, DISTRIBUTION_TYPE_OCP};
use foundation_common::metrics::ReconcileTimer;
use foundation_common::Error;

use crate::finalizer::is_deleting;
use crate::quantity;
use crate::FIELD_MANAGER;

/// Capacity key for worker cores
pub const RESOURCE_CORE_WORKER: &str = "core_worker";
/// Capacity key for worker sockets
pub const RESOURCE_SOCKET_WORKER: &str = "socket_worker";

const RESOURCE_CPU: &str = "cpu";
const RESOURCE_SOCKET: &str = "socket";

/// Hub operations for the capacity summary
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get the cluster's info
    async fn get_info(&self, cluster: &str) -> Result<Option<ManagedClusterInfo>, Error>;

    /// Replace `status.capacity` of a ManagedCluster
    async fn patch_capacity(
        &self,
        cluster: &str,
        capacity: BTreeMap<String, String>,
    ) -> Result<(), Error>;
}

/// Hub client backed by kube-rs
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_info(&self, cluster: &str) -> Result<Option<ManagedClusterInfo>, Error> {
        let api: Api<ManagedClusterInfo> = Api::namespaced(self.client.clone(), cluster);
        Ok(api.get_opt(cluster).await?)
    }

    async fn patch_capacity(
        &self,
        cluster: &str,
        capacity: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        let patch = json!({ "status": { "capacity": capacity } });
        api.patch_status(cluster, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Controller context for the capacity summary
pub struct Context {
    /// Hub client
    pub kube: Arc<dyn KubeClient>,
}

impl Context {
    /// Create a context over the hub
    pub fn new(client: Client) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
        }
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

/// Reconcile worker capacity for one ManagedCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("capacity");
    let result = sync(&cluster, &ctx).await;
    timer.finish(&result);
    result.map(|()| Action::await_change())
}

async fn sync(cluster: &ManagedCluster, ctx: &Context) -> Result<(), Error> {
    if is_deleting(cluster) || !cluster.is_available() {
        return Ok(());
    }
    let name = cluster.name_any();
    let Some(info) = ctx.kube.get_info(&name).await? else {
        return Ok(());
    };

    let current = cluster
        .status
        .as_ref()
        .map(|s| s.capacity.clone())
        .unwrap_or_default();
    let desired = worker_capacity(&current, &info)?;
    if desired != current {
        ctx.kube.patch_capacity(&name, desired).await?;
        debug!("worker capacity updated");
    }
    Ok(())
}

/// `current` with the worker core and socket counts filled in
pub fn worker_capacity(
    current: &BTreeMap<String, String>,
    info: &ManagedClusterInfo,
) -> Result<BTreeMap<String, String>, Error> {
    let status = info.status.clone().unwrap_or_default();
    let is_ocp = status
        .distribution_info
        .as_ref()
        .is_some_and(|d| d.type_ == DISTRIBUTION_TYPE_OCP);

    let (cores, sockets) = if is_ocp {
        let workers: Vec<_> = status.node_list.iter().filter(|n| n.is_worker()).collect();
        let cores = quantity::sum(workers.iter().filter_map(|n| {
            n.capacity.get(RESOURCE_CPU).map(String::as_str)
        }))?;
        let sockets = quantity::sum(workers.iter().filter_map(|n| {
            n.capacity.get(RESOURCE_SOCKET).map(String::as_str)
        }))?;
        (cores, sockets)
    } else {
        let cores = current
            .get(RESOURCE_CPU)
            .cloned()
            .unwrap_or_else(|| "0".to_string());
        (cores, "0".to_string())
    };

    let mut capacity = current.clone();
    capacity.insert(RESOURCE_CORE_WORKER.to_string(), cores);
    capacity.insert(RESOURCE_SOCKET_WORKER.to_string(), sockets);
    Ok(capacity)
}

/// Error policy for the capacity summary
pub fn error_policy(cluster: Arc<ManagedCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, cluster = %cluster.name_any(), "capacity update failed");
    requeue_for(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundation_common::crd::{
        ClusterInfoSpec, ClusterInfoStatus, Condition, ConditionStatus, DistributionInfo,
        ManagedClusterSpec, ManagedClusterStatus, NodeStatus, CONDITION_CLUSTER_AVAILABLE,
        LABEL_NODE_ROLE_MASTER, LABEL_NODE_ROLE_WORKER,
    };
    use std::sync::Mutex;

    fn node(role: &str, cpu: &str, sockets: &str) -> NodeStatus {
        NodeStatus {
            name: format!("{role}-{cpu}"),
            labels: BTreeMap::from([(role.to_string(), String::new())]),
            capacity: BTreeMap::from([
                ("cpu".to_string(), cpu.to_string()),
                ("socket".to_string(), sockets.to_string()),
            ]),
            ..Default::default()
        }
    }

    fn info(distribution: &str, nodes: Vec<NodeStatus>) -> ManagedClusterInfo {
        let mut info = ManagedClusterInfo::new("c1", ClusterInfoSpec::default());
        info.status = Some(ClusterInfoStatus {
            distribution_info: Some(DistributionInfo {
                type_: distribution.to_string(),
                ocp: None,
            }),
            node_list: nodes,
            ..Default::default()
        });
        info
    }

    fn available_cluster(cpu: &str) -> ManagedCluster {
        let mut cluster = ManagedCluster::new("c1", ManagedClusterSpec::default());
        cluster.status = Some(ManagedClusterStatus {
            conditions: vec![Condition::new(
                CONDITION_CLUSTER_AVAILABLE,
                ConditionStatus::True,
                "",
                "",
            )],
            capacity: BTreeMap::from([("cpu".to_string(), cpu.to_string())]),
            ..Default::default()
        });
        cluster
    }

    #[test]
    fn ocp_sums_worker_nodes_only() {
        let info = info(
            DISTRIBUTION_TYPE_OCP,
            vec![
                node(LABEL_NODE_ROLE_WORKER, "4", "1"),
                node(LABEL_NODE_ROLE_WORKER, "3500m", "1"),
                node(LABEL_NODE_ROLE_MASTER, "8", "2"),
            ],
        );
        let capacity = worker_capacity(&BTreeMap::new(), &info).expect("capacity");
        assert_eq!(capacity[RESOURCE_CORE_WORKER], "7500m");
        assert_eq!(capacity[RESOURCE_SOCKET_WORKER], "2");
    }

    #[test]
    fn other_distributions_use_cluster_cpu() {
        let current = BTreeMap::from([
            ("cpu".to_string(), "24".to_string()),
            ("memory".to_string(), "64Gi".to_string()),
        ]);
        let capacity =
            worker_capacity(&current, &info("Unknown", vec![node(LABEL_NODE_ROLE_WORKER, "4", "1")]))
                .expect("capacity");
        assert_eq!(capacity[RESOURCE_CORE_WORKER], "24");
        assert_eq!(capacity[RESOURCE_SOCKET_WORKER], "0");
        assert_eq!(capacity["memory"], "64Gi");
    }

    /// Story: an available cluster gets its worker capacity written once
    #[tokio::test]
    async fn writes_on_change_only() {
        let cluster = available_cluster("16");
        let written = Arc::new(Mutex::new(Vec::new()));

        let mut kube = MockKubeClient::new();
        kube.expect_get_info()
            .returning(|_| Ok(Some(info("Unknown", Vec::new()))));
        let sink = written.clone();
        kube.expect_patch_capacity().returning(move |_, capacity| {
            sink.lock().expect("lock").push(capacity);
            Ok(())
        });

        let ctx = Arc::new(Context::for_testing(Arc::new(kube)));
        reconcile(Arc::new(cluster), ctx.clone()).await.expect("reconcile");
        let capacity = written.lock().expect("lock")[0].clone();
        assert_eq!(capacity[RESOURCE_CORE_WORKER], "16");

        let mut settled = available_cluster("16");
        if let Some(status) = settled.status.as_mut() {
            status.capacity = capacity;
        }
        reconcile(Arc::new(settled), ctx).await.expect("reconcile");
        assert_eq!(written.lock().expect("lock").len(), 1);
    }

    /// Story: unavailable clusters keep whatever capacity they had
    #[tokio::test]
    async fn skips_unavailable_cluster() {
        let cluster = ManagedCluster::new("c1", ManagedClusterSpec::default());
        let mut kube = MockKubeClient::new();
        kube.expect_get_info().never();
        kube.expect_patch_capacity().never();

        let ctx = Arc::new(Context::for_testing(Arc::new(kube)));
        reconcile(Arc::new(cluster), ctx).await.expect("reconcile");
    }
}
