//! ManagedClusterInfo lifecycle on the hub
//!
//! Every accepted ManagedCluster gets a ManagedClusterInfo named after it in
//! the cluster's namespace. The hub owns the info's spec and the registration
//! conditions in its status; the agent owns everything else in the status,
//! including the `ManagedClusterInfoSynced` condition, which is preserved here.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use foundation_common::controller::requeue_for;
use foundation_common::crd::{
    find_condition, ClusterInfoSpec, Condition, ManagedCluster, ManagedClusterInfo,
    CONDITION_INFO_SYNCED,
};
use foundation_common::metrics::ReconcileTimer;
use foundation_common::Error;

use crate::finalizer::{self, has_finalizer, is_deleting};
use crate::FIELD_MANAGER;

/// Finalizer guarding the info's deletion
pub const INFO_FINALIZER: &str = "managedclusterinfo.finalizers.open-cluster-management.io";

/// Hub operations for the info lifecycle
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Add the info finalizer to a ManagedCluster
    async fn add_cluster_finalizer(&self, cluster: &str) -> Result<(), Error>;

    /// Remove the info finalizer from a ManagedCluster
    async fn remove_cluster_finalizer(&self, cluster: &str) -> Result<(), Error>;

    /// Get the cluster's info
    async fn get_info(&self, cluster: &str) -> Result<Option<ManagedClusterInfo>, Error>;

    /// Create an info
    async fn create_info(&self, info: &ManagedClusterInfo) -> Result<(), Error>;

    /// Overwrite the hub-owned spec fields
    async fn patch_info_spec(&self, cluster: &str, spec: ClusterInfoSpec) -> Result<(), Error>;

    /// Overwrite the status conditions
    async fn patch_info_conditions(
        &self,
        cluster: &str,
        conditions: Vec<Condition>,
    ) -> Result<(), Error>;

    /// Delete the cluster's info; a missing info is not an error
    async fn delete_info(&self, cluster: &str) -> Result<(), Error>;
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

    fn clusters(&self) -> Api<ManagedCluster> {
        Api::all(self.client.clone())
    }

    fn infos(&self, cluster: &str) -> Api<ManagedClusterInfo> {
        Api::namespaced(self.client.clone(), cluster)
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn add_cluster_finalizer(&self, cluster: &str) -> Result<(), Error> {
        finalizer::add(&self.clusters(), cluster, INFO_FINALIZER).await
    }

    async fn remove_cluster_finalizer(&self, cluster: &str) -> Result<(), Error> {
        finalizer::remove(&self.clusters(), cluster, INFO_FINALIZER).await
    }

    async fn get_info(&self, cluster: &str) -> Result<Option<ManagedClusterInfo>, Error> {
        Ok(self.infos(cluster).get_opt(cluster).await?)
    }

    async fn create_info(&self, info: &ManagedClusterInfo) -> Result<(), Error> {
        let ns = info.namespace().unwrap_or_default();
        self.infos(&ns).create(&PostParams::default(), info).await?;
        Ok(())
    }

    async fn patch_info_spec(&self, cluster: &str, spec: ClusterInfoSpec) -> Result<(), Error> {
        // explicit nulls so cleared fields are removed by the merge
        let patch = json!({
            "spec": {
                "loggingCA": spec.logging_ca,
                "masterEndpoint": spec.master_endpoint,
            }
        });
        self.infos(cluster)
            .patch(cluster, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn patch_info_conditions(
        &self,
        cluster: &str,
        conditions: Vec<Condition>,
    ) -> Result<(), Error> {
        let patch = json!({ "status": { "conditions": conditions } });
        self.infos(cluster)
            .patch_status(cluster, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_info(&self, cluster: &str) -> Result<(), Error> {
        match self
            .infos(cluster)
            .delete(cluster, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Controller context for the info lifecycle
pub struct Context {
    /// Hub client
    pub kube: Arc<dyn KubeClient>,
    /// Base64 PEM written into every info's `spec.loggingCA`
    pub logging_ca: Option<String>,
}

impl Context {
    /// Create a context over the hub
    pub fn new(client: Client, logging_ca: Option<String>) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
            logging_ca,
        }
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, logging_ca: Option<String>) -> Self {
        Self { kube, logging_ca }
    }
}

/// Reconcile the info of one ManagedCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("clusterinfo");
    let result = sync(&cluster, &ctx).await;
    timer.finish(&result);
    result.map(|()| Action::await_change())
}

async fn sync(cluster: &ManagedCluster, ctx: &Context) -> Result<(), Error> {
    let name = cluster.name_any();

    if is_deleting(cluster) {
        if has_finalizer(cluster, INFO_FINALIZER) {
            ctx.kube.delete_info(&name).await?;
            ctx.kube.remove_cluster_finalizer(&name).await?;
            info!("cluster info deleted");
        }
        return Ok(());
    }

    if !cluster.spec.hub_accepts_client {
        debug!("cluster not accepted, skipping");
        return Ok(());
    }

    if !has_finalizer(cluster, INFO_FINALIZER) {
        ctx.kube.add_cluster_finalizer(&name).await?;
    }

    let desired_spec = ClusterInfoSpec {
        logging_ca: ctx.logging_ca.clone(),
        master_endpoint: cluster.master_endpoint().map(str::to_string),
    };

    let Some(existing) = ctx.kube.get_info(&name).await? else {
        let mut created = ManagedClusterInfo::new(&name, desired_spec);
        created.metadata.namespace = Some(name.clone());
        created.metadata.labels = Some(cluster.labels().clone());
        ctx.kube.create_info(&created).await?;
        info!("cluster info created");
        return Ok(());
    };

    if existing.spec != desired_spec {
        ctx.kube.patch_info_spec(&name, desired_spec).await?;
        debug!("cluster info spec updated");
    }

    let current = existing
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    let desired = mirrored_conditions(cluster, &current);
    if desired != current {
        ctx.kube.patch_info_conditions(&name, desired).await?;
        debug!("cluster info conditions updated");
    }
    Ok(())
}

/// The cluster's conditions followed by the agent's synced condition, if any
fn mirrored_conditions(cluster: &ManagedCluster, current: &[Condition]) -> Vec<Condition> {
    let mut conditions: Vec<Condition> = cluster
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    conditions.retain(|c| c.type_ != CONDITION_INFO_SYNCED);
    if let Some(synced) = find_condition(current, CONDITION_INFO_SYNCED) {
        conditions.push(synced.clone());
    }
    conditions
}

/// Error policy for the info lifecycle controller
pub fn error_policy(cluster: Arc<ManagedCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, cluster = %cluster.name_any(), "cluster info reconciliation failed");
    requeue_for(error)
}
