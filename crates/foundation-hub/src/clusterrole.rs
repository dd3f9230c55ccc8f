//! Per-cluster ClusterRoles
//!
//! Two ClusterRoles per ManagedCluster gate access to the cluster object
//! itself: `open-cluster-management:admin:managed-cluster-{c}` and
//! `open-cluster-management:view:managed-cluster-{c}`. Clusterset bindings
//! project subjects onto them.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule};
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use foundation_common::controller::requeue_for;
use foundation_common::crd::ManagedCluster;
use foundation_common::metrics::ReconcileTimer;
use foundation_common::Error;

use crate::finalizer::{self, has_finalizer, is_deleting};

/// Finalizer guarding the per-cluster ClusterRoles
pub const CLUSTER_ROLE_FINALIZER: &str = "open-cluster-management.io/managedclusterrole";

const CLUSTER_GROUP: &str = "cluster.open-cluster-management.io";
const ROLE_PREFIX: &str = "open-cluster-management";
const CLUSTER_PREFIX: &str = "managed-cluster-";

/// Access level granted by a per-cluster ClusterRole
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessRole {
    /// Full control of the cluster object, including accepting it
    Admin,
    /// Read-only access to the cluster object
    View,
}

impl AccessRole {
    /// Both roles
    pub const ALL: [AccessRole; 2] = [AccessRole::Admin, AccessRole::View];

    /// Name segment used in role and binding names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::View => "view",
        }
    }

    /// Parse a name segment
    pub fn from_segment(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "view" => Some(Self::View),
            _ => None,
        }
    }
}

/// Name of the per-cluster ClusterRole
pub fn cluster_role_name(cluster: &str, role: AccessRole) -> String {
    format!("{ROLE_PREFIX}:{}:{CLUSTER_PREFIX}{cluster}", role.as_str())
}

/// Cluster owning a per-cluster ClusterRole, if the name is one
pub fn cluster_for_role(name: &str) -> Option<&str> {
    let mut parts = name.split(':');
    let (Some(prefix), Some(role), Some(tail), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    if prefix != ROLE_PREFIX || AccessRole::from_segment(role).is_none() {
        return None;
    }
    tail.strip_prefix(CLUSTER_PREFIX).filter(|c| !c.is_empty())
}

fn rule(resources: &[&str], verbs: &[&str], cluster: &str) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![CLUSTER_GROUP.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        resource_names: Some(vec![cluster.to_string()]),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// Desired ClusterRole for a cluster and access level
pub fn desired_cluster_role(cluster: &str, role: AccessRole) -> ClusterRole {
    let rules = match role {
        AccessRole::Admin => vec![
            rule(&["managedclusters"], &["*"], cluster),
            rule(&["managedclusters/accept"], &["update"], cluster),
        ],
        AccessRole::View => vec![rule(&["managedclusters"], &["get", "list", "watch"], cluster)],
    };
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(cluster_role_name(cluster, role)),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

/// Hub operations for per-cluster ClusterRoles
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Add the ClusterRole finalizer to a ManagedCluster
    async fn add_cluster_finalizer(&self, cluster: &str) -> Result<(), Error>;

    /// Remove the ClusterRole finalizer from a ManagedCluster
    async fn remove_cluster_finalizer(&self, cluster: &str) -> Result<(), Error>;

    /// Get a ClusterRole by name
    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, Error>;

    /// Create a ClusterRole
    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), Error>;

    /// Replace a ClusterRole
    async fn replace_cluster_role(&self, role: &ClusterRole) -> Result<(), Error>;

    /// Delete a ClusterRole by name; missing is fine
    async fn delete_cluster_role(&self, name: &str) -> Result<(), Error>;
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

    fn roles(&self) -> Api<ClusterRole> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn add_cluster_finalizer(&self, cluster: &str) -> Result<(), Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        finalizer::add(&api, cluster, CLUSTER_ROLE_FINALIZER).await
    }

    async fn remove_cluster_finalizer(&self, cluster: &str) -> Result<(), Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        finalizer::remove(&api, cluster, CLUSTER_ROLE_FINALIZER).await
    }

    async fn get_cluster_role(&self, name: &str) -> Result<Option<ClusterRole>, Error> {
        Ok(self.roles().get_opt(name).await?)
    }

    async fn create_cluster_role(&self, role: &ClusterRole) -> Result<(), Error> {
        self.roles().create(&PostParams::default(), role).await?;
        Ok(())
    }

    async fn replace_cluster_role(&self, role: &ClusterRole) -> Result<(), Error> {
        self.roles()
            .replace(&role.name_any(), &PostParams::default(), role)
            .await?;
        Ok(())
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<(), Error> {
        match self.roles().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Controller context for per-cluster ClusterRoles
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

/// Reconcile the ClusterRoles of one ManagedCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("clusterrole");
    let result = sync(&cluster, &ctx).await;
    timer.finish(&result);
    result.map(|()| Action::await_change())
}

async fn sync(cluster: &ManagedCluster, ctx: &Context) -> Result<(), Error> {
    let name = cluster.name_any();

    if is_deleting(cluster) {
        if has_finalizer(cluster, CLUSTER_ROLE_FINALIZER) {
            for role in AccessRole::ALL {
                ctx.kube
                    .delete_cluster_role(&cluster_role_name(&name, role))
                    .await?;
            }
            ctx.kube.remove_cluster_finalizer(&name).await?;
            info!("cluster roles deleted");
        }
        return Ok(());
    }

    if !has_finalizer(cluster, CLUSTER_ROLE_FINALIZER) {
        ctx.kube.add_cluster_finalizer(&name).await?;
    }

    for role in AccessRole::ALL {
        apply(ctx.kube.as_ref(), desired_cluster_role(&name, role)).await?;
    }
    Ok(())
}

/// Get, then create or update on rule drift
pub async fn apply(kube: &dyn KubeClient, desired: ClusterRole) -> Result<(), Error> {
    let name = desired.name_any();
    match kube.get_cluster_role(&name).await? {
        None => {
            kube.create_cluster_role(&desired).await?;
            info!(role = %name, "cluster role created");
        }
        Some(mut existing) if existing.rules != desired.rules => {
            existing.rules = desired.rules;
            kube.replace_cluster_role(&existing).await?;
            info!(role = %name, "cluster role rules updated");
        }
        Some(_) => debug!(role = %name, "cluster role up to date"),
    }
    Ok(())
}

/// Error policy for per-cluster ClusterRoles
pub fn error_policy(cluster: Arc<ManagedCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, cluster = %cluster.name_any(), "cluster role reconciliation failed");
    requeue_for(error)
}
