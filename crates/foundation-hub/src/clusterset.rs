//! Clusterset binding projection
//!
//! Users are granted access to a clusterset by binding them to
//! `open-cluster-management:managedclusterset:{admin|view}:{set}`. This module
//! projects those grants onto the clusters in the set: each cluster gets one
//! ClusterRoleBinding per access level, bound to its per-cluster ClusterRole
//! and carrying the union of the subjects granted on its set. A binding on
//! set `*` applies to every cluster that belongs to a set.
//!
//! Projection is a full recomputation, run on any ClusterRoleBinding or
//! ManagedCluster change and on a fixed resync period.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use foundation_common::crd::{ManagedCluster, CLUSTERSET_LABEL};
use foundation_common::metrics::ReconcileTimer;
use foundation_common::Error;

use crate::clusterrole::{cluster_role_name, AccessRole};

/// Resync period of the projection
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Set name granting access to every clustered set
pub const ALL_SETS: &str = "*";

const SET_ROLE_PREFIX: &str = "open-cluster-management:managedclusterset:";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";
const TRIGGER_BATCH: usize = 256;

/// Name of the projected binding for a cluster and access level
pub fn projected_binding_name(cluster: &str, role: AccessRole) -> String {
    format!("{SET_ROLE_PREFIX}{}:managedcluster:{cluster}", role.as_str())
}

/// Access level and cluster of a projected binding name
fn parse_projected_binding(name: &str) -> Option<(AccessRole, &str)> {
    let rest = name.strip_prefix(SET_ROLE_PREFIX)?;
    let (role, rest) = rest.split_once(':')?;
    let cluster = rest.strip_prefix("managedcluster:")?;
    if cluster.is_empty() || cluster.contains(':') {
        return None;
    }
    Some((AccessRole::from_segment(role)?, cluster))
}

/// Access level and set named by a clusterset ClusterRole
fn parse_set_role(name: &str) -> Option<(AccessRole, &str)> {
    let rest = name.strip_prefix(SET_ROLE_PREFIX)?;
    let (role, set) = rest.split_once(':')?;
    if set.is_empty() || set.contains(':') {
        return None;
    }
    Some((AccessRole::from_segment(role)?, set))
}

/// Hub operations for the projection
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// List all ManagedClusters
    async fn list_clusters(&self) -> Result<Vec<ManagedCluster>, Error>;

    /// List ClusterRoleBindings; an empty selector lists all
    async fn list_bindings(&self, selector: &str) -> Result<Vec<ClusterRoleBinding>, Error>;

    /// Get a ClusterRoleBinding by name
    async fn get_binding(&self, name: &str) -> Result<Option<ClusterRoleBinding>, Error>;

    /// Create a ClusterRoleBinding
    async fn create_binding(&self, binding: &ClusterRoleBinding) -> Result<(), Error>;

    /// Replace a ClusterRoleBinding
    async fn replace_binding(&self, binding: &ClusterRoleBinding) -> Result<(), Error>;

    /// Delete a ClusterRoleBinding; missing is fine
    async fn delete_binding(&self, name: &str) -> Result<(), Error>;
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

    fn bindings(&self) -> Api<ClusterRoleBinding> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn list_clusters(&self) -> Result<Vec<ManagedCluster>, Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_bindings(&self, selector: &str) -> Result<Vec<ClusterRoleBinding>, Error> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        Ok(self.bindings().list(&params).await?.items)
    }

    async fn get_binding(&self, name: &str) -> Result<Option<ClusterRoleBinding>, Error> {
        Ok(self.bindings().get_opt(name).await?)
    }

    async fn create_binding(&self, binding: &ClusterRoleBinding) -> Result<(), Error> {
        self.bindings().create(&PostParams::default(), binding).await?;
        Ok(())
    }

    async fn replace_binding(&self, binding: &ClusterRoleBinding) -> Result<(), Error> {
        self.bindings()
            .replace(&binding.name_any(), &PostParams::default(), binding)
            .await?;
        Ok(())
    }

    async fn delete_binding(&self, name: &str) -> Result<(), Error> {
        match self.bindings().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Context for the projection loop
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

/// Subjects per cluster, per access level
pub type Projection = BTreeMap<(AccessRole, String), Vec<Subject>>;

/// Compute the per-cluster subjects from clusters and clusterset grants
pub fn project(clusters: &[ManagedCluster], bindings: &[ClusterRoleBinding]) -> Projection {
    let mut set_members: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for cluster in clusters {
        if let Some(set) = cluster.labels().get(CLUSTERSET_LABEL) {
            if let Some(name) = cluster.metadata.name.as_deref() {
                set_members.entry(set.as_str()).or_default().insert(name);
            }
        }
    }
    let clustered: BTreeSet<&str> = set_members.values().flatten().copied().collect();

    let mut projection = Projection::new();
    for binding in bindings {
        if binding.role_ref.kind != "ClusterRole" {
            continue;
        }
        let Some((role, set)) = parse_set_role(&binding.role_ref.name) else {
            continue;
        };
        let members = if set == ALL_SETS {
            Some(&clustered)
        } else {
            set_members.get(set)
        };
        let (Some(members), Some(subjects)) = (members, binding.subjects.as_ref()) else {
            continue;
        };
        for cluster in members {
            let entry = projection.entry((role, cluster.to_string())).or_default();
            for subject in subjects {
                if !entry.contains(subject) {
                    entry.push(subject.clone());
                }
            }
        }
    }
    projection.retain(|_, subjects| !subjects.is_empty());
    projection
}

/// Desired projected binding
pub fn desired_binding(cluster: &str, role: AccessRole, subjects: Vec<Subject>) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(projected_binding_name(cluster, role)),
            labels: Some(BTreeMap::from([(
                CLUSTERSET_LABEL.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role_name(cluster, role),
        },
        subjects: Some(subjects),
    }
}

/// Recompute and apply the projection once
pub async fn sync(ctx: &Context) -> Result<(), Error> {
    let clusters = ctx.kube.list_clusters().await?;
    let bindings = ctx.kube.list_bindings("").await?;
    let projection = project(&clusters, &bindings);

    let mut errors = Vec::new();
    for ((role, cluster), subjects) in &projection {
        let desired = desired_binding(cluster, *role, subjects.clone());
        if let Err(e) = apply(ctx.kube.as_ref(), desired).await {
            errors.push(e.to_string());
        }
    }

    let wanted: HashSet<String> = projection
        .keys()
        .map(|(role, cluster)| projected_binding_name(cluster, *role))
        .collect();
    let selector = format!("{CLUSTERSET_LABEL}=true");
    for existing in ctx.kube.list_bindings(&selector).await? {
        let name = existing.name_any();
        if parse_projected_binding(&name).is_none() || wanted.contains(&name) {
            continue;
        }
        match ctx.kube.delete_binding(&name).await {
            Ok(()) => info!(binding = %name, "stale clusterset binding deleted"),
            Err(e) => errors.push(e.to_string()),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::internal(errors.join("\n")))
    }
}

async fn apply(kube: &dyn KubeClient, desired: ClusterRoleBinding) -> Result<(), Error> {
    let name = desired.name_any();
    match kube.get_binding(&name).await? {
        None => {
            kube.create_binding(&desired).await?;
            info!(binding = %name, "clusterset binding created");
        }
        Some(mut existing)
            if existing.role_ref != desired.role_ref
                || existing.subjects != desired.subjects
                || existing.labels() != desired.labels() =>
        {
            existing.role_ref = desired.role_ref;
            existing.subjects = desired.subjects;
            existing.metadata.labels = desired.metadata.labels;
            kube.replace_binding(&existing).await?;
            debug!(binding = %name, "clusterset binding updated");
        }
        Some(_) => {}
    }
    Ok(())
}

/// Run the projection on every trigger and every resync period until
/// `shutdown` resolves or the triggers end
pub async fn run(
    ctx: Arc<Context>,
    triggers: BoxStream<'static, ()>,
    shutdown: impl Future<Output = ()>,
) {
    let mut triggers = triggers.ready_chunks(TRIGGER_BATCH);
    let mut ticker = tokio::time::interval(RESYNC_INTERVAL);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
            batch = triggers.next() => {
                if batch.is_none() {
                    warn!("clusterset trigger streams ended");
                    break;
                }
            }
        }
        let timer = ReconcileTimer::start("clusterset");
        let result = sync(&ctx).await;
        timer.finish(&result);
        if let Err(error) = result {
            warn!(%error, "clusterset projection incomplete, will retry");
        }
    }
    info!("clusterset projection stopped");
}
