//! Agent RBAC in each cluster namespace
//!
//! The agent authenticates to the hub as a member of
//! `system:open-cluster-management:{cluster}`. A Role and RoleBinding named
//! `{cluster}:managed-cluster-foundation` grant that group exactly what the
//! agent needs in its own namespace. Both are keyed on the cluster's
//! ManagedClusterInfo, whose finalizer guarantees cleanup.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use foundation_common::controller::requeue_for;
use foundation_common::crd::ManagedClusterInfo;
use foundation_common::metrics::ReconcileTimer;
use foundation_common::Error;

use crate::finalizer::{self, has_finalizer, is_deleting};

/// Finalizer guarding the Role and RoleBinding
pub const RBAC_FINALIZER: &str = "managedclusterrbac.finalizers.open-cluster-management.io";

const SUBJECT_PREFIX: &str = "system:open-cluster-management:";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Name of both the Role and the RoleBinding
pub fn role_name(cluster: &str) -> String {
    format!("{cluster}:managed-cluster-foundation")
}

/// Hub operations for agent RBAC
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Add the RBAC finalizer to the cluster's info
    async fn add_info_finalizer(&self, cluster: &str) -> Result<(), Error>;

    /// Remove the RBAC finalizer from the cluster's info
    async fn remove_info_finalizer(&self, cluster: &str) -> Result<(), Error>;

    /// Get the agent Role
    async fn get_role(&self, cluster: &str) -> Result<Option<Role>, Error>;

    /// Create the agent Role
    async fn create_role(&self, role: &Role) -> Result<(), Error>;

    /// Replace the agent Role
    async fn replace_role(&self, role: &Role) -> Result<(), Error>;

    /// Get the agent RoleBinding
    async fn get_role_binding(&self, cluster: &str) -> Result<Option<RoleBinding>, Error>;

    /// Create the agent RoleBinding
    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), Error>;

    /// Replace the agent RoleBinding
    async fn replace_role_binding(&self, binding: &RoleBinding) -> Result<(), Error>;

    /// Delete the agent RoleBinding; missing is fine
    async fn delete_role_binding(&self, cluster: &str) -> Result<(), Error>;

    /// Delete the agent Role; missing is fine
    async fn delete_role(&self, cluster: &str) -> Result<(), Error>;
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

    fn roles(&self, cluster: &str) -> Api<Role> {
        Api::namespaced(self.client.clone(), cluster)
    }

    fn bindings(&self, cluster: &str) -> Api<RoleBinding> {
        Api::namespaced(self.client.clone(), cluster)
    }
}

fn ignore_not_found<T>(result: Result<T, kube::Error>) -> Result<(), Error> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn add_info_finalizer(&self, cluster: &str) -> Result<(), Error> {
        let api: Api<ManagedClusterInfo> = Api::namespaced(self.client.clone(), cluster);
        finalizer::add(&api, cluster, RBAC_FINALIZER).await
    }

    async fn remove_info_finalizer(&self, cluster: &str) -> Result<(), Error> {
        let api: Api<ManagedClusterInfo> = Api::namespaced(self.client.clone(), cluster);
        finalizer::remove(&api, cluster, RBAC_FINALIZER).await
    }

    async fn get_role(&self, cluster: &str) -> Result<Option<Role>, Error> {
        Ok(self.roles(cluster).get_opt(&role_name(cluster)).await?)
    }

    async fn create_role(&self, role: &Role) -> Result<(), Error> {
        let ns = role.namespace().unwrap_or_default();
        self.roles(&ns).create(&PostParams::default(), role).await?;
        Ok(())
    }

    async fn replace_role(&self, role: &Role) -> Result<(), Error> {
        let ns = role.namespace().unwrap_or_default();
        self.roles(&ns)
            .replace(&role.name_any(), &PostParams::default(), role)
            .await?;
        Ok(())
    }

    async fn get_role_binding(&self, cluster: &str) -> Result<Option<RoleBinding>, Error> {
        Ok(self.bindings(cluster).get_opt(&role_name(cluster)).await?)
    }

    async fn create_role_binding(&self, binding: &RoleBinding) -> Result<(), Error> {
        let ns = binding.namespace().unwrap_or_default();
        self.bindings(&ns)
            .create(&PostParams::default(), binding)
            .await?;
        Ok(())
    }

    async fn replace_role_binding(&self, binding: &RoleBinding) -> Result<(), Error> {
        let ns = binding.namespace().unwrap_or_default();
        self.bindings(&ns)
            .replace(&binding.name_any(), &PostParams::default(), binding)
            .await?;
        Ok(())
    }

    async fn delete_role_binding(&self, cluster: &str) -> Result<(), Error> {
        ignore_not_found(
            self.bindings(cluster)
                .delete(&role_name(cluster), &DeleteParams::default())
                .await,
        )
    }

    async fn delete_role(&self, cluster: &str) -> Result<(), Error> {
        ignore_not_found(
            self.roles(cluster)
                .delete(&role_name(cluster), &DeleteParams::default())
                .await,
        )
    }
}

/// Controller context for agent RBAC
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

fn rule(group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![group.to_string()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// The closed rule set the agent needs in its namespace
pub fn agent_rules() -> Vec<PolicyRule> {
    const READ: &[&str] = &["get", "list", "watch"];
    const STATUS: &[&str] = &["update", "patch"];
    vec![
        rule(
            "proxy.open-cluster-management.io",
            &["clusterstatuses/aggregator"],
            &["create", "get"],
        ),
        rule("internal.open-cluster-management.io", &["managedclusterinfos"], READ),
        rule(
            "internal.open-cluster-management.io",
            &["managedclusterinfos/status"],
            STATUS,
        ),
        rule("action.open-cluster-management.io", &["managedclusteractions"], READ),
        rule(
            "action.open-cluster-management.io",
            &["managedclusteractions/status"],
            STATUS,
        ),
        rule("view.open-cluster-management.io", &["managedclusterviews"], READ),
        rule(
            "view.open-cluster-management.io",
            &["managedclusterviews/status"],
            STATUS,
        ),
        rule("", &["events"], &["create", "update", "patch"]),
        rule(
            "",
            &["secrets"],
            &["get", "list", "watch", "create", "update", "delete"],
        ),
    ]
}

/// Desired agent Role
pub fn desired_role(cluster: &str) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(role_name(cluster)),
            namespace: Some(cluster.to_string()),
            ..Default::default()
        },
        rules: Some(agent_rules()),
    }
}

/// Desired agent RoleBinding
pub fn desired_role_binding(cluster: &str) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(role_name(cluster)),
            namespace: Some(cluster.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "Role".to_string(),
            name: role_name(cluster),
        },
        subjects: Some(vec![Subject {
            api_group: Some(RBAC_GROUP.to_string()),
            kind: "Group".to_string(),
            name: format!("{SUBJECT_PREFIX}{cluster}"),
            namespace: None,
        }]),
    }
}

/// Reconcile agent RBAC for the cluster owning this info
#[instrument(skip(info, ctx), fields(cluster = %info.name_any()))]
pub async fn reconcile(info: Arc<ManagedClusterInfo>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("clusterrbac");
    let result = sync(&info, &ctx).await;
    timer.finish(&result);
    result.map(|()| Action::await_change())
}

async fn sync(info: &ManagedClusterInfo, ctx: &Context) -> Result<(), Error> {
    let cluster = info.name_any();

    if is_deleting(info) {
        if has_finalizer(info, RBAC_FINALIZER) {
            ctx.kube.delete_role_binding(&cluster).await?;
            ctx.kube.delete_role(&cluster).await?;
            ctx.kube.remove_info_finalizer(&cluster).await?;
            info!("agent rbac removed");
        }
        return Ok(());
    }

    if !has_finalizer(info, RBAC_FINALIZER) {
        ctx.kube.add_info_finalizer(&cluster).await?;
    }

    apply_role(ctx.kube.as_ref(), &cluster).await?;
    apply_role_binding(ctx.kube.as_ref(), &cluster).await
}

async fn apply_role(kube: &dyn KubeClient, cluster: &str) -> Result<(), Error> {
    let desired = desired_role(cluster);
    match kube.get_role(cluster).await? {
        None => {
            kube.create_role(&desired).await?;
            info!(role = %role_name(cluster), "agent role created");
        }
        Some(mut existing) if existing.rules != desired.rules => {
            existing.rules = desired.rules;
            kube.replace_role(&existing).await?;
            info!(role = %role_name(cluster), "agent role rules updated");
        }
        Some(_) => debug!("agent role up to date"),
    }
    Ok(())
}

async fn apply_role_binding(kube: &dyn KubeClient, cluster: &str) -> Result<(), Error> {
    let desired = desired_role_binding(cluster);
    match kube.get_role_binding(cluster).await? {
        None => {
            kube.create_role_binding(&desired).await?;
            info!(binding = %role_name(cluster), "agent rolebinding created");
        }
        Some(mut existing)
            if existing.role_ref != desired.role_ref || existing.subjects != desired.subjects =>
        {
            existing.role_ref = desired.role_ref;
            existing.subjects = desired.subjects;
            kube.replace_role_binding(&existing).await?;
            info!(binding = %role_name(cluster), "agent rolebinding updated");
        }
        Some(_) => debug!("agent rolebinding up to date"),
    }
    Ok(())
}

/// Error policy for agent RBAC
pub fn error_policy(info: Arc<ManagedClusterInfo>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, cluster = %info.name_any(), "agent rbac reconciliation failed");
    requeue_for(error)
}
