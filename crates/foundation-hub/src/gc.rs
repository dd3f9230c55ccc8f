//! Garbage collection of finished actions
//!
//! A completed ManagedClusterAction is kept for a minute so callers can read
//! its result, then deleted. Actions that never complete are revisited on
//! the same period.
//!
//! Also hosts the one-shot cleanup of a finalizer that older hubs put on
//! ClusterRoles and no longer remove.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::rbac::v1::ClusterRole;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use foundation_common::controller::requeue_for;
use foundation_common::crd::ManagedClusterAction;
use foundation_common::metrics::ReconcileTimer;
use foundation_common::Error;

use crate::FIELD_MANAGER;

/// How long a completed action is retained
pub const RETENTION: Duration = Duration::from_secs(60);

/// Stale finalizer removed from ClusterRoles
pub const STALE_CLUSTERSET_FINALIZER: &str = "open-cluster-management.io/clusterset";

/// Poll period of the finalizer cleanup
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Hub operations for garbage collection
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Delete an action; missing is fine
    async fn delete_action(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// List every ClusterRole
    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>, Error>;

    /// Overwrite a ClusterRole's finalizers
    async fn set_cluster_role_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
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
    async fn delete_action(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<ManagedClusterAction> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>, Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn set_cluster_role_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Context for garbage collection
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

/// What to do with an action right now
#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Look again after the duration
    Wait(Duration),
    /// Retention has elapsed
    Delete,
}

/// Decide an action's fate at `now`
pub fn verdict(action: &ManagedClusterAction, now: DateTime<Utc>) -> Verdict {
    let Some(completed) = action.completed_condition() else {
        return Verdict::Wait(RETENTION);
    };
    let dwell = (now - completed.last_transition_time)
        .to_std()
        .unwrap_or(Duration::ZERO);
    if dwell < RETENTION {
        Verdict::Wait(RETENTION - dwell)
    } else {
        Verdict::Delete
    }
}

/// Reconcile one action
#[instrument(skip(action, ctx), fields(action = %action.name_any(), cluster = ?action.namespace()))]
pub async fn reconcile(
    action: Arc<ManagedClusterAction>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("gc");
    let result = collect(&action, &ctx).await;
    timer.finish(&result);
    result
}

async fn collect(action: &ManagedClusterAction, ctx: &Context) -> Result<Action, Error> {
    match verdict(action, Utc::now()) {
        Verdict::Wait(after) => Ok(Action::requeue(after)),
        Verdict::Delete => {
            let ns = action.namespace().unwrap_or_default();
            ctx.kube.delete_action(&ns, &action.name_any()).await?;
            debug!("completed action deleted");
            Ok(Action::requeue(RETENTION))
        }
    }
}

/// Error policy for garbage collection
pub fn error_policy(action: Arc<ManagedClusterAction>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, action = %action.name_any(), "action garbage collection failed");
    requeue_for(error)
}

/// Strip the stale finalizer from every ClusterRole; true once none carry it
pub async fn clean_stale_finalizers(kube: &dyn KubeClient) -> bool {
    let roles = match kube.list_cluster_roles().await {
        Ok(roles) => roles,
        Err(e) => {
            warn!(error = %e, "failed to list cluster roles");
            return false;
        }
    };

    let mut clean = true;
    for role in roles {
        if !role.finalizers().iter().any(|f| f == STALE_CLUSTERSET_FINALIZER) {
            continue;
        }
        let name = role.name_any();
        let remaining: Vec<String> = role
            .finalizers()
            .iter()
            .filter(|f| *f != STALE_CLUSTERSET_FINALIZER)
            .cloned()
            .collect();
        match kube.set_cluster_role_finalizers(&name, remaining).await {
            Ok(()) => debug!(role = %name, "stale finalizer removed"),
            Err(e) => {
                warn!(role = %name, error = %e, "failed to remove stale finalizer");
                clean = false;
            }
        }
    }
    clean
}

/// Poll the finalizer cleanup until it succeeds or `shutdown` resolves
pub async fn run_finalizer_cleanup(ctx: Arc<Context>, shutdown: impl Future<Output = ()>) {
    let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return,
            _ = ticker.tick() => {}
        }
        if clean_stale_finalizers(ctx.kube.as_ref()).await {
            info!("stale clusterset finalizers cleaned up");
            return;
        }
    }
}
