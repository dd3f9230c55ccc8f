//! ManagedClusterInfo status synthesis
//!
//! The agent owns the status of its cluster's info object on the hub. Each
//! pass recomputes the whole status from ClusterClaims, OpenShift config
//! objects, nodes and the agent service, then writes it back only when it
//! changed. Probe failures do not stop the pass; they are collected into the
//! `ManagedClusterInfoSynced` condition.

mod client_config;
mod default_info;
mod distribution;
mod logging;
mod nodes;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

pub use logging::LoggingSettings;

use foundation_common::controller::requeue_for;
use foundation_common::crd::{
    is_condition_true, set_condition, ClusterInfoStatus, Condition, ConditionStatus,
    ManagedClusterInfo, CONDITION_CLUSTER_AVAILABLE, CONDITION_INFO_SYNCED, REASON_INFO_SYNCED,
    REASON_INFO_SYNCED_FAILED,
};
use foundation_common::merge_patch::{is_empty_patch, three_way_merge_patch};
use foundation_common::metrics::ReconcileTimer;
use foundation_common::Error;

use crate::managed::ManagedClusterReader;

const FIELD_MANAGER: &str = "foundation-agent";

/// Resync period, also used while the cluster is offline
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Hub-side operations of the info synthesizer
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Apply a merge patch to the info status
    async fn patch_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), Error>;
}

/// Hub client backed by kube-rs
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new hub client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_status(&self, namespace: &str, name: &str, patch: &Value) -> Result<(), Error> {
        let api: Api<ManagedClusterInfo> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&json!({ "status": patch })),
        )
        .await?;
        Ok(())
    }
}

/// Controller context for the info synthesizer
pub struct Context {
    /// Hub client for status writes
    pub kube: Arc<dyn KubeClient>,
    /// Managed-cluster reads
    pub reader: Arc<dyn ManagedClusterReader>,
    /// Log endpoint publication settings
    pub logging: LoggingSettings,
}

impl Context {
    /// Create a context from a hub client and a managed-cluster reader
    pub fn new(
        hub: Client,
        reader: Arc<dyn ManagedClusterReader>,
        logging: LoggingSettings,
    ) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(hub)),
            reader,
            logging,
        }
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        reader: Arc<dyn ManagedClusterReader>,
        logging: LoggingSettings,
    ) -> Self {
        Self {
            kube,
            reader,
            logging,
        }
    }
}

/// Reconcile the cluster's ManagedClusterInfo
#[instrument(skip(info, ctx), fields(cluster = %info.name_any()))]
pub async fn reconcile(info: Arc<ManagedClusterInfo>, ctx: Arc<Context>) -> Result<Action, Error> {
    let current = info.status.clone().unwrap_or_default();
    if !is_condition_true(&current.conditions, CONDITION_CLUSTER_AVAILABLE) {
        debug!("cluster is offline, skipping synthesis");
        return Ok(Action::requeue(RESYNC_INTERVAL));
    }

    let timer = ReconcileTimer::start("clusterinfo");
    let result = sync_status(&info, &current, &ctx).await;
    timer.finish(&result);
    result.map(|()| Action::requeue(RESYNC_INTERVAL))
}

async fn sync_status(
    info: &ManagedClusterInfo,
    current: &ClusterInfoStatus,
    ctx: &Context,
) -> Result<(), Error> {
    let desired = synthesize(current, ctx).await;
    if desired == *current {
        debug!("cluster info unchanged");
        return Ok(());
    }

    let patch = three_way_merge_patch(
        &serde_json::to_value(current)?,
        &serde_json::to_value(&desired)?,
        &serde_json::to_value(current)?,
        &[],
    )?;
    if is_empty_patch(&patch) {
        return Ok(());
    }

    let namespace = info.namespace().unwrap_or_default();
    ctx.kube
        .patch_status(&namespace, &info.name_any(), &patch)
        .await?;
    info!("cluster info status updated");
    Ok(())
}

/// Run every probe against `current` and return the new status
async fn synthesize(current: &ClusterInfoStatus, ctx: &Context) -> ClusterInfoStatus {
    let mut status = current.clone();
    let mut errors: Vec<String> = Vec::new();
    let reader = ctx.reader.as_ref();

    let claims = match reader.list_claims().await {
        Ok(claims) => claims,
        Err(e) => {
            errors.push(format!("failed to list clusterClaims error:{e}"));
            Vec::new()
        }
    };
    default_info::apply_claims(&mut status, &claims);

    if let Err(e) = distribution::sync(&mut status, reader, &claims).await {
        errors.push(format!("failed to get clusterVersion. error {e}"));
    }

    match reader.list_nodes().await {
        Ok(list) => status.node_list = nodes::node_list(&list),
        Err(e) => errors.push(format!("failed to list nodes. error {e}")),
    }

    if let Err(e) = logging::sync(&mut status, reader, &ctx.logging).await {
        errors.push(e.to_string());
    }

    let condition = if errors.is_empty() {
        Condition::new(
            CONDITION_INFO_SYNCED,
            ConditionStatus::True,
            REASON_INFO_SYNCED,
            "Managed cluster info is synced",
        )
    } else {
        warn!(errors = ?errors, "cluster info synthesized with errors");
        Condition::new(
            CONDITION_INFO_SYNCED,
            ConditionStatus::False,
            REASON_INFO_SYNCED_FAILED,
            aggregate(&errors),
        )
    };
    set_condition(&mut status.conditions, condition);
    distribution::normalize(&mut status);
    status
}

fn aggregate(errors: &[String]) -> String {
    match errors {
        [single] => single.clone(),
        many => format!("[{}]", many.join(", ")),
    }
}

/// Error policy for the info synthesizer
pub fn error_policy(info: Arc<ManagedClusterInfo>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, cluster = %info.name_any(), "cluster info reconciliation failed");
    requeue_for(error)
}
