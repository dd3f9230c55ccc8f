//! ManagedClusterView refresh
//!
//! A view mirrors one managed-cluster object into its status. Refreshes are
//! paced by the age of the `Processing` condition, so reconciles triggered
//! inside the interval never reach the managed cluster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, GroupVersionKind, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, error, instrument, warn};

#[cfg(test)]
use mockall::automock;

use foundation_common::controller::requeue_for;
use foundation_common::crd::{
    replace_condition, Condition, ConditionStatus, ManagedClusterView, ViewScope, ViewStatus,
    CONDITION_VIEW_PROCESSING, REASON_GET_RESOURCE_FAILED, REASON_RESOURCE_GVK_INVALID,
    REASON_RESOURCE_NAME_INVALID, REASON_RESOURCE_TYPE_INVALID,
};
use foundation_common::kubecontrol::KubeControl;
use foundation_common::mapper::RestMapping;
use foundation_common::metrics::{record_view_refresh, ReconcileTimer};
use foundation_common::Error;

const FIELD_MANAGER: &str = "foundation-agent";

/// Hub-side operations of the view reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Write the status of a view on the hub
    async fn patch_status(&self, namespace: &str, name: &str, status: &ViewStatus)
        -> Result<(), Error>;
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
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ViewStatus,
    ) -> Result<(), Error> {
        let api: Api<ManagedClusterView> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&json!({ "status": status })),
        )
        .await?;
        Ok(())
    }
}

/// Controller context for the view reconciler
pub struct Context {
    /// Hub client for status writes
    pub kube: Arc<dyn KubeClient>,
    /// Managed-cluster client used to read the viewed object
    pub control: Arc<dyn KubeControl>,
}

impl Context {
    /// Create a context from a hub client and a managed-cluster control
    pub fn new(hub: Client, control: Arc<dyn KubeControl>) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(hub)),
            control,
        }
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>, control: Arc<dyn KubeControl>) -> Self {
        Self { kube, control }
    }
}

/// Reasons that describe the view itself rather than the managed cluster
///
/// A view failing with one of these stays failed until its spec changes.
const VALIDATION_REASONS: [&str; 3] = [
    REASON_RESOURCE_NAME_INVALID,
    REASON_RESOURCE_TYPE_INVALID,
    REASON_RESOURCE_GVK_INVALID,
];

/// Why a refresh failed
#[derive(Debug)]
struct Failure {
    reason: &'static str,
    cause: String,
}

impl Failure {
    fn new(reason: &'static str, cause: impl ToString) -> Self {
        Self {
            reason,
            cause: cause.to_string(),
        }
    }

    fn is_validation(&self) -> bool {
        VALIDATION_REASONS.contains(&self.reason)
    }
}

fn is_validation_failure(condition: &Condition) -> bool {
    condition.status == ConditionStatus::False
        && VALIDATION_REASONS.contains(&condition.reason.as_str())
}

/// Reconcile a ManagedClusterView
#[instrument(skip(view, ctx), fields(view = %view.name_any(), cluster = ?view.namespace()))]
pub async fn reconcile(view: Arc<ManagedClusterView>, ctx: Arc<Context>) -> Result<Action, Error> {
    let interval = view.spec.scope.update_interval();
    if let Some(remaining) = remaining_wait(&view, interval) {
        debug!(?remaining, "view refreshed recently");
        return Ok(Action::requeue(remaining));
    }

    let timer = ReconcileTimer::start("view");
    let mut status = view.status.clone().unwrap_or_default();
    let (condition, next) = match query(&view.spec.scope, ctx.control.as_ref()).await {
        Ok(obj) => {
            if status.result.as_ref() != Some(&obj) {
                debug!("viewed object changed");
                status.result = Some(obj);
            }
            record_view_refresh("refreshed");
            let condition =
                Condition::new(CONDITION_VIEW_PROCESSING, ConditionStatus::True, "", "");
            (condition, Action::requeue(interval))
        }
        Err(failure) => {
            warn!(reason = failure.reason, cause = %failure.cause, "failed to query resource");
            record_view_refresh(failure.reason);
            let condition = Condition::new(
                CONDITION_VIEW_PROCESSING,
                ConditionStatus::False,
                failure.reason,
                format!("failed to get resource with err: {}", failure.cause),
            );
            if failure.is_validation() {
                if view
                    .processing_condition()
                    .is_some_and(|current| current.same_state(&condition))
                {
                    debug!("view is still invalid");
                    timer.success();
                    return Ok(Action::await_change());
                }
                (condition, Action::await_change())
            } else {
                (condition, Action::requeue(interval))
            }
        }
    };
    replace_condition(&mut status.conditions, condition);

    let namespace = view.namespace().unwrap_or_default();
    let written = ctx
        .kube
        .patch_status(&namespace, &view.name_any(), &status)
        .await;
    timer.finish(&written);
    written?;

    Ok(next)
}

/// Error policy: log and requeue
pub fn error_policy(view: Arc<ManagedClusterView>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, view = %view.name_any(), "view reconciliation failed");
    requeue_for(error)
}

/// Time left until the next refresh is due, if any
///
/// Views that failed validation are not paced: they are only revisited when
/// they change, and then the new spec is checked right away.
fn remaining_wait(view: &ManagedClusterView, interval: Duration) -> Option<Duration> {
    let condition = view
        .processing_condition()
        .filter(|c| !is_validation_failure(c))?;
    let age = (Utc::now() - condition.last_transition_time)
        .to_std()
        .unwrap_or_default();
    interval.checked_sub(age).filter(|d| !d.is_zero())
}

async fn query(scope: &ViewScope, control: &dyn KubeControl) -> Result<Value, Failure> {
    if scope.name.is_empty() {
        return Err(Failure::new(REASON_RESOURCE_NAME_INVALID, "invalid resource name"));
    }
    if scope.resource.is_empty() && (scope.kind.is_empty() || scope.version.is_empty()) {
        return Err(Failure::new(REASON_RESOURCE_TYPE_INVALID, "invalid resource type"));
    }

    let mapping = if scope.resource.is_empty() {
        let gvk = GroupVersionKind::gvk(&scope.api_group, &scope.version, &scope.kind);
        control
            .mapping_for_kind(&gvk)
            .await
            .map_err(|e| Failure::new(REASON_RESOURCE_GVK_INVALID, e))?
    } else {
        control
            .mapping_for_resource(&scope.resource)
            .await
            .map_err(|e| Failure::new(REASON_RESOURCE_TYPE_INVALID, e))?
    };

    if is_secret(&mapping) {
        return Err(Failure::new(
            REASON_RESOURCE_TYPE_INVALID,
            "viewing secrets is not allowed",
        ));
    }

    control
        .get(&mapping, &scope.namespace, &scope.name)
        .await
        .map_err(|e| Failure::new(REASON_GET_RESOURCE_FAILED, e))
}

fn is_secret(mapping: &RestMapping) -> bool {
    mapping.resource.group.is_empty() && mapping.resource.plural == "secrets"
}
