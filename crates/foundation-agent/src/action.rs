//! ManagedClusterAction execution
//!
//! Each action is executed at most once per reconcile attempt against the
//! managed cluster and then frozen: once the `Completed` condition exists the
//! pipeline never touches the action again. The hub garbage collector removes
//! it after the dwell time.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, GroupVersionKind, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use foundation_common::crd::{
    ActionStatus, ActionType, Condition, ConditionStatus, KubeWorkSpec, ManagedClusterAction,
    CONDITION_ACTION_COMPLETED, REASON_ACTION_DONE, REASON_ACTION_TYPE_INVALID,
};
use foundation_common::controller::requeue_for;
use foundation_common::identity::UserIdentity;
use foundation_common::kube_utils::parse_api_version;
use foundation_common::kubecontrol::KubeControl;
use foundation_common::merge_patch::{is_empty_patch, three_way_merge_patch, IDENTITY_PRECONDITIONS};
use foundation_common::metrics::{record_action, ReconcileTimer};
use foundation_common::Error;

const FIELD_MANAGER: &str = "foundation-agent";

/// Hub-side operations of the action pipeline
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Write the status of an action on the hub
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ActionStatus,
    ) -> Result<(), Error>;
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
        status: &ActionStatus,
    ) -> Result<(), Error> {
        let api: Api<ManagedClusterAction> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&json!({ "status": status })),
        )
        .await?;
        Ok(())
    }
}

/// Controller context for the action pipeline
pub struct Context {
    /// Hub client for status writes
    pub kube: Arc<dyn KubeClient>,
    /// Managed-cluster client used to execute the work
    pub control: Arc<dyn KubeControl>,
    /// Execute as the user recorded on the action annotations
    pub enable_impersonation: bool,
}

impl Context {
    /// Create a context from a hub client and a managed-cluster control
    pub fn new(hub: Client, control: Arc<dyn KubeControl>, enable_impersonation: bool) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(hub)),
            control,
            enable_impersonation,
        }
    }

    /// Create a context for testing with custom mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        control: Arc<dyn KubeControl>,
        enable_impersonation: bool,
    ) -> Self {
        Self {
            kube,
            control,
            enable_impersonation,
        }
    }
}

/// Outcome of executing one action
#[derive(Clone, Debug, PartialEq)]
struct Outcome {
    condition: Condition,
    result: Option<Value>,
}

/// Reconcile a ManagedClusterAction
#[instrument(skip(action, ctx), fields(action = %action.name_any(), cluster = ?action.namespace()))]
pub async fn reconcile(
    action: Arc<ManagedClusterAction>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    if action.is_terminal() {
        debug!("action already completed");
        return Ok(Action::await_change());
    }

    let timer = ReconcileTimer::start("action");
    let outcome = execute(&action, &ctx).await;
    info!(
        reason = %outcome.condition.reason,
        status = %outcome.condition.status,
        "action executed"
    );
    record_action(&action.spec.action_type, &outcome.condition.reason);

    let status = ActionStatus {
        conditions: vec![outcome.condition],
        result: outcome.result,
    };
    let namespace = action.namespace().unwrap_or_default();
    let written = ctx
        .kube
        .patch_status(&namespace, &action.name_any(), &status)
        .await;
    timer.finish(&written);
    written?;

    Ok(Action::await_change())
}

/// Error policy: log and requeue
pub fn error_policy(action: Arc<ManagedClusterAction>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, action = %action.name_any(), "action reconciliation failed");
    requeue_for(error)
}

async fn execute(action: &ManagedClusterAction, ctx: &Context) -> Outcome {
    let action_type = match action.spec.action_type.parse::<ActionType>() {
        Ok(t) => t,
        Err(_) => {
            return failed(
                &action.spec.action_type,
                REASON_ACTION_TYPE_INVALID,
                "invalid action type",
            )
        }
    };

    let prior = action.status.as_ref().and_then(|s| s.result.clone());
    let result = match scoped_control(action, ctx) {
        Ok(control) => match action.spec.kube.as_ref() {
            Some(work) => action_type.execute(work, control.as_ref(), prior).await,
            None => Err(Error::validation("kube work is not set")),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(result) => Outcome {
            condition: Condition::new(
                CONDITION_ACTION_COMPLETED,
                ConditionStatus::True,
                REASON_ACTION_DONE,
                "",
            ),
            result,
        },
        Err(e) => failed(
            &action.spec.action_type,
            action_type.failure_reason(),
            &e.to_string(),
        ),
    }
}

fn failed(action_type: &str, reason: &str, err: &str) -> Outcome {
    Outcome {
        condition: Condition::new(
            CONDITION_ACTION_COMPLETED,
            ConditionStatus::False,
            reason,
            format!("failed to handle {action_type} action with err: {err}"),
        ),
        result: None,
    }
}

/// The control to execute with: impersonating when enabled and annotated
fn scoped_control(
    action: &ManagedClusterAction,
    ctx: &Context,
) -> Result<Arc<dyn KubeControl>, Error> {
    if !ctx.enable_impersonation {
        return Ok(ctx.control.clone());
    }
    match UserIdentity::from_annotations(action.annotations()) {
        Some(identity) => {
            debug!(user = %identity.user, groups = ?identity.groups, "impersonating");
            ctx.control.with_user(&identity.user, &identity.groups)
        }
        None => Ok(ctx.control.clone()),
    }
}

#[async_trait]
trait Execute {
    async fn execute(
        &self,
        work: &KubeWorkSpec,
        control: &dyn KubeControl,
        prior: Option<Value>,
    ) -> Result<Option<Value>, Error>;
}

#[async_trait]
impl Execute for ActionType {
    async fn execute(
        &self,
        work: &KubeWorkSpec,
        control: &dyn KubeControl,
        prior: Option<Value>,
    ) -> Result<Option<Value>, Error> {
        match self {
            Self::Create => create(work, control).await,
            Self::Update => update(work, control, prior).await,
            Self::Delete => delete(work, control).await,
        }
    }
}

async fn create(work: &KubeWorkSpec, control: &dyn KubeControl) -> Result<Option<Value>, Error> {
    let template = template(work)?;
    let mapping = control.mapping_for_kind(&gvk_of(template)?).await?;
    let namespace = target_namespace(work, template);
    if mapping.namespaced && namespace.is_empty() {
        return Err(Error::validation("namespace must be set"));
    }

    control.create(&mapping, &namespace, template).await?;
    Ok(Some(template.clone()))
}

async fn update(
    work: &KubeWorkSpec,
    control: &dyn KubeControl,
    prior: Option<Value>,
) -> Result<Option<Value>, Error> {
    let template = template(work)?;
    let mapping = control.mapping_for_kind(&gvk_of(template)?).await?;
    let namespace = target_namespace(work, template);
    let name = template
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::validation("template metadata.name must be set"))?;

    let current = control.get(&mapping, &namespace, name).await?;
    let patch = three_way_merge_patch(template, template, &current, IDENTITY_PRECONDITIONS)?;
    if is_empty_patch(&patch) {
        debug!(name, namespace = %namespace, "nothing to update");
        return Ok(prior);
    }

    debug!(name, namespace = %namespace, %patch, "updating resource");
    control.patch(&mapping, &namespace, name, &patch).await?;
    Ok(Some(template.clone()))
}

async fn delete(work: &KubeWorkSpec, control: &dyn KubeControl) -> Result<Option<Value>, Error> {
    let mapping = control.mapping_for_resource(&work.resource).await?;
    let namespace = work.namespace.clone().unwrap_or_default();
    control.delete(&mapping, &namespace, &work.name).await?;
    Ok(None)
}

fn template(work: &KubeWorkSpec) -> Result<&Value, Error> {
    work.template
        .as_ref()
        .filter(|t| t.is_object())
        .ok_or_else(|| Error::validation("object template is not set"))
}

fn gvk_of(template: &Value) -> Result<GroupVersionKind, Error> {
    let api_version = template
        .get("apiVersion")
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty());
    let kind = template
        .get("kind")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty());
    match (api_version, kind) {
        (Some(api_version), Some(kind)) => {
            let (group, version) = parse_api_version(api_version);
            Ok(GroupVersionKind::gvk(&group, &version, kind))
        }
        _ => Err(Error::serialization(
            "object template must set apiVersion and kind",
        )),
    }
}

/// Namespace from the work spec, falling back to the template's own
fn target_namespace(work: &KubeWorkSpec, template: &Value) -> String {
    work.namespace
        .clone()
        .filter(|ns| !ns.is_empty())
        .or_else(|| {
            template
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use foundation_common::crd::{
        ActionSpec, REASON_CREATE_RESOURCE_FAILED, REASON_UPDATE_RESOURCE_FAILED,
        USER_GROUP_ANNOTATION, USER_IDENTITY_ANNOTATION,
    };
    use kube::api::ObjectMeta;

    use crate::test_support::{deployments, mapping, MockKubeControl};

    fn deployment_template(replicas: i64) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "d", "namespace": "default"},
            "spec": {"replicas": replicas}
        })
    }

    fn sample_action(action_type: &str, work: KubeWorkSpec) -> ManagedClusterAction {
        ManagedClusterAction {
            metadata: ObjectMeta {
                name: Some("a1".to_string()),
                namespace: Some("c1".to_string()),
                ..Default::default()
            },
            spec: ActionSpec {
                action_type: action_type.to_string(),
                kube: Some(work),
            },
            status: None,
        }
    }

    fn template_work(template: Value) -> KubeWorkSpec {
        KubeWorkSpec {
            resource: "deployments".to_string(),
            name: "d".to_string(),
            namespace: None,
            template: Some(template),
        }
    }

    /// Captured status writes, independent of call order
    #[derive(Clone, Default)]
    struct StatusCapture {
        updates: Arc<Mutex<Vec<ActionStatus>>>,
    }

    impl StatusCapture {
        fn record(&self, status: ActionStatus) {
            self.updates
                .lock()
                .expect("mutex should not be poisoned")
                .push(status);
        }

        fn last(&self) -> ActionStatus {
            self.updates
                .lock()
                .expect("mutex should not be poisoned")
                .last()
                .cloned()
                .expect("status should have been written")
        }

        fn count(&self) -> usize {
            self.updates.lock().expect("mutex should not be poisoned").len()
        }
    }

    fn capturing_kube() -> (Arc<MockKubeClient>, StatusCapture) {
        let capture = StatusCapture::default();
        let recorder = capture.clone();
        let mut kube = MockKubeClient::new();
        kube.expect_patch_status().returning(move |_, _, status| {
            recorder.record(status.clone());
            Ok(())
        });
        (Arc::new(kube), capture)
    }

    fn completed(status: &ActionStatus) -> &Condition {
        status
            .conditions
            .iter()
            .find(|c| c.type_ == CONDITION_ACTION_COMPLETED)
            .expect("completed condition")
    }

    mod create {
        use super::*;

        /// Story: A create action lands the template on the managed cluster
        #[tokio::test]
        async fn story_create_deployment_completes() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_kind()
                .returning(|_| Ok(deployments()));
            control
                .expect_create()
                .withf(|m, ns, obj| m.resource.plural == "deployments" && ns == "default" && obj["metadata"]["name"] == "d")
                .times(1)
                .returning(|_, _, obj| Ok(obj.clone()));

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));
            let action = sample_action("Create", template_work(deployment_template(1)));

            let result = reconcile(Arc::new(action), ctx).await.expect("reconcile");
            assert_eq!(result, Action::await_change());

            let status = capture.last();
            let cond = completed(&status);
            assert!(cond.is_true());
            assert_eq!(cond.reason, REASON_ACTION_DONE);
            assert_eq!(status.result, Some(deployment_template(1)));
        }

        #[tokio::test]
        async fn spec_namespace_wins_over_template() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_kind()
                .returning(|_| Ok(deployments()));
            control
                .expect_create()
                .withf(|_, ns, _| ns == "override")
                .times(1)
                .returning(|_, _, obj| Ok(obj.clone()));

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));
            let mut work = template_work(deployment_template(1));
            work.namespace = Some("override".to_string());

            reconcile(Arc::new(sample_action("Create", work)), ctx)
                .await
                .expect("reconcile");
            assert!(completed(&capture.last()).is_true());
        }

        #[tokio::test]
        async fn namespaced_resource_without_namespace_fails() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_kind()
                .returning(|_| Ok(deployments()));
            control.expect_create().never();

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));
            let mut template = deployment_template(1);
            template["metadata"]
                .as_object_mut()
                .expect("metadata")
                .remove("namespace");

            reconcile(Arc::new(sample_action("Create", template_work(template))), ctx)
                .await
                .expect("reconcile");
            let status = capture.last();
            let cond = completed(&status);
            assert!(!cond.is_true());
            assert_eq!(cond.reason, REASON_CREATE_RESOURCE_FAILED);
            assert!(cond
                .message
                .starts_with("failed to handle Create action with err: "));
            assert!(cond.message.contains("namespace must be set"));
        }

        #[tokio::test]
        async fn cluster_scoped_create_needs_no_namespace() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_kind()
                .returning(|_| Ok(mapping("", "v1", "Namespace", "namespaces", false)));
            control
                .expect_create()
                .withf(|_, ns, _| ns.is_empty())
                .returning(|_, _, obj| Ok(obj.clone()));

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));
            let template = json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "n"}});

            reconcile(Arc::new(sample_action("Create", template_work(template))), ctx)
                .await
                .expect("reconcile");
            assert!(completed(&capture.last()).is_true());
        }
    }

    mod update {
        use super::*;

        /// Story: An update with an unchanged template sends no PATCH
        #[tokio::test]
        async fn story_unchanged_template_is_a_no_op() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_kind()
                .returning(|_| Ok(deployments()));
            control.expect_get().returning(|_, _, _| {
                let mut live = deployment_template(1);
                live["metadata"]["resourceVersion"] = json!("9");
                live["status"] = json!({"readyReplicas": 1});
                Ok(live)
            });
            control.expect_patch().never();

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));
            let mut action = sample_action("Update", template_work(deployment_template(1)));
            action.status = Some(ActionStatus {
                conditions: vec![],
                result: Some(json!({"previous": true})),
            });

            reconcile(Arc::new(action), ctx).await.expect("reconcile");
            let status = capture.last();
            assert!(completed(&status).is_true());
            assert_eq!(status.result, Some(json!({"previous": true})));
        }

        #[tokio::test]
        async fn changed_field_is_patched() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_kind()
                .returning(|_| Ok(deployments()));
            control
                .expect_get()
                .returning(|_, _, _| Ok(deployment_template(1)));
            control
                .expect_patch()
                .withf(|_, ns, name, patch| {
                    ns == "default" && name == "d" && *patch == json!({"spec": {"replicas": 3}})
                })
                .times(1)
                .returning(|_, _, _, _| Ok(deployment_template(3)));

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));

            reconcile(
                Arc::new(sample_action("Update", template_work(deployment_template(3)))),
                ctx,
            )
            .await
            .expect("reconcile");
            assert_eq!(capture.last().result, Some(deployment_template(3)));
        }

        /// Story: An update that would change the kind is refused
        #[tokio::test]
        async fn story_kind_change_fails_precondition() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_kind()
                .returning(|_| Ok(mapping("apps", "v1", "StatefulSet", "statefulsets", true)));
            control
                .expect_get()
                .returning(|_, _, _| Ok(deployment_template(1)));
            control.expect_patch().never();

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));
            let mut template = deployment_template(1);
            template["kind"] = json!("StatefulSet");

            reconcile(Arc::new(sample_action("Update", template_work(template))), ctx)
                .await
                .expect("reconcile");
            let status = capture.last();
            let cond = completed(&status);
            assert!(!cond.is_true());
            assert_eq!(cond.reason, REASON_UPDATE_RESOURCE_FAILED);
            assert!(cond.message.contains("precondition failed"));
        }
    }

    mod delete {
        use super::*;

        #[tokio::test]
        async fn delete_by_resource_stores_empty_result() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_resource()
                .withf(|r| r == "deployments")
                .returning(|_| Ok(deployments()));
            control
                .expect_delete()
                .withf(|_, ns, name| ns == "default" && name == "d")
                .times(1)
                .returning(|_, _, _| Ok(()));

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));
            let work = KubeWorkSpec {
                resource: "deployments".to_string(),
                name: "d".to_string(),
                namespace: Some("default".to_string()),
                template: None,
            };

            reconcile(Arc::new(sample_action("Delete", work)), ctx)
                .await
                .expect("reconcile");
            let status = capture.last();
            assert!(completed(&status).is_true());
            assert_eq!(status.result, None);
        }

        #[tokio::test]
        async fn delete_failure_is_terminal() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_resource()
                .returning(|r| Err(Error::no_match(r)));

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));
            let work = KubeWorkSpec {
                resource: "widgets".to_string(),
                name: "w".to_string(),
                namespace: None,
                template: None,
            };

            reconcile(Arc::new(sample_action("Delete", work)), ctx)
                .await
                .expect("reconcile");
            let cond = completed(&capture.last()).clone();
            assert_eq!(cond.status, ConditionStatus::False);
            assert!(cond.message.contains("widgets"));
        }
    }

    mod lifecycle {
        use super::*;

        /// Story: An unknown action type fails without touching the cluster
        #[tokio::test]
        async fn story_invalid_action_type() {
            let control = MockKubeControl::new();
            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));

            reconcile(
                Arc::new(sample_action("Restart", template_work(deployment_template(1)))),
                ctx,
            )
            .await
            .expect("reconcile");
            let cond = completed(&capture.last()).clone();
            assert_eq!(cond.reason, REASON_ACTION_TYPE_INVALID);
            assert_eq!(
                cond.message,
                "failed to handle Restart action with err: invalid action type"
            );
        }

        /// Story: Re-reconciling a completed action does nothing
        #[tokio::test]
        async fn story_terminal_action_is_frozen() {
            let control = MockKubeControl::new();
            let mut kube = MockKubeClient::new();
            kube.expect_patch_status().never();
            let ctx = Arc::new(Context::for_testing(Arc::new(kube), Arc::new(control), false));

            let mut action = sample_action("Create", template_work(deployment_template(1)));
            action.status = Some(ActionStatus {
                conditions: vec![Condition::new(
                    CONDITION_ACTION_COMPLETED,
                    ConditionStatus::False,
                    REASON_CREATE_RESOURCE_FAILED,
                    "boom",
                )],
                result: None,
            });

            let result = reconcile(Arc::new(action), ctx).await.expect("reconcile");
            assert_eq!(result, Action::await_change());
        }

        #[tokio::test]
        async fn status_write_failure_is_returned() {
            let mut control = MockKubeControl::new();
            control
                .expect_mapping_for_resource()
                .returning(|_| Ok(deployments()));
            control.expect_delete().returning(|_, _, _| Ok(()));
            let mut kube = MockKubeClient::new();
            kube.expect_patch_status()
                .returning(|_, _, _| Err(Error::internal("hub unavailable")));
            let ctx = Arc::new(Context::for_testing(Arc::new(kube), Arc::new(control), false));
            let work = KubeWorkSpec {
                resource: "deployments".to_string(),
                name: "d".to_string(),
                namespace: Some("default".to_string()),
                template: None,
            };

            assert!(reconcile(Arc::new(sample_action("Delete", work)), ctx)
                .await
                .is_err());
        }
    }

    mod impersonation {
        use super::*;
        use base64::Engine;

        fn annotated(mut action: ManagedClusterAction) -> ManagedClusterAction {
            let encode = |s: &str| base64::engine::general_purpose::STANDARD.encode(s);
            action.metadata.annotations = Some(BTreeMap::from([
                (USER_IDENTITY_ANNOTATION.to_string(), encode("alice")),
                (USER_GROUP_ANNOTATION.to_string(), encode("icp:dev:admin")),
            ]));
            action
        }

        /// Story: With impersonation enabled the work runs as the annotated user
        #[tokio::test]
        async fn story_create_runs_as_user() {
            let mut scoped = MockKubeControl::new();
            scoped
                .expect_mapping_for_kind()
                .returning(|_| Ok(deployments()));
            scoped
                .expect_create()
                .times(1)
                .returning(|_, _, obj| Ok(obj.clone()));
            let scoped: Arc<dyn KubeControl> = Arc::new(scoped);

            let mut control = MockKubeControl::new();
            control.expect_create().never();
            control
                .expect_with_user()
                .withf(|user, groups| user == "alice" && groups == ["mcm::dev".to_string()])
                .times(1)
                .returning(move |_, _| Ok(scoped.clone()));

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), true));
            let action = annotated(sample_action("Create", template_work(deployment_template(1))));

            reconcile(Arc::new(action), ctx).await.expect("reconcile");
            assert!(completed(&capture.last()).is_true());
            assert_eq!(capture.count(), 1);
        }

        #[tokio::test]
        async fn annotations_ignored_when_disabled() {
            let mut control = MockKubeControl::new();
            control.expect_with_user().never();
            control
                .expect_mapping_for_kind()
                .returning(|_| Ok(deployments()));
            control
                .expect_create()
                .returning(|_, _, obj| Ok(obj.clone()));

            let (kube, capture) = capturing_kube();
            let ctx = Arc::new(Context::for_testing(kube, Arc::new(control), false));
            let action = annotated(sample_action("Create", template_work(deployment_template(1))));

            reconcile(Arc::new(action), ctx).await.expect("reconcile");
            assert!(completed(&capture.last()).is_true());
        }
    }

    #[test]
    fn gvk_requires_api_version_and_kind() {
        assert!(gvk_of(&json!({"kind": "Deployment"})).is_err());
        let gvk = gvk_of(&json!({"apiVersion": "v1", "kind": "ConfigMap"})).expect("gvk");
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");
    }
}
