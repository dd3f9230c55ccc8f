//! ManagedClusterAction CRD
//!
//! An action is created on the hub in the namespace named after the managed
//! cluster. The agent of that cluster executes it once and reports the
//! outcome through the `Completed` condition.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{find_condition, Condition};

/// Condition type set once the action has been executed
pub const CONDITION_ACTION_COMPLETED: &str = "Completed";

/// Reason: the create call failed
pub const REASON_CREATE_RESOURCE_FAILED: &str = "CreateResourceFailed";
/// Reason: the update call (or its patch computation) failed
pub const REASON_UPDATE_RESOURCE_FAILED: &str = "UpdateResourceFailed";
/// Reason: the delete call failed
pub const REASON_DELETE_RESOURCE_FAILED: &str = "DeleteResourceFailed";
/// Reason: `spec.actionType` is not one of Create, Update, Delete
pub const REASON_ACTION_TYPE_INVALID: &str = "ActionTypeInvalid";
/// Reason: the action completed successfully
pub const REASON_ACTION_DONE: &str = "ActionDone";

/// Annotation holding the base64-encoded user to impersonate
pub const USER_IDENTITY_ANNOTATION: &str = "acm.io/user-identity";
/// Annotation holding the base64-encoded, comma-separated groups to impersonate
pub const USER_GROUP_ANNOTATION: &str = "acm.io/user-group";

/// ManagedClusterAction requests one imperative mutation on a managed cluster.
///
/// Example:
/// ```yaml
/// apiVersion: action.open-cluster-management.io/v1beta1
/// kind: ManagedClusterAction
/// metadata:
///   name: create-deploy
///   namespace: cluster1
/// spec:
///   actionType: Create
///   kube:
///     resource: deployments
///     namespace: default
///     template:
///       apiVersion: apps/v1
///       kind: Deployment
///       metadata:
///         name: d
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "action.open-cluster-management.io",
    version = "v1beta1",
    kind = "ManagedClusterAction",
    namespaced,
    status = "ActionStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.actionType"}"#,
    printcolumn = r#"{"name":"Completed","type":"string","jsonPath":".status.conditions[?(@.type==\"Completed\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    /// Create, Update or Delete
    #[serde(default)]
    pub action_type: String,

    /// The kube work this action performs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kube: Option<KubeWorkSpec>,
}

/// Declarative description of a single imperative mutation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubeWorkSpec {
    /// Resource plural, kind, or `{resource}.{version}.{group}`
    #[serde(default)]
    pub resource: String,

    /// Object name
    #[serde(default)]
    pub name: String,

    /// Object namespace; falls back to the template's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Opaque object template for create and update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<serde_json::Value>,
}

/// ManagedClusterAction status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionStatus {
    /// Conditions, most importantly `Completed`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Raw result of the action: the template on create/update, empty on delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// The closed set of action kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionType {
    /// Create the templated object
    Create,
    /// Merge the template into the live object
    Update,
    /// Delete the named object
    Delete,
}

impl std::str::FromStr for ActionType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(Self::Create),
            "Update" => Ok(Self::Update),
            "Delete" => Ok(Self::Delete),
            _ => Err(crate::Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "spec.actionType",
                format!("action type {s:?} is not supported"),
            )),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "Create"),
            Self::Update => write!(f, "Update"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

impl ActionType {
    /// Reason recorded when an action of this type fails
    pub fn failure_reason(&self) -> &'static str {
        match self {
            Self::Create => REASON_CREATE_RESOURCE_FAILED,
            Self::Update => REASON_UPDATE_RESOURCE_FAILED,
            Self::Delete => REASON_DELETE_RESOURCE_FAILED,
        }
    }
}

impl ManagedClusterAction {
    /// The `Completed` condition, if the action has been executed
    pub fn completed_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, CONDITION_ACTION_COMPLETED))
    }

    /// Returns true once the action has a `Completed` condition of any status
    pub fn is_terminal(&self) -> bool {
        self.completed_condition().is_some()
    }
}
