//! ManagedClusterView CRD
//!
//! A view asks the agent to read one object from its managed cluster and
//! mirror it into status, refreshing on a fixed interval.

use std::time::Duration;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{find_condition, Condition};

/// Condition type describing the last refresh
pub const CONDITION_VIEW_PROCESSING: &str = "Processing";

/// Reason: `scope.name` is empty
pub const REASON_RESOURCE_NAME_INVALID: &str = "ResourceNameInvalid";
/// Reason: resource is missing, unknown, or forbidden
pub const REASON_RESOURCE_TYPE_INVALID: &str = "ResourceTypeInvalid";
/// Reason: group/version/kind is unknown to the mapper
pub const REASON_RESOURCE_GVK_INVALID: &str = "ResourceGVKInvalid";
/// Reason: the dynamic get failed
pub const REASON_GET_RESOURCE_FAILED: &str = "GetResourceFailed";

/// Refresh interval when `updateIntervalSeconds` is unset or not positive
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

/// ManagedClusterView mirrors a single managed-cluster object into status.
///
/// Example:
/// ```yaml
/// apiVersion: view.open-cluster-management.io/v1beta1
/// kind: ManagedClusterView
/// metadata:
///   name: view-deploy
///   namespace: cluster1
/// spec:
///   scope:
///     apiGroup: apps
///     version: v1
///     kind: Deployment
///     name: d
///     namespace: default
///     updateIntervalSeconds: 60
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "view.open-cluster-management.io",
    version = "v1beta1",
    kind = "ManagedClusterView",
    namespaced,
    status = "ViewStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ViewSpec {
    /// The object to read
    #[serde(default)]
    pub scope: ViewScope,
}

/// Target of a view
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewScope {
    /// API group of the kind (empty for the core group)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,

    /// API version of the kind
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Kind of the object
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// Resource plural or `{resource}.{version}.{group}`; preferred over kind
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,

    /// Object name
    #[serde(default)]
    pub name: String,

    /// Object namespace, empty for cluster-scoped objects
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Seconds between refreshes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_interval_seconds: Option<i64>,
}

impl ViewScope {
    /// Effective refresh interval
    pub fn update_interval(&self) -> Duration {
        match self.update_interval_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => DEFAULT_UPDATE_INTERVAL,
        }
    }
}

/// ManagedClusterView status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewStatus {
    /// Conditions, most importantly `Processing`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Latest observed object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl ManagedClusterView {
    /// The `Processing` condition, if the view has been refreshed
    pub fn processing_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| find_condition(&s.conditions, CONDITION_VIEW_PROCESSING))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_yaml() {
        let yaml = r#"
apiVersion: view.open-cluster-management.io/v1beta1
kind: ManagedClusterView
metadata:
  name: view-deploy
  namespace: cluster1
spec:
  scope:
    apiGroup: apps
    version: v1
    kind: Deployment
    name: d
    namespace: default
    updateIntervalSeconds: 60
"#;
        let view: ManagedClusterView = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(view.spec.scope.api_group, "apps");
        assert_eq!(view.spec.scope.kind, "Deployment");
        assert_eq!(view.spec.scope.update_interval(), Duration::from_secs(60));
        assert!(view.processing_condition().is_none());
    }

    #[test]
    fn update_interval_defaults_when_unset_or_not_positive() {
        let mut scope = ViewScope::default();
        assert_eq!(scope.update_interval(), DEFAULT_UPDATE_INTERVAL);
        scope.update_interval_seconds = Some(0);
        assert_eq!(scope.update_interval(), DEFAULT_UPDATE_INTERVAL);
        scope.update_interval_seconds = Some(-5);
        assert_eq!(scope.update_interval(), DEFAULT_UPDATE_INTERVAL);
        scope.update_interval_seconds = Some(5);
        assert_eq!(scope.update_interval(), Duration::from_secs(5));
    }
}
