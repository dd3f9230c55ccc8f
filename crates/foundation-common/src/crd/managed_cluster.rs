//! ManagedCluster CRD (read and labelled by the hub, owned by registration)

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::cluster_info::ClientConfig;
use super::types::{is_condition_true, Condition};

/// Condition type set by registration when the agent is heartbeating
pub const CONDITION_CLUSTER_AVAILABLE: &str = "ManagedClusterConditionAvailable";

/// Label carrying the clusterset a cluster belongs to
pub const CLUSTERSET_LABEL: &str = "cluster.open-cluster-management.io/clusterset";

/// ManagedCluster represents a cluster registered with the hub.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    status = "ManagedClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Whether the hub has accepted the cluster
    #[serde(default)]
    pub hub_accepts_client: bool,

    /// API server endpoints of the cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub managed_cluster_client_configs: Vec<ClientConfig>,
}

/// ManagedCluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Registration conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Resource capacity as quantity strings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, String>,

    /// Allocatable resources as quantity strings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocatable: BTreeMap<String, String>,

    /// Claims reported by the agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_claims: Vec<ManagedClusterClaim>,
}

/// A claim as reported in ManagedCluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ManagedClusterClaim {
    /// Claim name
    pub name: String,
    /// Claim value
    #[serde(default)]
    pub value: String,
}

impl ManagedCluster {
    /// Returns true when the Available condition is True
    pub fn is_available(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| is_condition_true(&s.conditions, CONDITION_CLUSTER_AVAILABLE))
    }

    /// Value of a reported claim
    pub fn claim(&self, name: &str) -> Option<&str> {
        self.status.as_ref().and_then(|s| {
            s.cluster_claims
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.value.as_str())
        })
    }

    /// URL of the first registered API server endpoint
    pub fn master_endpoint(&self) -> Option<&str> {
        self.spec
            .managed_cluster_client_configs
            .first()
            .map(|c| c.url.as_str())
            .filter(|u| !u.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;

    #[test]
    fn managed_cluster_yaml() {
        let yaml = r#"
apiVersion: cluster.open-cluster-management.io/v1
kind: ManagedCluster
metadata:
  name: cluster1
spec:
  hubAcceptsClient: true
  managedClusterClientConfigs:
    - url: https://api.cluster1:6443
      caBundle: Y2E=
status:
  conditions:
    - type: ManagedClusterConditionAvailable
      status: "True"
      reason: Heartbeat
      message: ok
      lastTransitionTime: "2024-01-01T00:00:00Z"
      observedGeneration: 1
  capacity:
    cpu: "8"
  clusterClaims:
    - name: version.openshift.io
      value: 4.14.3
"#;
        let mc: ManagedCluster = serde_yaml::from_str(yaml).expect("parse");
        assert!(mc.spec.hub_accepts_client);
        assert!(mc.is_available());
        assert_eq!(mc.claim("version.openshift.io"), Some("4.14.3"));
        assert_eq!(mc.master_endpoint(), Some("https://api.cluster1:6443"));
    }

    #[test]
    fn unavailable_without_true_condition() {
        let mut mc = ManagedCluster::new("c", ManagedClusterSpec::default());
        assert!(!mc.is_available());
        mc.status = Some(ManagedClusterStatus {
            conditions: vec![Condition::new(
                CONDITION_CLUSTER_AVAILABLE,
                ConditionStatus::Unknown,
                "",
                "",
            )],
            ..Default::default()
        });
        assert!(!mc.is_available());
        assert!(mc.master_endpoint().is_none());
    }
}
