//! ManagedClusterInfo CRD
//!
//! One info object exists per managed cluster, in the namespace named after
//! the cluster. The hub creates it and owns its labels and spec; the agent
//! owns its status.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// Condition type written by the agent after each synthesis pass
pub const CONDITION_INFO_SYNCED: &str = "ManagedClusterInfoSynced";
/// Reason for a successful synthesis pass
pub const REASON_INFO_SYNCED: &str = "ManagedClusterInfoSynced";
/// Reason for a synthesis pass with probe errors
pub const REASON_INFO_SYNCED_FAILED: &str = "ReasonManagedClusterInfoSyncedFailed";

/// Distribution type for OpenShift clusters
pub const DISTRIBUTION_TYPE_OCP: &str = "OCP";
/// Distribution type when no distribution probe applies
pub const DISTRIBUTION_TYPE_UNKNOWN: &str = "Unknown";

/// Prefix of node role labels
pub const LABEL_NODE_ROLE_PREFIX: &str = "node-role.kubernetes.io/";
/// Worker role label
pub const LABEL_NODE_ROLE_WORKER: &str = "node-role.kubernetes.io/worker";
/// Legacy control plane role label
pub const LABEL_NODE_ROLE_MASTER: &str = "node-role.kubernetes.io/master";
/// Control plane role label
pub const LABEL_NODE_ROLE_CONTROL_PLANE: &str = "node-role.kubernetes.io/control-plane";
/// Infra role label
pub const LABEL_NODE_ROLE_INFRA: &str = "node-role.kubernetes.io/infra";

/// ManagedClusterInfo describes identity, distribution and inventory of one cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "internal.open-cluster-management.io",
    version = "v1beta1",
    kind = "ManagedClusterInfo",
    namespaced,
    status = "ClusterInfoStatus",
    printcolumn = r#"{"name":"Vendor","type":"string","jsonPath":".status.kubeVendor"}"#,
    printcolumn = r#"{"name":"Cloud","type":"string","jsonPath":".status.cloudVendor"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfoSpec {
    /// Base64-encoded PEM the agent's logging endpoint is verified with
    #[serde(rename = "loggingCA", default, skip_serializing_if = "Option::is_none")]
    pub logging_ca: Option<String>,

    /// API server URL of the managed cluster as registered on the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_endpoint: Option<String>,
}

/// ManagedClusterInfo status, computed by the agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfoStatus {
    /// Conditions mirrored from the ManagedCluster plus `ManagedClusterInfoSynced`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Kubernetes version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    /// Kubernetes distribution vendor
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kube_vendor: String,

    /// Infrastructure vendor
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cloud_vendor: String,

    /// Cluster identifier
    #[serde(rename = "clusterID", default, skip_serializing_if = "String::is_empty")]
    pub cluster_id: String,

    /// Distribution details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_info: Option<DistributionInfo>,

    /// Web console URL
    #[serde(rename = "consoleURL", default, skip_serializing_if = "String::is_empty")]
    pub console_url: String,

    /// Node inventory
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_list: Vec<NodeStatus>,

    /// Where the agent's log endpoint is reachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_endpoint: Option<LoggingEndpoint>,

    /// Port of the agent's log endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging_port: Option<LoggingPort>,
}

/// Distribution details of a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionInfo {
    /// `OCP` or `Unknown`
    #[serde(rename = "type", default)]
    pub type_: String,

    /// OpenShift details, set when type is `OCP`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocp: Option<OcpDistributionInfo>,
}

/// OpenShift release and upgrade state
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OcpDistributionInfo {
    /// Current version, from the `version.openshift.io` claim
    #[serde(default)]
    pub version: String,

    /// Versions the cluster can upgrade to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_updates: Vec<String>,

    /// Version the cluster is converging to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub desired_version: String,

    /// True when the cluster reports Failing while not at the desired version
    #[serde(default)]
    pub upgrade_failed: bool,

    /// Update channel
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,

    /// Desired release
    #[serde(default)]
    pub desired: OcpVersionRelease,

    /// Releases the cluster can upgrade to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version_available_updates: Vec<OcpVersionRelease>,

    /// Past and current releases
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version_history: Vec<OcpVersionHistory>,

    /// API server URL and CA bundle the hub should use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_cluster_client_config: Option<ClientConfig>,
}

/// One OpenShift release
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OcpVersionRelease {
    /// Semantic version
    #[serde(default)]
    pub version: String,
    /// Release image pullspec
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    /// Errata URL
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Channels the release belongs to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
}

/// One entry of the OpenShift upgrade history
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OcpVersionHistory {
    /// Completed or Partial
    #[serde(default)]
    pub state: String,
    /// Semantic version
    #[serde(default)]
    pub version: String,
    /// Release image pullspec
    #[serde(default)]
    pub image: String,
    /// Whether the release signature was verified
    #[serde(default)]
    pub verified: bool,
}

/// API server endpoint of a managed cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// API server URL
    #[serde(default)]
    pub url: String,

    /// Base64-encoded PEM CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

/// Summary of one node
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Node name
    pub name: String,

    /// Role, zone, region and instance-type labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// `cpu` and `memory` capacity as quantity strings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, String>,

    /// Ready condition
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<NodeCondition>,
}

impl NodeStatus {
    /// Whether the node counts towards worker capacity
    ///
    /// A node with an explicit worker role is a worker even if it also
    /// carries a control plane role. Otherwise any control plane or infra
    /// role excludes it.
    pub fn is_worker(&self) -> bool {
        if self.labels.contains_key(LABEL_NODE_ROLE_WORKER) {
            return true;
        }
        ![
            LABEL_NODE_ROLE_MASTER,
            LABEL_NODE_ROLE_CONTROL_PLANE,
            LABEL_NODE_ROLE_INFRA,
        ]
        .iter()
        .any(|role| self.labels.contains_key(*role))
    }
}

/// A node condition reduced to type and status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct NodeCondition {
    /// Condition type, e.g. Ready
    #[serde(rename = "type")]
    pub type_: String,
    /// True, False or Unknown
    pub status: String,
}

/// Address of the agent's log endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingEndpoint {
    /// IP address, when the endpoint is published by address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    /// Hostname, when the endpoint is published by name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
}

/// Port of the agent's log endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingPort {
    /// Port name
    pub name: String,
    /// Port number
    pub port: i32,
    /// TCP or UDP
    pub protocol: String,
}

/// Kubernetes distribution vendors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KubeVendor {
    /// Red Hat OpenShift (self-managed, ROSA, ARO, ROKS)
    OpenShift,
    /// OpenShift Dedicated
    OpenShiftDedicated,
    /// Azure Kubernetes Service
    Aks,
    /// Elastic Kubernetes Service
    Eks,
    /// Google Kubernetes Engine
    Gke,
    /// IBM Cloud Private
    Icp,
    /// IBM Kubernetes Service
    Iks,
    /// Anything else
    Other,
}

impl KubeVendor {
    /// Wire value used in status and labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenShift => "OpenShift",
            Self::OpenShiftDedicated => "OpenShiftDedicated",
            Self::Aks => "AKS",
            Self::Eks => "EKS",
            Self::Gke => "GKE",
            Self::Icp => "ICP",
            Self::Iks => "IKS",
            Self::Other => "Other",
        }
    }

    /// Parse a wire value; unknown strings map to `Other`
    pub fn from_wire(s: &str) -> Self {
        match s {
            "OpenShift" => Self::OpenShift,
            "OpenShiftDedicated" => Self::OpenShiftDedicated,
            "AKS" => Self::Aks,
            "EKS" => Self::Eks,
            "GKE" => Self::Gke,
            "ICP" => Self::Icp,
            "IKS" => Self::Iks,
            _ => Self::Other,
        }
    }

    /// Map a `product.open-cluster-management.io` claim value to a vendor
    pub fn from_product(product: &str) -> Self {
        match product {
            "OpenShift" | "ROSA" | "ARO" | "ROKS" => Self::OpenShift,
            "OpenShiftDedicated" => Self::OpenShiftDedicated,
            other => Self::from_wire(other),
        }
    }

    /// Returns true for OpenShift and OpenShift Dedicated
    pub fn is_openshift(&self) -> bool {
        matches!(self, Self::OpenShift | Self::OpenShiftDedicated)
    }
}

impl std::fmt::Display for KubeVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Infrastructure vendors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloudVendor {
    /// IBM Cloud
    Ibm,
    /// IBM Z
    IbmZ,
    /// IBM Power
    IbmPower,
    /// Amazon Web Services
    Amazon,
    /// Microsoft Azure
    Azure,
    /// Google Cloud
    Google,
    /// VMware vSphere
    VSphere,
    /// OpenStack
    OpenStack,
    /// Red Hat Virtualization
    Rhv,
    /// Alibaba Cloud
    AlibabaCloud,
    /// Bare metal
    BareMetal,
    /// Anything else
    Other,
}

impl CloudVendor {
    /// Wire value used in status and labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ibm => "IBM",
            Self::IbmZ => "IBMZPlatform",
            Self::IbmPower => "IBMPowerPlatform",
            Self::Amazon => "Amazon",
            Self::Azure => "Azure",
            Self::Google => "Google",
            Self::VSphere => "VSphere",
            Self::OpenStack => "OpenStack",
            Self::Rhv => "RHV",
            Self::AlibabaCloud => "AlibabaCloud",
            Self::BareMetal => "BareMetal",
            Self::Other => "Other",
        }
    }

    /// Map a `platform.open-cluster-management.io` claim value to a vendor
    pub fn from_platform(platform: &str) -> Self {
        match platform {
            "AWS" => Self::Amazon,
            "GCP" => Self::Google,
            "Azure" => Self::Azure,
            "IBM" => Self::Ibm,
            "IBMZPlatform" => Self::IbmZ,
            "IBMPowerPlatform" => Self::IbmPower,
            "VSphere" => Self::VSphere,
            "OpenStack" => Self::OpenStack,
            "RHV" => Self::Rhv,
            "AlibabaCloud" => Self::AlibabaCloud,
            "BareMetal" => Self::BareMetal,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for CloudVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ManagedClusterInfo {
    /// Kube vendor parsed from status
    pub fn kube_vendor(&self) -> Option<KubeVendor> {
        self.status
            .as_ref()
            .filter(|s| !s.kube_vendor.is_empty())
            .map(|s| KubeVendor::from_wire(&s.kube_vendor))
    }
}
