//! Custom Resource Definitions for the multicluster foundation
//!
//! Hub-side kinds (actions, views, cluster infos, managed clusters) and the
//! managed-cluster-side `ClusterClaim`.

mod action;
mod cluster_claim;
mod cluster_info;
mod managed_cluster;
mod types;
mod view;

pub use action::{
    ActionSpec, ActionStatus, ActionType, KubeWorkSpec, ManagedClusterAction,
    CONDITION_ACTION_COMPLETED, REASON_ACTION_DONE, REASON_ACTION_TYPE_INVALID,
    REASON_CREATE_RESOURCE_FAILED, REASON_DELETE_RESOURCE_FAILED, REASON_UPDATE_RESOURCE_FAILED,
    USER_GROUP_ANNOTATION, USER_IDENTITY_ANNOTATION,
};
pub use cluster_claim::{
    claim_labels, is_create_only, ClusterClaim, ClusterClaimSpec, CLAIM_CONSOLE_URL,
    CLAIM_K8S_ID, CLAIM_KUBE_VERSION, CLAIM_OCP_CONTROL_PLANE_TOPOLOGY, CLAIM_OCP_ID,
    CLAIM_OCP_INFRA, CLAIM_OCP_OAUTH_REDIRECT_URIS, CLAIM_OCP_VERSION, CLAIM_PLATFORM,
    CLAIM_PRODUCT, CLAIM_REGION, CREATE_ONLY_CLAIMS, EXCLUDE_BACKUP_LABEL, HUB_MANAGED_LABEL,
};
pub use cluster_info::{
    ClientConfig, CloudVendor, ClusterInfoSpec, ClusterInfoStatus, DistributionInfo, KubeVendor,
    LoggingEndpoint, LoggingPort, ManagedClusterInfo, NodeCondition, NodeStatus,
    OcpDistributionInfo, OcpVersionHistory, OcpVersionRelease, CONDITION_INFO_SYNCED,
    DISTRIBUTION_TYPE_OCP, DISTRIBUTION_TYPE_UNKNOWN, LABEL_NODE_ROLE_CONTROL_PLANE,
    LABEL_NODE_ROLE_INFRA, LABEL_NODE_ROLE_MASTER, LABEL_NODE_ROLE_PREFIX, LABEL_NODE_ROLE_WORKER,
    REASON_INFO_SYNCED, REASON_INFO_SYNCED_FAILED,
};
pub use managed_cluster::{
    ManagedCluster, ManagedClusterClaim, ManagedClusterSpec, ManagedClusterStatus,
    CLUSTERSET_LABEL, CONDITION_CLUSTER_AVAILABLE,
};
pub use types::{
    conditions_equal, find_condition, is_condition_true, replace_condition, set_condition,
    Condition, ConditionStatus, NamespacedName,
};
pub use view::{
    ManagedClusterView, ViewScope, ViewSpec, ViewStatus, CONDITION_VIEW_PROCESSING,
    DEFAULT_UPDATE_INTERVAL, REASON_GET_RESOURCE_FAILED, REASON_RESOURCE_GVK_INVALID,
    REASON_RESOURCE_NAME_INVALID, REASON_RESOURCE_TYPE_INVALID,
};
