//! ClusterClaim CRD
//!
//! Claims are cluster-scoped name/value facts on the managed cluster.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Claim: Kubernetes cluster identifier (create-only)
pub const CLAIM_K8S_ID: &str = "id.k8s.io";
/// Claim: OpenShift cluster identifier
pub const CLAIM_OCP_ID: &str = "id.openshift.io";
/// Claim: OpenShift version
pub const CLAIM_OCP_VERSION: &str = "version.openshift.io";
/// Claim: OpenShift infrastructure name, as JSON
pub const CLAIM_OCP_INFRA: &str = "infrastructure.openshift.io";
/// Claim: OAuth redirect URIs of the challenging client
pub const CLAIM_OCP_OAUTH_REDIRECT_URIS: &str = "oauthredirecturis.openshift.io";
/// Claim: OpenShift control plane topology
pub const CLAIM_OCP_CONTROL_PLANE_TOPOLOGY: &str = "controlplanetopology.openshift.io";
/// Claim: web console URL
pub const CLAIM_CONSOLE_URL: &str = "consoleurl.cluster.open-cluster-management.io";
/// Claim: region
pub const CLAIM_REGION: &str = "region.open-cluster-management.io";
/// Claim: Kubernetes version
pub const CLAIM_KUBE_VERSION: &str = "kubeversion.open-cluster-management.io";
/// Claim: platform tag
pub const CLAIM_PLATFORM: &str = "platform.open-cluster-management.io";
/// Claim: product tag
pub const CLAIM_PRODUCT: &str = "product.open-cluster-management.io";

/// Label marking claims owned by the syncer
pub const HUB_MANAGED_LABEL: &str = "open-cluster-management.io/hub-managed";
/// Label excluding claims from backup
pub const EXCLUDE_BACKUP_LABEL: &str = "velero.io/exclude-from-backup";

/// Claims written once and never updated
pub const CREATE_ONLY_CLAIMS: &[&str] = &[CLAIM_K8S_ID];

/// ClusterClaim advertises one fact about the managed cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ClusterClaim",
    printcolumn = r#"{"name":"Value","type":"string","jsonPath":".spec.value"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClaimSpec {
    /// Value of the claim
    #[serde(default)]
    pub value: String,
}

/// Labels stamped on every syncer-owned claim
pub fn claim_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (HUB_MANAGED_LABEL.to_string(), String::new()),
        (EXCLUDE_BACKUP_LABEL.to_string(), "true".to_string()),
    ])
}

/// Returns true if the claim is only created, never updated
pub fn is_create_only(name: &str) -> bool {
    CREATE_ONLY_CLAIMS.contains(&name)
}
