//! The slice of OpenShift `config.openshift.io/v1` objects the agent reads
//!
//! These are fetched through the dynamic client and deserialized leniently:
//! every field defaults so older clusters with partial status still parse.

use kube::api::GroupVersionKind;
use serde::Deserialize;

/// Name of the singleton config objects (`infrastructures/cluster`, `apiservers/cluster`)
pub const CLUSTER_CONFIG_NAME: &str = "cluster";
/// Name of the singleton `clusterversions/version`
pub const CLUSTER_VERSION_NAME: &str = "version";
/// Version recorded for OpenShift 3.x, which has no ClusterVersion
pub const OCP3_VERSION: &str = "3";

fn config_kind(kind: &str) -> GroupVersionKind {
    GroupVersionKind::gvk("config.openshift.io", "v1", kind)
}

/// `config.openshift.io/v1 ClusterVersion`
pub fn cluster_version_gvk() -> GroupVersionKind {
    config_kind("ClusterVersion")
}

/// `config.openshift.io/v1 Infrastructure`
pub fn infrastructure_gvk() -> GroupVersionKind {
    config_kind("Infrastructure")
}

/// `config.openshift.io/v1 APIServer`
pub fn api_server_gvk() -> GroupVersionKind {
    config_kind("APIServer")
}

/// `project.openshift.io/v1 Project`, present on every OpenShift cluster
pub fn project_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("project.openshift.io", "v1", "Project")
}

/// `managed.openshift.io/v1alpha1 SubjectPermission`, present on OpenShift Dedicated
pub fn subject_permission_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("managed.openshift.io", "v1alpha1", "SubjectPermission")
}

/// `aro.openshift.io/v1alpha1 Cluster`, present on Azure Red Hat OpenShift
pub fn aro_cluster_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("aro.openshift.io", "v1alpha1", "Cluster")
}

/// `oauth.openshift.io/v1 OAuthClient`
pub fn oauth_client_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("oauth.openshift.io", "v1", "OAuthClient")
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersion {
    #[serde(default)]
    pub spec: ClusterVersionSpec,
    #[serde(default)]
    pub status: ClusterVersionStatus,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionSpec {
    #[serde(rename = "clusterID", default)]
    pub cluster_id: String,
    #[serde(default)]
    pub channel: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionStatus {
    #[serde(default)]
    pub desired: Release,
    #[serde(default)]
    pub available_updates: Option<Vec<Release>>,
    #[serde(default)]
    pub history: Vec<UpdateHistory>,
    #[serde(default)]
    pub conditions: Vec<ClusterVersionCondition>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Release {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub channels: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct UpdateHistory {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ClusterVersionCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
}

impl ClusterVersion {
    /// Version of the first history entry that finished rolling out
    pub fn completed_version(&self) -> Option<&str> {
        self.status
            .history
            .iter()
            .find(|h| h.state == "Completed")
            .map(|h| h.version.as_str())
    }

    /// True when the `Failing` condition is True
    pub fn is_failing(&self) -> bool {
        self.status
            .conditions
            .iter()
            .find(|c| c.type_ == "Failing")
            .is_some_and(|c| c.status == "True")
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Infrastructure {
    #[serde(default)]
    pub status: InfrastructureStatus,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    #[serde(default)]
    pub infrastructure_name: String,
    #[serde(rename = "apiServerURL", default)]
    pub api_server_url: String,
    #[serde(default)]
    pub control_plane_topology: String,
    #[serde(default)]
    pub platform_status: PlatformStatus,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct PlatformStatus {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub aws: Option<RegionStatus>,
    #[serde(default)]
    pub gcp: Option<RegionStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct RegionStatus {
    #[serde(default)]
    pub region: String,
}

impl Infrastructure {
    /// Region reported by the platform status, for AWS and GCP only
    pub fn region(&self) -> Option<&str> {
        let platform = &self.status.platform_status;
        let region = match platform.type_.as_str() {
            "AWS" => platform.aws.as_ref(),
            "GCP" => platform.gcp.as_ref(),
            _ => None,
        };
        region.map(|r| r.region.as_str()).filter(|r| !r.is_empty())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServer {
    #[serde(default)]
    pub spec: ApiServerSpec,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerSpec {
    #[serde(default)]
    pub serving_certs: ServingCerts,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServingCerts {
    #[serde(default)]
    pub named_certificates: Vec<NamedCertificate>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamedCertificate {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub serving_certificate: SecretReference,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SecretReference {
    #[serde(default)]
    pub name: String,
}

impl ApiServer {
    /// Secret holding the serving certificate for `host`, matched case-insensitively
    pub fn serving_secret_for(&self, host: &str) -> Option<&str> {
        self.spec
            .serving_certs
            .named_certificates
            .iter()
            .find(|nc| nc.names.iter().any(|n| n.eq_ignore_ascii_case(host)))
            .map(|nc| nc.serving_certificate.name.as_str())
            .filter(|n| !n.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cluster_version_parses_partial_status() {
        let cv: ClusterVersion = serde_json::from_value(json!({
            "spec": {"clusterID": "ffd989a0", "channel": "stable-4.14"},
            "status": {
                "desired": {"version": "4.14.3"},
                "history": [
                    {"state": "Partial", "version": "4.14.3"},
                    {"state": "Completed", "version": "4.14.2", "verified": true}
                ],
                "conditions": [{"type": "Failing", "status": "True"}]
            }
        }))
        .expect("parse");
        assert_eq!(cv.spec.cluster_id, "ffd989a0");
        assert_eq!(cv.completed_version(), Some("4.14.2"));
        assert!(cv.is_failing());
        assert!(cv.status.available_updates.is_none());
    }

    #[test]
    fn infrastructure_region_only_for_aws_and_gcp() {
        let aws: Infrastructure = serde_json::from_value(json!({
            "status": {"platformStatus": {"type": "AWS", "aws": {"region": "us-east-1"}}}
        }))
        .expect("parse");
        assert_eq!(aws.region(), Some("us-east-1"));

        let azure: Infrastructure = serde_json::from_value(json!({
            "status": {"platformStatus": {"type": "Azure"}}
        }))
        .expect("parse");
        assert_eq!(azure.region(), None);
    }

    #[test]
    fn serving_secret_matches_host_case_insensitively() {
        let apiserver: ApiServer = serde_json::from_value(json!({
            "spec": {"servingCerts": {"namedCertificates": [
                {"names": ["API.Example.com"], "servingCertificate": {"name": "api-cert"}}
            ]}}
        }))
        .expect("parse");
        assert_eq!(apiserver.serving_secret_for("api.example.com"), Some("api-cert"));
        assert_eq!(apiserver.serving_secret_for("other.example.com"), None);
    }
}
