//! Discovery of the facts published as ClusterClaims

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use foundation_common::crd::{
    claim_labels, ClusterClaim, ClusterClaimSpec, CLAIM_CONSOLE_URL, CLAIM_K8S_ID,
    CLAIM_KUBE_VERSION, CLAIM_OCP_CONTROL_PLANE_TOPOLOGY, CLAIM_OCP_ID, CLAIM_OCP_INFRA,
    CLAIM_OCP_OAUTH_REDIRECT_URIS, CLAIM_OCP_VERSION, CLAIM_PLATFORM, CLAIM_PRODUCT, CLAIM_REGION,
};
use foundation_common::Error;

use crate::managed::ManagedClusterReader;
use crate::openshift::{aro_cluster_gvk, project_gvk, subject_permission_gvk, OCP3_VERSION};

pub(crate) const PLATFORM_AWS: &str = "AWS";
pub(crate) const PLATFORM_GCP: &str = "GCP";
pub(crate) const PLATFORM_AZURE: &str = "Azure";
pub(crate) const PLATFORM_IBM: &str = "IBM";
pub(crate) const PLATFORM_IBMP: &str = "IBMPowerPlatform";
pub(crate) const PLATFORM_IBMZ: &str = "IBMZPlatform";
pub(crate) const PLATFORM_OPENSTACK: &str = "OpenStack";
pub(crate) const PLATFORM_VSPHERE: &str = "VSphere";
pub(crate) const PLATFORM_RHV: &str = "RHV";
pub(crate) const PLATFORM_ALIBABA: &str = "AlibabaCloud";
pub(crate) const PLATFORM_BAREMETAL: &str = "BareMetal";
pub(crate) const PLATFORM_OTHER: &str = "Other";

pub(crate) const PRODUCT_AKS: &str = "AKS";
pub(crate) const PRODUCT_EKS: &str = "EKS";
pub(crate) const PRODUCT_GKE: &str = "GKE";
pub(crate) const PRODUCT_ICP: &str = "ICP";
pub(crate) const PRODUCT_IKS: &str = "IKS";
pub(crate) const PRODUCT_OPENSHIFT: &str = "OpenShift";
pub(crate) const PRODUCT_OSD: &str = "OpenShiftDedicated";
pub(crate) const PRODUCT_ROSA: &str = "ROSA";
pub(crate) const PRODUCT_ARO: &str = "ARO";
pub(crate) const PRODUCT_ROKS: &str = "ROKS";
pub(crate) const PRODUCT_OTHER: &str = "Other";

const REGION_LABEL: &str = "topology.kubernetes.io/region";
const LEGACY_REGION_LABEL: &str = "failure-domain.beta.kubernetes.io/region";

/// Build a syncer-owned claim
pub(crate) fn new_claim(name: &str, value: impl Into<String>) -> ClusterClaim {
    let mut claim = ClusterClaim::new(
        name,
        ClusterClaimSpec {
            value: value.into(),
        },
    );
    claim.metadata.labels = Some(claim_labels());
    claim
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfraConfig<'a> {
    infra_name: &'a str,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConsoleConfig {
    #[serde(default)]
    cluster_info: ConsoleClusterInfo,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConsoleClusterInfo {
    #[serde(default)]
    console_base_address: String,
}

/// Values that never change for the life of a cluster, remembered once known
#[derive(Default)]
struct Cache {
    platform_product: Option<(String, String)>,
    cluster_id: Option<String>,
}

/// Computes the claims the cluster should advertise
pub struct ClaimProbe {
    reader: Arc<dyn ManagedClusterReader>,
    cache: Mutex<Cache>,
}

impl ClaimProbe {
    /// Create a probe over the managed cluster
    pub fn new(reader: Arc<dyn ManagedClusterReader>) -> Self {
        Self {
            reader,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// The full set of claims, in a stable order
    pub async fn claims(&self) -> Result<Vec<ClusterClaim>, Error> {
        let reader = self.reader.as_ref();
        let is_openshift = reader.has_kind(&project_gvk()).await?;
        let kube_version = reader.server_version().await?;

        let (platform, product) = self.platform_product(&kube_version, is_openshift).await?;
        let mut claims = vec![
            new_claim(CLAIM_PLATFORM, platform),
            new_claim(CLAIM_PRODUCT, product),
        ];

        let (ocp_version, ocp_id) = self.ocp_version(is_openshift).await?;
        claims.push(new_claim(
            CLAIM_K8S_ID,
            self.cluster_id(ocp_id.as_deref()).await,
        ));
        if let Some(id) = ocp_id {
            claims.push(new_claim(CLAIM_OCP_ID, id));
        }
        if let Some(version) = ocp_version {
            claims.push(new_claim(CLAIM_OCP_VERSION, version));
        }

        if is_openshift {
            if let Some(uris) = reader.oauth_redirect_uris().await? {
                if !uris.is_empty() {
                    claims.push(new_claim(CLAIM_OCP_OAUTH_REDIRECT_URIS, uris.join(",")));
                }
            }
        }

        let infra = if is_openshift {
            reader.infrastructure().await?
        } else {
            None
        };
        if let Some(infra) = &infra {
            let raw = serde_json::to_string(&InfraConfig {
                infra_name: &infra.status.infrastructure_name,
            })?;
            claims.push(new_claim(CLAIM_OCP_INFRA, raw));
        }

        if is_openshift {
            if let Some(url) = self.console_url().await? {
                claims.push(new_claim(CLAIM_CONSOLE_URL, url));
            }
        }

        claims.push(new_claim(CLAIM_KUBE_VERSION, kube_version));

        let region = match infra.as_ref().and_then(|i| i.region()) {
            Some(region) => region.to_string(),
            None => node_region(&reader.list_nodes().await?),
        };
        if !region.is_empty() {
            claims.push(new_claim(CLAIM_REGION, region));
        }

        if let Some(topology) = infra
            .as_ref()
            .map(|i| i.status.control_plane_topology.as_str())
            .filter(|t| !t.is_empty())
        {
            claims.push(new_claim(CLAIM_OCP_CONTROL_PLANE_TOPOLOGY, topology));
        }

        Ok(claims)
    }

    async fn platform_product(
        &self,
        kube_version: &str,
        is_openshift: bool,
    ) -> Result<(String, String), Error> {
        if let Some(cached) = self.cache.lock().platform_product.clone() {
            return Ok(cached);
        }

        let (platform, product) =
            detect_platform_product(self.reader.as_ref(), kube_version, is_openshift).await?;
        if platform != PLATFORM_OTHER && product != PRODUCT_OTHER {
            self.cache.lock().platform_product = Some((platform.to_string(), product.to_string()));
        }
        Ok((platform.to_string(), product.to_string()))
    }

    /// OpenShift version and cluster id, both absent on other distributions
    async fn ocp_version(&self, is_openshift: bool) -> Result<(Option<String>, Option<String>), Error> {
        if !is_openshift {
            return Ok((None, None));
        }
        let Some(cv) = self.reader.cluster_version().await? else {
            return Ok((Some(OCP3_VERSION.to_string()), None));
        };
        let version = cv.completed_version().map(str::to_string).filter(|v| !v.is_empty());
        let id = Some(cv.spec.cluster_id).filter(|id| !id.is_empty());
        Ok((version, id))
    }

    /// OpenShift cluster id, else the kube-system namespace uid, else a random id
    async fn cluster_id(&self, ocp_id: Option<&str>) -> String {
        if let Some(id) = self.cache.lock().cluster_id.clone() {
            return id;
        }

        let id = match ocp_id {
            Some(id) => id.to_string(),
            None => match self.reader.namespace("kube-system").await {
                Ok(Some(ns)) => ns.metadata.uid.unwrap_or_default(),
                Ok(None) => String::new(),
                Err(e) => {
                    warn!(error = %e, "failed to get kube-system namespace");
                    String::new()
                }
            },
        };
        let id = if id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            id
        };
        self.cache.lock().cluster_id = Some(id.clone());
        id
    }

    async fn console_url(&self) -> Result<Option<String>, Error> {
        let Some(cm) = self
            .reader
            .config_map("openshift-console", "console-config")
            .await?
        else {
            return Ok(None);
        };
        let Some(raw) = cm.data.as_ref().and_then(|d| d.get("console-config.yaml")) else {
            return Ok(None);
        };
        let config: ConsoleConfig = serde_yaml::from_str(raw).unwrap_or_else(|e| {
            debug!(error = %e, "unparseable console config");
            ConsoleConfig::default()
        });
        Ok(Some(config.cluster_info.console_base_address).filter(|u| !u.is_empty()))
    }
}

/// Work out platform and product
///
/// Managed offerings are recognized from the version string first, then the
/// OpenShift flavours, then the infrastructure platform, and finally the
/// first node's architecture and provider id.
async fn detect_platform_product(
    reader: &dyn ManagedClusterReader,
    kube_version: &str,
    is_openshift: bool,
) -> Result<(&'static str, &'static str), Error> {
    let git_version = kube_version.to_uppercase();
    for (marker, platform) in [
        (PRODUCT_IKS, PLATFORM_IBM),
        (PRODUCT_ICP, PLATFORM_IBM),
        (PRODUCT_EKS, PLATFORM_AWS),
        (PRODUCT_GKE, PLATFORM_GCP),
    ] {
        if git_version.contains(marker) {
            return Ok((platform, marker));
        }
    }

    if reader
        .config_map("openshift-config", "rosa-brand-logo")
        .await?
        .is_some()
    {
        return Ok((PLATFORM_AWS, PRODUCT_ROSA));
    }
    if reader.has_kind(&aro_cluster_gvk()).await? {
        return Ok((PLATFORM_AZURE, PRODUCT_ARO));
    }

    let mut product = if is_openshift {
        PRODUCT_OPENSHIFT
    } else {
        PRODUCT_OTHER
    };
    if reader.has_kind(&subject_permission_gvk()).await? {
        product = PRODUCT_OSD;
    }

    if is_openshift {
        if let Some(infra) = reader.infrastructure().await? {
            let platform = match infra.status.platform_status.type_.as_str() {
                "AWS" => Some(PLATFORM_AWS),
                "Azure" => Some(PLATFORM_AZURE),
                "AlibabaCloud" => Some(PLATFORM_ALIBABA),
                "oVirt" => Some(PLATFORM_RHV),
                "GCP" => Some(PLATFORM_GCP),
                "VSphere" => Some(PLATFORM_VSPHERE),
                "OpenStack" => Some(PLATFORM_OPENSTACK),
                "BareMetal" => Some(PLATFORM_BAREMETAL),
                "IBMCloud" => return Ok((PLATFORM_IBM, PRODUCT_ROKS)),
                _ => None,
            };
            if let Some(platform) = platform {
                return Ok((platform, product));
            }
        }
    }

    let nodes = reader.list_nodes().await?;
    let node = nodes.first().ok_or_else(|| {
        Error::precondition("failed to get nodes list, the count of nodes is 0")
    })?;
    let architecture = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|i| i.architecture.as_str())
        .unwrap_or_default();
    let provider_id = node
        .spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .unwrap_or_default();

    let platform = if architecture == "s390x" {
        PLATFORM_IBMZ
    } else if architecture == "ppc64le" {
        PLATFORM_IBMP
    } else if provider_id.starts_with("ibm") {
        PLATFORM_IBM
    } else if provider_id.starts_with("azure") {
        if product == PRODUCT_OTHER {
            return Ok((PLATFORM_AZURE, PRODUCT_AKS));
        }
        PLATFORM_AZURE
    } else if provider_id.starts_with("aws") {
        PLATFORM_AWS
    } else if provider_id.starts_with("gce") {
        PLATFORM_GCP
    } else if provider_id.starts_with("vsphere") {
        PLATFORM_VSPHERE
    } else if provider_id.starts_with("openstack") {
        PLATFORM_OPENSTACK
    } else {
        PLATFORM_OTHER
    };
    Ok((platform, product))
}

/// Regions from node labels, deduplicated and comma-joined
fn node_region(nodes: &[Node]) -> String {
    let regions: BTreeSet<&str> = nodes
        .iter()
        .filter_map(|n| n.metadata.labels.as_ref())
        .filter_map(|labels: &BTreeMap<String, String>| {
            labels
                .get(REGION_LABEL)
                .or_else(|| labels.get(LEGACY_REGION_LABEL))
                .map(String::as_str)
        })
        .collect();
    regions.into_iter().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::MockManagedClusterReader;
    use crate::openshift::{ClusterVersion, Infrastructure};
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use kube::api::GroupVersionKind;
    use kube::ResourceExt;
    use rstest::rstest;
    use serde_json::json;

    fn node(labels: serde_json::Value, arch: &str, provider_id: &str) -> Node {
        serde_json::from_value(json!({
            "metadata": {"name": "n", "labels": labels},
            "spec": {"providerID": provider_id},
            "status": {"nodeInfo": {
                "architecture": arch,
                "bootID": "", "containerRuntimeVersion": "", "kernelVersion": "",
                "kubeProxyVersion": "", "kubeletVersion": "", "machineID": "",
                "operatingSystem": "linux", "osImage": "", "systemUUID": ""
            }}
        }))
        .expect("node")
    }

    fn value_of<'a>(claims: &'a [ClusterClaim], name: &str) -> Option<&'a str> {
        claims
            .iter()
            .find(|c| c.name_any() == name)
            .map(|c| c.spec.value.as_str())
    }

    /// A plain Kubernetes cluster with one node
    fn vanilla_reader(git_version: &'static str, arch: &'static str, provider: &'static str) -> MockManagedClusterReader {
        let mut reader = MockManagedClusterReader::new();
        reader.expect_has_kind().returning(|_| Ok(false));
        reader
            .expect_server_version()
            .returning(move || Ok(git_version.to_string()));
        reader.expect_config_map().returning(|_, _| Ok(None));
        reader.expect_list_nodes().returning(move || {
            Ok(vec![node(
                json!({"topology.kubernetes.io/region": "eastus"}),
                arch,
                provider,
            )])
        });
        reader.expect_namespace().returning(|_| {
            Ok(Some(
                serde_json::from_value::<Namespace>(json!({"metadata": {"uid": "ks-uid"}}))
                    .expect("ns"),
            ))
        });
        reader
    }

    #[rstest]
    #[case("v1.28.3-eks-4f4795d", "amd64", "aws:///i-1", "AWS", "EKS")]
    #[case("v1.28.3-gke.1286000", "amd64", "gce://p/z/n", "GCP", "GKE")]
    #[case("v1.28.3+IKS", "amd64", "ibm://x", "IBM", "IKS")]
    #[case("v1.28.3", "amd64", "azure:///subscriptions/x", "Azure", "AKS")]
    #[case("v1.28.3", "s390x", "", "IBMZPlatform", "Other")]
    #[case("v1.28.3", "amd64", "vsphere://x", "VSphere", "Other")]
    #[case("v1.28.3", "amd64", "kind://docker/kind", "Other", "Other")]
    #[tokio::test]
    async fn detects_platform_and_product_on_kubernetes(
        #[case] git_version: &'static str,
        #[case] arch: &'static str,
        #[case] provider: &'static str,
        #[case] platform: &str,
        #[case] product: &str,
    ) {
        let probe = ClaimProbe::new(Arc::new(vanilla_reader(git_version, arch, provider)));
        let claims = probe.claims().await.expect("claims");
        assert_eq!(value_of(&claims, CLAIM_PLATFORM), Some(platform));
        assert_eq!(value_of(&claims, CLAIM_PRODUCT), Some(product));
    }

    /// Story: A plain cluster advertises identity from kube-system and region from nodes
    #[tokio::test]
    async fn story_kubernetes_cluster_claims() {
        let probe = ClaimProbe::new(Arc::new(vanilla_reader("v1.29.1", "amd64", "aws:///i-1")));
        let claims = probe.claims().await.expect("claims");

        assert_eq!(value_of(&claims, CLAIM_K8S_ID), Some("ks-uid"));
        assert_eq!(value_of(&claims, CLAIM_KUBE_VERSION), Some("v1.29.1"));
        assert_eq!(value_of(&claims, CLAIM_REGION), Some("eastus"));
        assert_eq!(value_of(&claims, CLAIM_OCP_VERSION), None);
        assert_eq!(value_of(&claims, CLAIM_CONSOLE_URL), None);
        assert!(claims.iter().all(|c| c.labels().contains_key("open-cluster-management.io/hub-managed")));
    }

    fn openshift_reader() -> MockManagedClusterReader {
        let mut reader = MockManagedClusterReader::new();
        reader
            .expect_has_kind()
            .returning(|gvk: &GroupVersionKind| Ok(gvk.group == "project.openshift.io"));
        reader
            .expect_server_version()
            .returning(|| Ok("v1.27.6+f67aeb3".to_string()));
        reader.expect_config_map().returning(|ns, name| {
            if ns == "openshift-console" && name == "console-config" {
                Ok(Some(
                    serde_json::from_value::<ConfigMap>(json!({"data": {
                        "console-config.yaml": "apiVersion: console.openshift.io/v1\nclusterInfo:\n  consoleBaseAddress: https://console-openshift-console.apps.example.com\n  masterPublicURL: https://api.example.com:6443\n"
                    }}))
                    .expect("cm"),
                ))
            } else {
                Ok(None)
            }
        });
        reader.expect_infrastructure().returning(|| {
            Ok(Some(
                serde_json::from_value::<Infrastructure>(json!({"status": {
                    "infrastructureName": "ocp-7xk2p",
                    "controlPlaneTopology": "HighlyAvailable",
                    "platformStatus": {"type": "AWS", "aws": {"region": "us-east-2"}}
                }}))
                .expect("infra"),
            ))
        });
        reader.expect_cluster_version().returning(|| {
            Ok(Some(
                serde_json::from_value::<ClusterVersion>(json!({
                    "spec": {"clusterID": "ocp-id"},
                    "status": {"history": [{"state": "Completed", "version": "4.14.2"}]}
                }))
                .expect("cv"),
            ))
        });
        reader
            .expect_oauth_redirect_uris()
            .returning(|| Ok(Some(vec!["https://a".to_string(), "https://b".to_string()])));
        reader
    }

    /// Story: An OpenShift cluster advertises its release, infra and console
    #[tokio::test]
    async fn story_openshift_cluster_claims() {
        let probe = ClaimProbe::new(Arc::new(openshift_reader()));
        let claims = probe.claims().await.expect("claims");

        assert_eq!(value_of(&claims, CLAIM_PLATFORM), Some("AWS"));
        assert_eq!(value_of(&claims, CLAIM_PRODUCT), Some("OpenShift"));
        assert_eq!(value_of(&claims, CLAIM_K8S_ID), Some("ocp-id"));
        assert_eq!(value_of(&claims, CLAIM_OCP_ID), Some("ocp-id"));
        assert_eq!(value_of(&claims, CLAIM_OCP_VERSION), Some("4.14.2"));
        assert_eq!(value_of(&claims, CLAIM_OCP_INFRA), Some(r#"{"infraName":"ocp-7xk2p"}"#));
        assert_eq!(value_of(&claims, CLAIM_OCP_OAUTH_REDIRECT_URIS), Some("https://a,https://b"));
        assert_eq!(
            value_of(&claims, CLAIM_CONSOLE_URL),
            Some("https://console-openshift-console.apps.example.com")
        );
        assert_eq!(value_of(&claims, CLAIM_REGION), Some("us-east-2"));
        assert_eq!(value_of(&claims, CLAIM_OCP_CONTROL_PLANE_TOPOLOGY), Some("HighlyAvailable"));
    }

    #[tokio::test]
    async fn rosa_is_detected_from_brand_configmap() {
        let mut reader = MockManagedClusterReader::new();
        reader.expect_config_map().returning(|ns, name| {
            Ok((ns == "openshift-config" && name == "rosa-brand-logo").then(ConfigMap::default))
        });
        let detected = detect_platform_product(&reader, "v1.27.6", true)
            .await
            .expect("detect");
        assert_eq!(detected, (PLATFORM_AWS, PRODUCT_ROSA));
    }

    #[tokio::test]
    async fn no_nodes_is_an_error() {
        let mut reader = MockManagedClusterReader::new();
        reader.expect_config_map().returning(|_, _| Ok(None));
        reader.expect_has_kind().returning(|_| Ok(false));
        reader.expect_list_nodes().returning(|| Ok(vec![]));
        assert!(detect_platform_product(&reader, "v1.28.0", false).await.is_err());
    }

    #[test]
    fn node_regions_are_sorted_and_deduplicated() {
        let nodes = vec![
            node(json!({"topology.kubernetes.io/region": "west"}), "amd64", ""),
            node(json!({"failure-domain.beta.kubernetes.io/region": "east"}), "amd64", ""),
            node(json!({"topology.kubernetes.io/region": "west"}), "amd64", ""),
            node(json!({}), "amd64", ""),
        ];
        assert_eq!(node_region(&nodes), "east,west");
    }
}
