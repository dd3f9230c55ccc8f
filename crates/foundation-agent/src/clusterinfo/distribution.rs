//! OpenShift distribution details

use kube::ResourceExt;

use foundation_common::crd::{
    ClusterClaim, ClusterInfoStatus, DistributionInfo, KubeVendor, OcpDistributionInfo,
    OcpVersionHistory, OcpVersionRelease, CLAIM_OCP_VERSION, DISTRIBUTION_TYPE_OCP,
};
use foundation_common::Error;

use super::client_config;
use crate::managed::ManagedClusterReader;
use crate::openshift::{Release, OCP3_VERSION};

/// Fill in distribution info for OpenShift clusters; other vendors are left untouched
pub(crate) async fn sync(
    status: &mut ClusterInfoStatus,
    reader: &dyn ManagedClusterReader,
    claims: &[ClusterClaim],
) -> Result<(), Error> {
    let is_openshift = KubeVendor::from_wire(&status.kube_vendor).is_openshift();
    if !is_openshift {
        return Ok(());
    }

    let Some(cv) = reader.cluster_version().await? else {
        status.distribution_info = Some(DistributionInfo {
            type_: DISTRIBUTION_TYPE_OCP.to_string(),
            ocp: Some(OcpDistributionInfo {
                version: OCP3_VERSION.to_string(),
                ..Default::default()
            }),
        });
        return Ok(());
    };

    let version = claims
        .iter()
        .find(|c| c.name_any() == CLAIM_OCP_VERSION)
        .map(|c| c.spec.value.clone())
        .unwrap_or_default();

    let updates: Vec<OcpVersionRelease> = cv
        .status
        .available_updates
        .iter()
        .flatten()
        .filter(|r| !r.version.is_empty())
        .map(release)
        .collect();

    let desired_version = cv.status.desired.version.clone();
    let upgrade_failed = cv.is_failing() && desired_version != version;

    let ocp = OcpDistributionInfo {
        version,
        available_updates: updates.iter().map(|r| r.version.clone()).collect(),
        desired_version,
        upgrade_failed,
        channel: cv.spec.channel.clone(),
        desired: release(&cv.status.desired),
        version_available_updates: updates,
        version_history: cv
            .status
            .history
            .iter()
            .map(|h| OcpVersionHistory {
                state: h.state.clone(),
                version: h.version.clone(),
                image: h.image.clone(),
                verified: h.verified,
            })
            .collect(),
        managed_cluster_client_config: client_config::resolve(reader, &status.cloud_vendor).await,
    };

    status.distribution_info = Some(DistributionInfo {
        type_: DISTRIBUTION_TYPE_OCP.to_string(),
        ocp: Some(ocp),
    });
    Ok(())
}

fn release(r: &Release) -> OcpVersionRelease {
    OcpVersionRelease {
        version: r.version.clone(),
        image: r.image.clone(),
        url: r.url.clone(),
        channels: r.channels.clone(),
    }
}

/// Sort the order-insensitive lists so equal content compares equal
pub(crate) fn normalize(status: &mut ClusterInfoStatus) {
    if let Some(ocp) = status
        .distribution_info
        .as_mut()
        .and_then(|d| d.ocp.as_mut())
    {
        ocp.available_updates.sort();
        ocp.version_available_updates
            .sort_by(|a, b| a.version.cmp(&b.version));
        ocp.version_history.sort_by(|a, b| a.version.cmp(&b.version));
    }
}
