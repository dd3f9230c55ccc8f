//! Identity fields copied from ClusterClaims

use foundation_common::crd::{
    ClusterClaim, ClusterInfoStatus, CloudVendor, KubeVendor, CLAIM_CONSOLE_URL, CLAIM_KUBE_VERSION,
    CLAIM_OCP_ID, CLAIM_PLATFORM, CLAIM_PRODUCT,
};
use kube::ResourceExt;

/// Copy the claim-backed fields into the status
pub(crate) fn apply_claims(status: &mut ClusterInfoStatus, claims: &[ClusterClaim]) {
    for claim in claims {
        let value = &claim.spec.value;
        match claim.name_any().as_str() {
            CLAIM_CONSOLE_URL => status.console_url = value.clone(),
            CLAIM_KUBE_VERSION => status.version = value.clone(),
            CLAIM_OCP_ID => status.cluster_id = value.clone(),
            CLAIM_PRODUCT => status.kube_vendor = KubeVendor::from_product(value).to_string(),
            CLAIM_PLATFORM => status.cloud_vendor = CloudVendor::from_platform(value).to_string(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundation_common::crd::{ClusterClaimSpec, CLAIM_REGION};

    fn claim(name: &str, value: &str) -> ClusterClaim {
        ClusterClaim::new(
            name,
            ClusterClaimSpec {
                value: value.to_string(),
            },
        )
    }

    #[test]
    fn maps_claims_through_vendor_tables() {
        let claims = vec![
            claim(CLAIM_CONSOLE_URL, "https://console.apps.example.com"),
            claim(CLAIM_KUBE_VERSION, "v1.27.6+f67aeb3"),
            claim(CLAIM_OCP_ID, "ffd989a0-8391-426d-98ac-86ae6d051433"),
            claim(CLAIM_PRODUCT, "ROSA"),
            claim(CLAIM_PLATFORM, "AWS"),
            claim(CLAIM_REGION, "us-east-1"),
        ];
        let mut status = ClusterInfoStatus::default();
        apply_claims(&mut status, &claims);

        assert_eq!(status.console_url, "https://console.apps.example.com");
        assert_eq!(status.version, "v1.27.6+f67aeb3");
        assert_eq!(status.cluster_id, "ffd989a0-8391-426d-98ac-86ae6d051433");
        assert_eq!(status.kube_vendor, "OpenShift");
        assert_eq!(status.cloud_vendor, "Amazon");
    }

    #[test]
    fn missing_claims_leave_fields_alone() {
        let mut status = ClusterInfoStatus {
            version: "v1.30.0".to_string(),
            ..Default::default()
        };
        apply_claims(&mut status, &[claim(CLAIM_PLATFORM, "Nutanix")]);
        assert_eq!(status.version, "v1.30.0");
        assert_eq!(status.cloud_vendor, "Other");
    }
}
