//! Aggregator request paths
//!
//! `/apis/proxy.open-cluster-management.io/v1beta1/namespaces/{ns}/clusterstatuses/{cluster}/aggregator/{sub-resource}/{tail...}`

use crate::error::{Error, Result};

/// API group served by the proxy
pub const API_GROUP: &str = "proxy.open-cluster-management.io";

/// Version of the API group
pub const API_VERSION: &str = "v1beta1";

/// Resource whose subresources are served
pub const RESOURCE: &str = "clusterstatuses";

/// `{API_GROUP}/{API_VERSION}`
pub fn group_version() -> String {
    format!("{}/{}", API_GROUP, API_VERSION)
}

const NAMESPACE_INDEX: usize = 4;
const CLUSTER_INDEX: usize = 6;
const SUB_RESOURCE_INDEX: usize = 8;

/// A request path addressed to the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorPath {
    /// Cluster namespace
    pub namespace: String,
    /// Cluster name, the object id
    pub cluster: String,
    /// Sub-resource selecting the backing service
    pub sub_resource: String,
    /// Path forwarded below the service's root
    pub tail: String,
}

/// The segment naming the sub-resource
pub fn sub_resource(path: &str) -> Result<&str> {
    let trimmed = path.trim_matches('/');
    let forbidden = || Error::Forbidden {
        path: path.to_string(),
    };
    if trimmed.is_empty() {
        return Err(forbidden());
    }
    trimmed
        .split('/')
        .nth(SUB_RESOURCE_INDEX)
        .ok_or_else(forbidden)
}

impl AggregatorPath {
    /// Split a request path into its parts
    pub fn parse(path: &str) -> Result<Self> {
        let sub_resource = sub_resource(path)?.to_string();
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();

        let mut tail = parts[SUB_RESOURCE_INDEX + 1..].join("/");
        if path.ends_with('/') && !tail.is_empty() {
            tail.push('/');
        }

        Ok(Self {
            namespace: parts[NAMESPACE_INDEX].to_string(),
            cluster: parts[CLUSTER_INDEX].to_string(),
            sub_resource,
            tail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PREFIX: &str =
        "/apis/proxy.open-cluster-management.io/v1beta1/namespaces/c1/clusterstatuses/c1/aggregator";

    #[rstest]
    #[case("")]
    #[case("/")]
    #[case("/apis/proxy.open-cluster-management.io/v1beta1")]
    #[case(PREFIX)]
    #[case("/apis/proxy.open-cluster-management.io/v1beta1/namespaces/c1/clusterstatuses/c1/aggregator/")]
    fn short_paths_are_forbidden(#[case] path: &str) {
        let err = sub_resource(path).expect_err("forbidden");
        assert!(matches!(err, Error::Forbidden { .. }));
        assert!(err.to_string().contains("wrong path format"));
    }

    #[test]
    fn ninth_segment_is_the_sub_resource() {
        assert_eq!(sub_resource(&format!("{PREFIX}/sync")).expect("sub"), "sync");
        assert_eq!(sub_resource(&format!("{PREFIX}/sync/a/b")).expect("sub"), "sync");
    }

    #[test]
    fn parse_splits_the_path() {
        let parsed = AggregatorPath::parse(&format!("{PREFIX}/sync/probe/x")).expect("parse");
        assert_eq!(
            parsed,
            AggregatorPath {
                namespace: "c1".to_string(),
                cluster: "c1".to_string(),
                sub_resource: "sync".to_string(),
                tail: "probe/x".to_string(),
            }
        );
    }

    #[rstest]
    #[case("/sync", "")]
    #[case("/sync/", "")]
    #[case("/sync/dir/", "dir/")]
    fn tails(#[case] suffix: &str, #[case] expected: &str) {
        let parsed = AggregatorPath::parse(&format!("{PREFIX}{suffix}")).expect("parse");
        assert_eq!(parsed.tail, expected);
    }
}
