//! Shared fixtures for reconciler tests

use std::sync::Arc;

use foundation_common::kubecontrol::{KubeControl, ListOptions};
use foundation_common::mapper::RestMapping;
use foundation_common::Error;
use kube::api::GroupVersionKind;
use kube::discovery::ApiResource;
use mockall::mock;

// Local mock for KubeControl since the trait lives in foundation-common
mock! {
    pub KubeControl {}

    #[async_trait::async_trait]
    impl KubeControl for KubeControl {
        async fn mapping_for_resource(&self, resource: &str) -> Result<RestMapping, Error>;
        async fn mapping_for_kind(&self, gvk: &GroupVersionKind) -> Result<RestMapping, Error>;
        async fn create(
            &self,
            mapping: &RestMapping,
            namespace: &str,
            obj: &serde_json::Value,
        ) -> Result<serde_json::Value, Error>;
        async fn get(
            &self,
            mapping: &RestMapping,
            namespace: &str,
            name: &str,
        ) -> Result<serde_json::Value, Error>;
        async fn list(
            &self,
            mapping: &RestMapping,
            namespace: &str,
            options: &ListOptions,
        ) -> Result<serde_json::Value, Error>;
        async fn delete(
            &self,
            mapping: &RestMapping,
            namespace: &str,
            name: &str,
        ) -> Result<(), Error>;
        async fn patch(
            &self,
            mapping: &RestMapping,
            namespace: &str,
            name: &str,
            patch: &serde_json::Value,
        ) -> Result<serde_json::Value, Error>;
        async fn replace(
            &self,
            mapping: &RestMapping,
            namespace: &str,
            name: &str,
            obj: &serde_json::Value,
        ) -> Result<serde_json::Value, Error>;
        fn with_user(&self, user: &str, groups: &[String]) -> Result<Arc<dyn KubeControl>, Error>;
    }
}

/// A namespaced mapping for the given group/version/kind/plural
pub fn mapping(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> RestMapping {
    RestMapping {
        resource: ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: if group.is_empty() {
                version.to_string()
            } else {
                format!("{group}/{version}")
            },
            kind: kind.to_string(),
            plural: plural.to_string(),
        },
        namespaced,
        preferred: true,
    }
}

/// apps/v1 Deployment
pub fn deployments() -> RestMapping {
    mapping("apps", "v1", "Deployment", "deployments", true)
}
