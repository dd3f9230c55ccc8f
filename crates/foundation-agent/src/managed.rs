//! Read access to the managed cluster for the info synthesizer and claim probe
//!
//! Typed core objects go through a kube `Client`; OpenShift config objects go
//! through the dynamic [`KubeControl`] so that clusters without those CRDs
//! simply report them as absent.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Secret, Service, ServiceAccount};
use kube::api::{Api, GroupVersionKind, ListParams};
use kube::Client;
use serde::de::DeserializeOwned;

#[cfg(test)]
use mockall::automock;

use foundation_common::crd::ClusterClaim;
use foundation_common::kubecontrol::KubeControl;
use foundation_common::Error;

use crate::openshift::{
    api_server_gvk, cluster_version_gvk, infrastructure_gvk, oauth_client_gvk, ApiServer,
    ClusterVersion, Infrastructure, CLUSTER_CONFIG_NAME, CLUSTER_VERSION_NAME,
};

/// OAuth client whose redirect URIs are published as a claim
const CHALLENGING_CLIENT: &str = "openshift-challenging-client";

/// Reads against the managed cluster. Lookups of single objects return
/// `Ok(None)` when the object, or its kind, does not exist.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ManagedClusterReader: Send + Sync {
    /// All ClusterClaims
    async fn list_claims(&self) -> Result<Vec<ClusterClaim>, Error>;

    /// All nodes
    async fn list_nodes(&self) -> Result<Vec<Node>, Error>;

    /// `gitVersion` of the API server
    async fn server_version(&self) -> Result<String, Error>;

    /// True if discovery knows the given kind
    async fn has_kind(&self, gvk: &GroupVersionKind) -> Result<bool, Error>;

    /// `clusterversions/version`
    async fn cluster_version(&self) -> Result<Option<ClusterVersion>, Error>;

    /// `infrastructures/cluster`
    async fn infrastructure(&self) -> Result<Option<Infrastructure>, Error>;

    /// `apiservers/cluster`
    async fn api_server(&self) -> Result<Option<ApiServer>, Error>;

    /// Redirect URIs of the challenging OAuth client
    async fn oauth_redirect_uris(&self) -> Result<Option<Vec<String>>, Error>;

    /// A namespace by name
    async fn namespace(&self, name: &str) -> Result<Option<Namespace>, Error>;

    /// A config map
    async fn config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error>;

    /// A secret
    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// A service account
    async fn service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error>;

    /// A service
    async fn service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error>;
}

/// Reader backed by a kube client and a dynamic control for the managed cluster
pub struct ManagedClusterReaderImpl {
    client: Client,
    control: Arc<dyn KubeControl>,
}

impl ManagedClusterReaderImpl {
    /// Create a reader
    pub fn new(client: Client, control: Arc<dyn KubeControl>) -> Self {
        Self { client, control }
    }

    async fn get_dynamic<T: DeserializeOwned>(
        &self,
        gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Option<T>, Error> {
        let mapping = match self.control.mapping_for_kind(gvk).await {
            Ok(mapping) => mapping,
            Err(Error::NoMatch { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        match self.control.get(&mapping, "", name).await {
            Ok(obj) => serde_json::from_value(obj)
                .map(Some)
                .map_err(|e| Error::serialization_for_kind(gvk.kind.clone(), e.to_string())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ManagedClusterReader for ManagedClusterReaderImpl {
    async fn list_claims(&self) -> Result<Vec<ClusterClaim>, Error> {
        let api: Api<ClusterClaim> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn server_version(&self) -> Result<String, Error> {
        Ok(self.client.apiserver_version().await?.git_version)
    }

    async fn has_kind(&self, gvk: &GroupVersionKind) -> Result<bool, Error> {
        match self.control.mapping_for_kind(gvk).await {
            Ok(_) => Ok(true),
            Err(Error::NoMatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn cluster_version(&self) -> Result<Option<ClusterVersion>, Error> {
        self.get_dynamic(&cluster_version_gvk(), CLUSTER_VERSION_NAME)
            .await
    }

    async fn infrastructure(&self) -> Result<Option<Infrastructure>, Error> {
        self.get_dynamic(&infrastructure_gvk(), CLUSTER_CONFIG_NAME)
            .await
    }

    async fn api_server(&self) -> Result<Option<ApiServer>, Error> {
        self.get_dynamic(&api_server_gvk(), CLUSTER_CONFIG_NAME).await
    }

    async fn oauth_redirect_uris(&self) -> Result<Option<Vec<String>>, Error> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct OAuthClient {
            #[serde(default)]
            redirect_uris: Vec<String>,
        }

        let client: Option<OAuthClient> = self
            .get_dynamic(&oauth_client_gvk(), CHALLENGING_CLIENT)
            .await?;
        Ok(client.map(|c| c.redirect_uris))
    }

    async fn namespace(&self, name: &str) -> Result<Option<Namespace>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn service(&self, namespace: &str, name: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
