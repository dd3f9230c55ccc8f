//! API server URL and CA bundle the hub should use to reach the cluster

use base64::Engine;
use tracing::{debug, warn};

use foundation_common::crd::{ClientConfig, CloudVendor};
use foundation_common::kube_utils::secret_data;
use foundation_common::Error;

use crate::managed::ManagedClusterReader;

const OPENSHIFT_CONFIG_NAMESPACE: &str = "openshift-config";
const ROOT_CA_NAMESPACE: &str = "kube-public";
const ROOT_CA_CONFIGMAP: &str = "kube-root-ca.crt";
const SERVICE_ACCOUNT_NAMESPACE: &str = "kube-system";
const SERVICE_ACCOUNT_NAME: &str = "default";
const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
const SECRET_TYPE_SA_TOKEN: &str = "kubernetes.io/service-account-token";

/// Resolve the client config, or `None` when no URL or CA could be found
pub(crate) async fn resolve(
    reader: &dyn ManagedClusterReader,
    cloud_vendor: &str,
) -> Option<ClientConfig> {
    let url = match reader.infrastructure().await {
        Ok(Some(infra)) if !infra.status.api_server_url.is_empty() => infra.status.api_server_url,
        Ok(_) => {
            warn!("infrastructure has no API server URL");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "failed to get infrastructure");
            return None;
        }
    };

    let ca = cluster_ca(reader, &url, cloud_vendor).await?;
    Some(ClientConfig {
        url,
        ca_bundle: Some(base64::engine::general_purpose::STANDARD.encode(ca)),
    })
}

/// Try each CA source in priority order
async fn cluster_ca(
    reader: &dyn ManagedClusterReader,
    url: &str,
    cloud_vendor: &str,
) -> Option<Vec<u8>> {
    match ca_from_apiserver(reader, url).await {
        Ok(ca) if !ca.is_empty() => return Some(ca),
        Ok(_) => {}
        Err(e) => debug!(error = %e, "no named serving certificate for API server"),
    }

    match ca_from_config_map(reader).await {
        Ok(ca) if !ca.is_empty() => return Some(ca),
        Ok(_) => {}
        Err(e) => debug!(error = %e, "no root CA config map"),
    }

    match ca_from_service_account(reader).await {
        // IBM Cloud fronts the API server with a publicly trusted certificate
        Ok(_) if cloud_vendor == CloudVendor::Ibm.as_str() => None,
        Ok(ca) if !ca.is_empty() => Some(ca),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "cannot get CA from service account");
            None
        }
    }
}

async fn ca_from_apiserver(reader: &dyn ManagedClusterReader, url: &str) -> Result<Vec<u8>, Error> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e: http::uri::InvalidUri| Error::validation(format!("invalid API server URL: {e}")))?;
    let host = uri
        .host()
        .ok_or_else(|| Error::validation("API server URL has no host"))?;

    let apiserver = reader
        .api_server()
        .await?
        .ok_or_else(|| Error::precondition("apiservers/cluster not found"))?;
    let secret_name = apiserver
        .serving_secret_for(host)
        .ok_or_else(|| Error::precondition(format!("no serving certificate matches {host}")))?;

    let secret = reader
        .secret(OPENSHIFT_CONFIG_NAMESPACE, secret_name)
        .await?
        .ok_or_else(|| {
            Error::precondition(format!("secret {OPENSHIFT_CONFIG_NAMESPACE}/{secret_name} not found"))
        })?;
    if secret.type_.as_deref() != Some(SECRET_TYPE_TLS) {
        return Err(Error::precondition(format!(
            "secret {OPENSHIFT_CONFIG_NAMESPACE}/{secret_name} should have type={SECRET_TYPE_TLS}"
        )));
    }
    secret_data(&secret, "tls.crt")
        .map(<[u8]>::to_vec)
        .ok_or_else(|| {
            Error::precondition(format!(
                "failed to find data[tls.crt] in secret {OPENSHIFT_CONFIG_NAMESPACE}/{secret_name}"
            ))
        })
}

async fn ca_from_config_map(reader: &dyn ManagedClusterReader) -> Result<Vec<u8>, Error> {
    let cm = reader
        .config_map(ROOT_CA_NAMESPACE, ROOT_CA_CONFIGMAP)
        .await?
        .ok_or_else(|| Error::precondition("kube-root-ca.crt not found"))?;
    Ok(cm
        .data
        .as_ref()
        .and_then(|d| d.get("ca.crt"))
        .map(|ca| ca.as_bytes().to_vec())
        .unwrap_or_default())
}

async fn ca_from_service_account(reader: &dyn ManagedClusterReader) -> Result<Vec<u8>, Error> {
    let sa = reader
        .service_account(SERVICE_ACCOUNT_NAMESPACE, SERVICE_ACCOUNT_NAME)
        .await?
        .ok_or_else(|| Error::precondition("default service account not found"))?;

    for name in sa.secrets.iter().flatten().filter_map(|r| r.name.as_deref()) {
        let Ok(Some(secret)) = reader.secret(SERVICE_ACCOUNT_NAMESPACE, name).await else {
            continue;
        };
        if secret.type_.as_deref() != Some(SECRET_TYPE_SA_TOKEN) {
            continue;
        }
        if let Some(ca) = secret_data(&secret, "ca.crt") {
            return Ok(ca.to_vec());
        }
    }

    Err(Error::precondition(format!(
        "secret with type {SECRET_TYPE_SA_TOKEN} not found in service account \
         {SERVICE_ACCOUNT_NAMESPACE}/{SERVICE_ACCOUNT_NAME}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::MockManagedClusterReader;
    use crate::openshift::{ApiServer, Infrastructure};
    use k8s_openapi::api::core::v1::{ConfigMap, Secret, ServiceAccount};
    use serde_json::json;

    fn infra(url: &str) -> Infrastructure {
        serde_json::from_value(json!({"status": {"apiServerURL": url}})).expect("infra")
    }

    fn apiserver() -> ApiServer {
        serde_json::from_value(json!({"spec": {"servingCerts": {"namedCertificates": [
            {"names": ["api.example.com"], "servingCertificate": {"name": "api-cert"}}
        ]}}}))
        .expect("apiserver")
    }

    fn secret(type_: &str, key: &str, value: &str) -> Secret {
        serde_json::from_value(json!({
            "type": type_,
            "data": {key: base64::engine::general_purpose::STANDARD.encode(value)}
        }))
        .expect("secret")
    }

    fn root_ca(value: &str) -> ConfigMap {
        serde_json::from_value(json!({"data": {"ca.crt": value}})).expect("configmap")
    }

    fn decoded(config: &ClientConfig) -> String {
        let raw = base64::engine::general_purpose::STANDARD
            .decode(config.ca_bundle.as_deref().expect("ca"))
            .expect("base64");
        String::from_utf8(raw).expect("utf8")
    }

    /// Story: The named serving certificate wins over every other source
    #[tokio::test]
    async fn story_prefers_named_serving_certificate() {
        let mut reader = MockManagedClusterReader::new();
        reader
            .expect_infrastructure()
            .returning(|| Ok(Some(infra("https://api.example.com:6443"))));
        reader.expect_api_server().returning(|| Ok(Some(apiserver())));
        reader
            .expect_secret()
            .withf(|ns, name| ns == "openshift-config" && name == "api-cert")
            .returning(|_, _| Ok(Some(secret("kubernetes.io/tls", "tls.crt", "SERVING"))));
        reader.expect_config_map().never();

        let config = resolve(&reader, "Amazon").await.expect("config");
        assert_eq!(config.url, "https://api.example.com:6443");
        assert_eq!(decoded(&config), "SERVING");
    }

    #[tokio::test]
    async fn falls_back_to_root_ca_config_map() {
        let mut reader = MockManagedClusterReader::new();
        reader
            .expect_infrastructure()
            .returning(|| Ok(Some(infra("https://api.other.com:6443"))));
        reader.expect_api_server().returning(|| Ok(Some(apiserver())));
        reader
            .expect_config_map()
            .withf(|ns, name| ns == "kube-public" && name == "kube-root-ca.crt")
            .returning(|_, _| Ok(Some(root_ca("ROOT"))));

        let config = resolve(&reader, "Amazon").await.expect("config");
        assert_eq!(decoded(&config), "ROOT");
    }

    fn service_account_reader() -> MockManagedClusterReader {
        let mut reader = MockManagedClusterReader::new();
        reader
            .expect_infrastructure()
            .returning(|| Ok(Some(infra("https://api.example.com:6443"))));
        reader.expect_api_server().returning(|| Ok(None));
        reader.expect_config_map().returning(|_, _| Ok(None));
        reader.expect_service_account().returning(|_, _| {
            Ok(Some(
                serde_json::from_value::<ServiceAccount>(json!({
                    "secrets": [{"name": "default-dockercfg"}, {"name": "default-token"}]
                }))
                .expect("sa"),
            ))
        });
        reader.expect_secret().returning(|_, name| match name {
            "default-token" => Ok(Some(secret(
                "kubernetes.io/service-account-token",
                "ca.crt",
                "SA",
            ))),
            _ => Ok(Some(secret("kubernetes.io/dockercfg", "x", "y"))),
        });
        reader
    }

    #[tokio::test]
    async fn falls_back_to_service_account_token() {
        let reader = service_account_reader();
        let config = resolve(&reader, "Azure").await.expect("config");
        assert_eq!(decoded(&config), "SA");
    }

    #[tokio::test]
    async fn ibm_cloud_skips_service_account_ca() {
        let reader = service_account_reader();
        assert!(resolve(&reader, "IBM").await.is_none());
    }

    #[tokio::test]
    async fn no_url_means_no_config() {
        let mut reader = MockManagedClusterReader::new();
        reader.expect_infrastructure().returning(|| Ok(None));
        assert!(resolve(&reader, "Amazon").await.is_none());
    }
}
