//! Address and port the hub uses to reach the agent's log endpoint

use std::net::IpAddr;

use foundation_common::crd::{ClusterInfoStatus, LoggingEndpoint, LoggingPort};
use foundation_common::{Error, LOCAL_CLUSTER_NAME};

use crate::managed::ManagedClusterReader;

/// Where the agent runs and how it is exposed
#[derive(Clone, Debug, Default)]
pub struct LoggingSettings {
    /// Name of the managed cluster on the hub
    pub cluster_name: String,
    /// Name of the agent service
    pub agent_name: String,
    /// Namespace of the agent service
    pub agent_namespace: String,
    /// Port the log endpoint listens on
    pub agent_port: i32,
    /// Address published as-is when set
    pub agent_address: Option<String>,
}

/// Set `loggingPort` and `loggingEndpoint`
pub(crate) async fn sync(
    status: &mut ClusterInfoStatus,
    reader: &dyn ManagedClusterReader,
    settings: &LoggingSettings,
) -> Result<(), Error> {
    status.logging_port = Some(LoggingPort {
        name: "https".to_string(),
        port: settings.agent_port,
        protocol: "TCP".to_string(),
    });

    let endpoint = endpoint(reader, settings)
        .await
        .map_err(|e| Error::internal(format!("failed to get logging agent config. error {e}")))?;
    status.logging_endpoint = Some(endpoint);
    Ok(())
}

async fn endpoint(
    reader: &dyn ManagedClusterReader,
    settings: &LoggingSettings,
) -> Result<LoggingEndpoint, Error> {
    if let Some(address) = settings.agent_address.as_deref().filter(|a| !a.is_empty()) {
        return Ok(match address.parse::<IpAddr>() {
            Ok(_) => LoggingEndpoint {
                ip: address.to_string(),
                ..Default::default()
            },
            Err(_) => LoggingEndpoint {
                hostname: address.to_string(),
                ..Default::default()
            },
        });
    }

    if settings.cluster_name == LOCAL_CLUSTER_NAME {
        return Ok(LoggingEndpoint {
            hostname: format!("{}.{}.svc", settings.agent_name, settings.agent_namespace),
            ..Default::default()
        });
    }

    let service = reader
        .service(&settings.agent_namespace, &settings.agent_name)
        .await?
        .ok_or_else(|| {
            Error::precondition(format!(
                "agent service {}/{} not found",
                settings.agent_namespace, settings.agent_name
            ))
        })?;

    service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| ingress.first())
        .map(|ingress| LoggingEndpoint {
            ip: ingress.ip.clone().unwrap_or_default(),
            hostname: ingress.hostname.clone().unwrap_or_default(),
        })
        .ok_or_else(|| {
            Error::precondition("agent load balancer service does not have valid ip address")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::MockManagedClusterReader;
    use k8s_openapi::api::core::v1::Service;
    use rstest::rstest;
    use serde_json::json;

    fn settings(cluster: &str, address: Option<&str>) -> LoggingSettings {
        LoggingSettings {
            cluster_name: cluster.to_string(),
            agent_name: "klusterlet-addon-workmgr".to_string(),
            agent_namespace: "open-cluster-management-agent-addon".to_string(),
            agent_port: 443,
            agent_address: address.map(str::to_string),
        }
    }

    #[rstest]
    #[case(Some("10.0.0.8"), "10.0.0.8", "")]
    #[case(Some("agent.example.com"), "", "agent.example.com")]
    #[tokio::test]
    async fn explicit_address_wins(
        #[case] address: Option<&str>,
        #[case] ip: &str,
        #[case] hostname: &str,
    ) {
        let reader = MockManagedClusterReader::new();
        let mut status = ClusterInfoStatus::default();
        sync(&mut status, &reader, &settings("cluster1", address))
            .await
            .expect("sync");

        let endpoint = status.logging_endpoint.expect("endpoint");
        assert_eq!(endpoint.ip, ip);
        assert_eq!(endpoint.hostname, hostname);
        assert_eq!(
            status.logging_port,
            Some(LoggingPort {
                name: "https".to_string(),
                port: 443,
                protocol: "TCP".to_string()
            })
        );
    }

    #[tokio::test]
    async fn local_cluster_uses_service_dns_name() {
        let reader = MockManagedClusterReader::new();
        let mut status = ClusterInfoStatus::default();
        sync(&mut status, &reader, &settings("local-cluster", None))
            .await
            .expect("sync");
        assert_eq!(
            status.logging_endpoint.expect("endpoint").hostname,
            "klusterlet-addon-workmgr.open-cluster-management-agent-addon.svc"
        );
    }

    #[tokio::test]
    async fn remote_cluster_uses_load_balancer_ingress() {
        let mut reader = MockManagedClusterReader::new();
        reader.expect_service().returning(|_, _| {
            Ok(Some(
                serde_json::from_value::<Service>(json!({
                    "status": {"loadBalancer": {"ingress": [{"hostname": "lb.elb.amazonaws.com"}]}}
                }))
                .expect("service"),
            ))
        });
        let mut status = ClusterInfoStatus::default();
        sync(&mut status, &reader, &settings("cluster1", None))
            .await
            .expect("sync");
        assert_eq!(
            status.logging_endpoint.expect("endpoint").hostname,
            "lb.elb.amazonaws.com"
        );
    }

    #[tokio::test]
    async fn pending_load_balancer_is_an_error() {
        let mut reader = MockManagedClusterReader::new();
        reader
            .expect_service()
            .returning(|_, _| Ok(Some(Service::default())));
        let mut status = ClusterInfoStatus::default();
        let err = sync(&mut status, &reader, &settings("cluster1", None))
            .await
            .expect_err("no ingress");
        assert!(err.to_string().contains("does not have valid ip address"));
        assert!(status.logging_port.is_some());
    }
}
