//! Label auto-detection
//!
//! Users may label a cluster `cloud=auto-detect` or `vendor=auto-detect` at
//! import time. Once the agent has reported the vendors in the cluster's
//! info, the placeholders are replaced. The cluster id and OpenShift version
//! labels are kept current from the same reports, and the resulting label
//! set is mirrored onto the info.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument};

#[cfg(test)]
use mockall::automock;

use foundation_common::controller::requeue_for;
use foundation_common::crd::{KubeVendor, ManagedCluster, ManagedClusterInfo, CLAIM_OCP_VERSION};
use foundation_common::metrics::ReconcileTimer;
use foundation_common::Error;

use crate::finalizer::is_deleting;
use crate::FIELD_MANAGER;

/// Placeholder value requesting detection
pub const AUTO_DETECT: &str = "auto-detect";
/// Cloud vendor label
pub const LABEL_CLOUD_VENDOR: &str = "cloud";
/// Kubernetes vendor label
pub const LABEL_KUBE_VENDOR: &str = "vendor";
/// Cluster id label
pub const LABEL_CLUSTER_ID: &str = "clusterID";
/// Set to `platform` for OpenShift Dedicated
pub const LABEL_MANAGED_BY: &str = "managed-by";
/// Full OpenShift version
pub const LABEL_OCP_VERSION: &str = "openshiftVersion";
/// OpenShift major version
pub const LABEL_OCP_VERSION_MAJOR: &str = "openshiftVersion-major";
/// OpenShift major.minor version
pub const LABEL_OCP_VERSION_MAJOR_MINOR: &str = "openshiftVersion-major-minor";

/// Hub operations for label detection
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get the cluster's info
    async fn get_info(&self, cluster: &str) -> Result<Option<ManagedClusterInfo>, Error>;

    /// Merge-patch ManagedCluster labels
    async fn patch_cluster_labels(&self, cluster: &str, labels: Value) -> Result<(), Error>;

    /// Merge-patch ManagedClusterInfo labels
    async fn patch_info_labels(&self, cluster: &str, labels: Value) -> Result<(), Error>;
}

/// Hub client backed by kube-rs
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn labels_patch(labels: Value) -> Value {
    json!({ "metadata": { "labels": labels } })
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_info(&self, cluster: &str) -> Result<Option<ManagedClusterInfo>, Error> {
        let api: Api<ManagedClusterInfo> = Api::namespaced(self.client.clone(), cluster);
        Ok(api.get_opt(cluster).await?)
    }

    async fn patch_cluster_labels(&self, cluster: &str, labels: Value) -> Result<(), Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        api.patch(
            cluster,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&labels_patch(labels)),
        )
        .await?;
        Ok(())
    }

    async fn patch_info_labels(&self, cluster: &str, labels: Value) -> Result<(), Error> {
        let api: Api<ManagedClusterInfo> = Api::namespaced(self.client.clone(), cluster);
        api.patch(
            cluster,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&labels_patch(labels)),
        )
        .await?;
        Ok(())
    }
}

/// Controller context for label detection
pub struct Context {
    /// Hub client
    pub kube: Arc<dyn KubeClient>,
}

impl Context {
    /// Create a context over the hub
    pub fn new(client: Client) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
        }
    }

    /// Create a context for testing with a mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }
}

/// Reconcile detected labels for one ManagedCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<ManagedCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = ReconcileTimer::start("autodetect");
    let result = sync(&cluster, &ctx).await;
    timer.finish(&result);
    result.map(|()| Action::await_change())
}

async fn sync(cluster: &ManagedCluster, ctx: &Context) -> Result<(), Error> {
    if is_deleting(cluster) {
        return Ok(());
    }
    let name = cluster.name_any();
    let Some(info) = ctx.kube.get_info(&name).await? else {
        debug!("no cluster info yet");
        return Ok(());
    };

    let current = cluster.labels().clone();
    let desired = detected_labels(cluster, &info);
    if desired != current {
        ctx.kube
            .patch_cluster_labels(&name, label_delta(&current, &desired))
            .await?;
        info!("cluster labels updated from detected values");
    }

    if &desired != info.labels() {
        ctx.kube
            .patch_info_labels(&name, label_delta(info.labels(), &desired))
            .await?;
        debug!("cluster info labels mirrored");
    }
    Ok(())
}

/// The cluster's labels with detected values filled in
pub fn detected_labels(
    cluster: &ManagedCluster,
    info: &ManagedClusterInfo,
) -> BTreeMap<String, String> {
    let mut labels = cluster.labels().clone();
    let status = info.status.clone().unwrap_or_default();

    if is_auto_detect(&labels, LABEL_CLOUD_VENDOR) && !status.cloud_vendor.is_empty() {
        labels.insert(LABEL_CLOUD_VENDOR.to_string(), status.cloud_vendor.clone());
    }

    if is_auto_detect(&labels, LABEL_KUBE_VENDOR) && !status.kube_vendor.is_empty() {
        if KubeVendor::from_wire(&status.kube_vendor) == KubeVendor::OpenShiftDedicated {
            labels.insert(
                LABEL_KUBE_VENDOR.to_string(),
                KubeVendor::OpenShift.as_str().to_string(),
            );
            labels.insert(LABEL_MANAGED_BY.to_string(), "platform".to_string());
        } else {
            labels.insert(LABEL_KUBE_VENDOR.to_string(), status.kube_vendor.clone());
        }
    }

    if !status.cluster_id.is_empty() {
        labels.insert(LABEL_CLUSTER_ID.to_string(), status.cluster_id.clone());
    }

    if let Some(version) = cluster.claim(CLAIM_OCP_VERSION) {
        labels.insert(LABEL_OCP_VERSION.to_string(), version.to_string());
        let (major, minor) = split_version(version);
        if !major.is_empty() {
            labels.insert(LABEL_OCP_VERSION_MAJOR.to_string(), major.to_string());
            if let Some(minor) = minor {
                labels.insert(
                    LABEL_OCP_VERSION_MAJOR_MINOR.to_string(),
                    format!("{major}.{minor}"),
                );
            }
        }
    }
    labels
}

fn is_auto_detect(labels: &BTreeMap<String, String>, key: &str) -> bool {
    labels.get(key).is_some_and(|v| v == AUTO_DETECT)
}

/// Major and minor components of a dotted version; 3.11 clusters report
/// only the major
fn split_version(version: &str) -> (&str, Option<&str>) {
    let mut parts = version.split('.');
    let major = parts.next().unwrap_or_default();
    (major, parts.next())
}

/// Merge patch turning `current` into `desired`, nulling removed keys
fn label_delta(current: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> Value {
    let mut patch = Map::new();
    for (k, v) in desired {
        if current.get(k) != Some(v) {
            patch.insert(k.clone(), Value::String(v.clone()));
        }
    }
    for k in current.keys() {
        if !desired.contains_key(k) {
            patch.insert(k.clone(), Value::Null);
        }
    }
    Value::Object(patch)
}

/// Error policy for label detection
pub fn error_policy(cluster: Arc<ManagedCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(?error, cluster = %cluster.name_any(), "label detection failed");
    requeue_for(error)
}
