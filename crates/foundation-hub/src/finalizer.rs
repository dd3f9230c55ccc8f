//! Finalizer bookkeeping shared by the hub controllers

use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;

use foundation_common::Error;

use crate::FIELD_MANAGER;

/// Whether the object carries the finalizer
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Whether the object is being deleted
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Add a finalizer, reading the current list first
pub async fn add<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    let obj = api.get(name).await?;
    let mut finalizers = obj.finalizers().to_vec();
    if finalizers.iter().any(|f| f == finalizer) {
        return Ok(());
    }
    finalizers.push(finalizer.to_string());
    patch_finalizers(api, name, finalizers).await
}

/// Remove a finalizer; a missing object counts as done
pub async fn remove<K>(api: &Api<K>, name: &str, finalizer: &str) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    let Some(obj) = api.get_opt(name).await? else {
        return Ok(());
    };
    let before = obj.finalizers().len();
    let finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| *f != finalizer)
        .cloned()
        .collect();
    if finalizers.len() == before {
        return Ok(());
    }
    patch_finalizers(api, name, finalizers).await
}

async fn patch_finalizers<K>(api: &Api<K>, name: &str, finalizers: Vec<String>) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use foundation_common::crd::{ManagedCluster, ManagedClusterSpec};

    #[test]
    fn detects_finalizer_and_deletion() {
        let mut cluster = ManagedCluster::new("c1", ManagedClusterSpec::default());
        assert!(!has_finalizer(&cluster, "a/b"));
        assert!(!is_deleting(&cluster));

        cluster.metadata.finalizers = Some(vec!["a/b".to_string()]);
        cluster.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        assert!(has_finalizer(&cluster, "a/b"));
        assert!(is_deleting(&cluster));
    }
}
