//! Discovery documents and the `ClusterStatus` resource
//!
//! The hub's API server aggregates this group; it needs discovery to list
//! `clusterstatuses` with its `aggregator` and `log` subresources. The
//! resource itself carries no data: get returns an empty object and list
//! an empty list.

use axum::extract::Path;
use axum::Json;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroup, APIGroupList, APIResource, APIResourceList, GroupVersionForDiscovery, ObjectMeta,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::path::{group_version, API_GROUP, API_VERSION, RESOURCE};

/// Kind served by the group
pub const KIND: &str = "ClusterStatus";

fn preferred_version() -> GroupVersionForDiscovery {
    GroupVersionForDiscovery {
        group_version: group_version(),
        version: API_VERSION.to_string(),
    }
}

/// The proxy API group
pub fn api_group() -> APIGroup {
    APIGroup {
        name: API_GROUP.to_string(),
        versions: vec![preferred_version()],
        preferred_version: Some(preferred_version()),
        server_address_by_client_cidrs: None,
    }
}

fn resource(name: &str, verbs: &[&str]) -> APIResource {
    APIResource {
        name: name.to_string(),
        singular_name: if name == RESOURCE {
            "clusterstatus".to_string()
        } else {
            String::new()
        },
        namespaced: true,
        kind: KIND.to_string(),
        verbs: verbs.iter().map(|v| v.to_string()).collect(),
        ..Default::default()
    }
}

/// Resources of the served version
pub fn api_resources() -> APIResourceList {
    APIResourceList {
        group_version: group_version(),
        resources: vec![
            resource(RESOURCE, &["get", "list"]),
            resource(&format!("{}/aggregator", RESOURCE), &["get", "create", "update"]),
            resource(&format!("{}/log", RESOURCE), &["get"]),
        ],
    }
}

/// `GET /apis`
pub async fn group_list() -> Json<APIGroupList> {
    Json(APIGroupList {
        groups: vec![api_group()],
    })
}

/// `GET /apis/{group}`
pub async fn group() -> Json<APIGroup> {
    Json(api_group())
}

/// `GET /apis/{group}/{version}`
pub async fn resources() -> Json<APIResourceList> {
    Json(api_resources())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterStatus {
    api_version: String,
    kind: &'static str,
    metadata: ObjectMeta,
}

/// `GET .../namespaces/{namespace}/clusterstatuses/{name}`
pub async fn get_cluster_status(Path((namespace, name)): Path<(String, String)>) -> Json<Value> {
    let status = ClusterStatus {
        api_version: group_version(),
        kind: KIND,
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            ..Default::default()
        },
    };
    Json(serde_json::to_value(status).unwrap_or(Value::Null))
}

/// `GET .../namespaces/{namespace}/clusterstatuses`
pub async fn list_cluster_statuses() -> Json<Value> {
    Json(json!({
        "apiVersion": group_version(),
        "kind": format!("{}List", KIND),
        "metadata": {},
        "items": [],
    }))
}
