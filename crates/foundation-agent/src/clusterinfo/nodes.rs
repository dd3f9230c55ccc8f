//! Node inventory

use k8s_openapi::api::core::v1::Node;

use foundation_common::crd::{NodeCondition, NodeStatus, LABEL_NODE_ROLE_PREFIX};

/// Labels copied verbatim onto the node summary
const KEPT_LABELS: &[&str] = &[
    "kubernetes.io/role",
    "failure-domain.beta.kubernetes.io/region",
    "failure-domain.beta.kubernetes.io/zone",
    "topology.kubernetes.io/region",
    "topology.kubernetes.io/zone",
    "beta.kubernetes.io/instance-type",
    "node.kubernetes.io/instance-type",
];

const KEPT_CAPACITY: &[&str] = &["cpu", "memory"];

/// Summarize nodes, sorted by name
pub(crate) fn node_list(nodes: &[Node]) -> Vec<NodeStatus> {
    let mut list: Vec<NodeStatus> = nodes.iter().map(summarize).collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    list
}

fn summarize(node: &Node) -> NodeStatus {
    let labels = node
        .metadata
        .labels
        .iter()
        .flatten()
        .filter(|(k, _)| KEPT_LABELS.contains(&k.as_str()) || k.starts_with(LABEL_NODE_ROLE_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let status = node.status.as_ref();
    let capacity = status
        .and_then(|s| s.capacity.as_ref())
        .into_iter()
        .flatten()
        .filter(|(k, _)| KEPT_CAPACITY.contains(&k.as_str()))
        .map(|(k, q)| (k.clone(), q.0.clone()))
        .collect();

    let ready = status
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
        .map(|c| c.status.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    NodeStatus {
        name: node.metadata.name.clone().unwrap_or_default(),
        labels,
        capacity,
        conditions: vec![NodeCondition {
            type_: "Ready".to_string(),
            status: ready,
        }],
    }
}
