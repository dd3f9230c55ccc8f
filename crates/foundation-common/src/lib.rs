//! Common types for the multicluster foundation: CRDs, errors, REST mapping,
//! dynamic client, and telemetry

#![deny(missing_docs)]

pub mod controller;
pub mod crd;
pub mod error;
pub mod health;
pub mod identity;
pub mod kube_utils;
pub mod kubecontrol;
pub mod leader_election;
pub mod mapper;
pub mod merge_patch;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label on agent-owned objects and ClusterClaims the agent manages
pub const FOUNDATION_COMPONENT_LABEL: &str = "open-cluster-management.io/foundation";

/// Cluster name the hub gives to itself when it is also managed
pub const LOCAL_CLUSTER_NAME: &str = "local-cluster";
