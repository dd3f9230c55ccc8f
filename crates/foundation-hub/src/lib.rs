//! Hub-side controllers for the multicluster foundation
//!
//! Maintains one ManagedClusterInfo per accepted cluster, derives labels
//! and capacity from what the agents report, materializes the RBAC the
//! agents and cluster users need, and garbage-collects finished actions.

#![deny(missing_docs)]

/// Label auto-detection from reported cluster info
pub mod autodetect;
/// Worker capacity summary
pub mod capacity;
/// ManagedClusterInfo lifecycle
pub mod clusterinfo;
/// Per-cluster ClusterRoles gating ManagedCluster access
pub mod clusterrole;
/// Clusterset binding projection
pub mod clusterset;
/// Controller wiring for the hub binary
pub mod controller_runner;
/// Shared finalizer helpers
pub mod finalizer;
/// Garbage collection of finished actions
pub mod gc;
/// CPU quantity arithmetic
pub mod quantity;
/// Agent Role and RoleBinding per cluster namespace
pub mod rbac;

/// Field manager used for every hub write
pub const FIELD_MANAGER: &str = "foundation-hub";
