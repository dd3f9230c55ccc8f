//! Per-cluster agent for the multicluster foundation
//!
//! Watches its cluster's namespace on the hub for actions and views, runs
//! them against the managed cluster, and keeps the cluster's info status
//! and ClusterClaims current.

#![deny(missing_docs)]

/// Action execution pipeline
pub mod action;
/// ClusterClaim probe and syncer
pub mod clusterclaim;
/// ManagedClusterInfo status synthesis
pub mod clusterinfo;
/// Controller wiring for the agent binary
pub mod controller_runner;
/// View reconciler
pub mod view;

mod managed;
mod openshift;

#[cfg(test)]
mod test_support;

pub use managed::{ManagedClusterReader, ManagedClusterReaderImpl};
