//! Aggregating proxy server
//!
//! Serves the `proxy.open-cluster-management.io` API group on the hub.
//! Requests to a cluster's `aggregator/{sub-resource}` are streamed to the
//! in-cluster service a labelled configmap registered for that
//! sub-resource; `log/{ns}/{pod}/{container}` streams a container log from
//! the managed cluster through the cluster-proxy service. Callers are
//! authenticated as a front proxy or by bearer token and authorized with
//! SubjectAccessReviews.

#![deny(missing_docs)]

pub mod api;
pub mod auth;
pub mod ca_bundle;
pub mod client;
pub mod controller;
pub mod error;
pub mod log;
pub mod path;
pub mod proxy;
pub mod routing;
pub mod server;

pub use error::{Error, Result};
