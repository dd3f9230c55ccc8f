//! OpenTelemetry instruments for the foundation controllers
//!
//! Instruments are created lazily against the global meter, so they are
//! no-ops until telemetry installs an OTLP meter provider.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("foundation"));

// ============================================================================
// Reconciliation
// ============================================================================

/// Histogram of reconcile duration
///
/// Labels:
/// - `controller`: action, view, clusterinfo, clusterclaim, rbac, ...
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("foundation_reconcile_duration_seconds")
        .with_description("Duration of reconciliations in seconds")
        .with_unit("s")
        .build()
});

/// Counter of failed reconciliations
///
/// Labels:
/// - `controller`
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("foundation_reconcile_errors_total")
        .with_description("Total number of reconciliation errors")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Agent outcomes
// ============================================================================

/// Counter of executed actions
///
/// Labels:
/// - `action_type`: Create, Update, Delete, invalid
/// - `reason`: ActionDone or the failure reason
pub static ACTIONS_EXECUTED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("foundation_actions_executed_total")
        .with_description("Total number of executed cluster actions")
        .with_unit("{actions}")
        .build()
});

/// Counter of view refreshes that touched the managed cluster
///
/// Labels:
/// - `reason`: refreshed or the failure reason
pub static VIEW_REFRESHES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("foundation_view_refreshes_total")
        .with_description("Total number of view refreshes")
        .with_unit("{refreshes}")
        .build()
});

/// Counter of claim writes
///
/// Labels:
/// - `operation`: create, update, delete
pub static CLAIM_WRITES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("foundation_claim_writes_total")
        .with_description("Total number of ClusterClaim writes")
        .with_unit("{writes}")
        .build()
});

// ============================================================================
// Proxy
// ============================================================================

/// Counter of aggregated proxy requests
///
/// Labels:
/// - `sub_resource`
/// - `method`
/// - `status`: 2xx, 4xx, 5xx
pub static PROXY_REQUESTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("foundation_proxy_requests_total")
        .with_description("Total number of aggregated proxy requests")
        .with_unit("{requests}")
        .build()
});

/// Histogram of aggregated proxy request duration
pub static PROXY_REQUEST_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("foundation_proxy_request_duration_seconds")
        .with_description("Duration of aggregated proxy requests in seconds")
        .with_unit("s")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Labels for proxy request status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    /// 1xx-3xx
    Success,
    /// 4xx client error
    ClientError,
    /// 5xx server error
    ServerError,
}

impl ProxyStatus {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "2xx",
            Self::ClientError => "4xx",
            Self::ServerError => "5xx",
        }
    }

    /// Create from HTTP status code
    pub fn from_status_code(code: u16) -> Self {
        match code {
            100..=399 => Self::Success,
            400..=499 => Self::ClientError,
            _ => Self::ServerError,
        }
    }
}

/// Claim write operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOperation {
    /// Claim created
    Create,
    /// Claim value changed
    Update,
    /// Claim no longer produced
    Delete,
}

impl ClaimOperation {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Times one reconciliation of one controller
pub struct ReconcileTimer {
    controller: &'static str,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation
    pub fn start(controller: &'static str) -> Self {
        Self {
            controller,
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "success"),
            ],
        );
    }

    /// Record error completion
    pub fn error(self, retryable: bool) {
        RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("result", "error"),
            ],
        );
        RECONCILE_ERRORS.add(
            1,
            &[
                KeyValue::new("controller", self.controller),
                KeyValue::new("error_type", if retryable { "transient" } else { "permanent" }),
            ],
        );
    }

    /// Record a result, picking success or error
    pub fn finish<T>(self, result: &Result<T, crate::Error>) {
        match result {
            Ok(_) => self.success(),
            Err(e) => self.error(e.is_retryable()),
        }
    }
}

/// Times one aggregated proxy request
pub struct ProxyTimer {
    sub_resource: String,
    method: String,
    start: std::time::Instant,
}

impl ProxyTimer {
    /// Start timing a proxy request
    pub fn start(sub_resource: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            sub_resource: sub_resource.into(),
            method: method.into(),
            start: std::time::Instant::now(),
        }
    }

    /// Complete with the response status code
    pub fn complete(self, code: u16) {
        let status = ProxyStatus::from_status_code(code);
        PROXY_REQUESTS.add(
            1,
            &[
                KeyValue::new("sub_resource", self.sub_resource.clone()),
                KeyValue::new("method", self.method.clone()),
                KeyValue::new("status", status.as_str()),
            ],
        );
        PROXY_REQUEST_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[
                KeyValue::new("sub_resource", self.sub_resource),
                KeyValue::new("method", self.method),
            ],
        );
    }
}

/// Record an executed action
pub fn record_action(action_type: &str, reason: &str) {
    ACTIONS_EXECUTED.add(
        1,
        &[
            KeyValue::new("action_type", action_type.to_string()),
            KeyValue::new("reason", reason.to_string()),
        ],
    );
}

/// Record a view refresh
pub fn record_view_refresh(reason: &str) {
    VIEW_REFRESHES.add(1, &[KeyValue::new("reason", reason.to_string())]);
}

/// Record a claim write
pub fn record_claim_write(operation: ClaimOperation) {
    CLAIM_WRITES.add(1, &[KeyValue::new("operation", operation.as_str())]);
}
