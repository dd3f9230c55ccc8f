//! Error types for the aggregating proxy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for proxy operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request path does not have the aggregator shape
    #[error("the request {path} is forbidden: wrong path format")]
    Forbidden {
        /// Request path as received
        path: String,
    },

    /// The caller presented no usable credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// The authorizer refused the request
    #[error("user \"{user}\" cannot {action}")]
    AccessDenied {
        /// Authenticated user name
        user: String,
        /// What was asked, as the authorizer phrases it
        action: String,
    },

    /// No configmap registered the sub-resource
    #[error("the proxy service ({sub_resource}) is not found")]
    ServiceNotFound {
        /// Sub-resource named by the request
        sub_resource: String,
    },

    /// HTTP method the aggregator does not connect
    #[error("method {0} is not allowed")]
    MethodNotAllowed(String),

    /// The log path or query is malformed
    #[error("invalid log path, {0}")]
    InvalidLogPath(String),

    /// The log token or upstream log call failed
    #[error("failed to stream log. {0}")]
    LogStream(String),

    /// A proxy configmap is incomplete or references something missing
    #[error("invalid proxy configmap {configmap}: {message}")]
    InvalidConfigMap {
        /// Owning configmap as namespace/name
        configmap: String,
        /// What is wrong with it
        message: String,
    },

    /// Certificate material could not be parsed or generated
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The backing service could not be reached
    #[error("proxy error: {0}")]
    Proxy(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a configmap validation error
    pub fn configmap(configmap: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigMap {
            configmap: configmap.into(),
            message: message.into(),
        }
    }

    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } | Error::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Error::ServiceNotFound { .. } => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Error::InvalidLogPath(_) | Error::LogStream(_) => StatusCode::BAD_REQUEST,
            Error::Proxy(_) => StatusCode::BAD_GATEWAY,
            Error::InvalidConfigMap { .. }
            | Error::Certificate(_)
            | Error::Kube(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reason(&self) -> &'static str {
        match self.status_code() {
            StatusCode::UNAUTHORIZED => "Unauthorized",
            StatusCode::FORBIDDEN => "Forbidden",
            StatusCode::NOT_FOUND => "NotFound",
            StatusCode::METHOD_NOT_ALLOWED => "MethodNotAllowed",
            StatusCode::BAD_REQUEST => "BadRequest",
            _ => "InternalError",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // K8s-style Status body so kubectl renders the message
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": self.to_string(),
            "reason": self.reason(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Proxy(e.to_string())
    }
}
