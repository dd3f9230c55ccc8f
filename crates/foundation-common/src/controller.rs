//! Helpers shared by every controller loop

use std::time::Duration;

use kube::runtime::controller::Action;

use crate::Error;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
///
/// The API server closes idle watches before the client times out, which
/// avoids "body read timed out" errors.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Requeue delay after a retryable failure
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue delay after a failure that will not fix itself
pub const PERMANENT_ERROR_REQUEUE: Duration = Duration::from_secs(300);

/// Creates a closure for logging reconciliation results.
pub fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

/// Requeue policy for a failed reconcile
pub fn requeue_for(error: &Error) -> Action {
    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::requeue(PERMANENT_ERROR_REQUEUE)
    }
}

/// Resolves on SIGINT or SIGTERM
///
/// Used by the loops that are not kube-runtime controllers, which stop on
/// their own signal handling.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received Ctrl+C");
    }
}
