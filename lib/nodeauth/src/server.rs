//! Server utilities for the admission services

use std::fmt;
use tracing::{error, info};

/// Which signal asked the process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Resolve once SIGTERM or Ctrl+C arrives.
///
/// A handler that cannot be installed never fires; the other one still does.
pub async fn wait_for_shutdown() -> ShutdownReason {
    use tokio::signal;

    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = interrupt => ShutdownReason::Interrupt,
        _ = terminate => ShutdownReason::Terminate,
    };

    info!(signal = %reason, "Starting graceful shutdown");
    reason
}

/// `wait_for_shutdown` shaped for axum's `with_graceful_shutdown`.
pub async fn shutdown_signal() {
    wait_for_shutdown().await;
}
