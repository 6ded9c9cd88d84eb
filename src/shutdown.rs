use std::sync::Arc;
use std::time::Duration;

use tokio::signal;

use crate::server::AppState;

/// How long shutdown waits for an in-flight run to finish.
const RUN_DRAIN_TIMEOUT: Duration = Duration::from_secs(120);

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Wait for an in-flight run to finish before the process exits.
pub async fn graceful_shutdown(state: &Arc<AppState>) {
    tracing::info!("Starting graceful shutdown...");

    match tokio::time::timeout(RUN_DRAIN_TIMEOUT, state.run_lock.lock()).await {
        Ok(_guard) => tracing::info!("Graceful shutdown complete"),
        Err(_) => tracing::warn!(
            timeout_secs = RUN_DRAIN_TIMEOUT.as_secs(),
            "Run still in progress at shutdown, abandoning it"
        ),
    }
}
