//! OS signal handling.

use tokio::sync::broadcast;

use crate::lifecycle::Shutdown;

/// Wait for SIGINT or SIGTERM, or for another task to trigger `shutdown`
/// (observed through `triggered`, subscribed before any task starts).
/// Triggers `shutdown` before returning.
pub async fn wait_for_shutdown(shutdown: &Shutdown, mut triggered: broadcast::Receiver<()>) {
    tokio::select! {
        _ = ctrl_c() => tracing::info!("Received SIGINT"),
        _ = terminate() => tracing::info!("Received SIGTERM"),
        _ = triggered.recv() => tracing::info!("Shutdown requested internally"),
    }

    shutdown.trigger();
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for SIGINT");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
