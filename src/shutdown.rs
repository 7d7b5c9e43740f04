use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Wait for a shutdown signal (SIGINT or SIGTERM).
///
/// A handler that cannot be installed never fires; the other still does.
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, cancelling run...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, cancelling run...");
        }
    }
}

/// Cancel `token` when a shutdown signal arrives.
///
/// In-flight subprocesses observe the token through their run context and
/// are killed and reaped before the workflow returns.
pub fn cancel_on_shutdown(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_shutdown() => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}
