use tokio::signal;
use tracing::{error, info};

/// Resolves on SIGINT or SIGTERM. If the unix handlers can not be installed
/// only Ctrl+C is watched.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal as unix_signal};

        match (
            unix_signal(SignalKind::interrupt()),
            unix_signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("SIGINT received, shutting down"),
                    _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
                }
                return;
            }
            (Err(err), _) | (_, Err(err)) => {
                error!("failed to install signal handlers: {err}");
            }
        }
    }

    if let Err(err) = signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C: {err}");
        std::future::pending::<()>().await;
    }
}
