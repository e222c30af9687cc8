use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a handler that turns SIGTERM or SIGINT into a cancelled
/// `CancellationToken`.
///
/// The scheduler finishes its current pass, the worker finishes the job in
/// flight and the API server drains open connections before exiting.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for interrupt");
                }
                tracing::info!("Received interrupt, shutting down");
            }
        }

        handler_token.cancel();
    });

    token
}
