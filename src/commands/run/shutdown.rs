use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `shutdown` on Ctrl+C. Workers stop after their in-flight job;
/// reports still queued are not processed.
pub(crate) fn spawn_shutdown_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Received shutdown signal (Ctrl+C), stopping location workers");
                    shutdown.cancel();
                }
                Err(err) => {
                    error!("Unable to listen for shutdown signal: {}", err);
                }
            },
            // Normal completion also cancels the token; nothing left to do
            _ = shutdown.cancelled() => {}
        }
    });
}
