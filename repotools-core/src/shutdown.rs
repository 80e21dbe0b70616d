//! Turn SIGINT/SIGTERM into a cancellation token the long running loops poll

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Spawn a watcher that cancels the returned token on the first interrupt or
/// termination signal. Must be called from within a tokio runtime.
pub fn cancel_on_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let watcher = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl+c: {}", err);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(err) => {
                    warn!("Failed to listen for SIGTERM: {}", err);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => warn!("Received interrupt signal, finishing current item..."),
            _ = terminate => warn!("Received termination signal, finishing current item..."),
        }
        watcher.cancel();
    });

    token
}
