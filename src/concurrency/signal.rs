//! External termination signal handling.

use tracing::warn;

/// Resolves when the process is asked to terminate.
///
/// On unix this listens for both SIGTERM (the signal a host runtime sends before tearing
/// a connector down) and ctrl-c; elsewhere only ctrl-c is available. If the SIGTERM
/// handler cannot be installed the future falls back to ctrl-c alone instead of
/// resolving spuriously.
#[cfg(unix)]
pub async fn termination_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            warn!("failed to install SIGTERM handler, falling back to ctrl-c: {}", err);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

/// Resolves when the process is asked to terminate.
#[cfg(not(unix))]
pub async fn termination_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
}
