//! Signal-driven shutdown for the daemon.

use tokio_util::sync::CancellationToken;

/// Install SIGINT/SIGTERM handlers that cancel the returned token.
///
/// A second signal while shutdown is already in progress exits immediately;
/// the spool is crash-safe, so nothing is lost by bailing out.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }
        trigger.cancel();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Second signal, exiting immediately");
                std::process::exit(130);
            }
            _ = sigterm.recv() => {
                tracing::warn!("Second signal, exiting immediately");
                std::process::exit(143);
            }
        }
    });

    token
}
