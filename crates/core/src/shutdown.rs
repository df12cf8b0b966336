//! Cooperative shutdown wiring shared by both binaries.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Return a token that is cancelled on SIGINT/SIGTERM (Ctrl+C elsewhere).
///
/// Long-running loops check the token once per cycle and exit cleanly.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        os_signal().await;
        info!("shutdown signal received");
        trigger.cancel();
    });
    token
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}
