//! Signal handling for graceful shutdown.

use tracing::info;

/// Resolve when the process receives a shutdown signal.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");

    let received = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };

    info!(signal = received, "shutdown signal received");
}

/// Resolve when the process receives a shutdown signal.
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(signal = "ctrl-c", "shutdown signal received");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn cancellation_fans_out_to_clones() {
        let shutdown = CancellationToken::new();
        let clone = shutdown.clone();

        shutdown.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_token_unblocks_waiters_immediately() {
        let shutdown = CancellationToken::new();
        let waiter = shutdown.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = waiter.cancelled() => "cancelled",
                _ = tokio::time::sleep(Duration::from_secs(30)) => "timeout",
            }
        });

        shutdown.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter should finish promptly")
            .expect("waiter should not panic");
        assert_eq!(result, "cancelled");
    }
}
