//! Graceful shutdown utilities
//!
//! Signal handling shared by the service binaries.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Which signal ended the wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interrupt => write!(f, "SIGINT"),
            Self::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix)
///
/// On Windows only Ctrl+C is observed.
pub async fn wait_for_shutdown() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Service will only respond to Ctrl+C",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    std::future::pending::<()>().await
                }
            } => ShutdownSignal::Terminate,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        ShutdownSignal::Interrupt
    }
}

/// Cancel `token` once a shutdown signal arrives
///
/// Returns immediately if the token is cancelled by someone else first.
pub async fn cancel_on_shutdown(token: CancellationToken) {
    tokio::select! {
        signal = wait_for_shutdown() => {
            info!("{} received, shutting down", signal);
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_on_shutdown_returns_when_token_cancelled() {
        let token = CancellationToken::new();
        let task = tokio::spawn(cancel_on_shutdown(token.clone()));
        token.cancel();
        let joined = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(joined.is_ok());
    }

    #[test]
    fn test_signal_display() {
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}
