//! Graceful shutdown coordination.
//!
//! [`ShutdownSignal`] fans a single termination event (SIGINT, SIGTERM or a
//! programmatic trigger) out to every component holding a clone: the HTTP
//! server stops accepting requests and `main` then closes the broker
//! connection.
//!
//! # Example
//!
//! ```rust,ignore
//! let shutdown = ShutdownSignal::new();
//! tokio::spawn({
//!     let shutdown = shutdown.clone();
//!     async move { shutdown.listen_for_signals().await }
//! });
//!
//! axum::serve(listener, app)
//!     .with_graceful_shutdown(shutdown.clone().recv_owned())
//!     .await?;
//! ```

use tokio::sync::watch;
use tracing::info;

/// A cloneable, level-triggered shutdown flag.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Wait for SIGINT or SIGTERM, then trigger shutdown.
    pub async fn listen_for_signals(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }

        self.trigger();
    }

    /// Trigger shutdown manually (for testing or programmatic shutdown).
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once shutdown has been triggered, even if that already happened.
    pub async fn recv(&self) {
        let mut receiver = self.sender.subscribe();
        // Err only if the sender is gone, which cannot happen while `self` lives
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }

    /// Owned variant of [`ShutdownSignal::recv`] for `'static` futures.
    pub async fn recv_owned(self) {
        self.recv().await
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_manual_trigger() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_shutdown());

        let trigger_signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger_signal.trigger();
        });

        let result = tokio::time::timeout(Duration::from_millis(500), signal.recv()).await;
        assert!(result.is_ok());
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let result = tokio::time::timeout(Duration::from_millis(100), signal.clone().recv_owned()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let signal = ShutdownSignal::new();
        let other = signal.clone();

        other.trigger();

        assert!(signal.is_shutdown());
    }
}
