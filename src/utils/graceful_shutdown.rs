use std::{future::Future, time::Duration};

use tokio::{signal, sync::watch, time::timeout};
use tokio_util::sync::CancellationToken;

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered from code
    Requested,
}

/// Coordinates shutdown: one root [`CancellationToken`] that the listener and
/// every background task hang off, plus a bounded drain for in-flight work.
pub struct GracefulShutdown {
    token: CancellationToken,
    reason: watch::Sender<Option<ShutdownReason>>,
    grace_period: Duration,
}

impl GracefulShutdown {
    pub fn new(grace_period: Duration) -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            token: CancellationToken::new(),
            reason,
            grace_period,
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// The root token; cancelled once shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Why shutdown began, if it has.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.borrow()
    }

    /// Begin shutdown. Only the first call has any effect.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self.token.is_cancelled() {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
            return;
        }
        tracing::info!("Shutdown initiated: {:?}", reason);
        self.reason.send_replace(Some(reason));
        self.token.cancel();
    }

    /// Wait for SIGINT or SIGTERM (or a programmatic trigger) and begin
    /// shutdown. Returns the reason.
    pub async fn run_signal_handler(&self) -> ShutdownReason {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for SIGINT: {}", e);
                }
                self.trigger_shutdown(ShutdownReason::Interrupt);
            }
            _ = wait_for_sigterm() => {
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
            _ = self.token.cancelled() => {}
        }

        self.reason().unwrap_or(ShutdownReason::Requested)
    }

    /// Let `work` finish for at most the grace period. `None` means the
    /// deadline passed and the work was abandoned.
    pub async fn drain<F: Future>(&self, work: F) -> Option<F::Output> {
        match timeout(self.grace_period, work).await {
            Ok(output) => Some(output),
            Err(_) => {
                tracing::warn!(
                    "Grace period of {:?} exceeded, abandoning in-flight requests",
                    self.grace_period
                );
                None
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C exists off Unix
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_graceful_shutdown_creation() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(30));
        assert!(!shutdown.is_shutdown_initiated());
        assert_eq!(shutdown.reason(), None);
        assert_eq!(shutdown.grace_period(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_trigger_cancels_token_once() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(1));
        let token = shutdown.token();
        let child = token.child_token();

        shutdown.trigger_shutdown(ShutdownReason::Requested);
        shutdown.trigger_shutdown(ShutdownReason::Terminate);

        assert!(token.is_cancelled());
        assert!(child.is_cancelled());
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Requested));
    }

    #[tokio::test]
    async fn test_signal_handler_returns_on_programmatic_trigger() {
        let shutdown = std::sync::Arc::new(GracefulShutdown::new(Duration::from_secs(1)));
        let handler = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.run_signal_handler().await })
        };

        shutdown.trigger_shutdown(ShutdownReason::Requested);
        assert_eq!(handler.await.unwrap(), ShutdownReason::Requested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_respects_grace_period() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(2));

        assert_eq!(shutdown.drain(async { 7 }).await, Some(7));

        let stuck = tokio::time::sleep(Duration::from_secs(60));
        assert_eq!(shutdown.drain(stuck).await, None);
    }
}
