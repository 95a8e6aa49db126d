//! Cancellable periodic background work.
//!
//! A `PeriodicTask` runs a synchronous tick function on a fixed interval
//! until either its own token or the parent (shutdown) token is cancelled.
use std::time::Duration;

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

/// Handle to a spawned periodic loop.
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `tick` every `period`. The first tick fires one full period after
    /// spawning. Cancelling `parent` stops this task along with its siblings.
    pub fn spawn<F>(
        name: &'static str,
        period: Duration,
        parent: &CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let cancel = parent.child_token();
        let loop_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval() completes its first tick immediately
            ticker.tick().await;

            tracing::debug!(task = name, period = ?period, "Periodic task started");
            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => tick(),
                }
            }
            tracing::debug!(task = name, "Periodic task stopped");
        });

        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel this task only and wait for its loop to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(task = self.name, "Periodic task ended abnormally: {}", e);
        }
    }
}
