//! Periodic dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::ReminderDispatcher;

/// Default time between sweeps.
pub const DEFAULT_INTERVAL_SECS: u64 = 300;

/// Runs [`ReminderDispatcher::process_due_reminders`] on a fixed interval
/// until cancelled.
pub struct DispatchLoop {
    dispatcher: Arc<ReminderDispatcher>,
    interval: Duration,
    cancel: CancellationToken,
}

impl DispatchLoop {
    pub fn new(dispatcher: Arc<ReminderDispatcher>, cancel: CancellationToken) -> Self {
        Self {
            dispatcher,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            cancel,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the loop onto the tokio runtime.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweep immediately, then once per interval. A failed sweep is logged
    /// and the next tick tries again.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "dispatch loop started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("dispatch loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.dispatcher.process_due_reminders(Utc::now()).await {
                        error!("dispatch sweep failed: {e}");
                    }
                }
            }
        }
    }
}
