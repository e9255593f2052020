//! At-most-once reminder dispatch.
//!
//! A sweep fetches due reminders, claims each one with a conditional
//! update, sends only what it claimed, and records exactly one terminal
//! outcome per claim. Sweeps are safe to run concurrently from any number
//! of processes sharing one store; the claim decides who sends.

pub mod runner;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::notify::NotificationSender;
use crate::storage::{DeliveryOutcome, ReminderStore, StoreError};
use crate::types::{DueReminder, ReminderId, TrialId};

pub use runner::DispatchLoop;

/// Default cap on reminders considered per sweep.
pub const DEFAULT_BATCH_LIMIT: usize = 500;

/// Default number of sends in flight at once.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 4;

/// Why one claimed reminder ended up failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub reminder_id: ReminderId,
    pub trial_id: TrialId,
    pub reason: String,
}

/// Counters for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    /// Due reminders returned by the store.
    pub considered: usize,
    /// Reminders this sweep claimed and handed to the sender.
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    /// Reminders another sweep (or a cancellation) got to first.
    pub claim_conflicts: usize,
    pub failures: Vec<FailureDetail>,
}

enum Attempt {
    Conflict,
    Sent,
    Failed(FailureDetail),
    /// Not started because an earlier attempt hit a storage error.
    Halted,
}

/// Runs dispatch sweeps against a store and a sender.
pub struct ReminderDispatcher {
    store: Arc<dyn ReminderStore>,
    sender: Arc<dyn NotificationSender>,
    batch_limit: usize,
    max_concurrent_sends: usize,
}

impl ReminderDispatcher {
    pub fn new(store: Arc<dyn ReminderStore>, sender: Arc<dyn NotificationSender>) -> Self {
        Self {
            store,
            sender,
            batch_limit: DEFAULT_BATCH_LIMIT,
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
        }
    }

    /// Apply the `[dispatch]` section.
    pub fn with_config(self, config: &DispatchConfig) -> Self {
        self.with_batch_limit(config.batch_limit)
            .with_max_concurrent_sends(config.max_concurrent_sends)
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    pub fn with_max_concurrent_sends(mut self, max: usize) -> Self {
        self.max_concurrent_sends = max.max(1);
        self
    }

    /// Run one sweep at `now`.
    ///
    /// Delivery failures are recorded and counted; they never abort the
    /// sweep. A storage error halts it: no further reminder is claimed,
    /// sends already in flight finish, and the first error is returned.
    /// Reminders resolved before the error keep their outcome.
    pub async fn process_due_reminders(&self, now: DateTime<Utc>) -> crate::Result<DispatchSummary> {
        let due = self.store.fetch_due(now, self.batch_limit).await?;
        let mut summary = DispatchSummary {
            considered: due.len(),
            ..DispatchSummary::default()
        };
        if due.is_empty() {
            debug!("no reminders due");
            return Ok(summary);
        }

        let halted = AtomicBool::new(false);
        let attempts: Vec<_> = due
            .into_iter()
            .map(|item| self.attempt_unless_halted(item, now, &halted))
            .collect();
        let results: Vec<Result<Attempt, StoreError>> = futures_util::stream::iter(attempts)
            .buffer_unordered(self.max_concurrent_sends)
            .collect()
            .await;

        let mut first_error = None;
        let mut not_started = 0usize;
        for result in results {
            match result {
                Ok(Attempt::Conflict) => summary.claim_conflicts += 1,
                Ok(Attempt::Halted) => not_started += 1,
                Ok(Attempt::Sent) => {
                    summary.attempted += 1;
                    summary.sent += 1;
                }
                Ok(Attempt::Failed(detail)) => {
                    summary.attempted += 1;
                    summary.failed += 1;
                    summary.failures.push(detail);
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            warn!(
                sent = summary.sent,
                failed = summary.failed,
                not_started,
                "dispatch sweep aborted by storage error: {e}"
            );
            return Err(e.into());
        }

        info!(
            considered = summary.considered,
            sent = summary.sent,
            failed = summary.failed,
            conflicts = summary.claim_conflicts,
            "dispatch sweep finished"
        );
        Ok(summary)
    }

    async fn attempt_unless_halted(
        &self,
        due: DueReminder,
        now: DateTime<Utc>,
        halted: &AtomicBool,
    ) -> Result<Attempt, StoreError> {
        if halted.load(Ordering::SeqCst) {
            return Ok(Attempt::Halted);
        }
        let result = self.attempt(due, now).await;
        if result.is_err() {
            halted.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn attempt(&self, due: DueReminder, now: DateTime<Utc>) -> Result<Attempt, StoreError> {
        let DueReminder {
            reminder,
            trial,
            user,
        } = due;

        let Some(claim) = self.store.claim(&reminder.id, now).await? else {
            debug!(reminder_id = %reminder.id, "reminder already claimed or trial canceled");
            return Ok(Attempt::Conflict);
        };

        let outcome = match self.sender.send(&trial, &user, reminder.kind).await {
            Ok(report) if report.success => DeliveryOutcome::Sent {
                sent_at: now,
                message_id: report.message_id,
            },
            Ok(report) => DeliveryOutcome::Failed {
                reason: report
                    .error
                    .unwrap_or_else(|| "sender reported failure".to_owned()),
            },
            Err(e) => DeliveryOutcome::Failed {
                reason: e.to_string(),
            },
        };

        let attempt = match &outcome {
            DeliveryOutcome::Sent { .. } => {
                info!(
                    reminder_id = %reminder.id,
                    trial_id = %trial.id,
                    kind = %reminder.kind,
                    "reminder sent"
                );
                Attempt::Sent
            }
            DeliveryOutcome::Failed { reason } => {
                warn!(
                    reminder_id = %reminder.id,
                    trial_id = %trial.id,
                    kind = %reminder.kind,
                    "reminder delivery failed: {reason}"
                );
                Attempt::Failed(FailureDetail {
                    reminder_id: reminder.id.clone(),
                    trial_id: trial.id.clone(),
                    reason: reason.clone(),
                })
            }
        };

        self.store.record_outcome(claim, outcome).await?;
        Ok(attempt)
    }
}
