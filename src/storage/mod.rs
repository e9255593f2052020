//! Persistence seam for trials, users and reminders.
//!
//! Sub-modules:
//! - `schema`: SQLite DDL definitions.
//! - `sqlite`: SQLite-backed [`SqliteReminderStore`].
//!
//! The dispatcher and trial service only see [`ReminderStore`]; the claim
//! step is the one operation every implementation must make atomic.

pub(crate) mod schema;
pub mod sqlite;

use crate::types::{DueReminder, Reminder, ReminderId, ReminderStatus, Trial, TrialId, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

pub use sqlite::SqliteReminderStore;

/// Errors from a reminder store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("storage task failed: {0}")]
    Task(String),

    /// A terminal write hit a reminder that is not in the claimed state.
    #[error("reminder {id} is not {expected}")]
    InvalidTransition {
        id: ReminderId,
        expected: &'static str,
    },
}

/// Proof that this caller won the claim on one reminder.
///
/// [`ReminderStore::record_outcome`] consumes it, so each claim resolves
/// at most once. The token is written with the claim and must match on the
/// terminal write, so a claim built by hand cannot finish a reminder that
/// another worker holds.
#[derive(Debug, PartialEq, Eq)]
pub struct Claim {
    reminder_id: ReminderId,
    claimed_at: DateTime<Utc>,
    token: String,
}

impl Claim {
    /// For store implementations: wrap a conditional update that hit one
    /// row and stored `token` alongside it.
    #[must_use]
    pub fn new(reminder_id: ReminderId, claimed_at: DateTime<Utc>, token: String) -> Self {
        Self {
            reminder_id,
            claimed_at,
            token,
        }
    }

    pub fn reminder_id(&self) -> &ReminderId {
        &self.reminder_id
    }

    pub fn claimed_at(&self) -> DateTime<Utc> {
        self.claimed_at
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Terminal result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent {
        sent_at: DateTime<Utc>,
        message_id: Option<String>,
    },
    Failed {
        reason: String,
    },
}

impl DeliveryOutcome {
    #[must_use]
    pub fn status(&self) -> ReminderStatus {
        match self {
            Self::Sent { .. } => ReminderStatus::Sent,
            Self::Failed { .. } => ReminderStatus::Failed,
        }
    }
}

/// Storage collaborator used by the dispatcher and the trial service.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Insert or update a user.
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;

    /// Insert a trial together with its planned reminders.
    async fn insert_trial(&self, trial: &Trial, reminders: &[Reminder]) -> Result<(), StoreError>;

    async fn get_trial(&self, id: &TrialId) -> Result<Option<Trial>, StoreError>;

    /// All reminders of a trial, ascending by `remind_at`.
    async fn reminders_for_trial(&self, trial_id: &TrialId) -> Result<Vec<Reminder>, StoreError>;

    /// Move an active trial to canceled. Returns `false` when it already was.
    async fn cancel_trial(&self, trial_id: &TrialId, at: DateTime<Utc>)
    -> Result<bool, StoreError>;

    /// Move an active trial to a new end date in one step: set the date,
    /// skip its pending reminders and insert `reminders`.
    ///
    /// Returns the number of reminders skipped, or `None` (writing nothing)
    /// when the trial is no longer active.
    async fn replan(
        &self,
        trial_id: &TrialId,
        end_date: NaiveDate,
        reminders: &[Reminder],
    ) -> Result<Option<usize>, StoreError>;

    /// Mark every pending reminder of a trial skipped. Returns rows changed.
    async fn skip_pending(&self, trial_id: &TrialId) -> Result<usize, StoreError>;

    /// Pending reminders due at `now` whose trial is still active.
    async fn fetch_due(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<DueReminder>, StoreError>;

    /// Atomically move one reminder from pending to claimed.
    ///
    /// Returns `None` when the row was not pending (another worker won, or
    /// the trial was canceled in between).
    async fn claim(
        &self,
        reminder_id: &ReminderId,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, StoreError>;

    /// Write the terminal state of a claimed reminder.
    async fn record_outcome(&self, claim: Claim, outcome: DeliveryOutcome)
    -> Result<(), StoreError>;
}
