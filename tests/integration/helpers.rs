//! Shared helpers for integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Barrier;
use trialwatch::notify::{DeliveryReport, NotificationSender, NotifyError};
use trialwatch::storage::{Claim, DeliveryOutcome, ReminderStore, StoreError};
use trialwatch::types::{DueReminder, Reminder, ReminderId, ReminderKind, Trial, TrialId, User, UserId};
use trialwatch::SqliteReminderStore;

pub(crate) fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

pub(crate) fn user(id: &str, timezone: &str) -> User {
    User {
        id: UserId::from(id),
        email: format!("{id}@example.com"),
        display_name: Some("Test User".to_owned()),
        timezone: timezone.to_owned(),
    }
}

/// File-backed store in a fresh temp dir. Keep the dir alive for the test.
pub(crate) fn temp_store() -> (Arc<SqliteReminderStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = SqliteReminderStore::open(&dir.path().join("trialwatch.db")).expect("open store");
    (Arc::new(store), dir)
}

/// Sender that always succeeds and counts calls per service.
#[derive(Default)]
pub(crate) struct CountingSender {
    calls: AtomicUsize,
    kinds: std::sync::Mutex<Vec<(String, ReminderKind)>>,
}

impl CountingSender {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sent(&self) -> Vec<(String, ReminderKind)> {
        self.kinds.lock().expect("sender log").clone()
    }
}

#[async_trait]
impl NotificationSender for CountingSender {
    async fn send(
        &self,
        trial: &Trial,
        _user: &User,
        kind: ReminderKind,
    ) -> Result<DeliveryReport, NotifyError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.kinds
            .lock()
            .expect("sender log")
            .push((trial.service_name.clone(), kind));
        Ok(DeliveryReport::delivered(Some(format!("msg-{n}"))))
    }
}

/// Store wrapper that injects a competing write into a gap between calls.
///
/// With a barrier, every sweep sharing it has fetched before any of them
/// claims. With `cancel_after_fetch`, the trial is canceled (without
/// skipping its reminders) in that window. With `cancel_on_user_lookup`, a
/// full cancel (trial plus pending reminders) lands while a lifecycle call
/// is between reading the trial and writing it.
pub(crate) struct GatedStore {
    inner: Arc<SqliteReminderStore>,
    barrier: Option<Arc<Barrier>>,
    cancel_after_fetch: Option<TrialId>,
    cancel_on_user_lookup: Option<TrialId>,
}

impl GatedStore {
    pub(crate) fn with_barrier(inner: Arc<SqliteReminderStore>, barrier: Arc<Barrier>) -> Self {
        Self {
            inner,
            barrier: Some(barrier),
            cancel_after_fetch: None,
            cancel_on_user_lookup: None,
        }
    }

    pub(crate) fn canceling(inner: Arc<SqliteReminderStore>, trial_id: TrialId) -> Self {
        Self {
            inner,
            barrier: None,
            cancel_after_fetch: Some(trial_id),
            cancel_on_user_lookup: None,
        }
    }

    pub(crate) fn canceling_on_user_lookup(
        inner: Arc<SqliteReminderStore>,
        trial_id: TrialId,
    ) -> Self {
        Self {
            inner,
            barrier: None,
            cancel_after_fetch: None,
            cancel_on_user_lookup: Some(trial_id),
        }
    }
}

#[async_trait]
impl ReminderStore for GatedStore {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.inner.upsert_user(user).await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let user = self.inner.get_user(id).await?;
        if let Some(trial_id) = &self.cancel_on_user_lookup {
            self.inner.cancel_trial(trial_id, Utc::now()).await?;
            self.inner.skip_pending(trial_id).await?;
        }
        Ok(user)
    }

    async fn insert_trial(&self, trial: &Trial, reminders: &[Reminder]) -> Result<(), StoreError> {
        self.inner.insert_trial(trial, reminders).await
    }

    async fn get_trial(&self, id: &TrialId) -> Result<Option<Trial>, StoreError> {
        self.inner.get_trial(id).await
    }

    async fn reminders_for_trial(&self, trial_id: &TrialId) -> Result<Vec<Reminder>, StoreError> {
        self.inner.reminders_for_trial(trial_id).await
    }

    async fn cancel_trial(&self, trial_id: &TrialId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.cancel_trial(trial_id, at).await
    }

    async fn replan(
        &self,
        trial_id: &TrialId,
        end_date: NaiveDate,
        reminders: &[Reminder],
    ) -> Result<Option<usize>, StoreError> {
        self.inner.replan(trial_id, end_date, reminders).await
    }

    async fn skip_pending(&self, trial_id: &TrialId) -> Result<usize, StoreError> {
        self.inner.skip_pending(trial_id).await
    }

    async fn fetch_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DueReminder>, StoreError> {
        let due = self.inner.fetch_due(now, limit).await?;
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(trial_id) = &self.cancel_after_fetch {
            self.inner.cancel_trial(trial_id, now).await?;
        }
        Ok(due)
    }

    async fn claim(
        &self,
        reminder_id: &ReminderId,
        now: DateTime<Utc>,
    ) -> Result<Option<Claim>, StoreError> {
        self.inner.claim(reminder_id, now).await
    }

    async fn record_outcome(&self, claim: Claim, outcome: DeliveryOutcome) -> Result<(), StoreError> {
        self.inner.record_outcome(claim, outcome).await
    }
}
