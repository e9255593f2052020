//! Trial lifecycle: the calls that create, cancel and move trials, and the
//! reminder bookkeeping each one implies.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::SchedulerConfig;
use crate::error::{Result, TrialwatchError};
use crate::scheduler::{
    DEFAULT_SAFETY_MARGIN_SECS, OffsetPolicy, ReminderPlan, parse_civil_date, plan_for_date,
};
use crate::storage::ReminderStore;
use crate::types::{Reminder, Trial, TrialId, TrialStatus, User, UserId};

/// Input for [`TrialService::register_trial`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrial {
    pub user_id: UserId,
    pub service_name: String,
    /// `YYYY-MM-DD` in the user's own calendar.
    pub end_date: String,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// A stored trial with the reminders planned for it.
#[derive(Debug, Clone)]
pub struct TrialRegistration {
    pub trial: Trial,
    pub plan: ReminderPlan,
    pub reminders: Vec<Reminder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelReport {
    /// `false` when the trial was already canceled.
    pub newly_canceled: bool,
    /// Pending reminders moved to skipped by this call.
    pub skipped: usize,
}

pub struct TrialService {
    store: Arc<dyn ReminderStore>,
    policy: OffsetPolicy,
    safety_margin: Duration,
}

impl TrialService {
    pub fn new(store: Arc<dyn ReminderStore>) -> Self {
        Self {
            store,
            policy: OffsetPolicy::default(),
            safety_margin: Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
        }
    }

    /// Apply the `[scheduler]` section.
    pub fn with_config(self, config: &SchedulerConfig) -> Result<Self> {
        Ok(self
            .with_policy(config.policy()?)
            .with_safety_margin(config.safety_margin()))
    }

    pub fn with_policy(mut self, policy: OffsetPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin = margin;
        self
    }

    /// Store a new active trial and its pending reminders.
    ///
    /// A trial too close to its end for any reminder is still stored, with
    /// no reminders.
    pub async fn register_trial(
        &self,
        new: NewTrial,
        now: DateTime<Utc>,
    ) -> Result<TrialRegistration> {
        let user = self.load_user(&new.user_id).await?;
        let service_name = new.service_name.trim();
        if service_name.is_empty() {
            return Err(TrialwatchError::InvalidTrial(
                "service name is empty".to_owned(),
            ));
        }
        let end_date = parse_civil_date(&new.end_date)?;

        let trial = Trial {
            id: TrialId::generate(),
            user_id: user.id.clone(),
            service_name: service_name.to_owned(),
            end_date,
            status: TrialStatus::Active,
            cancel_url: new.cancel_url.filter(|url| !url.trim().is_empty()),
            created_at: now,
            canceled_at: None,
        };

        let plan = plan_for_date(end_date, now, &user.timezone, &self.policy, self.safety_margin);
        let reminders = reminders_for(&trial, &plan, now);
        self.store.insert_trial(&trial, &reminders).await?;

        info!(
            trial_id = %trial.id,
            service = %trial.service_name,
            reminders = reminders.len(),
            "registered trial"
        );
        Ok(TrialRegistration {
            trial,
            plan,
            reminders,
        })
    }

    /// Cancel a trial and skip its pending reminders.
    ///
    /// Canceling twice is not an error; the second call still sweeps up any
    /// reminder left pending.
    pub async fn cancel_trial(&self, trial_id: &TrialId, now: DateTime<Utc>) -> Result<CancelReport> {
        if self.store.get_trial(trial_id).await?.is_none() {
            return Err(TrialwatchError::NotFound(format!("trial {trial_id}")));
        }
        let newly_canceled = self.store.cancel_trial(trial_id, now).await?;
        let skipped = self.store.skip_pending(trial_id).await?;
        info!(%trial_id, newly_canceled, skipped, "canceled trial");
        Ok(CancelReport {
            newly_canceled,
            skipped,
        })
    }

    /// Move an active trial's end date and replan its reminders.
    ///
    /// Reminders already sent or failed stay as they are; pending ones are
    /// skipped and replaced by the new plan in one store write, so a cancel
    /// racing this call never leaves a pending reminder behind.
    pub async fn reschedule_trial(
        &self,
        trial_id: &TrialId,
        new_end_date: &str,
        now: DateTime<Utc>,
    ) -> Result<TrialRegistration> {
        let trial = self
            .store
            .get_trial(trial_id)
            .await?
            .ok_or_else(|| TrialwatchError::NotFound(format!("trial {trial_id}")))?;
        if trial.status != TrialStatus::Active {
            return Err(TrialwatchError::InvalidTrial(format!(
                "trial {trial_id} is {}",
                trial.status.as_str()
            )));
        }
        let user = self.load_user(&trial.user_id).await?;
        let end_date = parse_civil_date(new_end_date)?;

        let trial = Trial { end_date, ..trial };
        let plan = plan_for_date(end_date, now, &user.timezone, &self.policy, self.safety_margin);
        let reminders = reminders_for(&trial, &plan, now);

        let Some(skipped) = self.store.replan(trial_id, end_date, &reminders).await? else {
            return Err(TrialwatchError::InvalidTrial(format!(
                "trial {trial_id} was canceled concurrently"
            )));
        };

        info!(
            %trial_id,
            %end_date,
            skipped,
            reminders = reminders.len(),
            "rescheduled trial"
        );
        Ok(TrialRegistration {
            trial,
            plan,
            reminders,
        })
    }

    async fn load_user(&self, user_id: &UserId) -> Result<User> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| TrialwatchError::NotFound(format!("user {user_id}")))
    }
}

fn reminders_for(trial: &Trial, plan: &ReminderPlan, now: DateTime<Utc>) -> Vec<Reminder> {
    plan.entries
        .iter()
        .map(|entry| Reminder::pending(trial, entry.fire_at, entry.kind, now))
        .collect()
}
