//! Reminder plan computation.

use crate::error::{Result, TrialwatchError};
use crate::scheduler::policy::OffsetPolicy;
use crate::scheduler::zone::{ResolvedZone, end_of_day_instant};
use crate::types::ReminderKind;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::debug;

/// Default minimum gap between "now" and a planned fire time.
pub const DEFAULT_SAFETY_MARGIN_SECS: i64 = 300;

/// One reminder to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlannedReminder {
    pub fire_at: DateTime<Utc>,
    pub kind: ReminderKind,
}

/// Output of [`compute_reminder_plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderPlan {
    /// Local end-of-day of the trial, in UTC.
    pub end_instant: DateTime<Utc>,
    pub zone: ResolvedZone,
    /// Name of the policy tier used, `None` when the trial is already over.
    pub tier: Option<String>,
    /// Ascending by `fire_at`.
    pub entries: Vec<PlannedReminder>,
}

impl ReminderPlan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a `YYYY-MM-DD` civil date.
pub fn parse_civil_date(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|e| {
        TrialwatchError::InvalidDate {
            input: input.to_owned(),
            reason: e.to_string(),
        }
    })
}

/// Compute the reminders for a trial ending on `end_date` in `timezone`.
///
/// Fails only when `end_date` does not parse. An unknown zone plans in UTC.
pub fn compute_reminder_plan(
    end_date: &str,
    now: DateTime<Utc>,
    timezone: &str,
    policy: &OffsetPolicy,
    safety_margin: Duration,
) -> Result<ReminderPlan> {
    let date = parse_civil_date(end_date)?;
    Ok(plan_for_date(date, now, timezone, policy, safety_margin))
}

/// [`compute_reminder_plan`] for an already-parsed date.
pub fn plan_for_date(
    end_date: NaiveDate,
    now: DateTime<Utc>,
    timezone: &str,
    policy: &OffsetPolicy,
    safety_margin: Duration,
) -> ReminderPlan {
    let zone = ResolvedZone::resolve(timezone);
    let end_instant = end_of_day_instant(end_date, &zone);
    let time_left = end_instant - now;

    let Some(tier) = policy.select(time_left) else {
        debug!(%end_date, %now, "trial already ended, no reminders planned");
        return ReminderPlan {
            end_instant,
            zone,
            tier: None,
            entries: Vec::new(),
        };
    };

    let earliest = now + safety_margin;
    let mut entries: Vec<PlannedReminder> = tier
        .kinds
        .iter()
        .map(|&kind| PlannedReminder {
            fire_at: end_instant - kind.offset(),
            kind,
        })
        .filter(|entry| entry.fire_at > earliest)
        .collect();
    entries.sort_by_key(|entry| entry.fire_at);

    debug!(
        %end_date,
        tier = %tier.name,
        planned = entries.len(),
        "computed reminder plan"
    );

    ReminderPlan {
        end_instant,
        zone,
        tier: Some(tier.name.clone()),
        entries,
    }
}
