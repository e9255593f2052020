//! Records shared by the scheduler, the dispatcher and the store.
//!
//! The store persists these as plain rows; the status enums carry the
//! only legal transitions so callers never compare status strings.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), uuid::Uuid::new_v4().simple()))
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a [`User`].
    UserId,
    "usr"
);
string_id!(
    /// Identifier of a [`Trial`].
    TrialId,
    "trl"
);
string_id!(
    /// Identifier of a [`Reminder`].
    ReminderId,
    "rem"
);

// ---------------------------------------------------------------------------
// Users and trials
// ---------------------------------------------------------------------------

/// Account that owns trials. Only the time zone matters to planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// IANA zone name, e.g. `"Europe/Berlin"`.
    pub timezone: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Active,
    Canceled,
}

impl TrialStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

/// A tracked free trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub id: TrialId,
    pub user_id: UserId,
    pub service_name: String,
    /// Last day of the trial in the owner's local calendar.
    pub end_date: NaiveDate,
    pub status: TrialStatus,
    #[serde(default)]
    pub cancel_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub canceled_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Reminder kinds
// ---------------------------------------------------------------------------

/// Semantic label of a reminder: how long before the trial's end it fires.
///
/// The offset is derived from the kind, so a stored label always maps back
/// to the exact offset that produced its `remind_at`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    ThreeDays,
    TwoDays,
    OneDay,
    TwelveHours,
    SixHours,
    TwoHours,
    OneHour,
}

impl ReminderKind {
    pub const ALL: [Self; 7] = [
        Self::ThreeDays,
        Self::TwoDays,
        Self::OneDay,
        Self::TwelveHours,
        Self::SixHours,
        Self::TwoHours,
        Self::OneHour,
    ];

    /// Hours before the end-of-day instant.
    #[must_use]
    pub const fn hours_before_end(self) -> i64 {
        match self {
            Self::ThreeDays => 72,
            Self::TwoDays => 48,
            Self::OneDay => 24,
            Self::TwelveHours => 12,
            Self::SixHours => 6,
            Self::TwoHours => 2,
            Self::OneHour => 1,
        }
    }

    #[must_use]
    pub fn offset(self) -> Duration {
        Duration::hours(self.hours_before_end())
    }

    /// Inverse of [`ReminderKind::hours_before_end`].
    #[must_use]
    pub fn from_hours_before_end(hours: i64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.hours_before_end() == hours)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ThreeDays => "three_days",
            Self::TwoDays => "two_days",
            Self::OneDay => "one_day",
            Self::TwelveHours => "twelve_hours",
            Self::SixHours => "six_hours",
            Self::TwoHours => "two_hours",
            Self::OneHour => "one_hour",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// Human phrasing used in email copy, e.g. `"3 days"`.
    pub fn phrase(self) -> &'static str {
        match self {
            Self::ThreeDays => "3 days",
            Self::TwoDays => "2 days",
            Self::OneDay => "1 day",
            Self::TwelveHours => "12 hours",
            Self::SixHours => "6 hours",
            Self::TwoHours => "2 hours",
            Self::OneHour => "1 hour",
        }
    }
}

impl fmt::Display for ReminderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Reminder status
// ---------------------------------------------------------------------------

/// Reminder delivery state.
///
/// ```text
/// Pending --claim--> Claimed --ok-----> Sent
///                            --error--> Failed
/// Pending --cancel/reschedule--------> Skipped
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    /// Claimed by exactly one dispatcher; delivery in flight.
    Claimed,
    Sent,
    Failed,
    Skipped,
}

impl ReminderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Returns `true` for states that never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Skipped)
    }

    /// Returns `true` when `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Claimed)
                | (Self::Pending, Self::Skipped)
                | (Self::Claimed, Self::Sent)
                | (Self::Claimed, Self::Failed)
        )
    }
}

/// One scheduled notification for one trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: ReminderId,
    pub trial_id: TrialId,
    pub user_id: UserId,
    pub remind_at: DateTime<Utc>,
    pub kind: ReminderKind,
    pub status: ReminderStatus,
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    /// Build a fresh `Pending` reminder.
    pub fn pending(
        trial: &Trial,
        remind_at: DateTime<Utc>,
        kind: ReminderKind,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReminderId::generate(),
            trial_id: trial.id.clone(),
            user_id: trial.user_id.clone(),
            remind_at,
            kind,
            status: ReminderStatus::Pending,
            claimed_at: None,
            sent_at: None,
            message_id: None,
            last_error: None,
            created_at,
        }
    }
}

/// A due reminder joined with the rows the sender needs.
#[derive(Debug, Clone)]
pub struct DueReminder {
    pub reminder: Reminder,
    pub trial: Trial,
    pub user: User,
}
