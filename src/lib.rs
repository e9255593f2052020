//! Trialwatch: free-trial renewal reminders.
//!
//! Users record free trials of subscription services; trialwatch emails
//! them before each trial renews, with a link to cancel.
//!
//! # Architecture
//!
//! - **Scheduler**: turns a trial's civil end date and the owner's time zone
//!   into UTC fire times, using an adaptive offset policy
//! - **Storage**: SQLite-backed users, trials and reminders via `rusqlite`
//! - **Dispatch**: claims due reminders atomically and sends each at most once
//! - **Notify**: composes the email and hands it to a provider
//! - **Trigger**: optional HTTP endpoint for external cron via `axum`

pub mod config;
pub mod dispatch;
pub mod error;
pub mod notify;
pub mod scheduler;
pub mod storage;
pub mod trials;
pub mod trigger;
pub mod types;

pub use config::TrialwatchConfig;
pub use dispatch::{DispatchLoop, DispatchSummary, FailureDetail, ReminderDispatcher};
pub use error::{Result, TrialwatchError};
pub use notify::{DeliveryReport, NotificationSender};
pub use scheduler::{OffsetPolicy, ReminderPlan, compute_reminder_plan};
pub use storage::{ReminderStore, SqliteReminderStore};
pub use trials::{NewTrial, TrialService};
pub use types::{Reminder, ReminderKind, ReminderStatus, Trial, TrialStatus, User};
