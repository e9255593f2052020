//! Reminder scheduling.
//!
//! Turns a trial's civil end date and its owner's time zone into the UTC
//! instants at which reminder emails should fire. Everything here is pure:
//! `now` is always passed in.

pub mod plan;
pub mod policy;
pub mod zone;

pub use plan::{
    DEFAULT_SAFETY_MARGIN_SECS, PlannedReminder, ReminderPlan, compute_reminder_plan,
    parse_civil_date, plan_for_date,
};
pub use policy::{OffsetPolicy, OffsetTier, PolicyPreset};
pub use zone::{ResolvedZone, end_of_day_instant};
