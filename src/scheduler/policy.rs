//! Offset policy: which reminders to plan for how much time is left.
//!
//! A policy is an ordered list of tiers, longest window first. Each tier
//! names the reminder kinds to schedule once the time left until the
//! trial ends exceeds its threshold. The final tier has a zero threshold
//! and catches every remaining window.

use crate::error::{Result, TrialwatchError};
use crate::types::ReminderKind;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One policy bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetTier {
    /// Tier name, recorded on the plan for logging.
    pub name: String,
    /// Tier applies when the time left is strictly greater than this.
    pub min_hours_left: i64,
    /// Reminder kinds planned in this tier.
    pub kinds: Vec<ReminderKind>,
}

impl OffsetTier {
    fn new(name: &str, min_hours_left: i64, kinds: &[ReminderKind]) -> Self {
        Self {
            name: name.to_owned(),
            min_hours_left,
            kinds: kinds.to_vec(),
        }
    }

    #[must_use]
    pub fn min_time_left(&self) -> Duration {
        Duration::hours(self.min_hours_left)
    }
}

/// Named built-in policy tables.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPreset {
    /// Far-out reminders for long windows, hour buckets close to expiry.
    #[default]
    Adaptive,
    /// Three days and one day before, whatever the window.
    Fixed,
    /// Three, two and one day before.
    Daily,
}

/// Ordered offset tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetPolicy {
    tiers: Vec<OffsetTier>,
}

impl Default for OffsetPolicy {
    fn default() -> Self {
        Self::preset(PolicyPreset::Adaptive)
    }
}

impl OffsetPolicy {
    /// Build one of the built-in tables.
    #[must_use]
    pub fn preset(preset: PolicyPreset) -> Self {
        use ReminderKind::*;
        let tiers = match preset {
            PolicyPreset::Adaptive => vec![
                OffsetTier::new("standard", 96, &[ThreeDays, OneDay]),
                OffsetTier::new("medium", 30, &[OneDay, TwoHours]),
                OffsetTier::new("short", 0, &[TwelveHours, OneHour]),
            ],
            PolicyPreset::Fixed => vec![OffsetTier::new("fixed", 0, &[ThreeDays, OneDay])],
            PolicyPreset::Daily => {
                vec![OffsetTier::new("daily", 0, &[ThreeDays, TwoDays, OneDay])]
            }
        };
        Self { tiers }
    }

    /// Build a custom table, rejecting tables that break the tier rules.
    pub fn from_tiers(tiers: Vec<OffsetTier>) -> Result<Self> {
        let policy = Self { tiers };
        policy.validate()?;
        Ok(policy)
    }

    pub fn tiers(&self) -> &[OffsetTier] {
        &self.tiers
    }

    /// Check ordering rules: non-empty, strictly descending thresholds,
    /// a zero final threshold, and no duplicate kinds inside a tier.
    pub fn validate(&self) -> Result<()> {
        let Some(last) = self.tiers.last() else {
            return Err(TrialwatchError::InvalidPolicy(
                "policy has no tiers".to_owned(),
            ));
        };
        if last.min_hours_left != 0 {
            return Err(TrialwatchError::InvalidPolicy(format!(
                "final tier '{}' must have min_hours_left = 0, got {}",
                last.name, last.min_hours_left
            )));
        }

        for (longer, shorter) in self.tiers.iter().zip(self.tiers.iter().skip(1)) {
            if longer.min_hours_left <= shorter.min_hours_left {
                return Err(TrialwatchError::InvalidPolicy(format!(
                    "tier '{}' ({}h) must have a larger threshold than '{}' ({}h)",
                    longer.name, longer.min_hours_left, shorter.name, shorter.min_hours_left
                )));
            }
        }

        for tier in &self.tiers {
            if tier.kinds.is_empty() {
                return Err(TrialwatchError::InvalidPolicy(format!(
                    "tier '{}' has no reminder kinds",
                    tier.name
                )));
            }
            let mut seen = HashSet::new();
            for kind in &tier.kinds {
                if !seen.insert(*kind) {
                    return Err(TrialwatchError::InvalidPolicy(format!(
                        "tier '{}' lists {kind} twice",
                        tier.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// The tier that applies to `time_left`, or `None` when the trial is over.
    pub fn select(&self, time_left: Duration) -> Option<&OffsetTier> {
        if time_left <= Duration::zero() {
            return None;
        }
        self.tiers
            .iter()
            .find(|tier| time_left > tier.min_time_left())
    }
}
