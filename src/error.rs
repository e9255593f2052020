//! Error types for trialwatch.

use crate::notify::NotifyError;
use crate::storage::StoreError;

/// Top-level error type for reminder planning, dispatch and trial lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum TrialwatchError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// A civil end date that is not `YYYY-MM-DD`.
    #[error("invalid end date {input:?}: {reason}")]
    InvalidDate { input: String, reason: String },

    /// Offset policy table that breaks its ordering rules.
    #[error("invalid offset policy: {0}")]
    InvalidPolicy(String),

    /// Rejected trial input (empty service name, inactive trial, ...).
    #[error("invalid trial: {0}")]
    InvalidTrial(String),

    /// A referenced user or trial does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage collaborator failure.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// Notification sender could not be built.
    #[error("delivery error: {0}")]
    Delivery(#[from] NotifyError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Trigger endpoint error (bind, serve).
    #[error("trigger error: {0}")]
    Trigger(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TrialwatchError>;
