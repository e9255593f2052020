//! Reminder delivery.
//!
//! The dispatcher only sees [`NotificationSender`]. Two implementations
//! ship with the crate:
//! - [`HttpEmailSender`]: posts to a transactional-email HTTP API.
//! - [`LogSender`]: writes the composed message to the log.

pub mod http;
pub mod log;
pub mod template;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{DeliveryConfig, DeliveryMode};
use crate::types::{ReminderKind, Trial, User};

pub use http::HttpEmailSender;
pub use log::LogSender;
pub use template::ReminderMessage;

/// Errors raised before or while talking to the email provider.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sender misconfigured: {0}")]
    Config(String),
}

/// What the provider said about one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryReport {
    #[must_use]
    pub fn delivered(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Sends one reminder email for one trial.
///
/// `Ok` with `success == false` means the provider answered and refused;
/// `Err` means no answer was obtained. The dispatcher records both as
/// failed and never retries.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        trial: &Trial,
        user: &User,
        kind: ReminderKind,
    ) -> Result<DeliveryReport, NotifyError>;
}

/// Build the sender selected by `delivery.mode`.
pub fn sender_from_config(
    config: &DeliveryConfig,
) -> Result<Box<dyn NotificationSender>, NotifyError> {
    match config.mode {
        DeliveryMode::Log => Ok(Box::new(LogSender::new(config.app_base_url.clone()))),
        DeliveryMode::Http => Ok(Box::new(HttpEmailSender::from_config(config)?)),
    }
}
