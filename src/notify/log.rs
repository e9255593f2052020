//! Sender that only logs. Used for local runs and dry runs.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use super::template::ReminderMessage;
use super::{DeliveryReport, NotificationSender, NotifyError};
use crate::types::{ReminderKind, Trial, User};

pub struct LogSender {
    app_base_url: String,
    sent: AtomicU64,
}

impl LogSender {
    pub fn new(app_base_url: impl Into<String>) -> Self {
        Self {
            app_base_url: app_base_url.into(),
            sent: AtomicU64::new(0),
        }
    }

    /// Number of messages logged so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(
        &self,
        trial: &Trial,
        user: &User,
        kind: ReminderKind,
    ) -> Result<DeliveryReport, NotifyError> {
        let message = ReminderMessage::compose(trial, user, kind, &self.app_base_url);
        let seq = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            to = %message.to,
            subject = %message.subject,
            cancel_link = %message.cancel_link,
            "reminder (log delivery)"
        );
        Ok(DeliveryReport::delivered(Some(format!("log-{seq}"))))
    }
}
