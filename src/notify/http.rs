//! Transactional-email sender over HTTP.
//!
//! Posts `{from, to, subject, text}` as JSON with a bearer key and expects
//! `{"id": "..."}` back on success, the shape shared by the common
//! transactional-email APIs.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::template::ReminderMessage;
use super::{DeliveryReport, NotificationSender, NotifyError};
use crate::config::DeliveryConfig;
use crate::types::{ReminderKind, Trial, User};

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Sends reminders through an HTTP email API.
pub struct HttpEmailSender {
    endpoint: url::Url,
    api_key: String,
    from_address: String,
    app_base_url: String,
    client: reqwest::Client,
}

impl HttpEmailSender {
    pub fn new(
        endpoint: &str,
        api_key: impl Into<String>,
        from_address: impl Into<String>,
        app_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| NotifyError::Config(format!("bad endpoint {endpoint:?}: {e}")))?;
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(NotifyError::Config("email API key is empty".to_owned()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            api_key,
            from_address: from_address.into(),
            app_base_url: app_base_url.into(),
            client,
        })
    }

    /// Build from the `[delivery]` section, reading the key from the
    /// environment variable it names.
    pub fn from_config(config: &DeliveryConfig) -> Result<Self, NotifyError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            NotifyError::Config(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::new(
            &config.endpoint,
            api_key,
            config.from_address.clone(),
            config.app_base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl NotificationSender for HttpEmailSender {
    async fn send(
        &self,
        trial: &Trial,
        user: &User,
        kind: ReminderKind,
    ) -> Result<DeliveryReport, NotifyError> {
        let message = ReminderMessage::compose(trial, user, kind, &self.app_base_url);
        let body = SendRequest {
            from: &self.from_address,
            to: &message.to,
            subject: &message.subject,
            text: &message.text,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            warn!(trial_id = %trial.id, %status, "email provider rejected reminder");
            return Ok(DeliveryReport::rejected(format!("{status}: {text}")));
        }

        let message_id = serde_json::from_str::<SendResponse>(&text)
            .ok()
            .and_then(|r| r.id);
        debug!(trial_id = %trial.id, message_id = ?message_id, "reminder email accepted");
        Ok(DeliveryReport::delivered(message_id))
    }
}
