//! Plain-text reminder email.

use crate::types::{ReminderKind, Trial, User};

/// Subject and body of one reminder email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub cancel_link: String,
}

impl ReminderMessage {
    /// Compose the reminder for `kind`.
    ///
    /// The cancel link is the trial's own `cancel_url` when present,
    /// otherwise the trial page under `app_base_url`.
    pub fn compose(trial: &Trial, user: &User, kind: ReminderKind, app_base_url: &str) -> Self {
        let cancel_link = match trial.cancel_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_owned(),
            _ => format!("{}/trials/{}", app_base_url.trim_end_matches('/'), trial.id),
        };

        let greeting = match user.display_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => format!("Hi {name},"),
            _ => "Hi there,".to_owned(),
        };

        let subject = format!(
            "Your {} trial ends in {}",
            trial.service_name,
            kind.phrase()
        );

        let text = format!(
            "{greeting}\n\n\
             Your {service} free trial ends in {phrase}, on {date}. \
             If you don't want to be charged, cancel before then:\n\n\
             {cancel_link}\n\n\
             The Trialwatch team\n",
            service = trial.service_name,
            phrase = kind.phrase(),
            date = trial.end_date.format("%A, %B %-d"),
        );

        Self {
            to: user.email.clone(),
            subject,
            text,
            cancel_link,
        }
    }
}
