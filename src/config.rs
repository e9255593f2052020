//! Configuration types for trialwatch.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::dispatch::runner::DEFAULT_INTERVAL_SECS;
use crate::dispatch::{DEFAULT_BATCH_LIMIT, DEFAULT_MAX_CONCURRENT_SENDS};
use crate::error::{Result, TrialwatchError};
use crate::scheduler::{DEFAULT_SAFETY_MARGIN_SECS, OffsetPolicy, OffsetTier, PolicyPreset};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialwatchConfig {
    pub scheduler: SchedulerConfig,
    pub dispatch: DispatchConfig,
    pub storage: StorageConfig,
    pub delivery: DeliveryConfig,
    pub trigger: TriggerConfig,
}

/// Reminder planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Planned reminders must fire at least this long after "now".
    pub safety_margin_secs: i64,
    /// Built-in offset table, used when `tiers` is unset.
    pub preset: PolicyPreset,
    /// Custom offset table, longest window first. Overrides `preset`.
    pub tiers: Option<Vec<OffsetTier>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: DEFAULT_SAFETY_MARGIN_SECS,
            preset: PolicyPreset::default(),
            tiers: None,
        }
    }
}

impl SchedulerConfig {
    /// The effective offset policy.
    ///
    /// # Errors
    ///
    /// Returns [`TrialwatchError::InvalidPolicy`] for a malformed custom table.
    pub fn policy(&self) -> Result<OffsetPolicy> {
        match &self.tiers {
            Some(tiers) => OffsetPolicy::from_tiers(tiers.clone()),
            None => Ok(OffsetPolicy::preset(self.preset)),
        }
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::seconds(self.safety_margin_secs)
    }
}

/// Dispatch sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Run the periodic sweep loop. The trigger endpoint works either way.
    pub enabled: bool,
    pub interval_secs: u64,
    /// Maximum reminders considered per sweep.
    pub batch_limit: usize,
    /// Sends in flight at once within one sweep.
    pub max_concurrent_sends: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_INTERVAL_SECS,
            batch_limit: DEFAULT_BATCH_LIMIT,
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Write reminders to the log instead of sending them.
    #[default]
    Log,
    /// Post reminders to a transactional-email HTTP API.
    Http,
}

/// Email delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    /// Email API endpoint (`http` mode).
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub from_address: String,
    /// Base URL for trial pages, used when a trial has no cancel URL.
    pub app_base_url: String,
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Log,
            endpoint: "https://api.resend.com/emails".to_owned(),
            api_key_env: "TRIALWATCH_EMAIL_API_KEY".to_owned(),
            from_address: "Trialwatch <reminders@trialwatch.app>".to_owned(),
            app_base_url: "https://trialwatch.app".to_owned(),
            timeout_secs: 10,
        }
    }
}

/// HTTP endpoint for external cron triggers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub enabled: bool,
    pub bind: String,
    /// Name of the environment variable holding the shared secret.
    pub secret_env: String,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:8787".to_owned(),
            secret_env: "TRIALWATCH_CRON_SECRET".to_owned(),
        }
    }
}

impl TriggerConfig {
    /// The shared secret, empty when the variable is unset.
    pub fn secret(&self) -> String {
        std::env::var(&self.secret_env).unwrap_or_default()
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("trialwatch"))
        .unwrap_or_else(|| PathBuf::from("/tmp/trialwatch"))
        .join("trialwatch.db")
}

impl TrialwatchConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| TrialwatchError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TrialwatchError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/trialwatch/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("trialwatch").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("trialwatch")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/trialwatch-config/config.toml")
        }
    }

    /// Check the settings that defaults cannot repair.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.policy()?;
        if self.scheduler.safety_margin_secs < 0 {
            return Err(TrialwatchError::Config(
                "scheduler.safety_margin_secs must not be negative".to_owned(),
            ));
        }
        if self.dispatch.interval_secs == 0 {
            return Err(TrialwatchError::Config(
                "dispatch.interval_secs must be positive".to_owned(),
            ));
        }
        if self.dispatch.batch_limit == 0 || self.dispatch.max_concurrent_sends == 0 {
            return Err(TrialwatchError::Config(
                "dispatch.batch_limit and dispatch.max_concurrent_sends must be positive"
                    .to_owned(),
            ));
        }
        if self.delivery.mode == DeliveryMode::Http {
            url::Url::parse(&self.delivery.endpoint).map_err(|e| {
                TrialwatchError::Config(format!("delivery.endpoint is not a URL: {e}"))
            })?;
        }
        if self.trigger.enabled {
            self.trigger.bind.parse::<SocketAddr>().map_err(|e| {
                TrialwatchError::Config(format!("trigger.bind {:?}: {e}", self.trigger.bind))
            })?;
        }
        Ok(())
    }
}
