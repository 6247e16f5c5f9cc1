//! Runtime configuration loaded from environment variables.

use crate::optimistic::DeleteFailurePolicy;
use settle_engine::{reconcile::DEFAULT_PROTECTION_WINDOW_MS, ProtectionPolicy};
use std::env;
use std::time::Duration;

/// Default polling fallback interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
/// Default delay before resubscribing after a push failure.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Sync runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long a locally stamped record is exempt from eviction
    pub protection_window_ms: u64,
    /// Polling fallback interval
    pub poll_interval: Duration,
    /// Wait before resubscribing after the push stream fails
    pub reconnect_delay: Duration,
    /// Run the poller even when the capability check trusts push
    pub force_polling: bool,
    /// Which delete failures count as probable success
    pub delete_policy: DeleteFailurePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            protection_window_ms: DEFAULT_PROTECTION_WINDOW_MS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            force_polling: false,
            delete_policy: DeleteFailurePolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let protection_window_ms = match lookup("SETTLE_PROTECTION_WINDOW_MS") {
            Some(value) => parse_ms("SETTLE_PROTECTION_WINDOW_MS", &value)?,
            None => defaults.protection_window_ms,
        };

        let poll_interval = match lookup("SETTLE_POLL_INTERVAL_MS") {
            Some(value) => positive_duration("SETTLE_POLL_INTERVAL_MS", &value)?,
            None => defaults.poll_interval,
        };

        let reconnect_delay = match lookup("SETTLE_RECONNECT_DELAY_MS") {
            Some(value) => positive_duration("SETTLE_RECONNECT_DELAY_MS", &value)?,
            None => defaults.reconnect_delay,
        };

        let force_polling = match lookup("SETTLE_FORCE_POLLING") {
            Some(value) => parse_bool("SETTLE_FORCE_POLLING", &value)?,
            None => defaults.force_polling,
        };

        let delete_policy = match lookup("SETTLE_PROBABLE_SUCCESS_STATUSES") {
            Some(value) => DeleteFailurePolicy::new(parse_statuses(&value)?),
            None => defaults.delete_policy,
        };

        Ok(Self {
            protection_window_ms,
            poll_interval,
            reconnect_delay,
            force_polling,
            delete_policy,
        })
    }

    pub fn protection_policy(&self) -> ProtectionPolicy {
        ProtectionPolicy::new(self.protection_window_ms)
    }
}

fn parse_ms(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}

fn positive_duration(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match parse_ms(var, value)? {
        0 => Err(ConfigError::ZeroInterval(var)),
        ms => Ok(Duration::from_millis(ms)),
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_statuses(value: &str) -> Result<Vec<u16>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.parse::<u16>() {
            Ok(status) if (100..=599).contains(&status) => Ok(status),
            _ => Err(ConfigError::InvalidStatus(part.to_string())),
        })
        .collect()
}

/// Configuration errors.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a whole number of milliseconds, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("{var} must be a boolean, got {value:?}")]
    InvalidBool { var: &'static str, value: String },

    #[error("Invalid HTTP status in SETTLE_PROBABLE_SUCCESS_STATUSES: {0:?}")]
    InvalidStatus(String),
}
