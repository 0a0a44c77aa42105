//! Relay configuration.
//!
//! Loaded from environment variables with sensible defaults, or deserialized
//! from whatever configuration source the host service already uses.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Recognized relay options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Whether the relay runs at all.
    pub enabled: bool,
    /// Trigger cadence in milliseconds; zero or negative disables polling.
    pub poll_interval_ms: i64,
    /// Lease granted to a worker on claim, in milliseconds.
    pub lock_duration_ms: u64,
    /// Messages claimed per run.
    pub lock_limit: usize,
    /// Attempt ceiling separating deliverable from quarantined messages.
    pub max_attempt_count: u32,
    /// Base of the linear requeue backoff, in milliseconds.
    pub initial_requeue_delay_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 1_000,
            lock_duration_ms: 60_000,
            lock_limit: 100,
            max_attempt_count: 10,
            initial_requeue_delay_ms: 1_000,
        }
    }
}

impl OutboxConfig {
    /// Load from `OUTBOX_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            enabled: parse_or(&lookup, "OUTBOX_ENABLED", defaults.enabled)?,
            poll_interval_ms: parse_or(&lookup, "OUTBOX_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            lock_duration_ms: parse_or(&lookup, "OUTBOX_LOCK_DURATION_MS", defaults.lock_duration_ms)?,
            lock_limit: parse_or(&lookup, "OUTBOX_LOCK_LIMIT", defaults.lock_limit)?,
            max_attempt_count: parse_or(
                &lookup,
                "OUTBOX_MAX_ATTEMPT_COUNT",
                defaults.max_attempt_count,
            )?,
            initial_requeue_delay_ms: parse_or(
                &lookup,
                "OUTBOX_INITIAL_REQUEUE_DELAY_MS",
                defaults.initial_requeue_delay_ms,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_limit == 0 {
            return Err(ConfigError::MustBePositive("lock_limit"));
        }
        if self.max_attempt_count == 0 {
            return Err(ConfigError::MustBePositive("max_attempt_count"));
        }
        if self.lock_duration_ms == 0 {
            return Err(ConfigError::MustBePositive("lock_duration_ms"));
        }
        Ok(())
    }

    pub fn polling_enabled(&self) -> bool {
        self.enabled && self.poll_interval_ms > 0
    }

    /// Zero when polling is disabled by a non-positive interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.poll_interval_ms).unwrap_or(0))
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            lock_duration: Duration::from_millis(self.lock_duration_ms),
            max_attempt_count: self.max_attempt_count,
        }
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            lock_limit: self.lock_limit,
            initial_requeue_delay: Duration::from_millis(self.initial_requeue_delay_ms),
        }
    }
}

/// The part of the configuration a message store needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub lock_duration: Duration,
    pub max_attempt_count: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        OutboxConfig::default().store_settings()
    }
}

/// The part of the configuration the processor needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub lock_limit: usize,
    pub initial_requeue_delay: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        OutboxConfig::default().processor_settings()
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
