//! Engine configuration loading and representation.
//!
//! Every tunable has a reference default; `PREPFORGE_*` environment variables
//! override individual values.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jobs::{BatchRunnerConfig, QueueWorkerConfig, RetryPolicy};

pub const INTER_ITEM_DELAY_MS: &str = "PREPFORGE_INTER_ITEM_DELAY_MS";
pub const INTER_RECORD_DELAY_MS: &str = "PREPFORGE_INTER_RECORD_DELAY_MS";
pub const BACKOFF_BASE_MS: &str = "PREPFORGE_BACKOFF_BASE_MS";
pub const EXCEPTION_DELAY_MS: &str = "PREPFORGE_EXCEPTION_DELAY_MS";
pub const MAX_ATTEMPTS: &str = "PREPFORGE_MAX_ATTEMPTS";
pub const MAX_ITEM_ERRORS: &str = "PREPFORGE_MAX_ITEM_ERRORS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Tunables shared by every run of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub inter_item_delay: Duration,
    pub inter_record_delay: Duration,
    pub backoff_base: Duration,
    pub exception_delay: Duration,
    pub max_attempts: u32,
    pub max_item_errors: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            inter_item_delay: Duration::from_millis(1500),
            inter_record_delay: Duration::from_millis(2000),
            backoff_base: Duration::from_millis(5000),
            exception_delay: Duration::from_millis(3000),
            max_attempts: 3,
            max_item_errors: 5,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            inter_item_delay: millis(&lookup, INTER_ITEM_DELAY_MS, defaults.inter_item_delay)?,
            inter_record_delay: millis(&lookup, INTER_RECORD_DELAY_MS, defaults.inter_record_delay)?,
            backoff_base: millis(&lookup, BACKOFF_BASE_MS, defaults.backoff_base)?,
            exception_delay: millis(&lookup, EXCEPTION_DELAY_MS, defaults.exception_delay)?,
            max_attempts: positive(&lookup, MAX_ATTEMPTS, defaults.max_attempts)?,
            max_item_errors: positive(&lookup, MAX_ITEM_ERRORS, defaults.max_item_errors)?,
        })
    }

    pub fn with_inter_item_delay(mut self, delay: Duration) -> Self {
        self.inter_item_delay = delay;
        self
    }

    pub fn with_inter_record_delay(mut self, delay: Duration) -> Self {
        self.inter_record_delay = delay;
        self
    }

    pub fn with_backoff_base(mut self, delay: Duration) -> Self {
        self.backoff_base = delay;
        self
    }

    pub fn with_exception_delay(mut self, delay: Duration) -> Self {
        self.exception_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    pub fn with_max_item_errors(mut self, max: u32) -> Self {
        self.max_item_errors = max;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.max_attempts, self.backoff_base, self.exception_delay)
    }

    pub fn queue_worker_config(&self) -> QueueWorkerConfig {
        QueueWorkerConfig::default()
            .with_inter_item_delay(self.inter_item_delay)
            .with_max_item_errors(self.max_item_errors)
            .with_snapshot_retry(self.retry_policy())
    }

    pub fn batch_runner_config(&self) -> BatchRunnerConfig {
        BatchRunnerConfig::default()
            .with_inter_record_delay(self.inter_record_delay)
            .with_retry(self.retry_policy())
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    Ok(parse::<u64>(lookup, key)?.map_or(default, Duration::from_millis))
}

fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u32,
) -> Result<u32, ConfigError> {
    match parse::<u32>(lookup, key)? {
        None => Ok(default),
        Some(0) => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        Some(value) => Ok(value),
    }
}
