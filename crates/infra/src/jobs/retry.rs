//! Bounded retry with backoff for a single unit of work.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use prepforge_ai::AiError;

use super::clock::Clock;

/// Backoff strategy for application-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1)
    Exponential,
    /// Linear backoff: base * attempt
    Linear,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Linear
    }
}

/// Why one attempt of a unit of work failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnitFailure {
    /// The call completed with a non-success response.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The call never produced a response (unreachable, timeout).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl UnitFailure {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn message(&self) -> &str {
        match self {
            UnitFailure::Rejected(msg) | UnitFailure::Transport(msg) => msg,
        }
    }
}

impl From<AiError> for UnitFailure {
    fn from(err: AiError) -> Self {
        if err.is_transport() {
            UnitFailure::Transport(err.to_string())
        } else {
            UnitFailure::Rejected(err.to_string())
        }
    }
}

/// Terminal result of [`RetryPolicy::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_failure: UnitFailure },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> Result<T, UnitFailure> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Ok(value),
            RetryOutcome::Exhausted { last_failure, .. } => Err(last_failure),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one (at least 1)
    pub max_attempts: u32,
    /// Base delay for application-level failures
    pub base_delay: Duration,
    /// Optional cap for application-level backoff; `None` leaves it uncapped
    pub max_delay: Option<Duration>,
    /// Fixed delay after a transport failure
    pub exception_delay: Duration,
    /// Backoff strategy for application-level failures
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5000),
            max_delay: None,
            exception_delay: Duration::from_millis(3000),
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with uncapped linear backoff: `base_delay * attempt`.
    pub fn linear(max_attempts: u32, base_delay: Duration, exception_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            exception_delay,
            max_delay: None,
            strategy: BackoffStrategy::Linear,
            jitter: 0.0,
        }
    }

    /// Calculate the backoff after failed attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self
            .max_delay
            .map_or(f64::INFINITY, |max| max.as_millis() as f64);

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => base_ms * 2_f64.powi((attempt - 1) as i32),
            BackoffStrategy::Linear => base_ms * (attempt as f64),
        }
        .min(max_ms);

        // Deterministic "jitter" derived from the attempt number.
        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Delay to wait after `failure` on attempt number `attempt`.
    pub fn delay_after(&self, failure: &UnitFailure, attempt: u32) -> Duration {
        match failure {
            UnitFailure::Rejected(_) => self.delay_for_attempt(attempt),
            UnitFailure::Transport(_) => self.exception_delay,
        }
    }

    /// Run `unit` until it succeeds or `max_attempts` attempts have failed.
    ///
    /// `unit` receives the 1-indexed attempt number. Attempts are strictly
    /// serial, and no delay follows the final attempt. Failures never escape:
    /// exhaustion is reported as [`RetryOutcome::Exhausted`].
    pub async fn execute<T, F, Fut, C>(&self, clock: &C, mut unit: F) -> RetryOutcome<T>
    where
        C: Clock + ?Sized,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UnitFailure>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match unit(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "unit of work succeeded after retry");
                    }
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    };
                }
                Err(failure) if attempt >= max_attempts => {
                    warn!(attempts = attempt, error = %failure, "unit of work exhausted retries");
                    return RetryOutcome::Exhausted {
                        attempts: attempt,
                        last_failure: failure,
                    };
                }
                Err(failure) => {
                    let delay = self.delay_after(&failure, attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "unit of work failed, retrying"
                    );
                    clock.sleep(delay).await;
                }
            }
        }
    }
}
