//! Retry classification and linear, capped backoff.
//!
//! The policy is pure: it never sleeps and never calls the service. The
//! [`super::RemoteInvoker`] owns the attempt loop and asks the policy what to do
//! after each failed attempt.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{ErrorClass, GenflowError, ServiceError};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay step between attempts in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Decides whether a failed attempt is retried and how long to wait first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a policy from configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Returns the maximum number of attempts.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay to wait before making attempt number `attempt` (1-based).
    ///
    /// `min(base * (attempt - 1), max)`; the first attempt never waits.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let steps = u64::from(attempt.saturating_sub(1));
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(steps)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Returns true if `error` may succeed on another attempt.
    ///
    /// Timeouts and transient network errors retry. Errors whose service cause
    /// is unclassified also retry. Everything else does not.
    #[must_use]
    pub fn is_retryable(error: &GenflowError) -> bool {
        match error {
            GenflowError::TimeoutExceeded { .. } => true,
            GenflowError::TransientNetwork { source } | GenflowError::NonRetryableRequest { source } => {
                matches!(source.class(), ErrorClass::Transient | ErrorClass::Unknown)
            }
            GenflowError::RetriesExhausted { .. }
            | GenflowError::NoResultProduced { .. }
            | GenflowError::Cancelled(_)
            | GenflowError::Config(_) => false,
        }
    }

    /// Returns true if another attempt should follow failed attempt `attempt`.
    #[must_use]
    pub fn should_retry(&self, error: &GenflowError, attempt: u32) -> bool {
        matches!(self.decide(error, attempt), RetryDecision::Retry(_))
    }

    /// Decides what follows failed attempt number `attempt`.
    ///
    /// The attempt budget is checked before the error class. A retry-after hint
    /// from the service raises the delay and is not capped by `max_delay_ms`.
    #[must_use]
    pub fn decide(&self, error: &GenflowError, attempt: u32) -> RetryDecision {
        if attempt >= self.config.max_attempts {
            return RetryDecision::GiveUp;
        }
        if Self::is_retryable(error) {
            let delay = self.delay(attempt.saturating_add(1));
            let hint = error.service_error().and_then(ServiceError::retry_after);
            RetryDecision::Retry(hint.map_or(delay, |hint| hint.max(delay)))
        } else {
            RetryDecision::NotRetryable
        }
    }
}
