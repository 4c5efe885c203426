//! Retry decisions with exponential backoff and optional jitter.
//!
//! The policy is stateless: it consumes `(error, attempt, config)` and
//! returns a [`RetryDecision`]. Both the fixed-stage orchestrator and the
//! chain engine use it.

use crate::errors::ErrorInfo;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Exact backoff delay.
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    #[default]
    Equal,
}

/// Retry/backoff configuration for one stage or node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempt ceiling, first attempt included.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier applied per further attempt.
    pub backoff_factor: f64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000,
            jitter: JitterStrategy::Equal,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the attempt ceiling.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the backoff factor.
    #[must_use]
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff delay after `attempt` failed, before jitter.
    ///
    /// `base_delay * backoff_factor^(attempt-1)`, capped at `max_delay_ms`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Applies the configured jitter to a delay.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        let jittered = match self.jitter {
            JitterStrategy::None => ms,
            JitterStrategy::Full => {
                if ms == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=ms)
                }
            }
            JitterStrategy::Equal => {
                let half = ms / 2;
                if half == 0 {
                    ms
                } else {
                    half + rand::thread_rng().gen_range(0..=ms - half)
                }
            }
        };
        Duration::from_millis(jittered)
    }

    /// Decides whether `attempt` (1-based), which failed with `error`, is retried.
    #[must_use]
    pub fn decide(&self, error: &ErrorInfo, attempt: u32) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::NotRetryable;
        }
        if attempt >= self.max_retries {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry(self.apply_jitter(self.backoff_delay(attempt)))
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Retryable, but the attempt ceiling was reached.
    Exhausted,
    /// The error is not retryable.
    NotRetryable,
}

impl RetryDecision {
    /// Returns true if another attempt should run.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }

    /// Delay before the next attempt, zero when not retrying.
    #[must_use]
    pub fn delay(&self) -> Duration {
        match self {
            Self::Retry(delay) => *delay,
            Self::Exhausted | Self::NotRetryable => Duration::ZERO,
        }
    }
}
