//! Retry decisions for failed generation attempts.
//!
//! Only transient adapter failures are retried. Delays grow exponentially
//! from [`RetryPolicy::initial_backoff`] and are clamped to
//! [`RetryPolicy::max_backoff`].

use std::time::Duration;

use crate::error::CoreError;
use crate::generation::AdapterError;

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the item after the given delay.
    RetryAfter(Duration),
    /// Mark the item failed.
    GiveUp,
}

/// Tunable parameters for per-item retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Factor by which the delay grows after each retry.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32, error: &AdapterError) -> RetryDecision {
        if !error.is_transient() || attempt > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.backoff_for(attempt))
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let ms = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        if !ms.is_finite() || ms >= self.max_backoff.as_millis() as f64 {
            return self.max_backoff;
        }
        Duration::from_millis(ms as u64)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err(CoreError::Validation(format!(
                "Backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(CoreError::Validation(
                "Initial backoff must not exceed max backoff".into(),
            ));
        }
        Ok(())
    }
}
