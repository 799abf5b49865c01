//! Retry budget and jittered exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::error::Error;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry; surface the error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with a fixed retry budget.
///
/// Attempt `i` (0-based) that fails with a retryable error waits
/// `base_delay * 2^i`, scaled by a uniform factor in `[0.8, 1.2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub retries: u32,
    /// Delay before the first retry, before jitter.
    pub base_delay: Duration,
}

/// Lower bound of the jitter factor.
pub const JITTER_MIN: f64 = 0.8;
/// Upper bound of the jitter factor.
pub const JITTER_MAX: f64 = 1.2;

/// Cap on the exponent so the shift cannot overflow.
const MAX_EXPONENT: u32 = 16;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with `retries` retries and the given base delay.
    #[must_use]
    pub const fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
        }
    }

    /// Total attempts including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Un-jittered delay after failed attempt `attempt` (0-based).
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.min(MAX_EXPONENT))
    }

    /// Delay after failed attempt `attempt`, with jitter applied.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
        let nominal = self.nominal_delay(attempt);
        Duration::try_from_secs_f64(factor * nominal.as_secs_f64()).unwrap_or(Duration::MAX)
    }

    /// Decides what to do after attempt `attempt` (0-based) failed with `error`.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &Error) -> RetryDecision {
        if !error.is_retryable() || attempt >= self.retries {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff(attempt))
    }
}
