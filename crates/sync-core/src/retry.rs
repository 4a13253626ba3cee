//! Bounded exponential backoff for failed intents.
//!
//! A failed attempt with `retry_count = n` is rescheduled after
//! `min(base_delay * 2^n, max_delay)` as long as `n < max_retries`.
//! With the defaults that is 5s, 10s, 20s, 40s, 80s and then a
//! terminal failure.

use std::time::Duration;

use crate::error::ApplyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of rescheduled attempts before an intent is dropped
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Treat validation errors like transient ones instead of failing immediately
    pub retry_validation_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            retry_validation_errors: false,
        }
    }
}

/// What to do with an intent whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp,
}

impl RetryPolicy {
    /// Delay before the attempt that follows attempt `retry_count`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    pub fn decide(&self, retry_count: u32, error: &ApplyError) -> RetryDecision {
        if !error.is_transient() && !self.retry_validation_errors {
            return RetryDecision::GiveUp;
        }
        if retry_count >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.backoff(retry_count),
        }
    }
}
