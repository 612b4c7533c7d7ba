//! Bounded retry policy for session attempts.

use crate::error::SessionError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Added per failed attempt, capped at `max_delay`.
    pub step: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
            step: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_attempt: u32, delay: Duration },
    /// The attempt budget is spent.
    Exhausted,
    /// The error needs user action before another attempt makes sense.
    NonRetryable,
}

impl RetryPolicy {
    /// Backoff before the attempt following `failed_attempt` (1-based).
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let extra = self.step * failed_attempt.saturating_sub(1);
        (self.base_delay + extra).min(self.max_delay)
    }

    pub fn decide(&self, failed_attempt: u32, error: &SessionError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::NonRetryable;
        }
        if failed_attempt >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry {
            next_attempt: failed_attempt + 1,
            delay: self.delay_after(failed_attempt),
        }
    }
}
