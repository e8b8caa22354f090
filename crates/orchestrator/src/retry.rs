//! Bounded exponential backoff for step retries and compensation.

use std::time::Duration;

/// Retry policy with exponential backoff and a hard attempt ceiling.
///
/// Applies to transient failures only: stuck step dispatches re-issued by
/// the timeout monitor, and compensating actions that error. Business rule
/// violations are never retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy with explicit bounds.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        debug_assert!(max_attempts >= 1);
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Returns the maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns true if no retry budget remains after `attempt` attempts.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Returns the backoff delay before the next attempt.
    ///
    /// `attempt` is the number of attempts already made (1-based). The
    /// delay doubles each attempt and is capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(5))
    }
}
