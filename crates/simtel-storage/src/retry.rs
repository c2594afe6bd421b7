//! Linear-backoff retry policy for sink writes.

use std::time::Duration;

/// Retry schedule for transient sink failures.
///
/// The delay grows linearly: attempt `n` (1-based) waits `backoff * n`.
/// `max_retries` counts the retries only, not the initial attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retry attempts after the initial one.
    pub max_retries: u32,

    /// Base delay; attempt `n` waits `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Delay before the given attempt (0 = initial attempt, no delay).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }

    /// Returns `true` if another retry is allowed after `attempt` failures.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
