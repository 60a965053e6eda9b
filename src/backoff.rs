//! Retry pacing for tunnel rebuilds and connection acquisition.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds for a retry loop: total attempt budget plus backoff pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling for the backoff delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub multiplier: f64,
    /// Total number of attempts before giving up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Backoff iterator driving a bounded retry loop.
///
/// Call `next_delay` after each failed attempt: it yields the pause before
/// the next attempt, or `None` once the policy's attempt budget is spent.
/// With `max_attempts = 3` a caller gets exactly three attempts and two
/// delays.
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    current_delay: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            current_delay: policy.base_delay(),
            attempt: 0,
            policy,
        }
    }

    /// Record a failed attempt and return the delay before the next one, or
    /// `None` when no attempts remain.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.policy.max_attempts {
            return None;
        }

        let delay = self.current_delay;
        let next = Duration::from_secs_f64(delay.as_secs_f64() * self.policy.multiplier);
        self.current_delay = next.min(self.policy.max_delay());

        Some(delay)
    }

    /// Number of failed attempts recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[allow(dead_code)]
    pub fn reset(&mut self) {
        self.current_delay = self.policy.base_delay();
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_budget_spent() {
        let policy = RetryPolicy {
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            max_attempts: 4,
        };
        let mut backoff = ExponentialBackoff::new(policy);

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.attempt(), 1);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 4);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            base_delay_ms: 5_000,
            max_delay_ms: 10_000,
            multiplier: 3.0,
            max_attempts: 4,
        };
        let mut backoff = ExponentialBackoff::new(policy);

        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(5)));
        // 15s uncapped, held to the 10s ceiling
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(10)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn single_attempt_policy_never_delays() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let mut backoff = ExponentialBackoff::new(policy);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut backoff = ExponentialBackoff::new(RetryPolicy::default());
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }
}
