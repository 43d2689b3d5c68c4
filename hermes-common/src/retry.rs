//! Exponential backoff between webhook delivery attempts.
//!
//! Between attempts, back off by `2^i` seconds for attempt index `i >= 1`.
//! `RetryPolicy::default()` implements exactly that: a one-second initial
//! interval doubled on every attempt.

use std::time;

#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    /// Coefficient to multiply `initial_interval` with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry (attempt index 1).
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// Delay to wait before attempt index `attempt` (`attempt >= 1`).
    pub fn backoff_for_attempt(&self, attempt: u32) -> time::Duration {
        let candidate = self.initial_interval * self.backoff_coefficient.pow(attempt);

        match self.maximum_interval {
            Some(max) => std::cmp::min(candidate, max),
            None => candidate,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_secs(1),
            maximum_interval: None,
        }
    }
}
