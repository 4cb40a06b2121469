// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reconnection Backoff Policy
//!
//! This module tracks the supervisor's reconnection state: an attempt counter
//! and the exponential delay computed from it. The delay before attempt `n`
//! is `min(initial_delay * backoff_factor^n, max_delay)`; the counter resets
//! to zero on a successful connection so the backoff clock restarts for the
//! next unrelated failure.

use crate::config::RetryConfig;
use std::time::Duration;

/// Backoff policy used by the supervisor's reconnect loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: u32,
    max_attempts: u32,
    attempt: u32,
}

impl RetryPolicy {
    /// Creates a policy from the retry configuration, with the attempt
    /// counter at zero ("never failed yet").
    pub fn new(cfg: &RetryConfig) -> RetryPolicy {
        RetryPolicy {
            initial_delay: cfg.initial_delay,
            max_delay: cfg.max_delay,
            backoff_factor: cfg.backoff_factor,
            max_attempts: cfg.max_attempts,
            attempt: 0,
        }
    }

    /// The current attempt counter.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records a failure and returns the delay to sleep before retrying.
    ///
    /// Returns `None` when a positive `max_attempts` budget is configured and
    /// this failure exhausts it.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.max_attempts > 0 && self.attempt > self.max_attempts {
            return None;
        }
        Some(self.delay_for(self.attempt))
    }

    /// Records a successful connection, restarting the backoff clock.
    pub fn record_success(&mut self) {
        self.attempt = 0;
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let Some(multiplier) = (self.backoff_factor as u64).checked_pow(attempt) else {
            return self.max_delay;
        };

        let millis = (self.initial_delay.as_millis()).saturating_mul(multiplier as u128);
        if millis >= self.max_delay.as_millis() {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2,
            max_attempts,
        })
    }

    #[test]
    fn default_parameters_yield_documented_sequence() {
        let mut policy = policy(0);
        let delays: Vec<u64> = (0..7)
            .map(|_| policy.next_delay().unwrap().as_secs())
            .collect();

        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn delays_never_decrease_and_never_exceed_the_cap() {
        let mut policy = policy(0);
        let mut previous = Duration::ZERO;

        for _ in 0..40 {
            let delay = policy.next_delay().unwrap();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(60));
            previous = delay;
        }
    }

    #[test]
    fn success_resets_the_attempt_counter() {
        let mut policy = policy(0);
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt(), 2);

        policy.record_success();
        assert_eq!(policy.attempt(), 0);

        // The next unrelated failure backs off from the start again.
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn budget_exhaustion_returns_none() {
        let mut policy = policy(3);

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn zero_max_attempts_means_unlimited() {
        let mut policy = policy(0);
        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }
}
