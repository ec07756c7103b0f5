//! Backoff schedule for result reporting

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_millis;

/// How often, and how far apart, a failed result report is re-sent
///
/// The default is the engine's report contract: 3 attempts in total, 1s of
/// backoff after the first failure and 2s after the second, no jitter.
///
/// # Example
///
/// ```
/// use tasklane_worker::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_attempts(4)
///     .with_initial_interval(Duration::from_millis(500));
///
/// assert_eq!(policy.backoff_after(1), Some(Duration::from_millis(500)));
/// assert_eq!(policy.backoff_after(3), Some(Duration::from_secs(2)));
/// assert_eq!(policy.backoff_after(4), None);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included
    pub max_attempts: u32,

    /// Backoff after the first failed attempt
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound on any single backoff
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor between consecutive backoffs
    pub backoff_coefficient: f64,

    /// Random spread applied to each backoff, 0.1 is ±10%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Report once and give up on failure
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the jitter factor, clamped to 0.0..=1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Backoff to wait after attempt `failed_attempt` (1-based) failed
    ///
    /// `None` once that attempt was the last one allowed.
    pub fn backoff_after(&self, failed_attempt: u32) -> Option<Duration> {
        if failed_attempt >= self.max_attempts {
            return None;
        }

        let exponent = failed_attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = (self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent))
            .min(self.max_interval.as_secs_f64());

        if self.jitter <= 0.0 || secs <= 0.0 {
            return Some(Duration::from_secs_f64(secs.max(0.0)));
        }

        let spread = secs * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Some(Duration::from_secs_f64((secs + offset).max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_contract_schedule() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_after(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.backoff_after(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.backoff_after(3), None);
    }

    #[test]
    fn test_no_retry() {
        assert_eq!(RetryPolicy::no_retry().backoff_after(1), None);
        assert_eq!(RetryPolicy::default().with_max_attempts(0).backoff_after(1), None);
    }

    #[test]
    fn test_max_interval_cap() {
        let policy = RetryPolicy::default()
            .with_max_attempts(20)
            .with_max_interval(Duration::from_secs(5));
        assert_eq!(policy.backoff_after(10), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default().with_jitter(0.5);
        for _ in 0..20 {
            let delay = policy.backoff_after(2).unwrap();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs(3));
        }
    }

    #[test]
    fn test_serialized_as_millis() {
        let policy = RetryPolicy::default().with_max_attempts(10);

        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"initial_interval\":1000"));
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();

        assert_eq!(policy, parsed);
    }
}
