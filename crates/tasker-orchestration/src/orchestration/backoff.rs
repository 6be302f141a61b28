//! # Backoff Calculator
//!
//! Two sources of retry delay, in preference order: a server-requested
//! delay (from `RetryableError(retry_after)` or an HTTP `Retry-After`
//! header), which is persisted to `backoff_request_seconds`; otherwise
//! an exponential schedule capped at the configured maximum with a
//! small jitter. The exponential delay is never stored; the readiness
//! query recomputes eligibility from `last_attempted_at` and the
//! failure log.

use tasker_shared::config::BackoffConfig;

/// Where the next-retry delay came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffDecision {
    /// Persist this value to `backoff_request_seconds`
    ServerRequested { delay_seconds: u64 },
    /// Nothing persisted; eligibility recomputed by the readiness query
    Exponential { delay_seconds: f64 },
}

impl BackoffDecision {
    pub fn delay_seconds(&self) -> f64 {
        match self {
            Self::ServerRequested { delay_seconds } => *delay_seconds as f64,
            Self::Exponential { delay_seconds } => *delay_seconds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl Default for BackoffCalculator {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Decide the delay for a failed attempt. A server-requested delay
    /// always wins.
    pub fn decide(&self, attempts: i32, retry_after: Option<u64>) -> BackoffDecision {
        match retry_after {
            Some(delay_seconds) => BackoffDecision::ServerRequested { delay_seconds },
            None => BackoffDecision::Exponential {
                delay_seconds: self.exponential_delay(attempts),
            },
        }
    }

    /// `min(base * 2^attempts, max)` with jitter applied
    pub fn exponential_delay(&self, attempts: i32) -> f64 {
        let attempts = attempts.max(0) as u32;
        let raw = (self.config.base_seconds as f64) * 2f64.powi(attempts as i32);
        let capped = raw.min(self.config.max_backoff_seconds as f64);
        self.apply_jitter(capped)
    }

    fn apply_jitter(&self, delay: f64) -> f64 {
        if self.config.jitter_fraction == 0.0 {
            return delay;
        }
        // fastrand::f64 is uniform in [0, 1); map to [-1, 1)
        let unit = fastrand::f64() * 2.0 - 1.0;
        (delay + delay * self.config.jitter_fraction * unit).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffCalculator {
        BackoffCalculator::new(BackoffConfig {
            base_seconds: 1,
            max_backoff_seconds: 30,
            jitter_fraction: 0.0,
        })
    }

    #[test]
    fn test_server_requested_wins() {
        let calculator = no_jitter();
        let decision = calculator.decide(5, Some(120));
        assert_eq!(
            decision,
            BackoffDecision::ServerRequested { delay_seconds: 120 }
        );
    }

    #[test]
    fn test_server_requested_zero_is_immediate() {
        let calculator = no_jitter();
        let decision = calculator.decide(1, Some(0));
        assert_eq!(decision.delay_seconds(), 0.0);
    }

    #[test]
    fn test_exponential_doubles_until_cap() {
        let calculator = no_jitter();
        assert_eq!(calculator.exponential_delay(0), 1.0);
        assert_eq!(calculator.exponential_delay(1), 2.0);
        assert_eq!(calculator.exponential_delay(3), 8.0);
        assert_eq!(calculator.exponential_delay(4), 16.0);
        // 2^5 = 32 exceeds the cap
        assert_eq!(calculator.exponential_delay(5), 30.0);
        assert_eq!(calculator.exponential_delay(20), 30.0);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let calculator = BackoffCalculator::default();
        for attempts in 0..8 {
            let delay = calculator.exponential_delay(attempts);
            let nominal = (2f64.powi(attempts)).min(30.0);
            assert!(
                delay >= nominal * 0.9 - f64::EPSILON && delay <= nominal * 1.1 + f64::EPSILON,
                "attempt {attempts}: {delay} outside +/-10% of {nominal}"
            );
        }
    }

    #[test]
    fn test_negative_attempts_treated_as_zero() {
        let calculator = no_jitter();
        assert_eq!(calculator.exponential_delay(-3), 1.0);
    }
}
