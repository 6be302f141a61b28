//! Retry backoff configuration.

use serde::{Deserialize, Serialize};

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base of the exponential schedule, in seconds
    pub base_seconds: u64,
    /// Cap applied to the exponential schedule, in seconds
    pub max_backoff_seconds: u64,
    /// Jitter applied to computed delays, as a fraction of the delay
    pub jitter_fraction: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_seconds: 1,
            max_backoff_seconds: 30,
            jitter_fraction: 0.1,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> TaskerResult<()> {
        if self.base_seconds == 0 {
            return Err(TaskerError::ConfigurationError(
                "backoff.base_seconds must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(TaskerError::ConfigurationError(
                "backoff.jitter_fraction must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
