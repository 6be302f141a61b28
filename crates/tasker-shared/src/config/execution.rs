//! Execution and concurrency configuration.

use serde::{Deserialize, Serialize};

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Lower bound for the per-batch concurrency derived from the pool
    pub min_concurrent_steps: usize,
    /// Upper bound for the per-batch concurrency
    pub max_concurrent_steps_limit: usize,
    /// How long a computed concurrency value is reused before pool
    /// utilization is sampled again
    pub concurrency_cache_duration_seconds: u64,
    /// Per-attempt wall-clock timeout for a step handler
    pub batch_timeout_seconds: u64,
    #[serde(default)]
    pub connection_pressure_factors: ConnectionPressureFactors,
    /// Fraction of the connection pool the coordinator may ever use
    pub max_pool_fraction: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            min_concurrent_steps: 3,
            max_concurrent_steps_limit: 25,
            concurrency_cache_duration_seconds: 30,
            batch_timeout_seconds: 30,
            connection_pressure_factors: ConnectionPressureFactors::default(),
            max_pool_fraction: 0.6,
        }
    }
}

impl ExecutionConfig {
    pub fn validate(&self) -> TaskerResult<()> {
        if self.min_concurrent_steps == 0 {
            return Err(TaskerError::ConfigurationError(
                "execution.min_concurrent_steps must be at least 1".to_string(),
            ));
        }
        if self.min_concurrent_steps > self.max_concurrent_steps_limit {
            return Err(TaskerError::ConfigurationError(format!(
                "execution.min_concurrent_steps ({}) exceeds max_concurrent_steps_limit ({})",
                self.min_concurrent_steps, self.max_concurrent_steps_limit
            )));
        }
        if !(0.0..=1.0).contains(&self.max_pool_fraction) {
            return Err(TaskerError::ConfigurationError(
                "execution.max_pool_fraction must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fraction of available connections usable at each pressure level
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionPressureFactors {
    pub low: f64,
    pub moderate: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for ConnectionPressureFactors {
    fn default() -> Self {
        Self {
            low: 0.8,
            moderate: 0.6,
            high: 0.4,
            critical: 0.2,
        }
    }
}

impl ConnectionPressureFactors {
    /// Factor for a pool utilization ratio in `[0, 1]`
    pub fn factor_for_utilization(&self, utilization: f64) -> f64 {
        if utilization < 0.5 {
            self.low
        } else if utilization < 0.75 {
            self.moderate
        } else if utilization < 0.9 {
            self.high
        } else {
            self.critical
        }
    }
}
