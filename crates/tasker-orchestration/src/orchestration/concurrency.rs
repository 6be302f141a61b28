//! # Concurrency Manager
//!
//! Derives the per-batch concurrency from database pool utilization.
//! Under pressure the factor table shrinks the share of available
//! connections the coordinator may use; the result is clamped to the
//! configured `[min, max]` band and never exceeds the configured
//! fraction of the whole pool. Values are cached briefly so the pool is
//! not sampled on every batch.

use sqlx::PgPool;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use tasker_shared::config::ExecutionConfig;

#[derive(Debug)]
pub struct ConcurrencyManager {
    config: ExecutionConfig,
    cached: Mutex<Option<(Instant, usize)>>,
}

impl ConcurrencyManager {
    pub fn new(config: ExecutionConfig) -> Self {
        Self {
            config,
            cached: Mutex::new(None),
        }
    }

    /// Current bound on concurrent step executions
    pub fn max_concurrent_steps(&self, pool: &PgPool) -> usize {
        let cache_duration = Duration::from_secs(self.config.concurrency_cache_duration_seconds);
        {
            let cached = self.cached.lock().expect("concurrency cache poisoned");
            if let Some((computed_at, value)) = *cached {
                if computed_at.elapsed() < cache_duration {
                    return value;
                }
            }
        }

        let value = self.compute(pool);
        *self.cached.lock().expect("concurrency cache poisoned") = Some((Instant::now(), value));
        value
    }

    fn compute(&self, pool: &PgPool) -> usize {
        let max_connections = pool.options().get_max_connections() as usize;
        let busy = (pool.size() as usize).saturating_sub(pool.num_idle());
        self.compute_from_counts(max_connections, busy)
    }

    /// Pure calculation, separated for tests
    pub fn compute_from_counts(&self, max_connections: usize, busy: usize) -> usize {
        let max_connections = max_connections.max(1);
        let available = max_connections.saturating_sub(busy);
        let utilization = busy as f64 / max_connections as f64;
        let factor = self
            .config
            .connection_pressure_factors
            .factor_for_utilization(utilization);

        let computed = (available as f64 * factor).floor() as usize;
        let pool_cap = ((max_connections as f64) * self.config.max_pool_fraction).floor() as usize;

        let bounded = computed
            .clamp(
                self.config.min_concurrent_steps,
                self.config.max_concurrent_steps_limit,
            )
            .min(pool_cap.max(1));

        debug!(
            max_connections = max_connections,
            busy = busy,
            factor = factor,
            computed = computed,
            bounded = bounded,
            "Computed step concurrency"
        );
        bounded
    }
}
