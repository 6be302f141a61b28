//! # Configuration
//!
//! Layered configuration in the engine's conventional shape: defaults,
//! an optional TOML file, then `TASKER_`-prefixed environment overrides.
//! Invalid boot configuration is a fatal [`TaskerError::ConfigurationError`];
//! the process should exit with the message.

pub mod auth;
pub mod backoff;
pub mod engine;
pub mod execution;
pub mod health;
pub mod telemetry;

pub use auth::AuthConfig;
pub use backoff::BackoffConfig;
pub use engine::EngineConfig;
pub use execution::{ConnectionPressureFactors, ExecutionConfig};
pub use health::HealthConfig;
pub use telemetry::TelemetryConfig;

use serde::{Deserialize, Serialize};

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Window within which two identical task requests resolve to the
    /// same task. Zero disables deduplication.
    pub dedup_window_seconds: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            dedup_window_seconds: 0,
        }
    }
}

impl TaskerConfig {
    /// Load from an optional TOML file (`TASKER_CONFIG_PATH`) with
    /// `TASKER_`-prefixed environment overrides layered on top.
    pub fn load() -> TaskerResult<Self> {
        dotenvy::dotenv().ok();
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("TASKER_CONFIG_PATH") {
            builder = builder.add_source(config::File::with_name(&path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("TASKER")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: TaskerConfig = builder
            .build()
            .map_err(|e| TaskerError::ConfigurationError(format!("failed to load config: {e}")))?
            .try_deserialize()
            .map_err(|e| TaskerError::ConfigurationError(format!("invalid config: {e}")))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject configurations that cannot produce a working engine
    pub fn validate(&self) -> TaskerResult<()> {
        self.execution.validate()?;
        self.backoff.validate()?;
        if self.auth.authentication_enabled && self.auth.authenticator_class.is_none() {
            return Err(TaskerError::ConfigurationError(
                "auth.authentication_enabled requires auth.authenticator_class".to_string(),
            ));
        }
        if self.auth.authorization_enabled && self.auth.authorization_coordinator_class.is_none() {
            return Err(TaskerError::ConfigurationError(
                "auth.authorization_enabled requires auth.authorization_coordinator_class"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
