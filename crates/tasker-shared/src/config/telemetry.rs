//! Telemetry configuration surface. Exporter wiring is a layer above
//! the core; these settings are carried so boot validation and the
//! status endpoint can report them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub metrics_enabled: bool,
    pub metrics_format: String,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    pub service_name: String,
    pub service_version: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_format: "prometheus".to_string(),
            prometheus: PrometheusConfig::default(),
            service_name: "tasker-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub endpoint: String,
    pub retention_window_seconds: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            endpoint: "/metrics".to_string(),
            retention_window_seconds: 300,
        }
    }
}
