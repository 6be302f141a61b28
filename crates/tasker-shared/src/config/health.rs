//! Health probe configuration. Readiness and liveness probes never
//! require authentication; the status endpoint may.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub status_requires_authentication: bool,
}
