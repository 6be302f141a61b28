//! Authentication and authorization configuration. The coordinators
//! themselves live outside the core; the engine only carries their
//! wiring so boot can fail fast on inconsistent settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub authentication_enabled: bool,
    #[serde(default)]
    pub authenticator_class: Option<String>,
    #[serde(default)]
    pub authorization_enabled: bool,
    #[serde(default)]
    pub authorization_coordinator_class: Option<String>,
    #[serde(default)]
    pub user_class: Option<String>,
}
