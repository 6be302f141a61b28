//! Engine defaults: namespace/version applied to requests that omit
//! them, and the directories scanned for task templates.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_namespace: String,
    pub default_version: String,
    #[serde(default)]
    pub task_directories: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_namespace: "default".to_string(),
            default_version: "0.1.0".to_string(),
            task_directories: Vec::new(),
        }
    }
}
