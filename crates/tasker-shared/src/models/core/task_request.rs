//! # Task Request
//!
//! The input structure submitted by external callers to create a task.
//! Validated against the named task's context schema before any rows are
//! written.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_namespace() -> String {
    "default".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub initiator: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub source_system: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Uuid::new_v4")]
    pub correlation_id: Uuid,
    #[serde(default = "now_naive")]
    pub requested_at: NaiveDateTime,
}

fn now_naive() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

impl TaskRequest {
    pub fn new(name: String, namespace: String) -> Self {
        Self {
            name,
            namespace,
            version: default_version(),
            context: serde_json::Value::Null,
            initiator: None,
            reason: None,
            source_system: None,
            tags: Vec::new(),
            correlation_id: Uuid::new_v4(),
            requested_at: now_naive(),
        }
    }

    pub fn with_version(mut self, version: String) -> Self {
        self.version = version;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_initiator(mut self, initiator: String) -> Self {
        self.initiator = Some(initiator);
        self
    }

    pub fn with_reason(mut self, reason: String) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_source_system(mut self, source_system: String) -> Self {
        self.source_system = Some(source_system);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}
