//! # Event Catalog
//!
//! Queryable mapping from event name to description, payload schema, and
//! firing component. System events are populated statically; custom
//! events are registered at handler-registration time and must live
//! outside the reserved namespaces.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::{TaskerError, TaskerResult};

/// Lifecycle event names. The `(from_state, to_state)` mapping in the
/// state machines resolves to these constants so no transition is
/// event-less.
pub mod lifecycle {
    pub const TASK_INITIALIZE_REQUESTED: &str = "task.initialize_requested";
    pub const TASK_START_REQUESTED: &str = "task.start_requested";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_RETRY_REQUESTED: &str = "task.retry_requested";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    pub const TASK_RESOLVED_MANUALLY: &str = "task.resolved_manually";

    pub const STEP_INITIALIZE_REQUESTED: &str = "step.initialize_requested";
    pub const STEP_EXECUTION_REQUESTED: &str = "step.execution_requested";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const STEP_RETRY_REQUESTED: &str = "step.retry_requested";
    pub const STEP_MAX_RETRIES_REACHED: &str = "step.max_retries_reached";
    pub const STEP_CANCELLED: &str = "step.cancelled";
    pub const STEP_RESOLVED_MANUALLY: &str = "step.resolved_manually";

    pub const WORKFLOW_TASK_REENQUEUED: &str = "workflow.task_reenqueued";
}

const RESERVED_NAMESPACES: &[&str] = &["task", "step", "workflow", "observability", "test"];

static CUSTOM_EVENT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*\.[a-z][a-z0-9_]*$").expect("static regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventCatalogEntry {
    pub name: String,
    pub description: String,
    /// JSON Schema of the payload
    pub payload_schema: serde_json::Value,
    /// Components known to fire this event
    pub fired_by: Vec<String>,
    pub custom: bool,
}

/// Runtime catalog: static system entries plus dynamically registered
/// custom events.
#[derive(Debug, Default)]
pub struct EventCatalog {
    custom: RwLock<HashMap<String, EventCatalogEntry>>,
}

impl EventCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom `(name, description)` pair declared by a step
    /// handler. Names must be `<domain>.<action>` and outside the
    /// reserved namespaces.
    pub fn register_custom_event(&self, name: &str, description: &str) -> TaskerResult<()> {
        if !CUSTOM_EVENT_NAME.is_match(name) {
            return Err(TaskerError::ValidationError(format!(
                "custom event '{name}' must be named '<domain>.<action>'"
            )));
        }
        let domain = name.split('.').next().unwrap_or_default();
        if RESERVED_NAMESPACES.contains(&domain) {
            return Err(TaskerError::ValidationError(format!(
                "custom event '{name}' collides with reserved namespace '{domain}.*'"
            )));
        }

        let mut custom = self.custom.write().expect("catalog lock poisoned");
        custom.insert(
            name.to_string(),
            EventCatalogEntry {
                name: name.to_string(),
                description: description.to_string(),
                payload_schema: serde_json::json!({"type": "object"}),
                fired_by: vec!["step_handler".to_string()],
                custom: true,
            },
        );
        Ok(())
    }

    /// Look up any event, system or custom
    pub fn get(&self, name: &str) -> Option<EventCatalogEntry> {
        if let Some(entry) = system_catalog().get(name) {
            return Some(entry.clone());
        }
        self.custom
            .read()
            .expect("catalog lock poisoned")
            .get(name)
            .cloned()
    }

    /// Complete catalog contents, system entries first
    pub fn list_all(&self) -> Vec<EventCatalogEntry> {
        let mut entries: Vec<EventCatalogEntry> = system_catalog().values().cloned().collect();
        entries.extend(
            self.custom
                .read()
                .expect("catalog lock poisoned")
                .values()
                .cloned(),
        );
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

fn base_payload_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["task_uuid", "started_at"],
        "properties": {
            "task_uuid": {"type": "string", "format": "uuid"},
            "workflow_step_uuid": {"type": "string", "format": "uuid"},
            "started_at": {"type": "string"},
            "completed_at": {"type": ["string", "null"]},
            "execution_duration": {"type": ["number", "null"]}
        }
    })
}

fn failure_payload_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["task_uuid", "started_at", "error_message"],
        "properties": {
            "task_uuid": {"type": "string", "format": "uuid"},
            "workflow_step_uuid": {"type": "string", "format": "uuid"},
            "started_at": {"type": "string"},
            "completed_at": {"type": ["string", "null"]},
            "execution_duration": {"type": ["number", "null"]},
            "error_message": {"type": "string"},
            "exception_class": {"type": ["string", "null"]},
            "backtrace": {"type": ["array", "null"]},
            "attempt_number": {"type": ["integer", "null"]}
        }
    })
}

fn system_entry(name: &str, description: &str, fired_by: &str, failure: bool) -> EventCatalogEntry {
    EventCatalogEntry {
        name: name.to_string(),
        description: description.to_string(),
        payload_schema: if failure {
            failure_payload_schema()
        } else {
            base_payload_schema()
        },
        fired_by: vec![fired_by.to_string()],
        custom: false,
    }
}

static SYSTEM_CATALOG: Lazy<HashMap<String, EventCatalogEntry>> = Lazy::new(|| {
    use lifecycle::*;

    let entries = [
        system_entry(
            TASK_INITIALIZE_REQUESTED,
            "Task created with its initial pending transition",
            "task_initializer",
            false,
        ),
        system_entry(
            TASK_START_REQUESTED,
            "Task moved from pending to in_progress",
            "workflow_coordinator",
            false,
        ),
        system_entry(
            TASK_COMPLETED,
            "Every step of the task reached the completion set",
            "task_finalizer",
            false,
        ),
        system_entry(
            TASK_FAILED,
            "Task blocked by an unrecoverable step failure",
            "task_finalizer",
            true,
        ),
        system_entry(
            TASK_RETRY_REQUESTED,
            "Errored task returned to in_progress for another pass",
            "workflow_coordinator",
            false,
        ),
        system_entry(
            TASK_CANCELLED,
            "Task cancelled; no further discovery passes run",
            "workflow_coordinator",
            false,
        ),
        system_entry(
            TASK_RESOLVED_MANUALLY,
            "Task resolved outside the engine by an operator",
            "task_finalizer",
            false,
        ),
        system_entry(
            STEP_INITIALIZE_REQUESTED,
            "Workflow step created in pending",
            "task_initializer",
            false,
        ),
        system_entry(
            STEP_EXECUTION_REQUESTED,
            "Step claimed for execution (pending or error to in_progress)",
            "step_executor",
            false,
        ),
        system_entry(
            STEP_COMPLETED,
            "Step attempt succeeded and results were persisted",
            "step_executor",
            false,
        ),
        system_entry(
            STEP_FAILED,
            "Step attempt failed; backoff applies if retry budget remains",
            "step_executor",
            true,
        ),
        system_entry(
            STEP_RETRY_REQUESTED,
            "Errored step claimed again for a retry attempt",
            "step_executor",
            false,
        ),
        system_entry(
            STEP_MAX_RETRIES_REACHED,
            "Step exhausted its retry budget",
            "step_executor",
            true,
        ),
        system_entry(
            STEP_CANCELLED,
            "Step cancelled before completion",
            "workflow_coordinator",
            false,
        ),
        system_entry(
            STEP_RESOLVED_MANUALLY,
            "Step resolved outside the engine by an operator",
            "task_finalizer",
            false,
        ),
        system_entry(
            WORKFLOW_TASK_REENQUEUED,
            "Task handed to the re-enqueuer for a future coordinator pass",
            "reenqueuer",
            false,
        ),
    ];

    entries
        .into_iter()
        .map(|entry| (entry.name.clone(), entry))
        .collect()
});

fn system_catalog() -> &'static HashMap<String, EventCatalogEntry> {
    &SYSTEM_CATALOG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_events_present() {
        let catalog = EventCatalog::new();
        assert!(catalog.contains(lifecycle::TASK_COMPLETED));
        assert!(catalog.contains(lifecycle::STEP_RETRY_REQUESTED));
        assert!(catalog.contains(lifecycle::WORKFLOW_TASK_REENQUEUED));
    }

    #[test]
    fn test_custom_event_registration() {
        let catalog = EventCatalog::new();
        catalog
            .register_custom_event("payments.charge_settled", "A charge settled")
            .unwrap();

        let entry = catalog.get("payments.charge_settled").unwrap();
        assert!(entry.custom);
        assert_eq!(entry.description, "A charge settled");
    }

    #[test]
    fn test_reserved_namespaces_rejected() {
        let catalog = EventCatalog::new();
        for name in [
            "task.sneaky",
            "step.sneaky",
            "workflow.sneaky",
            "observability.sneaky",
            "test.sneaky",
        ] {
            assert!(
                catalog.register_custom_event(name, "nope").is_err(),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_malformed_names_rejected() {
        let catalog = EventCatalog::new();
        assert!(catalog.register_custom_event("no_dot", "nope").is_err());
        assert!(catalog
            .register_custom_event("Too.ManyCaps", "nope")
            .is_err());
        assert!(catalog.register_custom_event("a.b.c", "nope").is_err());
    }

    #[test]
    fn test_failure_events_carry_failure_schema() {
        let catalog = EventCatalog::new();
        let entry = catalog.get(lifecycle::STEP_FAILED).unwrap();
        let required = entry.payload_schema["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "error_message"));
    }

    #[test]
    fn test_list_all_sorted_and_complete() {
        let catalog = EventCatalog::new();
        catalog
            .register_custom_event("billing.invoice_posted", "desc")
            .unwrap();
        let all = catalog.list_all();
        assert!(all.len() >= 17);
        let names: Vec<&str> = all.iter().map(|e| e.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
