//! # Event Payloads
//!
//! Every payload the engine publishes is built here, so consumers can
//! rely on `task_uuid` and timing fields being present, and on failure
//! payloads carrying `error_message`, `exception_class`, `backtrace`,
//! and `attempt_number`.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A published event: name plus standardized payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: serde_json::Value,
    pub published_at: NaiveDateTime,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            published_at: Utc::now().naive_utc(),
        }
    }
}

/// Builder producing the standardized payload shape
#[derive(Debug, Clone)]
pub struct EventPayloadBuilder {
    task_uuid: Uuid,
    workflow_step_uuid: Option<Uuid>,
    step_name: Option<String>,
    started_at: NaiveDateTime,
    completed_at: Option<NaiveDateTime>,
    attempt_number: Option<i32>,
    error_message: Option<String>,
    exception_class: Option<String>,
    backtrace: Option<Vec<String>>,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl EventPayloadBuilder {
    pub fn new(task_uuid: Uuid) -> Self {
        Self {
            task_uuid,
            workflow_step_uuid: None,
            step_name: None,
            started_at: Utc::now().naive_utc(),
            completed_at: None,
            attempt_number: None,
            error_message: None,
            exception_class: None,
            backtrace: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn for_step(mut self, workflow_step_uuid: Uuid, step_name: impl Into<String>) -> Self {
        self.workflow_step_uuid = Some(workflow_step_uuid);
        self.step_name = Some(step_name.into());
        self
    }

    pub fn started_at(mut self, at: NaiveDateTime) -> Self {
        self.started_at = at;
        self
    }

    pub fn completed_at(mut self, at: NaiveDateTime) -> Self {
        self.completed_at = Some(at);
        self
    }

    pub fn attempt_number(mut self, attempt: i32) -> Self {
        self.attempt_number = Some(attempt);
        self
    }

    pub fn with_error(
        mut self,
        message: impl Into<String>,
        exception_class: Option<String>,
        backtrace: Option<Vec<String>>,
    ) -> Self {
        self.error_message = Some(message.into());
        self.exception_class = exception_class;
        self.backtrace = backtrace;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn build(self) -> serde_json::Value {
        let execution_duration = self
            .completed_at
            .map(|done| (done - self.started_at).num_milliseconds() as f64 / 1000.0);

        let mut payload = serde_json::Map::new();
        payload.insert(
            "task_uuid".to_string(),
            serde_json::json!(self.task_uuid),
        );
        if let Some(step_uuid) = self.workflow_step_uuid {
            payload.insert(
                "workflow_step_uuid".to_string(),
                serde_json::json!(step_uuid),
            );
        }
        if let Some(step_name) = self.step_name {
            payload.insert("step_name".to_string(), serde_json::json!(step_name));
        }
        payload.insert(
            "started_at".to_string(),
            serde_json::json!(self.started_at.and_utc().to_rfc3339()),
        );
        payload.insert(
            "completed_at".to_string(),
            serde_json::json!(self.completed_at.map(|at| at.and_utc().to_rfc3339())),
        );
        payload.insert(
            "execution_duration".to_string(),
            serde_json::json!(execution_duration),
        );
        if let Some(message) = self.error_message {
            payload.insert("error_message".to_string(), serde_json::json!(message));
            payload.insert(
                "exception_class".to_string(),
                serde_json::json!(self.exception_class),
            );
            payload.insert(
                "backtrace".to_string(),
                serde_json::json!(self.backtrace),
            );
            payload.insert(
                "attempt_number".to_string(),
                serde_json::json!(self.attempt_number),
            );
        } else if let Some(attempt) = self.attempt_number {
            payload.insert("attempt_number".to_string(), serde_json::json!(attempt));
        }
        for (key, value) in self.extra {
            payload.entry(key).or_insert(value);
        }

        serde_json::Value::Object(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_payload_fields_present() {
        let payload = EventPayloadBuilder::new(Uuid::now_v7()).build();

        assert!(payload.get("task_uuid").is_some());
        assert!(payload.get("started_at").is_some());
        assert!(payload.get("completed_at").is_some());
        assert!(payload.get("execution_duration").is_some());
    }

    #[test]
    fn test_execution_duration_computed() {
        let started = Utc::now().naive_utc();
        let completed = started + chrono::Duration::milliseconds(2500);
        let payload = EventPayloadBuilder::new(Uuid::now_v7())
            .started_at(started)
            .completed_at(completed)
            .build();

        let duration = payload["execution_duration"].as_f64().unwrap();
        assert!((duration - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_failure_payload_fields() {
        let payload = EventPayloadBuilder::new(Uuid::now_v7())
            .for_step(Uuid::now_v7(), "charge_card")
            .attempt_number(2)
            .with_error(
                "gateway timeout",
                Some("RetryableError".to_string()),
                Some(vec!["handler.rs:42".to_string()]),
            )
            .build();

        assert_eq!(payload["error_message"], "gateway timeout");
        assert_eq!(payload["exception_class"], "RetryableError");
        assert_eq!(payload["attempt_number"], 2);
        assert_eq!(payload["step_name"], "charge_card");
        assert!(payload["backtrace"].is_array());
    }

    #[test]
    fn test_extra_fields_do_not_override_standard_keys() {
        let task_uuid = Uuid::now_v7();
        let payload = EventPayloadBuilder::new(task_uuid)
            .with_field("task_uuid", serde_json::json!("spoofed"))
            .with_field("custom_field", serde_json::json!(42))
            .build();

        assert_eq!(payload["task_uuid"], serde_json::json!(task_uuid));
        assert_eq!(payload["custom_field"], 42);
    }
}
