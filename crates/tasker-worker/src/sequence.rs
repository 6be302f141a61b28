//! # Step Sequence
//!
//! The view a handler gets of its task's prior completed steps: lookup
//! by name, with each step's persisted `results`.

use std::collections::HashMap;

use tasker_shared::models::WorkflowStep;

#[derive(Debug, Clone, Default)]
pub struct StepSequence {
    steps: HashMap<String, WorkflowStep>,
}

impl StepSequence {
    pub fn new(steps: impl IntoIterator<Item = (String, WorkflowStep)>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// A prior completed step by name
    pub fn get(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.get(name)
    }

    /// A prior completed step's results by name
    pub fn results(&self, name: &str) -> Option<&serde_json::Value> {
        self.steps.get(name).and_then(|step| step.results.as_ref())
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn step_with_results(results: serde_json::Value) -> WorkflowStep {
        WorkflowStep {
            workflow_step_uuid: Uuid::now_v7(),
            task_uuid: Uuid::now_v7(),
            named_step_uuid: Uuid::now_v7(),
            retryable: true,
            retry_limit: 3,
            attempts: 1,
            in_process: false,
            processed: true,
            processed_at: Some(chrono::Utc::now().naive_utc()),
            last_attempted_at: Some(chrono::Utc::now().naive_utc()),
            backoff_request_seconds: None,
            inputs: None,
            results: Some(results),
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn test_lookup_by_name() {
        let sequence = StepSequence::new([
            (
                "validate".to_string(),
                step_with_results(serde_json::json!({"valid": true})),
            ),
            (
                "fetch".to_string(),
                step_with_results(serde_json::json!({"rows": 3})),
            ),
        ]);

        assert_eq!(sequence.len(), 2);
        assert_eq!(
            sequence.results("validate"),
            Some(&serde_json::json!({"valid": true}))
        );
        assert!(sequence.get("missing").is_none());
        assert!(sequence.results("missing").is_none());
    }

    #[test]
    fn test_empty_sequence() {
        let sequence = StepSequence::default();
        assert!(sequence.is_empty());
        assert!(sequence.step_names().is_empty());
    }
}
