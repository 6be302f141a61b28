//! # Task Template
//!
//! The serialized form of a workflow template: identity triple, context
//! schema, and the ordered step templates with their dependency edges and
//! handler bindings. Stored in `named_tasks.configuration` and registered
//! through the template registry.

use serde::{Deserialize, Serialize};

fn default_namespace() -> String {
    "default".to_string()
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_retryable() -> bool {
    true
}

fn default_retry_limit() -> i32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema the task context is validated against at creation
    #[serde(default)]
    pub context_schema: Option<serde_json::Value>,
    pub steps: Vec<StepTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Handler name resolved against the handler registry; namespace and
    /// version default to the template's namespace and `0.1.0`
    pub handler: HandlerBinding,
    /// External system this step touches; `default` for in-process work
    #[serde(default = "default_namespace")]
    pub dependent_system: String,
    #[serde(default)]
    pub depends_on_step: Option<String>,
    #[serde(default)]
    pub depends_on_steps: Vec<String>,
    #[serde(default = "default_retryable")]
    pub default_retryable: bool,
    #[serde(default = "default_retry_limit")]
    pub default_retry_limit: i32,
    /// Custom events this step's handler may publish
    #[serde(default)]
    pub custom_events: Vec<CustomEventDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerBinding {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomEventDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl TaskTemplate {
    /// All declared dependency names of a step, whether given as the
    /// single or the plural form
    pub fn dependencies_of<'a>(step: &'a StepTemplate) -> Vec<&'a str> {
        let mut deps: Vec<&str> = step
            .depends_on_step
            .iter()
            .map(String::as_str)
            .collect();
        deps.extend(step.depends_on_steps.iter().map(String::as_str));
        deps
    }

    /// Validate internal consistency: unique step names, dependencies
    /// referring to earlier-declared steps only (rejects cycles at the
    /// template level before any rows exist).
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            for dep in Self::dependencies_of(step) {
                if !seen.contains(dep) {
                    return Err(format!(
                        "step '{}' depends on '{}', which is not declared before it",
                        step.name, dep
                    ));
                }
            }
            if !seen.insert(step.name.as_str()) {
                return Err(format!("duplicate step name '{}'", step.name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template_from(value: serde_json::Value) -> TaskTemplate {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_minimal_template() {
        let template = template_from(json!({
            "name": "process_order",
            "steps": [
                {"name": "validate", "handler": {"name": "validate_order"}},
                {
                    "name": "charge",
                    "handler": {"name": "charge_card"},
                    "depends_on_step": "validate"
                }
            ]
        }));

        assert_eq!(template.namespace, "default");
        assert_eq!(template.version, "0.1.0");
        assert_eq!(template.steps.len(), 2);
        assert!(template.steps[0].default_retryable);
        assert_eq!(template.steps[0].default_retry_limit, 3);
        assert!(template.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_dependency() {
        let template = template_from(json!({
            "name": "bad",
            "steps": [
                {
                    "name": "a",
                    "handler": {"name": "h"},
                    "depends_on_step": "missing"
                }
            ]
        }));

        let err = template.validate().unwrap_err();
        assert!(err.contains("missing"));
    }

    #[test]
    fn test_validate_rejects_duplicate_step_names() {
        let template = template_from(json!({
            "name": "bad",
            "steps": [
                {"name": "a", "handler": {"name": "h"}},
                {"name": "a", "handler": {"name": "h"}}
            ]
        }));

        let err = template.validate().unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn test_dependencies_merge_single_and_plural() {
        let template = template_from(json!({
            "name": "diamond",
            "steps": [
                {"name": "start", "handler": {"name": "h"}},
                {"name": "left", "handler": {"name": "h"}, "depends_on_step": "start"},
                {"name": "right", "handler": {"name": "h"}, "depends_on_step": "start"},
                {
                    "name": "end",
                    "handler": {"name": "h"},
                    "depends_on_steps": ["left", "right"]
                }
            ]
        }));

        let deps = TaskTemplate::dependencies_of(&template.steps[3]);
        assert_eq!(deps, vec!["left", "right"]);
        assert!(template.validate().is_ok());
    }
}
