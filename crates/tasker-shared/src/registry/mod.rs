//! # Task Template Registry
//!
//! Database-backed catalog of task templates keyed by the
//! `(namespace, name, version)` identity triple. Registration validates
//! the template, upserts the catalog rows, and records declared custom
//! events in the event catalog.

use sqlx::PgPool;
use tracing::{debug, info};

use crate::errors::{TaskerError, TaskerResult};
use crate::events::EventCatalog;
use crate::models::core::named_task::NamedTask;
use crate::models::core::task_namespace::TaskNamespace;
use crate::models::core::task_template::TaskTemplate;

#[derive(Debug, Clone)]
pub struct TaskTemplateRegistry {
    pool: PgPool,
}

impl TaskTemplateRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Validate and persist a template under its identity triple.
    /// Custom events declared by step templates land in `catalog`.
    pub async fn register_template(
        &self,
        template: &TaskTemplate,
        catalog: &EventCatalog,
    ) -> TaskerResult<NamedTask> {
        template
            .validate()
            .map_err(TaskerError::ValidationError)?;

        for step in &template.steps {
            for event in &step.custom_events {
                catalog.register_custom_event(&event.name, &event.description)?;
            }
        }

        let namespace = TaskNamespace::find_or_create(&self.pool, &template.namespace).await?;
        let configuration = serde_json::to_value(template)?;
        let named_task = NamedTask::upsert(
            &self.pool,
            namespace.task_namespace_uuid,
            &template.name,
            &template.version,
            template.description.as_deref(),
            template.context_schema.as_ref(),
            Some(&configuration),
        )
        .await?;

        info!(
            namespace = %template.namespace,
            name = %template.name,
            version = %template.version,
            step_count = template.steps.len(),
            "Task template registered"
        );
        Ok(named_task)
    }

    /// Resolve a template by identity; `NotFound` when absent
    pub async fn get_task_template(
        &self,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> TaskerResult<TaskTemplate> {
        let named_task = NamedTask::find_by_identity(&self.pool, namespace, name, version)
            .await?
            .ok_or_else(|| {
                TaskerError::NotFound(format!("task template {namespace}/{name}/{version}"))
            })?;

        let configuration = named_task.configuration.ok_or_else(|| {
            TaskerError::NotFound(format!(
                "task template {namespace}/{name}/{version} has no stored configuration"
            ))
        })?;

        let template: TaskTemplate = serde_json::from_value(configuration)?;
        debug!(
            namespace = %namespace,
            name = %name,
            version = %version,
            "Task template resolved"
        );
        Ok(template)
    }

    /// Templates registered under a namespace
    pub async fn list_templates(&self, namespace: &str) -> TaskerResult<Vec<TaskTemplate>> {
        let named_tasks = NamedTask::list_by_namespace(&self.pool, namespace).await?;
        named_tasks
            .into_iter()
            .filter_map(|nt| nt.configuration)
            .map(|config| serde_json::from_value(config).map_err(TaskerError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_template() -> TaskTemplate {
        serde_json::from_value(json!({
            "name": "registry_sample",
            "namespace": "registry_test",
            "version": "1.0.0",
            "steps": [
                {"name": "first", "handler": {"name": "first_handler"}},
                {
                    "name": "second",
                    "handler": {"name": "second_handler"},
                    "depends_on_step": "first",
                    "custom_events": [
                        {"name": "registry_test.second_done", "description": "fired after second"}
                    ]
                }
            ]
        }))
        .unwrap()
    }

    #[sqlx::test(migrator = "crate::database::migrator::MIGRATOR")]
    async fn test_register_and_resolve(pool: PgPool) -> anyhow::Result<()> {
        let registry = TaskTemplateRegistry::new(pool);
        let catalog = EventCatalog::new();

        registry
            .register_template(&sample_template(), &catalog)
            .await?;

        let resolved = registry
            .get_task_template("registry_test", "registry_sample", "1.0.0")
            .await?;
        assert_eq!(resolved.steps.len(), 2);
        assert_eq!(resolved.steps[1].depends_on_step.as_deref(), Some("first"));

        // Declared custom events landed in the catalog
        assert!(catalog.contains("registry_test.second_done"));
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::migrator::MIGRATOR")]
    async fn test_unknown_template_is_not_found(pool: PgPool) -> anyhow::Result<()> {
        let registry = TaskTemplateRegistry::new(pool);
        let result = registry
            .get_task_template("nowhere", "nothing", "0.0.0")
            .await;
        assert!(matches!(result, Err(TaskerError::NotFound(_))));
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::migrator::MIGRATOR")]
    async fn test_reserved_custom_event_rejects_registration(pool: PgPool) -> anyhow::Result<()> {
        let registry = TaskTemplateRegistry::new(pool);
        let catalog = EventCatalog::new();

        let mut template = sample_template();
        template.steps[1].custom_events[0].name = "task.sneaky".to_string();

        let result = registry.register_template(&template, &catalog).await;
        assert!(matches!(result, Err(TaskerError::ValidationError(_))));
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::migrator::MIGRATOR")]
    async fn test_reregistration_updates_configuration(pool: PgPool) -> anyhow::Result<()> {
        let registry = TaskTemplateRegistry::new(pool);
        let catalog = EventCatalog::new();

        let mut template = sample_template();
        registry.register_template(&template, &catalog).await?;

        template.description = Some("updated".to_string());
        registry.register_template(&template, &catalog).await?;

        let resolved = registry
            .get_task_template("registry_test", "registry_sample", "1.0.0")
            .await?;
        assert_eq!(resolved.description.as_deref(), Some("updated"));
        Ok(())
    }
}
