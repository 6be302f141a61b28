//! # Task Initializer
//!
//! Turns a validated task request into rows: the task, its workflow
//! steps, the DAG edges, and the initial `pending` transitions, all in
//! one transaction. Context is validated against the template's JSON
//! schema before anything is written, and identical requests within the
//! dedup window resolve to the existing task.

use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use tasker_shared::errors::{TaskerError, TaskerResult};
use tasker_shared::events::catalog::lifecycle;
use tasker_shared::events::payload::EventPayloadBuilder;
use tasker_shared::identity::{IdentityInputs, IdentityStrategy, Sha256IdentityStrategy};
use tasker_shared::models::core::dependent_system::DependentSystem;
use tasker_shared::models::core::named_task::NamedTask;
use tasker_shared::models::core::named_step::NamedStep;
use tasker_shared::models::core::task_transition::{NewTaskTransition, TaskTransition};
use tasker_shared::models::core::workflow_step_transition::{
    NewWorkflowStepTransition, WorkflowStepTransition,
};
use tasker_shared::models::{
    NewTask, NewWorkflowStep, Task, TaskRequest, TaskTemplate, WorkflowStep, WorkflowStepEdge,
};
use tasker_shared::registry::TaskTemplateRegistry;
use tasker_shared::state_machine::{TaskState, WorkflowStepState};
use tasker_shared::system_context::SystemContext;

#[derive(Debug, Clone)]
pub struct TaskInitializationResult {
    pub task_uuid: Uuid,
    pub step_count: usize,
    /// `true` when an existing task was returned by deduplication
    pub deduplicated: bool,
}

#[derive(Debug)]
pub struct TaskInitializer {
    context: Arc<SystemContext>,
    template_registry: TaskTemplateRegistry,
    identity_strategy: Arc<dyn IdentityStrategy>,
}

impl TaskInitializer {
    pub fn new(context: Arc<SystemContext>) -> Self {
        let template_registry = TaskTemplateRegistry::new(context.database_pool().clone());
        Self {
            context,
            template_registry,
            identity_strategy: Arc::new(Sha256IdentityStrategy),
        }
    }

    /// Swap the identity hash strategy
    pub fn with_identity_strategy(mut self, strategy: Arc<dyn IdentityStrategy>) -> Self {
        self.identity_strategy = strategy;
        self
    }

    /// Validate the request, deduplicate, and create the task graph
    #[instrument(skip(self, request), fields(namespace = %request.namespace, name = %request.name))]
    pub async fn create_task_from_request(
        &self,
        request: TaskRequest,
    ) -> TaskerResult<TaskInitializationResult> {
        let template = self
            .template_registry
            .get_task_template(&request.namespace, &request.name, &request.version)
            .await?;

        self.validate_context(&template, &request.context)?;

        let identity_hash = self.identity_strategy.identity_hash(&IdentityInputs {
            name: &request.name,
            namespace: &request.namespace,
            version: &request.version,
            context: &request.context,
            initiator: request.initiator.as_deref(),
            source_system: request.source_system.as_deref(),
        });

        let dedup_window = self.context.config().identity.dedup_window_seconds;
        if dedup_window > 0 {
            if let Some(existing) = Task::find_by_identity_hash_within(
                self.context.database_pool(),
                &identity_hash,
                dedup_window,
            )
            .await?
            {
                debug!(
                    task_uuid = %existing.task_uuid,
                    identity_hash = %identity_hash,
                    "Identical request within dedup window; returning existing task"
                );
                let step_count =
                    WorkflowStep::list_by_task(self.context.database_pool(), existing.task_uuid)
                        .await?
                        .len();
                return Ok(TaskInitializationResult {
                    task_uuid: existing.task_uuid,
                    step_count,
                    deduplicated: true,
                });
            }
        }

        let named_task = NamedTask::find_by_identity(
            self.context.database_pool(),
            &request.namespace,
            &request.name,
            &request.version,
        )
        .await?
        .ok_or_else(|| {
            TaskerError::NotFound(format!(
                "named task {}/{}/{}",
                request.namespace, request.name, request.version
            ))
        })?;

        let (task_uuid, step_names) = self
            .create_task_graph(&request, &template, named_task.named_task_uuid, &identity_hash)
            .await?;

        self.publish_initialization_events(task_uuid, &step_names)
            .await;

        info!(
            task_uuid = %task_uuid,
            step_count = step_names.len(),
            "Task created with initial workflow steps"
        );
        Ok(TaskInitializationResult {
            task_uuid,
            step_count: step_names.len(),
            deduplicated: false,
        })
    }

    /// Deterministic validation error for contexts failing the schema
    fn validate_context(
        &self,
        template: &TaskTemplate,
        context: &serde_json::Value,
    ) -> TaskerResult<()> {
        let Some(schema) = &template.context_schema else {
            return Ok(());
        };

        let validator = jsonschema::validator_for(schema).map_err(|e| {
            TaskerError::ConfigurationError(format!(
                "template '{}' has an invalid context schema: {e}",
                template.name
            ))
        })?;

        let mut violations: Vec<String> = validator
            .iter_errors(context)
            .map(|error| format!("{} at {}", error, error.instance_path()))
            .collect();
        if violations.is_empty() {
            return Ok(());
        }
        violations.sort();
        Err(TaskerError::ValidationError(format!(
            "context failed schema validation: {}",
            violations.join("; ")
        )))
    }

    /// One transaction: task, steps, edges, and initial transitions
    async fn create_task_graph(
        &self,
        request: &TaskRequest,
        template: &TaskTemplate,
        named_task_uuid: Uuid,
        identity_hash: &str,
    ) -> TaskerResult<(Uuid, Vec<String>)> {
        let pool = self.context.database_pool();

        // Catalog rows are shared; resolve them before the task transaction
        let mut named_step_uuids = Vec::with_capacity(template.steps.len());
        for step_template in &template.steps {
            let system =
                DependentSystem::find_or_create(pool, &step_template.dependent_system).await?;
            let mut conn = pool.acquire().await?;
            let named_step = NamedStep::find_or_create_in(
                &mut conn,
                system.dependent_system_uuid,
                &step_template.name,
            )
            .await?;
            named_step_uuids.push(named_step.named_step_uuid);
        }

        let mut tx = pool.begin().await?;

        let task = Task::create_in(
            &mut tx,
            NewTask {
                task_uuid: Uuid::now_v7(),
                named_task_uuid,
                requested_at: request.requested_at,
                initiator: request.initiator.clone(),
                source_system: request.source_system.clone(),
                reason: request.reason.clone(),
                tags: if request.tags.is_empty() {
                    None
                } else {
                    Some(serde_json::json!(request.tags))
                },
                context: Some(request.context.clone()),
                identity_hash: identity_hash.to_string(),
                correlation_id: request.correlation_id,
            },
        )
        .await?;

        TaskTransition::create_in(
            &mut tx,
            NewTaskTransition {
                task_uuid: task.task_uuid,
                to_state: TaskState::Pending.to_string(),
                from_state: None,
                metadata: None,
            },
        )
        .await?;

        let mut step_uuids_by_name = std::collections::HashMap::new();
        let mut step_names = Vec::with_capacity(template.steps.len());
        for (step_template, named_step_uuid) in template.steps.iter().zip(named_step_uuids) {
            let step = WorkflowStep::create_in(
                &mut tx,
                NewWorkflowStep {
                    workflow_step_uuid: Uuid::now_v7(),
                    task_uuid: task.task_uuid,
                    named_step_uuid,
                    retryable: step_template.default_retryable,
                    retry_limit: step_template.default_retry_limit,
                    inputs: None,
                },
            )
            .await?;

            WorkflowStepTransition::create_in(
                &mut tx,
                NewWorkflowStepTransition {
                    workflow_step_uuid: step.workflow_step_uuid,
                    to_state: WorkflowStepState::Pending.to_string(),
                    from_state: None,
                    metadata: None,
                },
            )
            .await?;

            step_uuids_by_name.insert(step_template.name.clone(), step.workflow_step_uuid);
            step_names.push((step_template.name.clone(), step.workflow_step_uuid));
        }

        for step_template in &template.steps {
            let to_step_uuid = step_uuids_by_name[&step_template.name];
            for dependency in TaskTemplate::dependencies_of(step_template) {
                let from_step_uuid =
                    *step_uuids_by_name.get(dependency).ok_or_else(|| {
                        TaskerError::ValidationError(format!(
                            "step '{}' depends on unknown step '{}'",
                            step_template.name, dependency
                        ))
                    })?;
                WorkflowStepEdge::create_in(&mut tx, from_step_uuid, to_step_uuid, None).await?;
            }
        }

        tx.commit().await?;

        Ok((
            task.task_uuid,
            step_names.into_iter().map(|(name, _)| name).collect(),
        ))
    }

    /// The creation transaction wrote the initial transitions directly;
    /// fire their lifecycle events now that everything is committed.
    async fn publish_initialization_events(&self, task_uuid: Uuid, step_names: &[String]) {
        let publisher = self.context.event_publisher();
        let _ = publisher
            .publish(
                lifecycle::TASK_INITIALIZE_REQUESTED,
                EventPayloadBuilder::new(task_uuid).build(),
            )
            .await;
        for name in step_names {
            let _ = publisher
                .publish(
                    lifecycle::STEP_INITIALIZE_REQUESTED,
                    EventPayloadBuilder::new(task_uuid)
                        .with_field("step_name", serde_json::json!(name))
                        .build(),
                )
                .await;
        }
    }
}
