//! # Workflow Coordinator
//!
//! The loop that drives one task: discover viable steps, claim and
//! execute them with bounded concurrency, then finalize or hand off to
//! the re-enqueuer. Re-running on a terminal task is a no-op that
//! publishes no step events. Cancellation is observed between batches:
//! in-flight attempts drain, then the loop exits without further
//! discovery.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use tasker_shared::errors::{OrchestrationError, OrchestrationResult};
use tasker_shared::models::core::named_task::NamedTask;
use tasker_shared::models::{Task, TaskTemplate};
use tasker_shared::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use tasker_shared::system_context::SystemContext;
use tasker_worker::HandlerRegistry;

use super::concurrency::ConcurrencyManager;
use super::reenqueuer::Reenqueuer;
use super::step_executor::StepExecutor;
use super::task_finalizer::{FinalizationAction, FinalizationResult, TaskFinalizer};
use super::viable_step_discovery::ViableStepDiscovery;

#[derive(Debug)]
pub struct WorkflowCoordinator {
    context: Arc<SystemContext>,
    discovery: ViableStepDiscovery,
    executor: StepExecutor,
    finalizer: TaskFinalizer,
    concurrency: ConcurrencyManager,
}

impl WorkflowCoordinator {
    pub fn new(
        context: Arc<SystemContext>,
        handler_registry: Arc<HandlerRegistry>,
        reenqueuer: Arc<dyn Reenqueuer>,
    ) -> Self {
        let discovery = ViableStepDiscovery::new(context.clone());
        let executor = StepExecutor::new(context.clone(), handler_registry);
        let finalizer = TaskFinalizer::new(context.clone(), reenqueuer);
        let concurrency = ConcurrencyManager::new(context.config().execution.clone());
        Self {
            context,
            discovery,
            executor,
            finalizer,
            concurrency,
        }
    }

    /// Drive the task until no further progress is possible in this
    /// pass, then finalize
    #[instrument(skip(self), fields(task_uuid = %task_uuid))]
    pub async fn execute_workflow(
        &self,
        task_uuid: Uuid,
    ) -> OrchestrationResult<FinalizationResult> {
        let task = Task::find_by_id(self.context.database_pool(), task_uuid)
            .await
            .map_err(|e| OrchestrationError::DatabaseError {
                operation: "load_task".to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| OrchestrationError::General(format!("task {task_uuid} not found")))?;

        let mut machine = TaskStateMachine::new(task.clone(), self.context.clone());
        match machine.current_state().await? {
            state if state.is_terminal() => {
                debug!(task_uuid = %task_uuid, state = %state, "Task already terminal; no-op");
                return Ok(FinalizationResult {
                    task_uuid,
                    action: FinalizationAction::NoAction,
                    reason: Some(format!("task already {state}")),
                    completion_percentage: None,
                    total_steps: None,
                    health_status: None,
                });
            }
            TaskState::Pending => {
                self.start_task(&mut machine, TaskEvent::Start).await?;
            }
            TaskState::Error => {
                self.start_task(&mut machine, TaskEvent::Retry).await?;
            }
            _ => {}
        }

        let template = self.load_template(&task).await?;
        let attempt_timeout =
            Duration::from_secs(self.context.config().execution.batch_timeout_seconds);

        loop {
            // Cancellation flag: the task's own state, read between batches
            let state = machine.current_state().await?;
            if state == TaskState::Cancelled {
                info!(task_uuid = %task_uuid, "Task cancelled; stopping discovery");
                return Ok(FinalizationResult {
                    task_uuid,
                    action: FinalizationAction::Cancelled,
                    reason: Some("task cancelled".to_string()),
                    completion_percentage: None,
                    total_steps: None,
                    health_status: None,
                });
            }

            let ready = self.discovery.find_viable_steps(task_uuid).await?;
            if ready.is_empty() {
                debug!(task_uuid = %task_uuid, "No viable steps; leaving batch loop");
                break;
            }

            let max_concurrent = self
                .concurrency
                .max_concurrent_steps(self.context.database_pool());
            let batch: Vec<_> = ready.into_iter().take(max_concurrent).collect();
            let sequence = self.discovery.build_sequence(task_uuid).await?;

            let outcome = self
                .executor
                .execute_batch(
                    &task,
                    &template,
                    &sequence,
                    batch,
                    max_concurrent,
                    attempt_timeout,
                )
                .await?;

            if !outcome.made_progress() {
                // Every claim was lost: another worker owns these steps
                warn!(
                    task_uuid = %task_uuid,
                    claim_lost = outcome.claim_lost,
                    "No claims won this pass; yielding to other workers"
                );
                break;
            }
        }

        let task = Task::find_by_id(self.context.database_pool(), task_uuid)
            .await
            .map_err(|e| OrchestrationError::DatabaseError {
                operation: "reload_task".to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| OrchestrationError::General(format!("task {task_uuid} vanished")))?;
        self.finalizer.finalize_task(task).await
    }

    /// Move the task into `in_progress`, tolerating a racing worker
    /// that got there first
    async fn start_task(
        &self,
        machine: &mut TaskStateMachine,
        event: TaskEvent,
    ) -> OrchestrationResult<()> {
        match machine.transition(event).await {
            Ok(_) => Ok(()),
            Err(error) => {
                if machine.current_state().await? == TaskState::InProgress {
                    debug!(
                        task_uuid = %machine.task().task_uuid,
                        "Another worker started this task; continuing"
                    );
                    return Ok(());
                }
                Err(error.into())
            }
        }
    }

    async fn load_template(&self, task: &Task) -> OrchestrationResult<TaskTemplate> {
        let named_task = NamedTask::find_by_id(self.context.database_pool(), task.named_task_uuid)
            .await
            .map_err(|e| OrchestrationError::DatabaseError {
                operation: "load_named_task".to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| {
                OrchestrationError::General(format!(
                    "named task {} not found for task {}",
                    task.named_task_uuid, task.task_uuid
                ))
            })?;

        let configuration = named_task.configuration.ok_or_else(|| {
            OrchestrationError::General(format!(
                "named task {} has no stored template",
                named_task.named_task_uuid
            ))
        })?;
        serde_json::from_value(configuration).map_err(|e| {
            OrchestrationError::General(format!("stored template failed to parse: {e}"))
        })
    }
}
