//! # Task Finalizer
//!
//! After a coordinator pass, inspects the aggregated execution context
//! and chooses exactly one outcome: complete the task, fail it with the
//! earliest unrecoverable step as cause, or hand it to the re-enqueuer.
//! Repeated ambiguity (no progress, no clear failure) is bounded by a
//! stall counter that eventually fails the task.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use tasker_shared::errors::{OrchestrationError, OrchestrationResult};
use tasker_shared::models::orchestration::{ExecutionStatus, TaskExecutionContext};
use tasker_shared::models::Task;
use tasker_shared::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use tasker_shared::system_context::SystemContext;

use super::reenqueuer::{ReenqueueReason, Reenqueuer};
use super::viable_step_discovery::ViableStepDiscovery;

/// Bounded retry-after for ambiguous states, in seconds
const AMBIGUOUS_RETRY_SECONDS: i64 = 30;
/// Ambiguous passes tolerated before the task is failed as stalled
const MAX_STALLED_PASSES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationAction {
    Completed,
    Failed,
    Cancelled,
    Reenqueued,
    NoAction,
}

#[derive(Debug, Clone)]
pub struct FinalizationResult {
    pub task_uuid: Uuid,
    pub action: FinalizationAction,
    pub reason: Option<String>,
    pub completion_percentage: Option<f64>,
    pub total_steps: Option<i64>,
    pub health_status: Option<String>,
}

impl FinalizationResult {
    fn new(task_uuid: Uuid, action: FinalizationAction, reason: impl Into<String>) -> Self {
        Self {
            task_uuid,
            action,
            reason: Some(reason.into()),
            completion_percentage: None,
            total_steps: None,
            health_status: None,
        }
    }

    fn with_context(mut self, context: &TaskExecutionContext) -> Self {
        self.completion_percentage = Some(context.completion_percentage);
        self.total_steps = Some(context.total_steps);
        self.health_status = Some(context.health_status.clone());
        self
    }
}

#[derive(Debug)]
pub struct TaskFinalizer {
    context: Arc<SystemContext>,
    discovery: ViableStepDiscovery,
    reenqueuer: Arc<dyn Reenqueuer>,
    stalled_passes: DashMap<Uuid, u32>,
}

impl TaskFinalizer {
    pub fn new(context: Arc<SystemContext>, reenqueuer: Arc<dyn Reenqueuer>) -> Self {
        let discovery = ViableStepDiscovery::new(context.clone());
        Self {
            context,
            discovery,
            reenqueuer,
            stalled_passes: DashMap::new(),
        }
    }

    /// Choose and apply the single outcome for this task
    pub async fn finalize_task(&self, task: Task) -> OrchestrationResult<FinalizationResult> {
        let task_uuid = task.task_uuid;
        let Some(context) = self.discovery.get_execution_context(task_uuid).await? else {
            error!(task_uuid = %task_uuid, "No execution context; failing task");
            return self
                .fail_task(task, None, "missing execution context".to_string())
                .await;
        };

        debug!(
            task_uuid = %task_uuid,
            execution_status = %context.execution_status,
            ready_steps = context.ready_steps,
            failed_steps = context.failed_steps,
            "Finalizing task"
        );

        match context.execution_status {
            ExecutionStatus::AllComplete => {
                self.stalled_passes.remove(&task_uuid);
                self.complete_task(task, context).await
            }
            ExecutionStatus::BlockedByFailures => {
                self.stalled_passes.remove(&task_uuid);
                let cause = self.earliest_unrecoverable_step(task_uuid).await?;
                self.fail_task(task, Some(context), cause).await
            }
            ExecutionStatus::HasReadySteps | ExecutionStatus::Processing => {
                self.stalled_passes.remove(&task_uuid);
                self.reenqueue(task_uuid, &context, ReenqueueReason::AwaitingWork)
                    .await
            }
            ExecutionStatus::WaitingForRetry => {
                self.stalled_passes.remove(&task_uuid);
                self.reenqueue(task_uuid, &context, ReenqueueReason::AwaitingRetry)
                    .await
            }
            ExecutionStatus::WaitingForDependencies => {
                let passes = {
                    let mut entry = self.stalled_passes.entry(task_uuid).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if passes >= MAX_STALLED_PASSES {
                    warn!(
                        task_uuid = %task_uuid,
                        passes = passes,
                        "Task stalled; transitioning to error"
                    );
                    self.stalled_passes.remove(&task_uuid);
                    return self.fail_task(task, Some(context), "stalled".to_string()).await;
                }
                self.reenqueue(task_uuid, &context, ReenqueueReason::Ambiguous)
                    .await
            }
        }
    }

    async fn complete_task(
        &self,
        task: Task,
        context: TaskExecutionContext,
    ) -> OrchestrationResult<FinalizationResult> {
        let task_uuid = task.task_uuid;
        let mut machine = TaskStateMachine::new(task, self.context.clone());

        let current = machine.current_state().await?;
        match current {
            TaskState::Complete => {
                // Idempotent: nothing to do, nothing published
                return Ok(FinalizationResult::new(
                    task_uuid,
                    FinalizationAction::NoAction,
                    "already complete",
                )
                .with_context(&context));
            }
            TaskState::Pending => {
                // Stepless tasks complete without a coordinator pass
                machine.transition(TaskEvent::Start).await?;
            }
            _ => {}
        }

        if let Err(error) = machine.transition(TaskEvent::Complete).await {
            // A racing worker may have finalized between our read and
            // the transition; that outcome is the one we wanted
            if machine.current_state().await? == TaskState::Complete {
                return Ok(FinalizationResult::new(
                    task_uuid,
                    FinalizationAction::NoAction,
                    "completed by another worker",
                )
                .with_context(&context));
            }
            return Err(OrchestrationError::StateTransitionFailed {
                entity_type: "Task".to_string(),
                entity_uuid: task_uuid,
                reason: error.to_string(),
            });
        }

        Ok(
            FinalizationResult::new(task_uuid, FinalizationAction::Completed, "all steps complete")
                .with_context(&context),
        )
    }

    async fn fail_task(
        &self,
        task: Task,
        context: Option<TaskExecutionContext>,
        cause: String,
    ) -> OrchestrationResult<FinalizationResult> {
        let task_uuid = task.task_uuid;
        let mut machine = TaskStateMachine::new(task, self.context.clone());

        match machine.current_state().await? {
            TaskState::Error => {
                let mut result = FinalizationResult::new(
                    task_uuid,
                    FinalizationAction::NoAction,
                    "already failed",
                );
                if let Some(ctx) = &context {
                    result = result.with_context(ctx);
                }
                return Ok(result);
            }
            TaskState::Pending => {
                machine.transition(TaskEvent::Start).await?;
            }
            _ => {}
        }

        if let Err(error) = machine.transition(TaskEvent::Fail(cause.clone())).await {
            if machine.current_state().await? == TaskState::Error {
                let mut result = FinalizationResult::new(
                    task_uuid,
                    FinalizationAction::NoAction,
                    "failed by another worker",
                );
                if let Some(ctx) = &context {
                    result = result.with_context(ctx);
                }
                return Ok(result);
            }
            return Err(OrchestrationError::StateTransitionFailed {
                entity_type: "Task".to_string(),
                entity_uuid: task_uuid,
                reason: error.to_string(),
            });
        }

        let mut result = FinalizationResult::new(task_uuid, FinalizationAction::Failed, cause);
        if let Some(ctx) = &context {
            result = result.with_context(ctx);
        }
        Ok(result)
    }

    async fn reenqueue(
        &self,
        task_uuid: Uuid,
        context: &TaskExecutionContext,
        reason: ReenqueueReason,
    ) -> OrchestrationResult<FinalizationResult> {
        let at = match reason {
            ReenqueueReason::AwaitingWork => Utc::now().naive_utc(),
            // Min eligible-at across blocked steps, from the readiness rows
            ReenqueueReason::AwaitingRetry => context
                .next_retry_at
                .unwrap_or_else(|| Utc::now().naive_utc()),
            ReenqueueReason::Ambiguous => {
                Utc::now().naive_utc() + chrono::Duration::seconds(AMBIGUOUS_RETRY_SECONDS)
            }
        };

        self.reenqueuer.enqueue_at(task_uuid, at, reason).await?;

        Ok(FinalizationResult::new(
            task_uuid,
            FinalizationAction::Reenqueued,
            reason.to_string(),
        )
        .with_context(context))
    }

    /// The failure cause reported by `task.failed`: the exhausted step
    /// that failed first
    async fn earliest_unrecoverable_step(&self, task_uuid: Uuid) -> OrchestrationResult<String> {
        let rows = self.discovery.readiness_status(task_uuid).await?;
        let mut unrecoverable: Vec<_> = rows
            .iter()
            .filter(|row| {
                row.current_state == "error"
                    && (!row.retryable || row.attempts >= row.retry_limit)
            })
            .collect();
        unrecoverable.sort_by_key(|row| row.last_failure_at);

        Ok(unrecoverable.first().map_or_else(
            || "unrecoverable step failure".to_string(),
            |row| {
                format!(
                    "step '{}' ({}) failed permanently after {} attempts",
                    row.name, row.workflow_step_uuid, row.attempts
                )
            },
        ))
    }
}
