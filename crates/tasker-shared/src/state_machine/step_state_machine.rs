//! # Step State Machine
//!
//! Drives a workflow step through its transition table. The `Start`
//! event is the claim: a row-locked transaction (`FOR UPDATE SKIP
//! LOCKED`) that re-verifies readiness, bumps `attempts`, marks the row
//! in-process, and records the transition. Two workers racing for the
//! same ready step diverge here: exactly one commits, the loser sees the
//! lock or a no-longer-eligible state and drops the step.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::StateMachineError;
use crate::events::catalog::lifecycle;
use crate::events::payload::EventPayloadBuilder;
use crate::models::core::workflow_step::WorkflowStep;
use crate::models::core::workflow_step_transition::{
    NewWorkflowStepTransition, WorkflowStepTransition,
};
use crate::models::orchestration::StepReadinessStatus;
use crate::state_machine::events::StepEvent;
use crate::state_machine::states::WorkflowStepState;
use crate::state_machine::task_state_machine::{is_unique_violation, unwrap_tasker_db_error};
use crate::state_machine::transitions::step_transition_allowed;
use crate::system_context::SystemContext;

const STORAGE_CONFLICT_RETRIES: u32 = 3;
const STORAGE_CONFLICT_BACKOFF: Duration = Duration::from_millis(50);

/// Everything the executor knows about a failed attempt
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub message: String,
    pub exception_class: Option<String>,
    /// Written into `results.error` alongside the transition
    pub error_results: Option<serde_json::Value>,
    /// Server-requested delay, if the error carried one
    pub backoff_request_seconds: Option<i32>,
    /// Permanent errors force the retry budget to exhaustion
    pub exhausted: bool,
}

impl StepFailure {
    pub fn from_message(message: String) -> Self {
        Self {
            message,
            exception_class: None,
            error_results: None,
            backoff_request_seconds: None,
            exhausted: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepStateMachine {
    step: WorkflowStep,
    step_name: Option<String>,
    context: Arc<SystemContext>,
}

impl StepStateMachine {
    pub fn new(step: WorkflowStep, context: Arc<SystemContext>) -> Self {
        Self {
            step,
            step_name: None,
            context,
        }
    }

    /// Construct with the named-step name so event payloads carry it
    pub fn new_named(step: WorkflowStep, step_name: String, context: Arc<SystemContext>) -> Self {
        Self {
            step,
            step_name: Some(step_name),
            context,
        }
    }

    fn payload_step_name(&self) -> String {
        self.step_name
            .clone()
            .unwrap_or_else(|| self.step.workflow_step_uuid.to_string())
    }

    pub fn step(&self) -> &WorkflowStep {
        &self.step
    }

    pub async fn current_state(&self) -> Result<WorkflowStepState, StateMachineError> {
        Ok(self
            .current_state_row()
            .await?
            .unwrap_or(WorkflowStepState::Pending))
    }

    async fn current_state_row(&self) -> Result<Option<WorkflowStepState>, StateMachineError> {
        let row = WorkflowStepTransition::get_current(
            self.context.database_pool(),
            self.step.workflow_step_uuid,
        )
        .await
        .map_err(|e| StateMachineError::Database(unwrap_tasker_db_error(e)))?;
        row.map(|t| {
            WorkflowStepState::from_str(&t.to_state)
                .map_err(|reason| StateMachineError::GuardFailed { reason })
        })
        .transpose()
    }

    /// Apply an event. `Fail` uses default failure details; the executor
    /// calls [`StepStateMachine::fail_with`] to carry error results and
    /// backoff.
    pub async fn transition(
        &mut self,
        event: StepEvent,
    ) -> Result<WorkflowStepState, StateMachineError> {
        match event {
            StepEvent::Initialize => self.initialize().await,
            StepEvent::Start => self.claim().await,
            StepEvent::Complete(results) => self.complete(results).await,
            StepEvent::Fail(message) => self.fail_with(StepFailure::from_message(message)).await,
            StepEvent::Cancel => self.cancel().await,
            StepEvent::ResolveManually(results) => self.resolve_manually(results).await,
        }
    }

    /// Record the initial `None -> pending` transition
    async fn initialize(&mut self) -> Result<WorkflowStepState, StateMachineError> {
        let from = self.current_state_row().await?;
        self.validate_edge(from, WorkflowStepState::Pending)?;

        self.with_conflict_retries(|tx_step| {
            Box::pin(async move {
                let mut tx = tx_step.context.database_pool().begin().await?;
                WorkflowStepTransition::create_in(
                    &mut tx,
                    NewWorkflowStepTransition {
                        workflow_step_uuid: tx_step.step.workflow_step_uuid,
                        to_state: WorkflowStepState::Pending.to_string(),
                        from_state: None,
                        metadata: None,
                    },
                )
                .await
                .map_err(unwrap_tasker_db_error)?;
                tx.commit().await
            })
        })
        .await?;

        self.publish(lifecycle::STEP_INITIALIZE_REQUESTED, None, None).await;
        Ok(WorkflowStepState::Pending)
    }

    /// The claim: atomic `pending|error -> in_progress` under a row lock
    async fn claim(&mut self) -> Result<WorkflowStepState, StateMachineError> {
        let step_uuid = self.step.workflow_step_uuid;
        let mut tx = self
            .context
            .database_pool()
            .begin()
            .await
            .map_err(StateMachineError::Database)?;

        // Lock the step row; a skipped lock means another worker won
        let locked: Option<WorkflowStep> = sqlx::query_as(
            "SELECT * FROM tasker.workflow_steps WHERE workflow_step_uuid = $1 FOR UPDATE SKIP LOCKED",
        )
        .bind(step_uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StateMachineError::Database)?;

        let Some(locked) = locked else {
            return Err(StateMachineError::GuardFailed {
                reason: format!("claim lost for step {step_uuid}: row locked by another worker"),
            });
        };

        // Re-verify readiness under the lock; the racing winner may have
        // already changed the state between our read and this claim
        let readiness: Option<StepReadinessStatus> = sqlx::query_as(
            "SELECT * FROM tasker.get_step_readiness_status($1) WHERE workflow_step_uuid = $2",
        )
        .bind(locked.task_uuid)
        .bind(step_uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StateMachineError::Database)?;

        let Some(readiness) = readiness else {
            return Err(StateMachineError::GuardFailed {
                reason: format!("no readiness row for step {step_uuid}"),
            });
        };
        if !readiness.ready_for_execution {
            return Err(StateMachineError::GuardFailed {
                reason: format!(
                    "step {step_uuid} not ready: state={} deps={} retry={}",
                    readiness.current_state,
                    readiness.dependencies_satisfied,
                    readiness.retry_eligible
                ),
            });
        }

        let from = WorkflowStepState::from_str(&readiness.current_state)
            .map_err(|reason| StateMachineError::GuardFailed { reason })?;
        self.validate_edge(Some(from), WorkflowStepState::InProgress)?;

        sqlx::query(
            r"
            UPDATE tasker.workflow_steps
            SET attempts = attempts + 1,
                in_process = TRUE,
                last_attempted_at = NOW(),
                updated_at = NOW()
            WHERE workflow_step_uuid = $1
            ",
        )
        .bind(step_uuid)
        .execute(&mut *tx)
        .await
        .map_err(StateMachineError::Database)?;

        WorkflowStepTransition::create_in(
            &mut tx,
            NewWorkflowStepTransition {
                workflow_step_uuid: step_uuid,
                to_state: WorkflowStepState::InProgress.to_string(),
                from_state: Some(from.to_string()),
                metadata: Some(serde_json::json!({
                    "processor_uuid": self.context.processor_uuid(),
                    "attempt": locked.attempts + 1,
                })),
            },
        )
        .await
        .map_err(|e| StateMachineError::Database(unwrap_tasker_db_error(e)))?;

        tx.commit().await.map_err(StateMachineError::Database)?;

        self.step.attempts = locked.attempts + 1;
        self.step.in_process = true;
        self.step.last_attempted_at = Some(chrono::Utc::now().naive_utc());

        let event_name = match from {
            WorkflowStepState::Error => lifecycle::STEP_RETRY_REQUESTED,
            _ => lifecycle::STEP_EXECUTION_REQUESTED,
        };
        self.publish(event_name, Some(self.step.attempts), None).await;

        debug!(
            workflow_step_uuid = %step_uuid,
            attempt = self.step.attempts,
            from = %from,
            "Step claimed for execution"
        );
        Ok(WorkflowStepState::InProgress)
    }

    /// Persist a successful attempt: results, `processed`, and the
    /// transition in one transaction, then `step.completed`
    async fn complete(
        &mut self,
        results: Option<serde_json::Value>,
    ) -> Result<WorkflowStepState, StateMachineError> {
        let step_uuid = self.step.workflow_step_uuid;
        let started_at = self.step.last_attempted_at;

        let mut tx = self
            .context
            .database_pool()
            .begin()
            .await
            .map_err(StateMachineError::Database)?;

        let locked = self.lock_step(&mut tx).await?;
        let from = self.locked_state(&mut tx).await?;
        self.validate_edge(from, WorkflowStepState::Complete)?;
        if !locked.in_process {
            return Err(StateMachineError::GuardFailed {
                reason: format!("step {step_uuid} completion without an owned claim"),
            });
        }

        WorkflowStep::mark_processed_in(&mut tx, step_uuid, results.clone())
            .await
            .map_err(|e| StateMachineError::Database(unwrap_tasker_db_error(e)))?;

        WorkflowStepTransition::create_in(
            &mut tx,
            NewWorkflowStepTransition {
                workflow_step_uuid: step_uuid,
                to_state: WorkflowStepState::Complete.to_string(),
                from_state: from.map(|s| s.to_string()),
                metadata: Some(serde_json::json!({
                    "processor_uuid": self.context.processor_uuid(),
                })),
            },
        )
        .await
        .map_err(|e| StateMachineError::Database(unwrap_tasker_db_error(e)))?;

        tx.commit().await.map_err(StateMachineError::Database)?;

        self.step.processed = true;
        self.step.in_process = false;
        self.step.results = results;

        let mut builder = EventPayloadBuilder::new(self.step.task_uuid)
            .for_step(step_uuid, self.payload_step_name())
            .attempt_number(self.step.attempts)
            .completed_at(chrono::Utc::now().naive_utc());
        if let Some(started) = started_at {
            builder = builder.started_at(started);
        }
        let _ = self
            .context
            .event_publisher()
            .publish(lifecycle::STEP_COMPLETED, builder.build())
            .await;

        Ok(WorkflowStepState::Complete)
    }

    /// Record a failed attempt with its error context and backoff, then
    /// `step.failed` (and `step.max_retries_reached` on exhaustion)
    pub async fn fail_with(
        &mut self,
        failure: StepFailure,
    ) -> Result<WorkflowStepState, StateMachineError> {
        let step_uuid = self.step.workflow_step_uuid;
        let started_at = self.step.last_attempted_at;

        let mut tx = self
            .context
            .database_pool()
            .begin()
            .await
            .map_err(StateMachineError::Database)?;

        let locked = self.lock_step(&mut tx).await?;
        let from = self.locked_state(&mut tx).await?;
        self.validate_edge(from, WorkflowStepState::Error)?;

        WorkflowStep::record_failure_in(
            &mut tx,
            step_uuid,
            failure.error_results.clone(),
            failure.backoff_request_seconds,
            failure.exhausted,
        )
        .await
        .map_err(|e| StateMachineError::Database(unwrap_tasker_db_error(e)))?;

        WorkflowStepTransition::create_in(
            &mut tx,
            NewWorkflowStepTransition {
                workflow_step_uuid: step_uuid,
                to_state: WorkflowStepState::Error.to_string(),
                from_state: from.map(|s| s.to_string()),
                metadata: Some(serde_json::json!({
                    "processor_uuid": self.context.processor_uuid(),
                    "error_message": failure.message,
                    "backoff_request_seconds": failure.backoff_request_seconds,
                })),
            },
        )
        .await
        .map_err(|e| StateMachineError::Database(unwrap_tasker_db_error(e)))?;

        tx.commit().await.map_err(StateMachineError::Database)?;

        let attempts = if failure.exhausted {
            locked.retry_limit
        } else {
            locked.attempts
        };
        self.step.attempts = attempts;
        self.step.in_process = false;
        self.step.backoff_request_seconds = failure.backoff_request_seconds;

        let mut builder = EventPayloadBuilder::new(self.step.task_uuid)
            .for_step(step_uuid, self.payload_step_name())
            .attempt_number(attempts)
            .completed_at(chrono::Utc::now().naive_utc())
            .with_error(
                failure.message.clone(),
                failure.exception_class.clone(),
                None,
            );
        if let Some(started) = started_at {
            builder = builder.started_at(started);
        }
        let payload = builder.build();

        let _ = self
            .context
            .event_publisher()
            .publish(lifecycle::STEP_FAILED, payload.clone())
            .await;
        if attempts >= locked.retry_limit || !locked.retryable {
            let _ = self
                .context
                .event_publisher()
                .publish(lifecycle::STEP_MAX_RETRIES_REACHED, payload)
                .await;
        }

        Ok(WorkflowStepState::Error)
    }

    async fn cancel(&mut self) -> Result<WorkflowStepState, StateMachineError> {
        let step_uuid = self.step.workflow_step_uuid;
        let mut tx = self
            .context
            .database_pool()
            .begin()
            .await
            .map_err(StateMachineError::Database)?;

        self.lock_step(&mut tx).await?;
        let from = self.locked_state(&mut tx).await?;
        self.validate_edge(from, WorkflowStepState::Cancelled)?;

        sqlx::query(
            "UPDATE tasker.workflow_steps SET in_process = FALSE, updated_at = NOW() WHERE workflow_step_uuid = $1",
        )
        .bind(step_uuid)
        .execute(&mut *tx)
        .await
        .map_err(StateMachineError::Database)?;

        WorkflowStepTransition::create_in(
            &mut tx,
            NewWorkflowStepTransition {
                workflow_step_uuid: step_uuid,
                to_state: WorkflowStepState::Cancelled.to_string(),
                from_state: from.map(|s| s.to_string()),
                metadata: None,
            },
        )
        .await
        .map_err(|e| StateMachineError::Database(unwrap_tasker_db_error(e)))?;

        tx.commit().await.map_err(StateMachineError::Database)?;

        self.step.in_process = false;
        self.publish(lifecycle::STEP_CANCELLED, None, None).await;
        Ok(WorkflowStepState::Cancelled)
    }

    async fn resolve_manually(
        &mut self,
        results: Option<serde_json::Value>,
    ) -> Result<WorkflowStepState, StateMachineError> {
        let step_uuid = self.step.workflow_step_uuid;
        let mut tx = self
            .context
            .database_pool()
            .begin()
            .await
            .map_err(StateMachineError::Database)?;

        self.lock_step(&mut tx).await?;
        let from = self.locked_state(&mut tx).await?;
        self.validate_edge(from, WorkflowStepState::ResolvedManually)?;

        WorkflowStep::mark_processed_in(&mut tx, step_uuid, results.clone())
            .await
            .map_err(|e| StateMachineError::Database(unwrap_tasker_db_error(e)))?;

        WorkflowStepTransition::create_in(
            &mut tx,
            NewWorkflowStepTransition {
                workflow_step_uuid: step_uuid,
                to_state: WorkflowStepState::ResolvedManually.to_string(),
                from_state: from.map(|s| s.to_string()),
                metadata: None,
            },
        )
        .await
        .map_err(|e| StateMachineError::Database(unwrap_tasker_db_error(e)))?;

        tx.commit().await.map_err(StateMachineError::Database)?;

        self.step.processed = true;
        self.step.in_process = false;
        self.step.results = results;
        self.publish(lifecycle::STEP_RESOLVED_MANUALLY, None, None).await;
        Ok(WorkflowStepState::ResolvedManually)
    }

    async fn lock_step(
        &self,
        tx: &mut sqlx::PgConnection,
    ) -> Result<WorkflowStep, StateMachineError> {
        let locked: Option<WorkflowStep> = sqlx::query_as(
            "SELECT * FROM tasker.workflow_steps WHERE workflow_step_uuid = $1 FOR UPDATE",
        )
        .bind(self.step.workflow_step_uuid)
        .fetch_optional(tx)
        .await
        .map_err(StateMachineError::Database)?;
        locked.ok_or_else(|| StateMachineError::GuardFailed {
            reason: format!("step {} no longer exists", self.step.workflow_step_uuid),
        })
    }

    async fn locked_state(
        &self,
        tx: &mut sqlx::PgConnection,
    ) -> Result<Option<WorkflowStepState>, StateMachineError> {
        let to_state: Option<String> = sqlx::query_scalar(
            "SELECT to_state FROM tasker.workflow_step_transitions WHERE workflow_step_uuid = $1 AND most_recent",
        )
        .bind(self.step.workflow_step_uuid)
        .fetch_optional(tx)
        .await
        .map_err(StateMachineError::Database)?;
        to_state
            .map(|s| {
                WorkflowStepState::from_str(&s)
                    .map_err(|reason| StateMachineError::GuardFailed { reason })
            })
            .transpose()
    }

    fn validate_edge(
        &self,
        from: Option<WorkflowStepState>,
        to: WorkflowStepState,
    ) -> Result<(), StateMachineError> {
        if !step_transition_allowed(from, to) {
            return Err(StateMachineError::InvalidTransition {
                entity: "workflow_step",
                from: from.map_or_else(|| "none".to_string(), |s| s.to_string()),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    async fn with_conflict_retries<F>(&self, mut op: F) -> Result<(), StateMachineError>
    where
        F: for<'a> FnMut(
            &'a Self,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), sqlx::Error>> + Send + 'a>,
        >,
    {
        let mut last_error = None;
        for attempt in 0..STORAGE_CONFLICT_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(STORAGE_CONFLICT_BACKOFF * attempt).await;
            }
            match op(self).await {
                Ok(()) => return Ok(()),
                Err(error) if is_unique_violation(&error) => last_error = Some(error),
                Err(error) => return Err(StateMachineError::Database(error)),
            }
        }
        Err(StateMachineError::Database(last_error.expect(
            "conflict loop exits early unless an error was recorded",
        )))
    }

    async fn publish(
        &self,
        event_name: &str,
        attempt: Option<i32>,
        error_message: Option<String>,
    ) {
        let mut builder = EventPayloadBuilder::new(self.step.task_uuid)
            .for_step(self.step.workflow_step_uuid, self.payload_step_name());
        if let Some(attempt) = attempt {
            builder = builder.attempt_number(attempt);
        }
        if let Some(message) = error_message {
            builder = builder.with_error(message, None, None);
        }
        let _ = self
            .context
            .event_publisher()
            .publish(event_name, builder.build())
            .await;
    }
}
