//! # Step Executor
//!
//! Executes a batch of ready steps with bounded concurrency. Each step
//! is claimed through the row-locked state machine transition, the
//! handler runs outside any database transaction, and the outcome is
//! persisted in a short write-back transaction. Claim losses are
//! silently dropped from the batch; handler failures are classified
//! through the retryable/permanent taxonomy and never crash the worker.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use tasker_shared::errors::{OrchestrationError, OrchestrationResult, StateMachineError};
use tasker_shared::models::core::task_template::TaskTemplate;
use tasker_shared::models::orchestration::StepReadinessStatus;
use tasker_shared::models::{Task, WorkflowStep};
use tasker_shared::state_machine::step_state_machine::StepFailure;
use tasker_shared::state_machine::{StepEvent, StepStateMachine};
use tasker_shared::system_context::SystemContext;
use tasker_worker::registry::HandlerKey;
use tasker_worker::{HandlerRegistry, StepHandlerError, StepSequence};

use super::backoff::{BackoffCalculator, BackoffDecision};

/// What happened to one step of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed,
    ClaimLost,
}

/// Aggregate result of one batch pass
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub claim_lost: usize,
}

impl BatchOutcome {
    /// Whether this worker advanced the task at all
    pub fn made_progress(&self) -> bool {
        self.claimed > 0
    }
}

#[derive(Debug, Clone)]
pub struct StepExecutor {
    context: Arc<SystemContext>,
    handler_registry: Arc<HandlerRegistry>,
    backoff: BackoffCalculator,
}

impl StepExecutor {
    pub fn new(context: Arc<SystemContext>, handler_registry: Arc<HandlerRegistry>) -> Self {
        let backoff = BackoffCalculator::new(context.config().backoff.clone());
        Self {
            context,
            handler_registry,
            backoff,
        }
    }

    /// Execute up to `max_concurrent` steps of the batch in parallel.
    /// `sequence` is the completed-step view at discovery time; batch
    /// members never depend on each other, so it stays valid for the
    /// whole pass.
    #[instrument(skip_all, fields(task_uuid = %task.task_uuid, batch_size = batch.len()))]
    pub async fn execute_batch(
        &self,
        task: &Task,
        template: &TaskTemplate,
        sequence: &StepSequence,
        batch: Vec<StepReadinessStatus>,
        max_concurrent: usize,
        attempt_timeout: Duration,
    ) -> OrchestrationResult<BatchOutcome> {
        let outcomes: Vec<StepOutcome> = stream::iter(batch)
            .map(|ready| self.execute_single(task, template, sequence, ready, attempt_timeout))
            .buffer_unordered(max_concurrent.max(1))
            .collect()
            .await;

        let mut outcome = BatchOutcome::default();
        for step_outcome in outcomes {
            match step_outcome {
                StepOutcome::Completed => {
                    outcome.claimed += 1;
                    outcome.completed += 1;
                }
                StepOutcome::Failed => {
                    outcome.claimed += 1;
                    outcome.failed += 1;
                }
                StepOutcome::ClaimLost => outcome.claim_lost += 1,
            }
        }

        debug!(
            claimed = outcome.claimed,
            completed = outcome.completed,
            failed = outcome.failed,
            claim_lost = outcome.claim_lost,
            "Batch execution finished"
        );
        Ok(outcome)
    }

    /// Claim, execute, persist one step. Errors inside the attempt are
    /// recorded against the step, not returned; only infrastructure
    /// failures surface.
    async fn execute_single(
        &self,
        task: &Task,
        template: &TaskTemplate,
        sequence: &StepSequence,
        ready: StepReadinessStatus,
        attempt_timeout: Duration,
    ) -> StepOutcome {
        let step_uuid = ready.workflow_step_uuid;
        let step = match WorkflowStep::find_by_id(self.context.database_pool(), step_uuid).await {
            Ok(Some(step)) => step,
            Ok(None) => {
                warn!(workflow_step_uuid = %step_uuid, "Ready step vanished before claim");
                return StepOutcome::ClaimLost;
            }
            Err(error) => {
                warn!(workflow_step_uuid = %step_uuid, error = %error, "Step load failed");
                return StepOutcome::ClaimLost;
            }
        };

        let mut machine =
            StepStateMachine::new_named(step, ready.name.clone(), self.context.clone());

        // The claim: pending|error -> in_progress under a row lock. A
        // lost race is normal operation, not an error.
        match machine.transition(StepEvent::Start).await {
            Ok(_) => {}
            Err(StateMachineError::GuardFailed { reason }) => {
                debug!(workflow_step_uuid = %step_uuid, reason = %reason, "Claim dropped");
                return StepOutcome::ClaimLost;
            }
            Err(StateMachineError::InvalidTransition { .. }) => {
                return StepOutcome::ClaimLost;
            }
            Err(error) => {
                warn!(workflow_step_uuid = %step_uuid, error = %error, "Claim failed");
                return StepOutcome::ClaimLost;
            }
        }

        // Handler runs outside any transaction holding locks
        let handler_result = match self.resolve_handler(template, &ready.name) {
            Ok(handler) => {
                match tokio::time::timeout(
                    attempt_timeout,
                    handler.process(task, sequence, machine.step()),
                )
                .await
                {
                    Ok(Ok(output)) => {
                        match handler
                            .process_results(
                                machine.step(),
                                output,
                                machine.step().results.as_ref(),
                            )
                            .await
                        {
                            Ok(shaped) => Ok(shaped),
                            Err(error) => Err(error),
                        }
                    }
                    Ok(Err(error)) => Err(error),
                    Err(_elapsed) => Err(StepHandlerError::retryable(format!(
                        "timeout after {}s",
                        attempt_timeout.as_secs()
                    ))),
                }
            }
            // A step bound to a missing handler can never succeed
            Err(error) => Err(StepHandlerError::permanent_with_reason(
                error.to_string(),
                "handler_not_found",
            )),
        };

        match handler_result {
            Ok(results) => match machine.transition(StepEvent::Complete(Some(results))).await {
                Ok(_) => StepOutcome::Completed,
                Err(error) => {
                    warn!(
                        workflow_step_uuid = %step_uuid,
                        error = %error,
                        "Result persistence failed after successful attempt"
                    );
                    StepOutcome::Failed
                }
            },
            Err(handler_error) => {
                let failure = self.failure_from(&handler_error, machine.step());
                match machine.fail_with(failure).await {
                    Ok(_) => StepOutcome::Failed,
                    Err(error) => {
                        warn!(
                            workflow_step_uuid = %step_uuid,
                            error = %error,
                            "Failure persistence failed"
                        );
                        StepOutcome::Failed
                    }
                }
            }
        }
    }

    fn resolve_handler(
        &self,
        template: &TaskTemplate,
        step_name: &str,
    ) -> OrchestrationResult<Arc<dyn tasker_worker::StepHandler>> {
        let step_template = template
            .steps
            .iter()
            .find(|s| s.name == step_name)
            .ok_or_else(|| {
                OrchestrationError::General(format!(
                    "step '{step_name}' has no template in '{}'",
                    template.name
                ))
            })?;

        let key = HandlerKey::new(
            step_template.handler.namespace.clone(),
            step_template.handler.name.clone(),
            step_template.handler.version.clone(),
        );
        self.handler_registry.resolve(&key)
    }

    /// Map a handler error onto the persistence record: error results,
    /// server-requested backoff, and retry-budget exhaustion
    fn failure_from(&self, error: &StepHandlerError, step: &WorkflowStep) -> StepFailure {
        let (retry_after, reason, context, exhausted) = match error {
            StepHandlerError::Retryable {
                retry_after,
                context,
                ..
            } => (*retry_after, None, context.clone(), false),
            StepHandlerError::Permanent {
                reason, context, ..
            } => (None, reason.clone(), context.clone(), true),
        };

        let decision = self.backoff.decide(step.attempts, retry_after);
        let backoff_request_seconds = match decision {
            BackoffDecision::ServerRequested { delay_seconds } => Some(delay_seconds as i32),
            BackoffDecision::Exponential { .. } => None,
        };

        let error_results = serde_json::json!({
            "error": {
                "message": error.message(),
                "classification": error.classification(),
                "reason": reason,
                "context": context,
                "attempt": step.attempts,
            }
        });

        StepFailure {
            message: error.message().to_string(),
            exception_class: Some(
                match error {
                    StepHandlerError::Retryable { .. } => "RetryableError",
                    StepHandlerError::Permanent { .. } => "PermanentError",
                }
                .to_string(),
            ),
            error_results: Some(error_results),
            backoff_request_seconds,
            exhausted,
        }
    }
}
