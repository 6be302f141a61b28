//! # Viable Step Discovery
//!
//! Finds the steps of a task that may execute now, using the
//! SQL-backed readiness predicate, and assembles the sequence view a
//! handler receives.

use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use tasker_shared::database::SqlFunctionExecutor;
use tasker_shared::errors::OrchestrationResult;
use tasker_shared::models::orchestration::{StepReadinessStatus, TaskExecutionContext};
use tasker_shared::models::WorkflowStep;
use tasker_shared::system_context::SystemContext;
use tasker_worker::StepSequence;

#[derive(Debug, Clone)]
pub struct ViableStepDiscovery {
    context: Arc<SystemContext>,
    sql_executor: SqlFunctionExecutor,
}

impl ViableStepDiscovery {
    pub fn new(context: Arc<SystemContext>) -> Self {
        let sql_executor = SqlFunctionExecutor::new(context.database_pool().clone());
        Self {
            context,
            sql_executor,
        }
    }

    /// Steps with `ready_for_execution = true`, in readiness order
    pub async fn find_viable_steps(
        &self,
        task_uuid: Uuid,
    ) -> OrchestrationResult<Vec<StepReadinessStatus>> {
        let rows = self
            .sql_executor
            .get_step_readiness_status(task_uuid)
            .await
            .map_err(|e| tasker_shared::errors::OrchestrationError::DatabaseError {
                operation: "get_step_readiness_status".to_string(),
                reason: e.to_string(),
            })?;

        let viable: Vec<StepReadinessStatus> = rows
            .into_iter()
            .filter(|row| row.ready_for_execution)
            .collect();

        debug!(
            task_uuid = %task_uuid,
            viable_count = viable.len(),
            "Viable step discovery completed"
        );
        Ok(viable)
    }

    /// Full readiness rows, including blocked steps
    pub async fn readiness_status(
        &self,
        task_uuid: Uuid,
    ) -> OrchestrationResult<Vec<StepReadinessStatus>> {
        Ok(self
            .sql_executor
            .get_step_readiness_status(task_uuid)
            .await
            .map_err(|e| tasker_shared::errors::OrchestrationError::DatabaseError {
                operation: "get_step_readiness_status".to_string(),
                reason: e.to_string(),
            })?)
    }

    /// Aggregated execution context for the finalizer
    pub async fn get_execution_context(
        &self,
        task_uuid: Uuid,
    ) -> OrchestrationResult<Option<TaskExecutionContext>> {
        Ok(self
            .sql_executor
            .get_task_execution_context(task_uuid)
            .await
            .map_err(|e| tasker_shared::errors::OrchestrationError::DatabaseError {
                operation: "get_task_execution_context".to_string(),
                reason: e.to_string(),
            })?)
    }

    /// The sequence of prior completed steps, keyed by step name
    pub async fn build_sequence(&self, task_uuid: Uuid) -> OrchestrationResult<StepSequence> {
        let completed =
            WorkflowStep::list_completed_by_task(self.context.database_pool(), task_uuid)
                .await
                .map_err(|e| tasker_shared::errors::OrchestrationError::DatabaseError {
                    operation: "list_completed_by_task".to_string(),
                    reason: e.to_string(),
                })?;
        Ok(StepSequence::new(completed))
    }
}
