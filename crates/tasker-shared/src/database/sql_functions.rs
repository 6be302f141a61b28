//! # SQL Function Executor
//!
//! Typed wrappers around the readiness and execution-context functions.
//! All readiness math lives in SQL so that every worker computes
//! eligibility against the same clock and the same committed state.

use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::TaskerResult;
use crate::models::orchestration::{StepReadinessStatus, TaskExecutionContext};

#[derive(Debug, Clone)]
pub struct SqlFunctionExecutor {
    pool: PgPool,
}

impl SqlFunctionExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Readiness rows for every step of one task
    pub async fn get_step_readiness_status(
        &self,
        task_uuid: Uuid,
    ) -> TaskerResult<Vec<StepReadinessStatus>> {
        let rows = sqlx::query_as::<_, StepReadinessStatus>(
            "SELECT * FROM tasker.get_step_readiness_status($1)",
        )
        .bind(task_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Batch form over an array of task uuids
    pub async fn get_step_readiness_status_batch(
        &self,
        task_uuids: &[Uuid],
    ) -> TaskerResult<Vec<StepReadinessStatus>> {
        let rows = sqlx::query_as::<_, StepReadinessStatus>(
            "SELECT * FROM tasker.get_step_readiness_status_batch($1)",
        )
        .bind(task_uuids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Aggregated execution context for one task; `None` when the task
    /// does not exist
    pub async fn get_task_execution_context(
        &self,
        task_uuid: Uuid,
    ) -> TaskerResult<Option<TaskExecutionContext>> {
        let context = sqlx::query_as::<_, TaskExecutionContext>(
            "SELECT * FROM tasker.get_task_execution_context($1)",
        )
        .bind(task_uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(context)
    }

    pub async fn get_task_execution_contexts_batch(
        &self,
        task_uuids: &[Uuid],
    ) -> TaskerResult<Vec<TaskExecutionContext>> {
        let contexts = sqlx::query_as::<_, TaskExecutionContext>(
            "SELECT * FROM tasker.get_task_execution_contexts_batch($1)",
        )
        .bind(task_uuids)
        .fetch_all(&self.pool)
        .await?;
        Ok(contexts)
    }
}
