//! # Workflow Step
//!
//! A single unit of work in a task, with its own state machine and retry
//! budget. `processed = true` iff the step's current state is in the
//! completion set; `results` is written only by the step's own execution
//! or by manual resolution.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::TaskerResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowStep {
    pub workflow_step_uuid: Uuid,
    pub task_uuid: Uuid,
    pub named_step_uuid: Uuid,
    pub retryable: bool,
    pub retry_limit: i32,
    pub attempts: i32,
    pub in_process: bool,
    pub processed: bool,
    pub processed_at: Option<NaiveDateTime>,
    pub last_attempted_at: Option<NaiveDateTime>,
    pub backoff_request_seconds: Option<i32>,
    pub inputs: Option<serde_json::Value>,
    pub results: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Insertable form of [`WorkflowStep`]
#[derive(Debug, Clone)]
pub struct NewWorkflowStep {
    pub workflow_step_uuid: Uuid,
    pub task_uuid: Uuid,
    pub named_step_uuid: Uuid,
    pub retryable: bool,
    pub retry_limit: i32,
    pub inputs: Option<serde_json::Value>,
}

impl WorkflowStep {
    pub async fn create_in(conn: &mut PgConnection, new: NewWorkflowStep) -> TaskerResult<Self> {
        let step = sqlx::query_as::<_, WorkflowStep>(
            r"
            INSERT INTO tasker.workflow_steps
                (workflow_step_uuid, task_uuid, named_step_uuid, retryable,
                 retry_limit, inputs)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            ",
        )
        .bind(new.workflow_step_uuid)
        .bind(new.task_uuid)
        .bind(new.named_step_uuid)
        .bind(new.retryable)
        .bind(new.retry_limit)
        .bind(new.inputs)
        .fetch_one(conn)
        .await?;

        Ok(step)
    }

    pub async fn find_by_id(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
    ) -> TaskerResult<Option<Self>> {
        let step = sqlx::query_as::<_, WorkflowStep>(
            "SELECT * FROM tasker.workflow_steps WHERE workflow_step_uuid = $1",
        )
        .bind(workflow_step_uuid)
        .fetch_optional(pool)
        .await?;
        Ok(step)
    }

    /// Find a task's step by its named-step name
    pub async fn find_step_by_name(
        pool: &PgPool,
        task_uuid: Uuid,
        name: &str,
    ) -> TaskerResult<Option<Self>> {
        let step = sqlx::query_as::<_, WorkflowStep>(
            r"
            SELECT ws.* FROM tasker.workflow_steps ws
            JOIN tasker.named_steps ns ON ns.named_step_uuid = ws.named_step_uuid
            WHERE ws.task_uuid = $1 AND ns.name = $2
            ",
        )
        .bind(task_uuid)
        .bind(name)
        .fetch_optional(pool)
        .await?;
        Ok(step)
    }

    pub async fn list_by_task(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Vec<Self>> {
        let steps = sqlx::query_as::<_, WorkflowStep>(
            "SELECT * FROM tasker.workflow_steps WHERE task_uuid = $1 ORDER BY created_at",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await?;
        Ok(steps)
    }

    /// Completed steps of a task keyed by name, for sequence construction
    pub async fn list_completed_by_task(
        pool: &PgPool,
        task_uuid: Uuid,
    ) -> TaskerResult<Vec<(String, Self)>> {
        let rows = sqlx::query_as::<_, NamedWorkflowStepRow>(
            r"
            SELECT ns.name AS step_name, ws.*
            FROM tasker.workflow_steps ws
            JOIN tasker.named_steps ns ON ns.named_step_uuid = ws.named_step_uuid
            JOIN tasker.workflow_step_transitions wst
                ON wst.workflow_step_uuid = ws.workflow_step_uuid AND wst.most_recent
            WHERE ws.task_uuid = $1
              AND wst.to_state IN ('complete', 'resolved_manually')
            ",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.step_name, r.step)).collect())
    }

    /// Persist a successful attempt: results written exactly once, the
    /// step marked processed and released. Runs inside the caller's
    /// write-back transaction alongside the state transition.
    pub async fn mark_processed_in(
        conn: &mut PgConnection,
        workflow_step_uuid: Uuid,
        results: Option<serde_json::Value>,
    ) -> TaskerResult<()> {
        sqlx::query(
            r"
            UPDATE tasker.workflow_steps
            SET results = $2,
                processed = TRUE,
                in_process = FALSE,
                processed_at = NOW(),
                updated_at = NOW()
            WHERE workflow_step_uuid = $1
            ",
        )
        .bind(workflow_step_uuid)
        .bind(results)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Record a failed attempt. `backoff_request_seconds` carries a
    /// server-requested delay; `force_exhausted` sets `attempts` to the
    /// retry limit (permanent errors).
    pub async fn record_failure_in(
        conn: &mut PgConnection,
        workflow_step_uuid: Uuid,
        results: Option<serde_json::Value>,
        backoff_request_seconds: Option<i32>,
        force_exhausted: bool,
    ) -> TaskerResult<()> {
        sqlx::query(
            r"
            UPDATE tasker.workflow_steps
            SET results = COALESCE($2, results),
                backoff_request_seconds = $3,
                attempts = CASE WHEN $4 THEN retry_limit ELSE attempts END,
                in_process = FALSE,
                updated_at = NOW()
            WHERE workflow_step_uuid = $1
            ",
        )
        .bind(workflow_step_uuid)
        .bind(results)
        .bind(backoff_request_seconds)
        .bind(force_exhausted)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Convenience wrapper used by tests and manual resolution
    pub async fn mark_processed(
        &mut self,
        pool: &PgPool,
        results: Option<serde_json::Value>,
    ) -> TaskerResult<()> {
        let mut tx = pool.begin().await?;
        Self::mark_processed_in(&mut tx, self.workflow_step_uuid, results.clone()).await?;
        tx.commit().await?;
        self.processed = true;
        self.in_process = false;
        self.results = results;
        Ok(())
    }
}

/// Helper row pairing a step with its named-step name
#[derive(Debug, sqlx::FromRow)]
struct NamedWorkflowStepRow {
    step_name: String,
    #[sqlx(flatten)]
    step: WorkflowStep,
}
