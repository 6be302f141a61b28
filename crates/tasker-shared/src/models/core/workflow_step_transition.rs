//! # Workflow Step Transition
//!
//! Append-only transition log for workflow steps, with the same
//! demote-prior/insert-new discipline as task transitions.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::TaskerResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowStepTransition {
    pub workflow_step_transition_uuid: Uuid,
    pub workflow_step_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub sort_key: i32,
    pub most_recent: bool,
    pub created_at: NaiveDateTime,
}

/// Insertable form of [`WorkflowStepTransition`]
#[derive(Debug, Clone)]
pub struct NewWorkflowStepTransition {
    pub workflow_step_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl WorkflowStepTransition {
    pub async fn create_in(
        conn: &mut PgConnection,
        new: NewWorkflowStepTransition,
    ) -> TaskerResult<WorkflowStepTransition> {
        sqlx::query(
            "UPDATE tasker.workflow_step_transitions SET most_recent = FALSE WHERE workflow_step_uuid = $1 AND most_recent",
        )
        .bind(new.workflow_step_uuid)
        .execute(&mut *conn)
        .await?;

        let transition = sqlx::query_as::<_, WorkflowStepTransition>(
            r"
            INSERT INTO tasker.workflow_step_transitions
                (workflow_step_transition_uuid, workflow_step_uuid, to_state,
                 from_state, metadata, sort_key, most_recent)
            VALUES ($1, $2, $3, $4, $5,
                    (SELECT COALESCE(MAX(sort_key), 0) + 1
                     FROM tasker.workflow_step_transitions
                     WHERE workflow_step_uuid = $2),
                    TRUE)
            RETURNING *
            ",
        )
        .bind(Uuid::now_v7())
        .bind(new.workflow_step_uuid)
        .bind(new.to_state)
        .bind(new.from_state)
        .bind(new.metadata)
        .fetch_one(conn)
        .await?;

        Ok(transition)
    }

    pub async fn create(
        pool: &PgPool,
        new: NewWorkflowStepTransition,
    ) -> TaskerResult<WorkflowStepTransition> {
        let mut tx = pool.begin().await?;
        let transition = Self::create_in(&mut tx, new).await?;
        tx.commit().await?;
        Ok(transition)
    }

    pub async fn get_current(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
    ) -> TaskerResult<Option<Self>> {
        let transition = sqlx::query_as::<_, WorkflowStepTransition>(
            "SELECT * FROM tasker.workflow_step_transitions WHERE workflow_step_uuid = $1 AND most_recent",
        )
        .bind(workflow_step_uuid)
        .fetch_optional(pool)
        .await?;
        Ok(transition)
    }

    pub async fn list_by_step(
        pool: &PgPool,
        workflow_step_uuid: Uuid,
    ) -> TaskerResult<Vec<Self>> {
        let transitions = sqlx::query_as::<_, WorkflowStepTransition>(
            "SELECT * FROM tasker.workflow_step_transitions WHERE workflow_step_uuid = $1 ORDER BY sort_key",
        )
        .bind(workflow_step_uuid)
        .fetch_all(pool)
        .await?;
        Ok(transitions)
    }
}
