//! # Workflow Step Edge
//!
//! A parent → child dependency between two steps of the same task. The
//! edge set per task is acyclic; insertion rejects edges that would close
//! a cycle.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::{TaskerError, TaskerResult};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WorkflowStepEdge {
    pub workflow_step_edge_uuid: Uuid,
    pub from_step_uuid: Uuid,
    pub to_step_uuid: Uuid,
    pub name: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl WorkflowStepEdge {
    /// Insert an edge after verifying it does not close a cycle. The
    /// reachability check and the insert run on the same connection so a
    /// surrounding transaction sees a consistent edge set.
    pub async fn create_in(
        conn: &mut PgConnection,
        from_step_uuid: Uuid,
        to_step_uuid: Uuid,
        name: Option<String>,
    ) -> TaskerResult<Self> {
        if from_step_uuid == to_step_uuid {
            return Err(TaskerError::ValidationError(format!(
                "edge would create self-loop on step {from_step_uuid}"
            )));
        }

        let would_cycle: bool = sqlx::query_scalar(
            r"
            WITH RECURSIVE reachable AS (
                SELECT e.to_step_uuid
                FROM tasker.workflow_step_edges e
                WHERE e.from_step_uuid = $1
                UNION
                SELECT e.to_step_uuid
                FROM tasker.workflow_step_edges e
                JOIN reachable r ON e.from_step_uuid = r.to_step_uuid
            )
            SELECT EXISTS (SELECT 1 FROM reachable WHERE to_step_uuid = $2)
            ",
        )
        .bind(to_step_uuid)
        .bind(from_step_uuid)
        .fetch_one(&mut *conn)
        .await?;

        if would_cycle {
            return Err(TaskerError::ValidationError(format!(
                "edge {from_step_uuid} -> {to_step_uuid} would create a cycle"
            )));
        }

        let edge = sqlx::query_as::<_, WorkflowStepEdge>(
            r"
            INSERT INTO tasker.workflow_step_edges
                (workflow_step_edge_uuid, from_step_uuid, to_step_uuid, name)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(Uuid::now_v7())
        .bind(from_step_uuid)
        .bind(to_step_uuid)
        .bind(name)
        .fetch_one(conn)
        .await?;

        Ok(edge)
    }

    /// All edges among a task's steps
    pub async fn list_by_task(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Vec<Self>> {
        let edges = sqlx::query_as::<_, WorkflowStepEdge>(
            r"
            SELECT e.* FROM tasker.workflow_step_edges e
            JOIN tasker.workflow_steps ws ON ws.workflow_step_uuid = e.from_step_uuid
            WHERE ws.task_uuid = $1
            ",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await?;
        Ok(edges)
    }

    /// Parent step uuids of a step
    pub async fn parents_of(pool: &PgPool, to_step_uuid: Uuid) -> TaskerResult<Vec<Uuid>> {
        let parents = sqlx::query_scalar(
            "SELECT from_step_uuid FROM tasker.workflow_step_edges WHERE to_step_uuid = $1",
        )
        .bind(to_step_uuid)
        .fetch_all(pool)
        .await?;
        Ok(parents)
    }
}
