//! # Task Transition
//!
//! Append-only transition log for tasks. Exactly one row per task carries
//! `most_recent = TRUE`; writes demote the prior row and insert the new
//! one in a single transaction. `current_state` is never computed by
//! scanning, only by reading the most-recent row.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::TaskerResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskTransition {
    pub task_transition_uuid: Uuid,
    pub task_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub sort_key: i32,
    pub most_recent: bool,
    pub created_at: NaiveDateTime,
}

/// Insertable form of [`TaskTransition`]
#[derive(Debug, Clone)]
pub struct NewTaskTransition {
    pub task_uuid: Uuid,
    pub to_state: String,
    pub from_state: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl TaskTransition {
    /// Demote the prior most-recent row and insert the new one. The
    /// UPDATE takes a row lock on the prior head, serializing concurrent
    /// writers; the partial unique index catches anything that slips
    /// through as a storage conflict.
    pub async fn create_in(
        conn: &mut PgConnection,
        new: NewTaskTransition,
    ) -> TaskerResult<TaskTransition> {
        sqlx::query(
            "UPDATE tasker.task_transitions SET most_recent = FALSE WHERE task_uuid = $1 AND most_recent",
        )
        .bind(new.task_uuid)
        .execute(&mut *conn)
        .await?;

        let transition = sqlx::query_as::<_, TaskTransition>(
            r"
            INSERT INTO tasker.task_transitions
                (task_transition_uuid, task_uuid, to_state, from_state, metadata,
                 sort_key, most_recent)
            VALUES ($1, $2, $3, $4, $5,
                    (SELECT COALESCE(MAX(sort_key), 0) + 1
                     FROM tasker.task_transitions WHERE task_uuid = $2),
                    TRUE)
            RETURNING *
            ",
        )
        .bind(Uuid::now_v7())
        .bind(new.task_uuid)
        .bind(new.to_state)
        .bind(new.from_state)
        .bind(new.metadata)
        .fetch_one(conn)
        .await?;

        Ok(transition)
    }

    /// Transactional wrapper around [`TaskTransition::create_in`]
    pub async fn create(pool: &PgPool, new: NewTaskTransition) -> TaskerResult<TaskTransition> {
        let mut tx = pool.begin().await?;
        let transition = Self::create_in(&mut tx, new).await?;
        tx.commit().await?;
        Ok(transition)
    }

    /// The most-recent transition row, if any
    pub async fn get_current(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Option<Self>> {
        let transition = sqlx::query_as::<_, TaskTransition>(
            "SELECT * FROM tasker.task_transitions WHERE task_uuid = $1 AND most_recent",
        )
        .bind(task_uuid)
        .fetch_optional(pool)
        .await?;
        Ok(transition)
    }

    /// Full transition history, oldest first
    pub async fn list_by_task(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Vec<Self>> {
        let transitions = sqlx::query_as::<_, TaskTransition>(
            "SELECT * FROM tasker.task_transitions WHERE task_uuid = $1 ORDER BY sort_key",
        )
        .bind(task_uuid)
        .fetch_all(pool)
        .await?;
        Ok(transitions)
    }
}
