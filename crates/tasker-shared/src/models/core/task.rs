//! # Task
//!
//! A task is an instance of a named workflow template. Its `context` is
//! immutable after creation; `complete` is a boolean cache of terminal
//! state maintained by the finalizer.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::TaskerResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub task_uuid: Uuid,
    pub named_task_uuid: Uuid,
    pub complete: bool,
    pub requested_at: NaiveDateTime,
    pub initiator: Option<String>,
    pub source_system: Option<String>,
    pub reason: Option<String>,
    pub tags: Option<serde_json::Value>,
    pub context: Option<serde_json::Value>,
    pub identity_hash: String,
    pub correlation_id: Uuid,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Insertable form of [`Task`]
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_uuid: Uuid,
    pub named_task_uuid: Uuid,
    pub requested_at: NaiveDateTime,
    pub initiator: Option<String>,
    pub source_system: Option<String>,
    pub reason: Option<String>,
    pub tags: Option<serde_json::Value>,
    pub context: Option<serde_json::Value>,
    pub identity_hash: String,
    pub correlation_id: Uuid,
}

impl Task {
    /// Insert a new task inside an open transaction
    pub async fn create_in(conn: &mut PgConnection, new: NewTask) -> TaskerResult<Task> {
        let task = sqlx::query_as::<_, Task>(
            r"
            INSERT INTO tasker.tasks
                (task_uuid, named_task_uuid, complete, requested_at, initiator,
                 source_system, reason, tags, context, identity_hash, correlation_id)
            VALUES ($1, $2, FALSE, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            ",
        )
        .bind(new.task_uuid)
        .bind(new.named_task_uuid)
        .bind(new.requested_at)
        .bind(new.initiator)
        .bind(new.source_system)
        .bind(new.reason)
        .bind(new.tags)
        .bind(new.context)
        .bind(new.identity_hash)
        .bind(new.correlation_id)
        .fetch_one(conn)
        .await?;

        Ok(task)
    }

    pub async fn find_by_id(pool: &PgPool, task_uuid: Uuid) -> TaskerResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasker.tasks WHERE task_uuid = $1")
            .bind(task_uuid)
            .fetch_optional(pool)
            .await?;
        Ok(task)
    }

    /// Most recent task carrying the given identity hash requested within
    /// the last `window_seconds`. Used for creation-time deduplication.
    pub async fn find_by_identity_hash_within(
        pool: &PgPool,
        identity_hash: &str,
        window_seconds: u64,
    ) -> TaskerResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r"
            SELECT * FROM tasker.tasks
            WHERE identity_hash = $1
              AND requested_at >= NOW() - make_interval(secs => $2)
            ORDER BY requested_at DESC
            LIMIT 1
            ",
        )
        .bind(identity_hash)
        .bind(window_seconds as f64)
        .fetch_optional(pool)
        .await?;
        Ok(task)
    }

    /// List tasks, newest first
    pub async fn list_recent(pool: &PgPool, limit: i64) -> TaskerResult<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasker.tasks ORDER BY requested_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(tasks)
    }

    /// Set the terminal-state cache flag. Called by the finalizer in the
    /// same transaction as the terminal transition.
    pub async fn mark_complete_in(conn: &mut PgConnection, task_uuid: Uuid) -> TaskerResult<()> {
        sqlx::query(
            "UPDATE tasker.tasks SET complete = TRUE, updated_at = NOW() WHERE task_uuid = $1",
        )
        .bind(task_uuid)
        .execute(conn)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_serde_round_trip() {
        let task = Task {
            task_uuid: Uuid::now_v7(),
            named_task_uuid: Uuid::now_v7(),
            complete: false,
            requested_at: chrono::Utc::now().naive_utc(),
            initiator: Some("api".to_string()),
            source_system: None,
            reason: None,
            tags: Some(serde_json::json!(["billing"])),
            context: Some(serde_json::json!({"order_id": 42})),
            identity_hash: "a".repeat(64),
            correlation_id: Uuid::new_v4(),
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        };

        let value = serde_json::to_value(&task).unwrap();
        let parsed: Task = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.task_uuid, task.task_uuid);
        assert_eq!(parsed.context, task.context);
    }
}
