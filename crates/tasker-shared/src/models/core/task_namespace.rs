//! Task namespace catalog entity.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::TaskerResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskNamespace {
    pub task_namespace_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl TaskNamespace {
    pub async fn find_or_create(pool: &PgPool, name: &str) -> TaskerResult<Self> {
        let namespace = sqlx::query_as::<_, TaskNamespace>(
            r"
            INSERT INTO tasker.task_namespaces (name)
            VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(name)
        .fetch_one(pool)
        .await?;
        Ok(namespace)
    }

    pub async fn find_by_name(pool: &PgPool, name: &str) -> TaskerResult<Option<Self>> {
        let namespace = sqlx::query_as::<_, TaskNamespace>(
            "SELECT * FROM tasker.task_namespaces WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(pool)
        .await?;
        Ok(namespace)
    }

    pub async fn list_all(pool: &PgPool) -> TaskerResult<Vec<Self>> {
        let namespaces = sqlx::query_as::<_, TaskNamespace>(
            "SELECT * FROM tasker.task_namespaces ORDER BY name",
        )
        .fetch_all(pool)
        .await?;
        Ok(namespaces)
    }
}
