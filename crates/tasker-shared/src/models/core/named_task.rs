//! # Named Task
//!
//! Template catalog entry for a workflow. Identity is the
//! `(namespace, name, version)` triple; `configuration` holds the
//! serialized step templates and `context_schema` the JSON Schema the
//! task context is validated against.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::TaskerResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NamedTask {
    pub named_task_uuid: Uuid,
    pub task_namespace_uuid: Uuid,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub context_schema: Option<serde_json::Value>,
    pub configuration: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NamedTask {
    /// Upsert a template row under its namespace
    pub async fn upsert(
        pool: &PgPool,
        task_namespace_uuid: Uuid,
        name: &str,
        version: &str,
        description: Option<&str>,
        context_schema: Option<&serde_json::Value>,
        configuration: Option<&serde_json::Value>,
    ) -> TaskerResult<Self> {
        let named_task = sqlx::query_as::<_, NamedTask>(
            r"
            INSERT INTO tasker.named_tasks
                (task_namespace_uuid, name, version, description, context_schema, configuration)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (task_namespace_uuid, name, version)
            DO UPDATE SET description = EXCLUDED.description,
                          context_schema = EXCLUDED.context_schema,
                          configuration = EXCLUDED.configuration,
                          updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(task_namespace_uuid)
        .bind(name)
        .bind(version)
        .bind(description)
        .bind(context_schema)
        .bind(configuration)
        .fetch_one(pool)
        .await?;
        Ok(named_task)
    }

    /// Resolve by the `(namespace, name, version)` identity triple
    pub async fn find_by_identity(
        pool: &PgPool,
        namespace: &str,
        name: &str,
        version: &str,
    ) -> TaskerResult<Option<Self>> {
        let named_task = sqlx::query_as::<_, NamedTask>(
            r"
            SELECT nt.* FROM tasker.named_tasks nt
            JOIN tasker.task_namespaces tn
                ON tn.task_namespace_uuid = nt.task_namespace_uuid
            WHERE tn.name = $1 AND nt.name = $2 AND nt.version = $3
            ",
        )
        .bind(namespace)
        .bind(name)
        .bind(version)
        .fetch_optional(pool)
        .await?;
        Ok(named_task)
    }

    pub async fn find_by_id(pool: &PgPool, named_task_uuid: Uuid) -> TaskerResult<Option<Self>> {
        let named_task =
            sqlx::query_as::<_, NamedTask>("SELECT * FROM tasker.named_tasks WHERE named_task_uuid = $1")
                .bind(named_task_uuid)
                .fetch_optional(pool)
                .await?;
        Ok(named_task)
    }

    pub async fn list_by_namespace(pool: &PgPool, namespace: &str) -> TaskerResult<Vec<Self>> {
        let named_tasks = sqlx::query_as::<_, NamedTask>(
            r"
            SELECT nt.* FROM tasker.named_tasks nt
            JOIN tasker.task_namespaces tn
                ON tn.task_namespace_uuid = nt.task_namespace_uuid
            WHERE tn.name = $1
            ORDER BY nt.name, nt.version
            ",
        )
        .bind(namespace)
        .fetch_all(pool)
        .await?;
        Ok(named_tasks)
    }
}
