//! Named step catalog entity.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::TaskerResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NamedStep {
    pub named_step_uuid: Uuid,
    pub dependent_system_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl NamedStep {
    pub async fn find_or_create_in(
        conn: &mut PgConnection,
        dependent_system_uuid: Uuid,
        name: &str,
    ) -> TaskerResult<Self> {
        let step = sqlx::query_as::<_, NamedStep>(
            r"
            INSERT INTO tasker.named_steps (dependent_system_uuid, name)
            VALUES ($1, $2)
            ON CONFLICT (dependent_system_uuid, name) DO UPDATE SET updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(dependent_system_uuid)
        .bind(name)
        .fetch_one(conn)
        .await?;
        Ok(step)
    }

    pub async fn find_by_id(pool: &PgPool, named_step_uuid: Uuid) -> TaskerResult<Option<Self>> {
        let step = sqlx::query_as::<_, NamedStep>(
            "SELECT * FROM tasker.named_steps WHERE named_step_uuid = $1",
        )
        .bind(named_step_uuid)
        .fetch_optional(pool)
        .await?;
        Ok(step)
    }
}
