//! Dependent system catalog entity. Named steps belong to the external
//! system they touch; `default` covers in-process work.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::TaskerResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DependentSystem {
    pub dependent_system_uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl DependentSystem {
    pub async fn find_or_create(pool: &PgPool, name: &str) -> TaskerResult<Self> {
        let system = sqlx::query_as::<_, DependentSystem>(
            r"
            INSERT INTO tasker.dependent_systems (name)
            VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET updated_at = NOW()
            RETURNING *
            ",
        )
        .bind(name)
        .fetch_one(pool)
        .await?;
        Ok(system)
    }
}
