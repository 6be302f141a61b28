//! # System Context
//!
//! The shared handle every component receives: the database pool, the
//! loaded configuration, and the in-process event publisher. Passed
//! explicitly through the call chain instead of living in a global.

use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TaskerConfig;
use crate::errors::TaskerResult;
use crate::events::EventPublisher;

#[derive(Debug, Clone)]
pub struct SystemContext {
    database_pool: PgPool,
    config: Arc<TaskerConfig>,
    event_publisher: Arc<EventPublisher>,
    /// Identifies this coordinator process in logs and claim metadata
    processor_uuid: Uuid,
}

impl SystemContext {
    /// Construct with an existing pool and default configuration
    pub async fn with_pool(pool: PgPool) -> TaskerResult<Self> {
        Ok(Self::new(pool, Arc::new(TaskerConfig::default())))
    }

    pub fn new(pool: PgPool, config: Arc<TaskerConfig>) -> Self {
        Self {
            database_pool: pool,
            config,
            event_publisher: Arc::new(EventPublisher::new()),
            processor_uuid: Uuid::new_v4(),
        }
    }

    pub fn database_pool(&self) -> &PgPool {
        &self.database_pool
    }

    pub fn config(&self) -> &TaskerConfig {
        &self.config
    }

    pub fn event_publisher(&self) -> &Arc<EventPublisher> {
        &self.event_publisher
    }

    pub fn processor_uuid(&self) -> Uuid {
        self.processor_uuid
    }
}
