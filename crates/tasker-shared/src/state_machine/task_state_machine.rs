//! # Task State Machine
//!
//! Drives a task through its transition table, persisting each change as
//! a demote-prior/insert-new pair in the transition log and firing the
//! mapped lifecycle event. Storage conflicts from racing writers are
//! retried a bounded number of times before surfacing.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::errors::StateMachineError;
use crate::events::payload::EventPayloadBuilder;
use crate::models::core::task::Task;
use crate::models::core::task_transition::{NewTaskTransition, TaskTransition};
use crate::state_machine::events::TaskEvent;
use crate::state_machine::states::TaskState;
use crate::state_machine::transitions::{task_lifecycle_event, task_transition_allowed};
use crate::system_context::SystemContext;

const STORAGE_CONFLICT_RETRIES: u32 = 3;
const STORAGE_CONFLICT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    task: Task,
    context: Arc<SystemContext>,
}

impl TaskStateMachine {
    pub fn new(task: Task, context: Arc<SystemContext>) -> Self {
        Self { task, context }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Current state from the transition log; `pending` before the first
    /// recorded transition
    pub async fn current_state(&self) -> Result<TaskState, StateMachineError> {
        Ok(self.current_state_row().await?.unwrap_or(TaskState::Pending))
    }

    async fn current_state_row(&self) -> Result<Option<TaskState>, StateMachineError> {
        let row = TaskTransition::get_current(self.context.database_pool(), self.task.task_uuid)
            .await
            .map_err(state_machine_db_error)?;
        row.map(|t| {
            TaskState::from_str(&t.to_state).map_err(|reason| StateMachineError::GuardFailed {
                reason,
            })
        })
        .transpose()
    }

    /// Apply an event: validate the edge, persist the transition, fire
    /// the lifecycle event. Returns the new state.
    ///
    /// The persist transaction re-reads the head row under a lock; a
    /// racing writer surfaces as a conflict and the edge is re-validated
    /// against the new state, so two coordinators advancing one task can
    /// never both record the same transition.
    pub async fn transition(&mut self, event: TaskEvent) -> Result<TaskState, StateMachineError> {
        let to = event.target_state();

        for attempt in 0..STORAGE_CONFLICT_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(STORAGE_CONFLICT_BACKOFF * attempt).await;
            }

            let from = self.current_state_row().await?;
            if !task_transition_allowed(from, to) {
                return Err(StateMachineError::InvalidTransition {
                    entity: "task",
                    from: from.map_or_else(|| "none".to_string(), |s| s.to_string()),
                    to: to.to_string(),
                });
            }

            match self.persist_transition(from, to, &event).await {
                Ok(()) => {
                    self.publish_lifecycle_event(from, to, &event).await;
                    debug!(
                        task_uuid = %self.task.task_uuid,
                        from = %from.map_or_else(|| "none".to_string(), |s| s.to_string()),
                        to = %to,
                        "Task transition recorded"
                    );
                    return Ok(to);
                }
                // Another writer advanced the log; re-read and retry
                Err(PersistError::Conflict) => continue,
                Err(PersistError::Db(error)) => return Err(StateMachineError::Database(error)),
            }
        }

        Err(StateMachineError::GuardFailed {
            reason: format!(
                "task {} transition to {to} lost {STORAGE_CONFLICT_RETRIES} storage conflicts",
                self.task.task_uuid
            ),
        })
    }

    async fn persist_transition(
        &self,
        from: Option<TaskState>,
        to: TaskState,
        event: &TaskEvent,
    ) -> Result<(), PersistError> {
        let mut tx = self
            .context
            .database_pool()
            .begin()
            .await
            .map_err(PersistError::Db)?;

        // Lock the head row and confirm nobody advanced the log since
        // our read
        let head: Option<String> = sqlx::query_scalar(
            "SELECT to_state FROM tasker.task_transitions WHERE task_uuid = $1 AND most_recent FOR UPDATE",
        )
        .bind(self.task.task_uuid)
        .fetch_optional(&mut *tx)
        .await
        .map_err(PersistError::Db)?;
        if head.as_deref() != from.map(|s| s.as_str()) {
            return Err(PersistError::Conflict);
        }

        TaskTransition::create_in(
            &mut tx,
            NewTaskTransition {
                task_uuid: self.task.task_uuid,
                to_state: to.to_string(),
                from_state: from.map(|s| s.to_string()),
                metadata: transition_metadata(event, self.context.processor_uuid()),
            },
        )
        .await
        .map_err(|e| {
            let db = unwrap_tasker_db_error(e);
            if is_unique_violation(&db) {
                PersistError::Conflict
            } else {
                PersistError::Db(db)
            }
        })?;

        if matches!(to, TaskState::Complete | TaskState::ResolvedManually) {
            Task::mark_complete_in(&mut tx, self.task.task_uuid)
                .await
                .map_err(|e| PersistError::Db(unwrap_tasker_db_error(e)))?;
        }

        tx.commit().await.map_err(PersistError::Db)
    }

    async fn publish_lifecycle_event(
        &self,
        from: Option<TaskState>,
        to: TaskState,
        event: &TaskEvent,
    ) {
        let Some(event_name) = task_lifecycle_event(from, to) else {
            return;
        };

        let mut builder = EventPayloadBuilder::new(self.task.task_uuid)
            .completed_at(chrono::Utc::now().naive_utc());
        if let TaskEvent::Fail(message) = event {
            builder = builder.with_error(message.clone(), None, None);
        }

        // Event delivery failures are the publisher's concern; the
        // transition is already committed
        let _ = self
            .context
            .event_publisher()
            .publish(event_name, builder.build())
            .await;
    }
}

/// Outcome of one persist attempt
#[derive(Debug)]
enum PersistError {
    /// A racing writer advanced the log; re-validate and retry
    Conflict,
    Db(sqlx::Error),
}

fn transition_metadata(event: &TaskEvent, processor_uuid: uuid::Uuid) -> Option<serde_json::Value> {
    let mut metadata = serde_json::json!({ "processor_uuid": processor_uuid });
    if let TaskEvent::Fail(message) = event {
        metadata["error_message"] = serde_json::json!(message);
    }
    Some(metadata)
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

pub(crate) fn unwrap_tasker_db_error(error: crate::errors::TaskerError) -> sqlx::Error {
    match error {
        crate::errors::TaskerError::DatabaseError(db) => db,
        other => sqlx::Error::Protocol(other.to_string()),
    }
}

fn state_machine_db_error(error: crate::errors::TaskerError) -> StateMachineError {
    StateMachineError::Database(unwrap_tasker_db_error(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::named_task::NamedTask;
    use crate::models::core::task::NewTask;
    use crate::models::core::task_namespace::TaskNamespace;
    use sqlx::PgPool;
    use uuid::Uuid;

    async fn seed_task(pool: &PgPool) -> anyhow::Result<Task> {
        let namespace = TaskNamespace::find_or_create(pool, "task_sm_test").await?;
        let named_task = NamedTask::upsert(
            pool,
            namespace.task_namespace_uuid,
            "task_sm_template",
            "1.0.0",
            None,
            None,
            None,
        )
        .await?;

        let mut tx = pool.begin().await?;
        let task = Task::create_in(
            &mut tx,
            NewTask {
                task_uuid: Uuid::now_v7(),
                named_task_uuid: named_task.named_task_uuid,
                requested_at: chrono::Utc::now().naive_utc(),
                initiator: None,
                source_system: None,
                reason: None,
                tags: None,
                context: Some(serde_json::json!({})),
                identity_hash: format!("{:0>64}", "2"),
                correlation_id: Uuid::new_v4(),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(task)
    }

    #[sqlx::test(migrator = "crate::database::migrator::MIGRATOR")]
    async fn test_initialize_then_start(pool: PgPool) -> anyhow::Result<()> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let task = seed_task(&pool).await?;
        let mut machine = TaskStateMachine::new(task, context);

        assert_eq!(machine.current_state().await?, TaskState::Pending);

        machine.transition(TaskEvent::Initialize).await?;
        assert_eq!(machine.current_state().await?, TaskState::Pending);

        let state = machine.transition(TaskEvent::Start).await?;
        assert_eq!(state, TaskState::InProgress);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::migrator::MIGRATOR")]
    async fn test_double_initialize_rejected(pool: PgPool) -> anyhow::Result<()> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let task = seed_task(&pool).await?;
        let mut machine = TaskStateMachine::new(task, context);

        machine.transition(TaskEvent::Initialize).await?;
        let err = machine.transition(TaskEvent::Initialize).await.unwrap_err();
        assert!(matches!(err, StateMachineError::InvalidTransition { .. }));
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::migrator::MIGRATOR")]
    async fn test_complete_sets_complete_flag(pool: PgPool) -> anyhow::Result<()> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let task = seed_task(&pool).await?;
        let task_uuid = task.task_uuid;
        let mut machine = TaskStateMachine::new(task, context);

        machine.transition(TaskEvent::Initialize).await?;
        machine.transition(TaskEvent::Start).await?;
        machine.transition(TaskEvent::Complete).await?;

        let reloaded = Task::find_by_id(&pool, task_uuid).await?.unwrap();
        assert!(reloaded.complete);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::migrator::MIGRATOR")]
    async fn test_error_retry_round_trip(pool: PgPool) -> anyhow::Result<()> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let task = seed_task(&pool).await?;
        let task_uuid = task.task_uuid;
        let mut machine = TaskStateMachine::new(task, context);

        machine.transition(TaskEvent::Initialize).await?;
        machine.transition(TaskEvent::Start).await?;
        machine
            .transition(TaskEvent::Fail("step exhausted".to_string()))
            .await?;
        assert_eq!(machine.current_state().await?, TaskState::Error);

        machine.transition(TaskEvent::Retry).await?;
        assert_eq!(machine.current_state().await?, TaskState::InProgress);

        // Transition log is totally ordered with strictly increasing keys
        let transitions = TaskTransition::list_by_task(&pool, task_uuid).await?;
        let keys: Vec<i32> = transitions.iter().map(|t| t.sort_key).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(transitions.iter().filter(|t| t.most_recent).count(), 1);
        Ok(())
    }

    #[sqlx::test(migrator = "crate::database::migrator::MIGRATOR")]
    async fn test_cancel_from_terminal_rejected(pool: PgPool) -> anyhow::Result<()> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let task = seed_task(&pool).await?;
        let mut machine = TaskStateMachine::new(task, context);

        machine.transition(TaskEvent::Initialize).await?;
        machine.transition(TaskEvent::Cancel).await?;

        let err = machine.transition(TaskEvent::Start).await.unwrap_err();
        assert!(matches!(err, StateMachineError::InvalidTransition { .. }));
        Ok(())
    }
}
