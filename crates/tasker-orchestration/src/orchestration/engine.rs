//! # Engine Facade
//!
//! The library calls the external HTTP/GraphQL layers are built on:
//! create-and-enqueue, task and step retrieval, cancellation, registry
//! browsing, and health probes. Error kinds map onto transport status
//! codes at the layer above (validation, not-found, conflict,
//! internal).

use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use tasker_shared::errors::{TaskerError, TaskerResult};
use tasker_shared::models::{Task, TaskRequest, WorkflowStep, WorkflowStepEdge};
use tasker_shared::state_machine::{
    StepEvent, StepStateMachine, TaskEvent, TaskState, TaskStateMachine, WorkflowStepState,
};
use tasker_shared::system_context::SystemContext;
use tasker_worker::registry::HandlerKey;
use tasker_worker::HandlerRegistry;

use super::reenqueuer::{ReenqueueReason, Reenqueuer};
use super::task_initializer::{TaskInitializationResult, TaskInitializer};

/// Task detail with its dependency graph
#[derive(Debug, Clone)]
pub struct TaskDetail {
    pub task: Task,
    pub state: TaskState,
    pub steps: Vec<WorkflowStep>,
    pub edges: Vec<WorkflowStepEdge>,
}

/// Probe results for the health surface
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub database_reachable: bool,
    pub registered_handlers: usize,
}

#[derive(Debug)]
pub struct TaskerEngine {
    context: Arc<SystemContext>,
    initializer: TaskInitializer,
    handler_registry: Arc<HandlerRegistry>,
    reenqueuer: Arc<dyn Reenqueuer>,
}

impl TaskerEngine {
    pub fn new(
        context: Arc<SystemContext>,
        handler_registry: Arc<HandlerRegistry>,
        reenqueuer: Arc<dyn Reenqueuer>,
    ) -> Self {
        let initializer = TaskInitializer::new(context.clone());
        Self {
            context,
            initializer,
            handler_registry,
            reenqueuer,
        }
    }

    /// `POST /tasks`: create the task graph and schedule the first
    /// coordinator pass
    #[instrument(skip(self, request), fields(name = %request.name, namespace = %request.namespace))]
    pub async fn create_and_enqueue_task(
        &self,
        request: TaskRequest,
    ) -> TaskerResult<TaskInitializationResult> {
        let result = self.initializer.create_task_from_request(request).await?;
        if !result.deduplicated {
            self.reenqueuer
                .enqueue_at(
                    result.task_uuid,
                    chrono::Utc::now().naive_utc(),
                    ReenqueueReason::AwaitingWork,
                )
                .await
                .map_err(|e| TaskerError::OrchestrationError(e.to_string()))?;
        }
        Ok(result)
    }

    /// `GET /tasks/{id}`
    pub async fn get_task(&self, task_uuid: Uuid) -> TaskerResult<TaskDetail> {
        let pool = self.context.database_pool();
        let task = Task::find_by_id(pool, task_uuid)
            .await?
            .ok_or_else(|| TaskerError::NotFound(format!("task {task_uuid}")))?;

        let machine = TaskStateMachine::new(task.clone(), self.context.clone());
        let state = machine
            .current_state()
            .await
            .map_err(TaskerError::StateMachineError)?;

        let steps = WorkflowStep::list_by_task(pool, task_uuid).await?;
        let edges = WorkflowStepEdge::list_by_task(pool, task_uuid).await?;
        Ok(TaskDetail {
            task,
            state,
            steps,
            edges,
        })
    }

    /// `GET /tasks`
    pub async fn list_tasks(&self, limit: i64) -> TaskerResult<Vec<Task>> {
        Task::list_recent(self.context.database_pool(), limit).await
    }

    /// `DELETE /tasks/{id}`: cancel. Conflict on terminal tasks; pending
    /// steps are cancelled with the task, in-flight attempts drain and
    /// the coordinator stops at the next batch boundary.
    pub async fn cancel_task(&self, task_uuid: Uuid) -> TaskerResult<()> {
        let pool = self.context.database_pool();
        let task = Task::find_by_id(pool, task_uuid)
            .await?
            .ok_or_else(|| TaskerError::NotFound(format!("task {task_uuid}")))?;

        let mut machine = TaskStateMachine::new(task, self.context.clone());
        let state = machine
            .current_state()
            .await
            .map_err(TaskerError::StateMachineError)?;
        if state.is_terminal() || state == TaskState::Error {
            return Err(TaskerError::Conflict(format!(
                "task {task_uuid} is {state} and cannot be cancelled"
            )));
        }

        machine
            .transition(TaskEvent::Cancel)
            .await
            .map_err(TaskerError::StateMachineError)?;

        // Cancel steps that never started; claimed steps finish their
        // current attempt
        for step in WorkflowStep::list_by_task(pool, task_uuid).await? {
            let mut step_machine = StepStateMachine::new(step, self.context.clone());
            if let Ok(WorkflowStepState::Pending) = step_machine.current_state().await {
                let _ = step_machine.transition(StepEvent::Cancel).await;
            }
        }

        info!(task_uuid = %task_uuid, "Task cancelled");
        Ok(())
    }

    /// `GET /tasks/{id}/workflow_steps`
    pub async fn list_workflow_steps(&self, task_uuid: Uuid) -> TaskerResult<Vec<WorkflowStep>> {
        let pool = self.context.database_pool();
        Task::find_by_id(pool, task_uuid)
            .await?
            .ok_or_else(|| TaskerError::NotFound(format!("task {task_uuid}")))?;
        WorkflowStep::list_by_task(pool, task_uuid).await
    }

    /// `GET /tasks/{id}/workflow_steps/{step_id}`
    pub async fn get_workflow_step(
        &self,
        task_uuid: Uuid,
        workflow_step_uuid: Uuid,
    ) -> TaskerResult<WorkflowStep> {
        let step = WorkflowStep::find_by_id(self.context.database_pool(), workflow_step_uuid)
            .await?
            .filter(|step| step.task_uuid == task_uuid)
            .ok_or_else(|| {
                TaskerError::NotFound(format!("step {workflow_step_uuid} of task {task_uuid}"))
            })?;
        Ok(step)
    }

    /// Resolve a stuck step outside the engine. Which callers may do
    /// this is authorization policy, decided above the core.
    pub async fn resolve_step_manually(
        &self,
        task_uuid: Uuid,
        workflow_step_uuid: Uuid,
        results: Option<serde_json::Value>,
    ) -> TaskerResult<()> {
        let step = self.get_workflow_step(task_uuid, workflow_step_uuid).await?;
        let mut machine = StepStateMachine::new(step, self.context.clone());
        machine
            .transition(StepEvent::ResolveManually(results))
            .await
            .map_err(TaskerError::StateMachineError)?;
        info!(
            task_uuid = %task_uuid,
            workflow_step_uuid = %workflow_step_uuid,
            "Step resolved manually"
        );
        Ok(())
    }

    /// Resolve a whole task outside the engine (`pending` or `error`
    /// only)
    pub async fn resolve_task_manually(&self, task_uuid: Uuid) -> TaskerResult<()> {
        let task = Task::find_by_id(self.context.database_pool(), task_uuid)
            .await?
            .ok_or_else(|| TaskerError::NotFound(format!("task {task_uuid}")))?;
        let mut machine = TaskStateMachine::new(task, self.context.clone());
        machine
            .transition(TaskEvent::ResolveManually)
            .await
            .map_err(TaskerError::StateMachineError)?;
        info!(task_uuid = %task_uuid, "Task resolved manually");
        Ok(())
    }

    /// `GET /handlers[/{namespace}]`
    pub fn list_handler_namespaces(&self) -> Vec<String> {
        self.handler_registry.list_namespaces()
    }

    pub fn list_handlers(&self, namespace: &str) -> Vec<HandlerKey> {
        self.handler_registry.list_handlers(namespace)
    }

    /// `GET /health/live`: process is up
    pub fn health_live(&self) -> bool {
        true
    }

    /// `GET /health/ready`: database reachable
    pub async fn health_ready(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(self.context.database_pool())
            .await
            .is_ok()
    }

    /// `GET /health/status`
    pub async fn health_status(&self) -> HealthStatus {
        HealthStatus {
            database_reachable: self.health_ready().await,
            registered_handlers: self.handler_registry.len(),
        }
    }
}
