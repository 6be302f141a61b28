//! Shared harness for workflow integration tests: registered test
//! handlers, template fixtures, an event recorder, and virtual-time
//! helpers that age backoff windows by shifting persisted timestamps.
#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use tasker_orchestration::orchestration::reenqueuer::testing::TestReenqueuer;
use tasker_orchestration::orchestration::task_initializer::TaskInitializer;
use tasker_orchestration::WorkflowCoordinator;
use tasker_shared::errors::TaskerResult;
use tasker_shared::events::payload::Event;
use tasker_shared::events::EventSubscriber;
use tasker_shared::models::{Task, TaskRequest, TaskTemplate, WorkflowStep};
use tasker_shared::registry::TaskTemplateRegistry;
use tasker_shared::system_context::SystemContext;
use tasker_worker::registry::HandlerKey;
use tasker_worker::{HandlerRegistry, StepHandler, StepHandlerError, StepSequence};

/// Records every published event in order
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.name).collect()
    }

    /// Count events by name, optionally restricted to a step name
    pub fn count(&self, name: &str, step_name: Option<&str>) -> usize {
        self.events()
            .iter()
            .filter(|e| e.name == name)
            .filter(|e| match step_name {
                Some(step) => e.payload.get("step_name").and_then(|v| v.as_str()) == Some(step),
                None => true,
            })
            .count()
    }
}

#[async_trait]
impl EventSubscriber for EventRecorder {
    fn name(&self) -> &str {
        "event_recorder"
    }

    fn subscribed_events(&self) -> Vec<String> {
        vec![
            "task.*".to_string(),
            "step.*".to_string(),
            "workflow.*".to_string(),
        ]
    }

    async fn handle_event(&self, event: Event) -> TaskerResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Succeeds immediately with `{"ok": true}`
#[derive(Debug)]
pub struct OkHandler;

#[async_trait]
impl StepHandler for OkHandler {
    async fn process(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> Result<serde_json::Value, StepHandlerError> {
        Ok(serde_json::json!({"ok": true}))
    }
}

/// Raises `RetryableError` for the first `fail_times` invocations, then
/// succeeds
#[derive(Debug)]
pub struct FlakyHandler {
    fail_times: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    pub fn new(fail_times: u32) -> Self {
        Self {
            fail_times,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StepHandler for FlakyHandler {
    async fn process(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> Result<serde_json::Value, StepHandlerError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_times {
            return Err(StepHandlerError::retryable("transient"));
        }
        Ok(serde_json::json!({"ok": true, "recovered_after": call}))
    }
}

/// Always raises `PermanentError`
#[derive(Debug)]
pub struct PermanentFailureHandler;

#[async_trait]
impl StepHandler for PermanentFailureHandler {
    async fn process(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> Result<serde_json::Value, StepHandlerError> {
        Err(StepHandlerError::permanent_with_reason(
            "bad input",
            "validation_error",
        ))
    }
}

/// First invocation raises `RetryableError` with a server-requested
/// delay, then succeeds
#[derive(Debug)]
pub struct RateLimitedHandler {
    retry_after: u64,
    calls: AtomicU32,
}

impl RateLimitedHandler {
    pub fn new(retry_after: u64) -> Self {
        Self {
            retry_after,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl StepHandler for RateLimitedHandler {
    async fn process(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> Result<serde_json::Value, StepHandlerError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(StepHandlerError::retryable_after(
                "rate limited",
                self.retry_after,
            ));
        }
        Ok(serde_json::json!({"ok": true}))
    }
}

/// Sleeps, then succeeds; used to hold steps in flight
#[derive(Debug)]
pub struct SleepingHandler {
    pub sleep_ms: u64,
}

#[async_trait]
impl StepHandler for SleepingHandler {
    async fn process(
        &self,
        _task: &Task,
        _sequence: &StepSequence,
        _step: &WorkflowStep,
    ) -> Result<serde_json::Value, StepHandlerError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.sleep_ms)).await;
        Ok(serde_json::json!({"slept_ms": self.sleep_ms}))
    }
}

pub struct TestHarness {
    pub context: Arc<SystemContext>,
    pub handler_registry: Arc<HandlerRegistry>,
    pub template_registry: TaskTemplateRegistry,
    pub reenqueuer: Arc<TestReenqueuer>,
    pub coordinator: Arc<WorkflowCoordinator>,
    pub initializer: TaskInitializer,
    pub recorder: Arc<EventRecorder>,
}

impl TestHarness {
    pub async fn new(pool: PgPool) -> anyhow::Result<Self> {
        let context = Arc::new(SystemContext::with_pool(pool.clone()).await?);
        let recorder = Arc::new(EventRecorder::default());
        context.event_publisher().subscribe(recorder.clone());

        let handler_registry = Arc::new(HandlerRegistry::new());
        let template_registry = TaskTemplateRegistry::new(pool);
        let reenqueuer = Arc::new(TestReenqueuer::new(context.clone()));
        let coordinator = Arc::new(WorkflowCoordinator::new(
            context.clone(),
            handler_registry.clone(),
            reenqueuer.clone(),
        ));
        let initializer = TaskInitializer::new(context.clone());

        Ok(Self {
            context,
            handler_registry,
            template_registry,
            reenqueuer,
            coordinator,
            initializer,
            recorder,
        })
    }

    pub fn register_handler(&self, namespace: &str, name: &str, handler: Arc<dyn StepHandler>) {
        self.handler_registry
            .register_instance(HandlerKey::new(namespace, name, "0.1.0"), handler);
    }

    pub async fn register_template(&self, template: &TaskTemplate) -> anyhow::Result<()> {
        self.template_registry
            .register_template(template, self.context.event_publisher().catalog())
            .await?;
        Ok(())
    }

    pub async fn create_task(
        &self,
        namespace: &str,
        name: &str,
        context: serde_json::Value,
    ) -> anyhow::Result<Uuid> {
        let request = TaskRequest::new(name.to_string(), namespace.to_string())
            .with_context(context)
            .with_initiator("integration_test".to_string())
            .with_source_system("test_suite".to_string())
            .with_reason("scenario".to_string());
        let result = self.initializer.create_task_from_request(request).await?;
        Ok(result.task_uuid)
    }

    pub async fn step_state(&self, task_uuid: Uuid, step_name: &str) -> anyhow::Result<String> {
        let pool = self.context.database_pool();
        let step = WorkflowStep::find_step_by_name(pool, task_uuid, step_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("step '{step_name}' not found"))?;
        let state: Option<String> = sqlx::query_scalar(
            "SELECT to_state FROM tasker.workflow_step_transitions WHERE workflow_step_uuid = $1 AND most_recent",
        )
        .bind(step.workflow_step_uuid)
        .fetch_optional(pool)
        .await?;
        Ok(state.unwrap_or_else(|| "pending".to_string()))
    }

    pub async fn task_state(&self, task_uuid: Uuid) -> anyhow::Result<String> {
        let state: Option<String> = sqlx::query_scalar(
            "SELECT to_state FROM tasker.task_transitions WHERE task_uuid = $1 AND most_recent",
        )
        .bind(task_uuid)
        .fetch_optional(self.context.database_pool())
        .await?;
        Ok(state.unwrap_or_else(|| "pending".to_string()))
    }

    /// Virtual time: shift a step's failure record and attempt clock
    /// into the past so its backoff window has elapsed
    pub async fn age_step_backoff(
        &self,
        task_uuid: Uuid,
        step_name: &str,
        seconds: i64,
    ) -> anyhow::Result<()> {
        let pool = self.context.database_pool();
        let step = WorkflowStep::find_step_by_name(pool, task_uuid, step_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("step '{step_name}' not found"))?;

        sqlx::query(
            "UPDATE tasker.workflow_step_transitions SET created_at = created_at - make_interval(secs => $2) WHERE workflow_step_uuid = $1",
        )
        .bind(step.workflow_step_uuid)
        .bind(seconds as f64)
        .execute(pool)
        .await?;
        sqlx::query(
            "UPDATE tasker.workflow_steps SET last_attempted_at = last_attempted_at - make_interval(secs => $2) WHERE workflow_step_uuid = $1",
        )
        .bind(step.workflow_step_uuid)
        .bind(seconds as f64)
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// `a -> b -> c` with all steps on `handler` names matching step names
pub fn linear_template(namespace: &str, name: &str) -> TaskTemplate {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "namespace": namespace,
        "version": "0.1.0",
        "context_schema": {
            "type": "object",
            "required": ["x"],
            "properties": {"x": {"type": "integer"}}
        },
        "steps": [
            {"name": "step_a", "handler": {"namespace": namespace, "name": "step_a"}},
            {
                "name": "step_b",
                "handler": {"namespace": namespace, "name": "step_b"},
                "depends_on_step": "step_a"
            },
            {
                "name": "step_c",
                "handler": {"namespace": namespace, "name": "step_c"},
                "depends_on_step": "step_b"
            }
        ]
    }))
    .expect("static template")
}

/// `a -> {b, c} -> d`
pub fn diamond_template(namespace: &str, name: &str) -> TaskTemplate {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "namespace": namespace,
        "version": "0.1.0",
        "steps": [
            {"name": "start", "handler": {"namespace": namespace, "name": "start"}},
            {
                "name": "branch_b",
                "handler": {"namespace": namespace, "name": "branch_b"},
                "depends_on_step": "start"
            },
            {
                "name": "branch_c",
                "handler": {"namespace": namespace, "name": "branch_c"},
                "depends_on_step": "start"
            },
            {
                "name": "converge",
                "handler": {"namespace": namespace, "name": "converge"},
                "depends_on_steps": ["branch_b", "branch_c"]
            }
        ]
    }))
    .expect("static template")
}

/// Single-step template
pub fn single_step_template(namespace: &str, name: &str) -> TaskTemplate {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "namespace": namespace,
        "version": "0.1.0",
        "steps": [
            {"name": "only", "handler": {"namespace": namespace, "name": "only"}}
        ]
    }))
    .expect("static template")
}
