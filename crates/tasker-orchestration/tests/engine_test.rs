//! # Engine Facade Tests
//!
//! The library surface the HTTP layer consumes: create-and-enqueue,
//! identity deduplication, task retrieval with the dependency graph,
//! registry browsing, and health probes.

mod common;

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use common::{linear_template, OkHandler, TestHarness};
use tasker_orchestration::orchestration::engine::TaskerEngine;
use tasker_orchestration::orchestration::reenqueuer::testing::TestReenqueuer;
use tasker_orchestration::orchestration::reenqueuer::ReenqueueReason;
use tasker_shared::config::TaskerConfig;
use tasker_shared::models::TaskRequest;
use tasker_shared::registry::TaskTemplateRegistry;
use tasker_shared::system_context::SystemContext;
use tasker_worker::HandlerRegistry;

fn engine_for(harness: &TestHarness) -> TaskerEngine {
    TaskerEngine::new(
        harness.context.clone(),
        harness.handler_registry.clone(),
        harness.reenqueuer.clone(),
    )
}

#[sqlx::test(migrator = "tasker_shared::database::migrator::MIGRATOR")]
async fn test_create_and_enqueue_schedules_first_pass(pool: PgPool) -> Result<()> {
    let harness = TestHarness::new(pool).await?;
    for step in ["step_a", "step_b", "step_c"] {
        harness.register_handler("api", step, Arc::new(OkHandler));
    }
    harness
        .register_template(&linear_template("api", "api_task"))
        .await?;
    let engine = engine_for(&harness);

    let request = TaskRequest::new("api_task".to_string(), "api".to_string())
        .with_context(json!({"x": 9}));
    let created = engine.create_and_enqueue_task(request).await?;
    assert!(!created.deduplicated);
    assert_eq!(created.step_count, 3);

    let requests = harness.reenqueuer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].task_uuid, created.task_uuid);
    assert_eq!(requests[0].reason, ReenqueueReason::AwaitingWork);

    // Detail includes the dependency graph
    let detail = engine.get_task(created.task_uuid).await?;
    assert_eq!(detail.steps.len(), 3);
    assert_eq!(detail.edges.len(), 2);
    assert_eq!(detail.state.to_string(), "pending");

    let listed = engine.list_tasks(10).await?;
    assert!(listed.iter().any(|t| t.task_uuid == created.task_uuid));
    Ok(())
}

/// Two identical requests within the dedup window resolve to one task
#[sqlx::test(migrator = "tasker_shared::database::migrator::MIGRATOR")]
async fn test_identity_dedup_within_window(pool: PgPool) -> Result<()> {
    let mut config = TaskerConfig::default();
    config.identity.dedup_window_seconds = 300;
    let context = Arc::new(SystemContext::new(pool.clone(), Arc::new(config)));

    let handler_registry = Arc::new(HandlerRegistry::new());
    let template_registry = TaskTemplateRegistry::new(pool);
    template_registry
        .register_template(
            &linear_template("dedup", "dedup_task"),
            context.event_publisher().catalog(),
        )
        .await?;
    let reenqueuer = Arc::new(TestReenqueuer::new(context.clone()));
    let engine = TaskerEngine::new(context, handler_registry, reenqueuer.clone());

    let request = |reason: &str| {
        TaskRequest::new("dedup_task".to_string(), "dedup".to_string())
            .with_context(json!({"x": 1}))
            .with_initiator("same_caller".to_string())
            .with_reason(reason.to_string())
    };

    let first = engine.create_and_enqueue_task(request("first")).await?;
    let second = engine.create_and_enqueue_task(request("second")).await?;

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(first.task_uuid, second.task_uuid);

    // Only the first request scheduled a pass
    assert_eq!(reenqueuer.requests().len(), 1);
    Ok(())
}

/// A different context escapes the dedup window
#[sqlx::test(migrator = "tasker_shared::database::migrator::MIGRATOR")]
async fn test_different_context_is_not_deduplicated(pool: PgPool) -> Result<()> {
    let mut config = TaskerConfig::default();
    config.identity.dedup_window_seconds = 300;
    let context = Arc::new(SystemContext::new(pool.clone(), Arc::new(config)));

    let template_registry = TaskTemplateRegistry::new(pool);
    template_registry
        .register_template(
            &linear_template("dedup2", "dedup2_task"),
            context.event_publisher().catalog(),
        )
        .await?;
    let reenqueuer = Arc::new(TestReenqueuer::new(context.clone()));
    let engine = TaskerEngine::new(context, Arc::new(HandlerRegistry::new()), reenqueuer);

    let first = engine
        .create_and_enqueue_task(
            TaskRequest::new("dedup2_task".to_string(), "dedup2".to_string())
                .with_context(json!({"x": 1})),
        )
        .await?;
    let second = engine
        .create_and_enqueue_task(
            TaskRequest::new("dedup2_task".to_string(), "dedup2".to_string())
                .with_context(json!({"x": 2})),
        )
        .await?;

    assert_ne!(first.task_uuid, second.task_uuid);
    assert!(!second.deduplicated);
    Ok(())
}

#[sqlx::test(migrator = "tasker_shared::database::migrator::MIGRATOR")]
async fn test_registry_browse_and_health(pool: PgPool) -> Result<()> {
    let harness = TestHarness::new(pool).await?;
    harness.register_handler("browse", "one", Arc::new(OkHandler));
    harness.register_handler("browse", "two", Arc::new(OkHandler));
    let engine = engine_for(&harness);

    assert_eq!(engine.list_handler_namespaces(), vec!["browse"]);
    assert_eq!(engine.list_handlers("browse").len(), 2);
    assert!(engine.list_handlers("missing").is_empty());

    assert!(engine.health_live());
    assert!(engine.health_ready().await);
    let status = engine.health_status().await;
    assert!(status.database_reachable);
    assert_eq!(status.registered_handlers, 2);
    Ok(())
}

/// A permanently failed step resolved by an operator unblocks the task;
/// manual resolution counts toward dependency satisfaction
#[sqlx::test(migrator = "tasker_shared::database::migrator::MIGRATOR")]
async fn test_manual_resolution_unblocks_task(pool: PgPool) -> Result<()> {
    let harness = TestHarness::new(pool.clone()).await?;
    harness.register_handler("manual", "step_a", Arc::new(OkHandler));
    harness.register_handler(
        "manual",
        "step_b",
        Arc::new(common::PermanentFailureHandler),
    );
    harness.register_handler("manual", "step_c", Arc::new(OkHandler));
    harness
        .register_template(&linear_template("manual", "manual_recovery"))
        .await?;
    let engine = engine_for(&harness);

    let task_uuid = harness
        .create_task("manual", "manual_recovery", json!({"x": 3}))
        .await?;
    harness.coordinator.execute_workflow(task_uuid).await?;
    assert_eq!(harness.task_state(task_uuid).await?, "error");

    // Operator resolves the stuck step; its results satisfy step_c's
    // dependency
    let step_b = tasker_shared::models::WorkflowStep::find_step_by_name(
        &pool, task_uuid, "step_b",
    )
    .await?
    .unwrap();
    engine
        .resolve_step_manually(
            task_uuid,
            step_b.workflow_step_uuid,
            Some(json!({"resolved_by": "operator"})),
        )
        .await?;
    assert_eq!(harness.step_state(task_uuid, "step_b").await?, "resolved_manually");

    let resolved = tasker_shared::models::WorkflowStep::find_by_id(
        &pool,
        step_b.workflow_step_uuid,
    )
    .await?
    .unwrap();
    assert!(resolved.processed);

    // The next pass retries the errored task and finishes step_c
    let result = harness.coordinator.execute_workflow(task_uuid).await?;
    assert_eq!(result.action, tasker_orchestration::FinalizationAction::Completed);
    assert_eq!(harness.task_state(task_uuid).await?, "complete");
    assert_eq!(harness.step_state(task_uuid, "step_c").await?, "complete");
    Ok(())
}

#[sqlx::test(migrator = "tasker_shared::database::migrator::MIGRATOR")]
async fn test_unknown_task_is_not_found(pool: PgPool) -> Result<()> {
    let harness = TestHarness::new(pool).await?;
    let engine = engine_for(&harness);

    let missing = uuid::Uuid::now_v7();
    assert!(matches!(
        engine.get_task(missing).await,
        Err(tasker_shared::TaskerError::NotFound(_))
    ));
    assert!(matches!(
        engine.cancel_task(missing).await,
        Err(tasker_shared::TaskerError::NotFound(_))
    ));
    Ok(())
}
