//! # Re-enqueuer
//!
//! Schedules a future `execute_workflow` invocation. One interface, two
//! strategies: the production pair hands requests to a background job
//! channel whose listener sleeps until the scheduled time; the test pair
//! records requests synchronously so tests control the clock. Every
//! hand-off publishes `workflow.task_reenqueued`.

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use tasker_shared::errors::{OrchestrationError, OrchestrationResult};
use tasker_shared::events::catalog::lifecycle;
use tasker_shared::events::payload::EventPayloadBuilder;
use tasker_shared::system_context::SystemContext;

/// Why a task is coming back for another pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReenqueueReason {
    /// Ready or in-flight steps remain
    AwaitingWork,
    /// Only steps blocked on backoff remain
    AwaitingRetry,
    /// No progress possible yet no clear failure
    Ambiguous,
}

impl std::fmt::Display for ReenqueueReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AwaitingWork => "awaiting_work",
            Self::AwaitingRetry => "awaiting_retry",
            Self::Ambiguous => "ambiguous",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct ReenqueueRequest {
    pub task_uuid: Uuid,
    pub at: NaiveDateTime,
    pub reason: ReenqueueReason,
}

#[async_trait]
pub trait Reenqueuer: Send + Sync + std::fmt::Debug {
    /// Schedule `execute_workflow(task)` at a concrete wall-clock time
    async fn enqueue_at(
        &self,
        task_uuid: Uuid,
        at: NaiveDateTime,
        reason: ReenqueueReason,
    ) -> OrchestrationResult<()>;
}

async fn publish_reenqueued(
    context: &SystemContext,
    task_uuid: Uuid,
    at: NaiveDateTime,
    reason: ReenqueueReason,
) {
    let payload = EventPayloadBuilder::new(task_uuid)
        .with_field("reason", serde_json::json!(reason.to_string()))
        .with_field(
            "scheduled_at",
            serde_json::json!(at.and_utc().to_rfc3339()),
        )
        .build();
    let _ = context
        .event_publisher()
        .publish(lifecycle::WORKFLOW_TASK_REENQUEUED, payload)
        .await;
}

/// Production strategy: push onto the job channel consumed by
/// [`ReenqueueListener`]
#[derive(Debug)]
pub struct JobQueueReenqueuer {
    context: Arc<SystemContext>,
    sender: mpsc::UnboundedSender<ReenqueueRequest>,
}

impl JobQueueReenqueuer {
    pub fn new(
        context: Arc<SystemContext>,
    ) -> (Self, mpsc::UnboundedReceiver<ReenqueueRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { context, sender }, receiver)
    }
}

#[async_trait]
impl Reenqueuer for JobQueueReenqueuer {
    async fn enqueue_at(
        &self,
        task_uuid: Uuid,
        at: NaiveDateTime,
        reason: ReenqueueReason,
    ) -> OrchestrationResult<()> {
        self.sender
            .send(ReenqueueRequest {
                task_uuid,
                at,
                reason,
            })
            .map_err(|e| {
                OrchestrationError::General(format!("re-enqueue channel closed: {e}"))
            })?;

        publish_reenqueued(&self.context, task_uuid, at, reason).await;
        debug!(
            task_uuid = %task_uuid,
            reason = %reason,
            scheduled_at = %at,
            "Task re-enqueued"
        );
        Ok(())
    }
}

/// Drains the job channel, sleeping until each request's scheduled time
/// before invoking the supplied run function.
#[derive(Debug)]
pub struct ReenqueueListener {
    receiver: mpsc::UnboundedReceiver<ReenqueueRequest>,
}

impl ReenqueueListener {
    pub fn new(receiver: mpsc::UnboundedReceiver<ReenqueueRequest>) -> Self {
        Self { receiver }
    }

    /// Run until the channel closes. `run_workflow` is the coordinator
    /// entry point, injected to avoid a construction cycle.
    pub async fn run<F, Fut>(mut self, run_workflow: F)
    where
        F: Fn(Uuid) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        while let Some(request) = self.receiver.recv().await {
            let run = run_workflow.clone();
            tokio::spawn(async move {
                let now = Utc::now().naive_utc();
                if request.at > now {
                    let delay = (request.at - now)
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    tokio::time::sleep(delay).await;
                }
                run(request.task_uuid).await;
            });
        }
        warn!("Re-enqueue channel closed; listener exiting");
    }
}

pub mod testing {
    //! Synchronous test strategy: requests are recorded, never executed;
    //! the test drives the next coordinator pass itself, which stands in
    //! for advancing wall time.

    use super::*;

    #[derive(Debug, Default)]
    pub struct TestReenqueuer {
        context: Option<Arc<SystemContext>>,
        requests: Mutex<Vec<ReenqueueRequest>>,
    }

    impl TestReenqueuer {
        pub fn new(context: Arc<SystemContext>) -> Self {
            Self {
                context: Some(context),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// All recorded requests, oldest first
        pub fn requests(&self) -> Vec<ReenqueueRequest> {
            self.requests.lock().expect("request log poisoned").clone()
        }

        /// Remove and return recorded requests
        pub fn drain(&self) -> Vec<ReenqueueRequest> {
            std::mem::take(&mut *self.requests.lock().expect("request log poisoned"))
        }
    }

    #[async_trait]
    impl Reenqueuer for TestReenqueuer {
        async fn enqueue_at(
            &self,
            task_uuid: Uuid,
            at: NaiveDateTime,
            reason: ReenqueueReason,
        ) -> OrchestrationResult<()> {
            self.requests
                .lock()
                .expect("request log poisoned")
                .push(ReenqueueRequest {
                    task_uuid,
                    at,
                    reason,
                });
            if let Some(context) = &self.context {
                publish_reenqueued(context, task_uuid, at, reason).await;
            }
            Ok(())
        }
    }
}
