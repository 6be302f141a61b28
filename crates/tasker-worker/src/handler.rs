//! # Step Handler Contract
//!
//! A handler implements exactly one method: `process(task, sequence,
//! step)`. The return value becomes the step's `results` JSON; raising
//! classifies the failure through the two-armed error taxonomy. The
//! optional `process_results` hook lets a handler shape what gets
//! persisted without touching persistence itself: the framework writes
//! `results` exactly once per attempt, inside the transaction that
//! records the state transition.

use async_trait::async_trait;

use tasker_shared::models::{Task, WorkflowStep};

use crate::sequence::StepSequence;

/// Two-armed error classification for step execution.
///
/// Anything a handler raises that is not one of these arms is treated as
/// retryable with default backoff.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepHandlerError {
    /// Transient failure; the step transitions to `error` and becomes
    /// eligible again after backoff. A `retry_after` is a
    /// server-requested delay and takes precedence over the exponential
    /// schedule.
    #[error("retryable: {message}")]
    Retryable {
        message: String,
        retry_after: Option<u64>,
        context: Option<serde_json::Value>,
    },

    /// Non-retryable failure; the step transitions to `error` with its
    /// retry budget forced to exhaustion.
    #[error("permanent: {message}")]
    Permanent {
        message: String,
        reason: Option<String>,
        context: Option<serde_json::Value>,
    },
}

impl StepHandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
            retry_after: None,
            context: None,
        }
    }

    pub fn retryable_after(message: impl Into<String>, retry_after_seconds: u64) -> Self {
        Self::Retryable {
            message: message.into(),
            retry_after: Some(retry_after_seconds),
            context: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            reason: None,
            context: None,
        }
    }

    pub fn permanent_with_reason(message: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            reason: Some(reason.into()),
            context: None,
        }
    }

    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        match &mut self {
            Self::Retryable { context, .. } | Self::Permanent { context, .. } => {
                *context = Some(ctx);
            }
        }
        self
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable { message, .. } | Self::Permanent { message, .. } => message,
        }
    }

    /// The taxonomy arm, as recorded in `results.error`
    pub fn classification(&self) -> &'static str {
        match self {
            Self::Retryable { .. } => "retryable",
            Self::Permanent { .. } => "permanent",
        }
    }
}

/// The universal step extension point
#[async_trait]
pub trait StepHandler: Send + Sync + std::fmt::Debug {
    /// Execute the step's business logic. `sequence` exposes prior
    /// completed steps by name along with their results.
    async fn process(
        &self,
        task: &Task,
        sequence: &StepSequence,
        step: &WorkflowStep,
    ) -> Result<serde_json::Value, StepHandlerError>;

    /// Shape what gets persisted after a successful `process`. The
    /// default persists the output unchanged.
    async fn process_results(
        &self,
        _step: &WorkflowStep,
        output: serde_json::Value,
        _prior_results: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, StepHandlerError> {
        Ok(output)
    }
}
