//! # Error Types
//!
//! Library-wide error enums. `TaskerError` is the top-level kind carried
//! across crate boundaries; `StateMachineError` and `OrchestrationError`
//! are the domain-specific enums the state machines and the coordinator
//! work with.

use uuid::Uuid;

/// Top-level error type for the tasker engine
#[derive(Debug, thiserror::Error)]
pub enum TaskerError {
    /// Context failed schema validation, or a request was malformed
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Unknown task, step, template, or handler
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation conflicts with current state (e.g. cancel on terminal task)
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Bad configuration at boot; callers should exit with a clear message
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error(transparent)]
    StateMachineError(#[from] StateMachineError),

    #[error("event error: {0}")]
    EventError(String),

    #[error("orchestration error: {0}")]
    OrchestrationError(String),
}

/// Result alias used across the shared crate
pub type TaskerResult<T> = Result<T, TaskerError>;

/// Errors raised by the task and step state machines
#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    /// The `(from, to)` edge is not in the transition table
    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A guard predicate rejected an otherwise valid transition
    #[error("transition guard failed: {reason}")]
    GuardFailed { reason: String },

    #[error("database error during transition: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors raised by the orchestration layer
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("database error in {operation}: {reason}")]
    DatabaseError { operation: String, reason: String },

    #[error("state transition failed for {entity_type} {entity_uuid}: {reason}")]
    StateTransitionFailed {
        entity_type: String,
        entity_uuid: Uuid,
        reason: String,
    },

    /// No handler registered for the step's `(namespace, name, version)`
    #[error("handler not found: {namespace}/{name}/{version}")]
    HandlerNotFound {
        namespace: String,
        name: String,
        version: String,
    },

    /// Another worker won the row-locked claim; the loser drops the step
    #[error("claim lost for step {step_uuid}")]
    ClaimLost { step_uuid: Uuid },

    #[error("step {step_uuid} timed out after {timeout_seconds}s")]
    StepTimeout {
        step_uuid: Uuid,
        timeout_seconds: u64,
    },

    #[error("{0}")]
    General(String),
}

impl From<String> for OrchestrationError {
    fn from(message: String) -> Self {
        OrchestrationError::General(message)
    }
}

impl From<sqlx::Error> for OrchestrationError {
    fn from(error: sqlx::Error) -> Self {
        OrchestrationError::DatabaseError {
            operation: "query".to_string(),
            reason: error.to_string(),
        }
    }
}

impl From<StateMachineError> for OrchestrationError {
    fn from(error: StateMachineError) -> Self {
        OrchestrationError::General(error.to_string())
    }
}

/// Result alias for the orchestration layer
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let err = StateMachineError::InvalidTransition {
            entity: "task",
            from: "pending".to_string(),
            to: "complete".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid task transition: pending -> complete"
        );
    }

    #[test]
    fn test_orchestration_error_from_string() {
        let err = OrchestrationError::from("no progress possible".to_string());
        assert!(matches!(err, OrchestrationError::General(_)));
        assert_eq!(err.to_string(), "no progress possible");
    }

    #[test]
    fn test_tasker_error_wraps_state_machine_error() {
        let inner = StateMachineError::GuardFailed {
            reason: "step not ready".to_string(),
        };
        let err: TaskerError = inner.into();
        assert!(err.to_string().contains("step not ready"));
    }

    #[test]
    fn test_handler_not_found_display() {
        let err = OrchestrationError::HandlerNotFound {
            namespace: "payments".to_string(),
            name: "charge_card".to_string(),
            version: "1.0.0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "handler not found: payments/charge_card/1.0.0"
        );
    }
}
