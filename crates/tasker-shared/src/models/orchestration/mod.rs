//! # Orchestration Views
//!
//! Typed rows for the readiness and execution-context SQL functions.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// One row per step from `tasker.get_step_readiness_status`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StepReadinessStatus {
    pub workflow_step_uuid: Uuid,
    pub task_uuid: Uuid,
    pub named_step_uuid: Uuid,
    pub name: String,
    pub current_state: String,
    pub dependencies_satisfied: bool,
    pub retry_eligible: bool,
    pub ready_for_execution: bool,
    pub attempts: i32,
    pub retry_limit: i32,
    pub retryable: bool,
    pub in_process: bool,
    pub processed: bool,
    pub total_parents: i64,
    pub completed_parents: i64,
    pub last_failure_at: Option<NaiveDateTime>,
    pub next_retry_at: Option<NaiveDateTime>,
    pub last_attempted_at: Option<NaiveDateTime>,
}

/// Aggregated per-task view from `tasker.get_task_execution_context`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskExecutionContext {
    pub task_uuid: Uuid,
    pub named_task_uuid: Uuid,
    pub status: String,
    pub total_steps: i64,
    pub pending_steps: i64,
    pub in_progress_steps: i64,
    pub completed_steps: i64,
    pub failed_steps: i64,
    pub ready_steps: i64,
    pub waiting_retry_steps: i64,
    pub permanently_blocked_steps: i64,
    #[sqlx(try_from = "String")]
    pub execution_status: ExecutionStatus,
    pub recommended_action: String,
    pub completion_percentage: f64,
    pub health_status: String,
    pub next_retry_at: Option<NaiveDateTime>,
}

impl TaskExecutionContext {
    pub fn is_complete(&self) -> bool {
        self.execution_status == ExecutionStatus::AllComplete
    }

    pub fn has_failures(&self) -> bool {
        self.failed_steps > 0
    }
}

/// Coarse execution state used by the finalizer to pick an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    AllComplete,
    HasReadySteps,
    Processing,
    WaitingForRetry,
    BlockedByFailures,
    WaitingForDependencies,
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_complete" => Ok(Self::AllComplete),
            "has_ready_steps" => Ok(Self::HasReadySteps),
            "processing" => Ok(Self::Processing),
            "waiting_for_retry" => Ok(Self::WaitingForRetry),
            "blocked_by_failures" => Ok(Self::BlockedByFailures),
            "waiting_for_dependencies" => Ok(Self::WaitingForDependencies),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

impl TryFrom<String> for ExecutionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AllComplete => "all_complete",
            Self::HasReadySteps => "has_ready_steps",
            Self::Processing => "processing",
            Self::WaitingForRetry => "waiting_for_retry",
            Self::BlockedByFailures => "blocked_by_failures",
            Self::WaitingForDependencies => "waiting_for_dependencies",
        };
        write!(f, "{s}")
    }
}
