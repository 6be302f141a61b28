//! Task and workflow step states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InProgress,
    Complete,
    Error,
    Cancelled,
    ResolvedManually,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Complete | TaskState::Cancelled | TaskState::ResolvedManually
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in_progress",
            TaskState::Complete => "complete",
            TaskState::Error => "error",
            TaskState::Cancelled => "cancelled",
            TaskState::ResolvedManually => "resolved_manually",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "in_progress" => Ok(TaskState::InProgress),
            "complete" => Ok(TaskState::Complete),
            "error" => Ok(TaskState::Error),
            "cancelled" => Ok(TaskState::Cancelled),
            "resolved_manually" => Ok(TaskState::ResolvedManually),
            other => Err(format!("unknown task state '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStepState {
    Pending,
    InProgress,
    Complete,
    Error,
    Cancelled,
    ResolvedManually,
}

impl WorkflowStepState {
    /// States that satisfy a child's dependency on this step
    pub fn in_completion_set(&self) -> bool {
        matches!(
            self,
            WorkflowStepState::Complete | WorkflowStepState::ResolvedManually
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStepState::Complete
                | WorkflowStepState::Cancelled
                | WorkflowStepState::ResolvedManually
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            WorkflowStepState::Pending => "pending",
            WorkflowStepState::InProgress => "in_progress",
            WorkflowStepState::Complete => "complete",
            WorkflowStepState::Error => "error",
            WorkflowStepState::Cancelled => "cancelled",
            WorkflowStepState::ResolvedManually => "resolved_manually",
        }
    }
}

impl fmt::Display for WorkflowStepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkflowStepState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkflowStepState::Pending),
            "in_progress" => Ok(WorkflowStepState::InProgress),
            "complete" => Ok(WorkflowStepState::Complete),
            "error" => Ok(WorkflowStepState::Error),
            "cancelled" => Ok(WorkflowStepState::Cancelled),
            "resolved_manually" => Ok(WorkflowStepState::ResolvedManually),
            other => Err(format!("unknown workflow step state '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_states() {
        for state in [
            TaskState::Pending,
            TaskState::InProgress,
            TaskState::Complete,
            TaskState::Error,
            TaskState::Cancelled,
            TaskState::ResolvedManually,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
    }

    #[test]
    fn test_completion_set() {
        assert!(WorkflowStepState::Complete.in_completion_set());
        assert!(WorkflowStepState::ResolvedManually.in_completion_set());
        assert!(!WorkflowStepState::Cancelled.in_completion_set());
        assert!(!WorkflowStepState::Error.in_completion_set());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::Error.is_terminal());
        assert!(WorkflowStepState::Cancelled.is_terminal());
        assert!(!WorkflowStepState::InProgress.is_terminal());
    }
}
