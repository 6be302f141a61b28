//! State machine input events. Each event resolves to a target state;
//! the transition tables decide whether the edge from the current state
//! is legal.

use crate::state_machine::states::{TaskState, WorkflowStepState};

#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Creation: `None -> pending`
    Initialize,
    Start,
    Complete,
    Fail(String),
    Cancel,
    /// `error -> in_progress` for another coordinator pass
    Retry,
    ResolveManually,
}

impl TaskEvent {
    pub fn target_state(&self) -> TaskState {
        match self {
            TaskEvent::Initialize => TaskState::Pending,
            TaskEvent::Start | TaskEvent::Retry => TaskState::InProgress,
            TaskEvent::Complete => TaskState::Complete,
            TaskEvent::Fail(_) => TaskState::Error,
            TaskEvent::Cancel => TaskState::Cancelled,
            TaskEvent::ResolveManually => TaskState::ResolvedManually,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    /// Creation: `None -> pending`
    Initialize,
    /// Claim for execution (`pending|error -> in_progress`)
    Start,
    /// Successful attempt; carries the results to persist
    Complete(Option<serde_json::Value>),
    Fail(String),
    Cancel,
    ResolveManually(Option<serde_json::Value>),
}

impl StepEvent {
    pub fn target_state(&self) -> WorkflowStepState {
        match self {
            StepEvent::Initialize => WorkflowStepState::Pending,
            StepEvent::Start => WorkflowStepState::InProgress,
            StepEvent::Complete(_) => WorkflowStepState::Complete,
            StepEvent::Fail(_) => WorkflowStepState::Error,
            StepEvent::Cancel => WorkflowStepState::Cancelled,
            StepEvent::ResolveManually(_) => WorkflowStepState::ResolvedManually,
        }
    }
}
