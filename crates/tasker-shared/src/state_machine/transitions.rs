//! # Transition Tables
//!
//! The allowed-edge tables for both state machines and the static
//! mapping from `(from_state, to_state)` to the lifecycle event fired on
//! that edge. Initial transitions (`None -> state`) are represented so
//! no transition is event-less. These tables are the single source of
//! truth; the state machines and the orchestration write-back
//! transactions both consult them.

use crate::events::catalog::lifecycle;
use crate::state_machine::states::{TaskState, WorkflowStepState};

/// Allowed task transitions. `from = None` is creation.
pub fn task_transition_allowed(from: Option<TaskState>, to: TaskState) -> bool {
    use TaskState::*;
    matches!(
        (from, to),
        (None, Pending)
            | (Some(Pending), InProgress)
            | (Some(Pending), Cancelled)
            | (Some(Pending), ResolvedManually)
            | (Some(InProgress), Complete)
            | (Some(InProgress), Error)
            | (Some(InProgress), Cancelled)
            | (Some(Error), InProgress)
            | (Some(Error), ResolvedManually)
    )
}

/// Allowed workflow step transitions. Direct `pending -> complete` is
/// absent: a step must be claimed before it can complete.
pub fn step_transition_allowed(from: Option<WorkflowStepState>, to: WorkflowStepState) -> bool {
    use WorkflowStepState::*;
    matches!(
        (from, to),
        (None, Pending)
            | (Some(Pending), InProgress)
            | (Some(Pending), Cancelled)
            | (Some(Pending), ResolvedManually)
            | (Some(InProgress), Complete)
            | (Some(InProgress), Error)
            | (Some(InProgress), Cancelled)
            | (Some(Error), InProgress)
            | (Some(Error), ResolvedManually)
    )
}

/// Lifecycle event fired on a task transition. Callers must have
/// validated the edge first; unknown edges map to no event.
pub fn task_lifecycle_event(from: Option<TaskState>, to: TaskState) -> Option<&'static str> {
    use TaskState::*;
    let event = match (from, to) {
        (None, Pending) => lifecycle::TASK_INITIALIZE_REQUESTED,
        (Some(Pending), InProgress) => lifecycle::TASK_START_REQUESTED,
        (Some(InProgress), Complete) => lifecycle::TASK_COMPLETED,
        (Some(InProgress), Error) => lifecycle::TASK_FAILED,
        (Some(Error), InProgress) => lifecycle::TASK_RETRY_REQUESTED,
        (Some(Pending), Cancelled) | (Some(InProgress), Cancelled) => lifecycle::TASK_CANCELLED,
        (Some(Pending), ResolvedManually) | (Some(Error), ResolvedManually) => {
            lifecycle::TASK_RESOLVED_MANUALLY
        }
        _ => return None,
    };
    Some(event)
}

/// Lifecycle event fired on a step transition
pub fn step_lifecycle_event(
    from: Option<WorkflowStepState>,
    to: WorkflowStepState,
) -> Option<&'static str> {
    use WorkflowStepState::*;
    let event = match (from, to) {
        (None, Pending) => lifecycle::STEP_INITIALIZE_REQUESTED,
        (Some(Pending), InProgress) => lifecycle::STEP_EXECUTION_REQUESTED,
        (Some(Error), InProgress) => lifecycle::STEP_RETRY_REQUESTED,
        (Some(InProgress), Complete) => lifecycle::STEP_COMPLETED,
        (Some(InProgress), Error) => lifecycle::STEP_FAILED,
        (Some(Pending), Cancelled) | (Some(InProgress), Cancelled) => lifecycle::STEP_CANCELLED,
        (Some(Pending), ResolvedManually) | (Some(Error), ResolvedManually) => {
            lifecycle::STEP_RESOLVED_MANUALLY
        }
        _ => return None,
    };
    Some(event)
}
