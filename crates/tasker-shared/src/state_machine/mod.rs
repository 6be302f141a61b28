//! # State Machines
//!
//! Canonical transition tables, guard predicates, and transition-log
//! semantics for tasks and workflow steps. `current_state` is always
//! derived from the most-recent transition row, never computed by
//! scanning, and every transition (including the initial one) fires
//! exactly one lifecycle event.

pub mod events;
pub mod states;
pub mod step_state_machine;
pub mod task_state_machine;
pub mod transitions;

pub use events::{StepEvent, TaskEvent};
pub use states::{TaskState, WorkflowStepState};
pub use step_state_machine::StepStateMachine;
pub use task_state_machine::TaskStateMachine;
pub use transitions::{
    step_lifecycle_event, step_transition_allowed, task_lifecycle_event, task_transition_allowed,
};
