//! # Data Model
//!
//! Semantic entities of the engine: tasks, workflow steps, DAG edges,
//! append-only transition logs, and the template catalog, plus the
//! aggregated orchestration views returned by the SQL functions.

pub mod core;
pub mod orchestration;

pub use core::task::{NewTask, Task};
pub use core::task_request::TaskRequest;
pub use core::task_template::{StepTemplate, TaskTemplate};
pub use core::workflow_step::{NewWorkflowStep, WorkflowStep};
pub use core::workflow_step_edge::WorkflowStepEdge;
pub use orchestration::{ExecutionStatus, StepReadinessStatus, TaskExecutionContext};
