//! # Tasker Orchestration
//!
//! The workflow coordination layer: viable step discovery, the
//! claim/execute/persist loop with bounded concurrency, backoff
//! calculation, task finalization, and re-enqueueing. Multiple worker
//! processes run this layer against one shared relational store; all
//! coordination happens through row-level locking, never consensus.

pub mod orchestration;

pub use orchestration::coordinator::WorkflowCoordinator;
pub use orchestration::task_finalizer::{FinalizationAction, FinalizationResult, TaskFinalizer};
pub use orchestration::task_initializer::{TaskInitializationResult, TaskInitializer};
