//! # Tasker Shared
//!
//! Shared components for the tasker orchestration engine: the relational
//! data model, append-only state machines, the in-process event bus, task
//! identity, configuration, and error types.
//!
//! Orchestration behavior (coordination, claiming, finalization) lives in
//! `tasker-orchestration`; the step handler contract and registry live in
//! `tasker-worker`. Everything they share is here.

pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod identity;
pub mod models;
pub mod registry;
pub mod state_machine;
pub mod system_context;

pub use errors::{TaskerError, TaskerResult};
pub use system_context::SystemContext;
