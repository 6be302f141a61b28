//! # Tasker Worker
//!
//! The step handler contract: the universal `process(task, sequence,
//! step)` extension point, the retryable/permanent error taxonomy, the
//! HTTP handler base, and the thread-safe handler registry the
//! coordinator resolves handlers from.

pub mod handler;
pub mod http;
pub mod registry;
pub mod sequence;

pub use handler::{StepHandler, StepHandlerError};
pub use registry::{HandlerKey, HandlerRegistry};
pub use sequence::StepSequence;
