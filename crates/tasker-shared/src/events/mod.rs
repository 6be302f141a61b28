//! # Event System
//!
//! In-process publish/subscribe with a declarative subscriber contract,
//! an introspectable event catalog, and a single payload builder that
//! standardizes every payload the engine emits.

pub mod catalog;
pub mod payload;
pub mod publisher;
pub mod subscriber;

pub use catalog::{EventCatalog, EventCatalogEntry};
pub use payload::{Event, EventPayloadBuilder};
pub use publisher::EventPublisher;
pub use subscriber::EventSubscriber;
