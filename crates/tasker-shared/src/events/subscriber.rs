//! # Event Subscriber
//!
//! Declarative subscriber contract. A subscriber names the events it
//! wants (exact names or a `domain.*` pattern); the bus routes matching
//! events to `handle_event`. The conventional handler-method name for an
//! event is derivable with [`handler_method_name`] so implementations
//! can dispatch deterministically.

use async_trait::async_trait;

use crate::errors::TaskerResult;
use crate::events::payload::Event;

#[async_trait]
pub trait EventSubscriber: Send + Sync + std::fmt::Debug {
    /// Stable name used in logs when a subscriber fails
    fn name(&self) -> &str;

    /// Event names this subscriber receives. `"step.*"` subscribes to a
    /// whole domain.
    fn subscribed_events(&self) -> Vec<String>;

    async fn handle_event(&self, event: Event) -> TaskerResult<()>;

    /// Observability sinks may opt into fail-fast delivery: their errors
    /// propagate to the publisher instead of being swallowed.
    fn fail_fast(&self) -> bool {
        false
    }
}

/// `step.completed` routes to `handle_step_completed`
pub fn handler_method_name(event_name: &str) -> String {
    format!("handle_{}", event_name.replace('.', "_"))
}

/// Whether a subscription pattern matches a concrete event name
pub fn subscription_matches(pattern: &str, event_name: &str) -> bool {
    if let Some(domain) = pattern.strip_suffix(".*") {
        event_name
            .strip_prefix(domain)
            .is_some_and(|rest| rest.starts_with('.'))
    } else {
        pattern == event_name
    }
}
