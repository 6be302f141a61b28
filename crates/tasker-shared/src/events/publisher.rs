//! # Event Publisher
//!
//! In-process fan-out to all subscribers whose subscriptions match the
//! event name. Delivery is awaited in registration order within one
//! publish call, so per-publisher ordering holds; across tasks no global
//! order is guaranteed. A failing subscriber never aborts the publisher
//! or its transaction unless it opted into fail-fast delivery.

use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::errors::{TaskerError, TaskerResult};
use crate::events::catalog::EventCatalog;
use crate::events::payload::Event;
use crate::events::subscriber::{subscription_matches, EventSubscriber};

#[derive(Debug, Default)]
pub struct EventPublisher {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
    catalog: EventCatalog,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .push(subscriber);
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    /// Publish an event to every matching subscriber
    pub async fn publish(
        &self,
        event_name: &str,
        payload: serde_json::Value,
    ) -> TaskerResult<()> {
        let event = Event::new(event_name, payload);
        debug!(event_name = %event_name, "Publishing event");

        // Snapshot under the read lock, deliver outside it
        let subscribers: Vec<Arc<dyn EventSubscriber>> = self
            .subscribers
            .read()
            .expect("subscriber lock poisoned")
            .iter()
            .filter(|s| {
                s.subscribed_events()
                    .iter()
                    .any(|pattern| subscription_matches(pattern, event_name))
            })
            .cloned()
            .collect();

        for subscriber in subscribers {
            if let Err(error) = subscriber.handle_event(event.clone()).await {
                if subscriber.fail_fast() {
                    return Err(TaskerError::EventError(format!(
                        "observability sink '{}' failed on '{}': {}",
                        subscriber.name(),
                        event_name,
                        error
                    )));
                }
                warn!(
                    subscriber = %subscriber.name(),
                    event_name = %event_name,
                    error = %error,
                    "Subscriber failed; continuing delivery"
                );
            }
        }

        Ok(())
    }
}
