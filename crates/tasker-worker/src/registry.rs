//! # Handler Registry
//!
//! Process-wide map from `(namespace, name, version)` to a handler
//! factory. Lookup is O(1) and safe for concurrent reads with
//! occasional writes (boot registration, hot plugin registration).
//! Names are case-sensitive; there is no reflective resolution.
//! Everything in the map got there through an explicit registration
//! call.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use tasker_shared::errors::{OrchestrationError, OrchestrationResult};

use crate::handler::StepHandler;

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub namespace: String,
    pub name: String,
    pub version: String,
}

impl HandlerKey {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Key with engine defaults applied for omitted parts
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE, name, DEFAULT_VERSION)
    }
}

impl std::fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.name, self.version)
    }
}

/// Factory producing handler instances. Closures returning
/// `Arc<dyn StepHandler>` implement this automatically.
pub trait StepHandlerFactory: Send + Sync {
    fn create(&self) -> Arc<dyn StepHandler>;
}

impl<F> StepHandlerFactory for F
where
    F: Fn() -> Arc<dyn StepHandler> + Send + Sync,
{
    fn create(&self) -> Arc<dyn StepHandler> {
        self()
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<HandlerKey, Arc<dyn StepHandlerFactory>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a key; re-registration replaces
    pub fn register(&self, key: HandlerKey, factory: Arc<dyn StepHandlerFactory>) {
        tracing::debug!(handler = %key, "Registering step handler");
        self.handlers.insert(key, factory);
    }

    /// Register an already-built handler instance shared across calls
    pub fn register_instance(&self, key: HandlerKey, handler: Arc<dyn StepHandler>) {
        let factory = move || handler.clone();
        self.register(key, Arc::new(factory));
    }

    /// Resolve a handler instance; `HandlerNotFound` when absent
    pub fn resolve(&self, key: &HandlerKey) -> OrchestrationResult<Arc<dyn StepHandler>> {
        self.handlers
            .get(key)
            .map(|entry| entry.value().create())
            .ok_or_else(|| OrchestrationError::HandlerNotFound {
                namespace: key.namespace.clone(),
                name: key.name.clone(),
                version: key.version.clone(),
            })
    }

    pub fn contains(&self, key: &HandlerKey) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn list_namespaces(&self) -> Vec<String> {
        let namespaces: BTreeSet<String> = self
            .handlers
            .iter()
            .map(|entry| entry.key().namespace.clone())
            .collect();
        namespaces.into_iter().collect()
    }

    pub fn list_handlers(&self, namespace: &str) -> Vec<HandlerKey> {
        let mut keys: Vec<HandlerKey> = self
            .handlers
            .iter()
            .filter(|entry| entry.key().namespace == namespace)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        keys
    }

    pub fn list_all(&self) -> Vec<HandlerKey> {
        let mut keys: Vec<HandlerKey> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort_by(|a, b| {
            (&a.namespace, &a.name, &a.version).cmp(&(&b.namespace, &b.name, &b.version))
        });
        keys
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handler_count", &self.handlers.len())
            .finish()
    }
}
