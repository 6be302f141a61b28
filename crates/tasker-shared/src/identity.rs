//! # Task Identity
//!
//! Deterministic identity hashing for task deduplication. The default
//! strategy is SHA-256 over a canonical JSON serialization of the
//! identifying inputs; canonicalization sorts object keys recursively so
//! semantically equal contexts hash equally regardless of key order.

use sha2::{Digest, Sha256};

/// Pluggable hash strategy. The engine only requires determinism:
/// equal inputs must produce equal hashes.
pub trait IdentityStrategy: Send + Sync + std::fmt::Debug {
    fn identity_hash(&self, inputs: &IdentityInputs<'_>) -> String;
}

/// The identifying inputs of a task request
#[derive(Debug, Clone)]
pub struct IdentityInputs<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub version: &'a str,
    pub context: &'a serde_json::Value,
    pub initiator: Option<&'a str>,
    pub source_system: Option<&'a str>,
}

/// SHA-256 over canonical JSON
#[derive(Debug, Clone, Default)]
pub struct Sha256IdentityStrategy;

impl IdentityStrategy for Sha256IdentityStrategy {
    fn identity_hash(&self, inputs: &IdentityInputs<'_>) -> String {
        let canonical = serde_json::json!({
            "name": inputs.name,
            "namespace": inputs.namespace,
            "version": inputs.version,
            "context": canonicalize(inputs.context),
            "initiator": inputs.initiator,
            "source_system": inputs.source_system,
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Recursively sort object keys. `serde_json::Map` preserves insertion
/// order, so rebuilding from sorted keys yields a canonical encoding.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs<'a>(context: &'a serde_json::Value) -> IdentityInputs<'a> {
        IdentityInputs {
            name: "process_order",
            namespace: "fulfillment",
            version: "1.0.0",
            context,
            initiator: Some("api"),
            source_system: None,
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let strategy = Sha256IdentityStrategy;
        let context = json!({"a": 1, "b": [1, 2, 3]});
        let first = strategy.identity_hash(&inputs(&context));
        let second = strategy.identity_hash(&inputs(&context));
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let strategy = Sha256IdentityStrategy;
        let left = json!({"a": 1, "b": {"x": true, "y": false}});
        let right: serde_json::Value =
            serde_json::from_str(r#"{"b": {"y": false, "x": true}, "a": 1}"#).unwrap();

        assert_eq!(
            strategy.identity_hash(&inputs(&left)),
            strategy.identity_hash(&inputs(&right))
        );
    }

    #[test]
    fn test_different_contexts_differ() {
        let strategy = Sha256IdentityStrategy;
        let left = json!({"order_id": 1});
        let right = json!({"order_id": 2});
        assert_ne!(
            strategy.identity_hash(&inputs(&left)),
            strategy.identity_hash(&inputs(&right))
        );
    }

    #[test]
    fn test_initiator_contributes_to_identity() {
        let strategy = Sha256IdentityStrategy;
        let context = json!({});
        let mut with_initiator = inputs(&context);
        let mut without_initiator = inputs(&context);
        with_initiator.initiator = Some("alice");
        without_initiator.initiator = None;

        assert_ne!(
            strategy.identity_hash(&with_initiator),
            strategy.identity_hash(&without_initiator)
        );
    }

    #[test]
    fn test_array_order_matters() {
        let strategy = Sha256IdentityStrategy;
        let left = json!({"ids": [1, 2]});
        let right = json!({"ids": [2, 1]});
        assert_ne!(
            strategy.identity_hash(&inputs(&left)),
            strategy.identity_hash(&inputs(&right))
        );
    }
}
