//! Content-addressed memoisation of node outputs.
//!
//! Only the [`ResultCache`] trait and an in-process [`MemoryResultCache`] are
//! implemented here; a durable backend (SQLite or otherwise) is a downstream
//! integration left to embedders, per the out-of-scope list in `SPEC_FULL.md`.

use async_trait::async_trait;
use dashmap::DashMap;
use fingerprint::canonical_digest;

use crate::error::CacheError;
use crate::types::Value;

/// Narrow interface the DAG/SM runners consume for memoising node output.
///
/// Cache miss returns `None`; read/write errors must never be fatal to a
/// node — callers should log and fall through to recomputation.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, node_name: &str, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, node_name: &str, key: &str, value: String) -> Result<(), CacheError>;
    async fn clear(&self, node_name: Option<&str>) -> Result<(), CacheError>;
}

/// In-process, test/dev-oriented [`ResultCache`] backed by a concurrent map.
#[derive(Default)]
pub struct MemoryResultCache {
    entries: DashMap<String, DashMap<String, String>>,
}

impl MemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultCache for MemoryResultCache {
    async fn get(&self, node_name: &str, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .entries
            .get(node_name)
            .and_then(|bucket| bucket.get(key).map(|v| v.clone())))
    }

    async fn set(&self, node_name: &str, key: &str, value: String) -> Result<(), CacheError> {
        self.entries
            .entry(node_name.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn clear(&self, node_name: Option<&str>) -> Result<(), CacheError> {
        match node_name {
            Some(name) => {
                self.entries.remove(name);
            }
            None => self.entries.clear(),
        }
        Ok(())
    }
}

/// Canonical fingerprint: `stable_repr(body) ++ canonical_json(inputs) ++
/// canonical_json(root_input)`.
///
/// Rust closures have no stable textual representation, so `stable_repr`
/// here is the caller-supplied `body_version` tag (the node's declared name
/// plus an optional version string the node descriptor can set when its
/// body changes in a way that should invalidate old cache entries).
#[must_use]
pub fn cache_key(body_version: &str, inputs: &Value, root_input: &Value) -> String {
    canonical_digest(body_version, inputs, root_input)
}

/// Deterministic-ordering JSON canonicalisation plus a stable digest,
/// standing in for the source's "source text of the body" fingerprint.
mod fingerprint {
    use std::collections::BTreeMap;

    use crate::types::Value;

    pub fn canonical_digest(body_version: &str, inputs: &Value, root_input: &Value) -> String {
        let mut buf = String::new();
        buf.push_str(body_version);
        buf.push('\u{1}');
        buf.push_str(&canonical_json(inputs));
        buf.push('\u{1}');
        buf.push_str(&canonical_json(root_input));
        buf
    }

    /// Re-key every object with a `BTreeMap` so key order is deterministic,
    /// then serialise. `serde_json` preserves insertion order by default; a
    /// `BTreeMap` round-trip gives us lexicographic order instead.
    fn canonical_json(value: &Value) -> String {
        fn normalize(value: &Value) -> Value {
            match value {
                Value::Object(map) => {
                    let sorted: BTreeMap<String, Value> = map
                        .iter()
                        .map(|(k, v)| (k.clone(), normalize(v)))
                        .collect();
                    serde_json::to_value(sorted).unwrap_or(Value::Null)
                }
                Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
                other => other.clone(),
            }
        }
        serde_json::to_string(&normalize(value)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn round_trip() {
        let cache = MemoryResultCache::new();
        assert_eq!(cache.get("n", "k").await.unwrap(), None);
        cache.set("n", "k", "v".into()).await.unwrap();
        assert_eq!(cache.get("n", "k").await.unwrap(), Some("v".to_string()));
        cache.clear(Some("n")).await.unwrap();
        assert_eq!(cache.get("n", "k").await.unwrap(), None);
    }

    #[test]
    fn cache_key_is_order_independent() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(
            cache_key("node@1", &a, &Value::Null),
            cache_key("node@1", &b, &Value::Null)
        );
    }
}
