use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Map, Value};

/// key: document-store -> minimal persistence collaborator
///
/// The metering core is written against this interface only: keyed JSON
/// documents with an atomic numeric increment and a conditional claim write.
/// Field arguments accept `.`-separated paths into nested objects.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    /// Shallow-merges `patch` (an object) into the document at `key`,
    /// creating the document when absent.
    async fn merge(&self, key: &str, patch: Value) -> Result<()>;
    /// Atomically adds `delta` to a numeric field and returns the new value.
    /// Missing documents and fields start from zero.
    async fn increment(&self, key: &str, field: &str, delta: i64) -> Result<i64>;
    /// Sets `field` to `value` only when its current value differs; returns
    /// whether the write happened. Single atomic conditional write.
    async fn claim_field(&self, key: &str, field: &str, value: Value) -> Result<bool>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

/// key: document-store-memory -> single-process implementation
///
/// Backed by a `DashMap`; the entry guard serializes all mutations of one
/// document, which is what gives `increment` and `claim_field` their
/// atomicity. State lives in process memory only, so counters lose precision
/// across restarts and are not shared between replicas. Suitable for the dev
/// server and the test-suite, never for billing-relevant quotas in a
/// multi-instance deployment.
#[derive(Default)]
pub struct MemoryStore {
    docs: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedStore {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.docs.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.docs.insert(key.to_string(), value);
        Ok(())
    }

    async fn merge(&self, key: &str, patch: Value) -> Result<()> {
        let patch = match patch {
            Value::Object(map) => map,
            other => return Err(anyhow!("merge patch must be an object, got {other}")),
        };
        let mut entry = self
            .docs
            .entry(key.to_string())
            .or_insert_with(|| json!({}));
        let doc = object_mut(entry.value_mut(), key)?;
        for (field, value) in patch {
            doc.insert(field, value);
        }
        Ok(())
    }

    async fn increment(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut entry = self
            .docs
            .entry(key.to_string())
            .or_insert_with(|| json!({}));
        let slot = field_slot(entry.value_mut(), key, field)?;
        let current = slot.as_i64().unwrap_or(0);
        let next = current + delta;
        *slot = json!(next);
        Ok(next)
    }

    async fn claim_field(&self, key: &str, field: &str, value: Value) -> Result<bool> {
        let mut entry = self
            .docs
            .entry(key.to_string())
            .or_insert_with(|| json!({}));
        let slot = field_slot(entry.value_mut(), key, field)?;
        if *slot == value {
            return Ok(false);
        }
        *slot = value;
        Ok(true)
    }
}

fn object_mut<'a>(value: &'a mut Value, key: &str) -> Result<&'a mut Map<String, Value>> {
    value
        .as_object_mut()
        .ok_or_else(|| anyhow!("document `{key}` is not an object"))
}

/// Walks a `.`-separated field path, creating intermediate objects.
fn field_slot<'a>(doc: &'a mut Value, key: &str, field: &str) -> Result<&'a mut Value> {
    let mut current = doc;
    let mut segments = field.split('.').peekable();
    while let Some(segment) = segments.next() {
        let map = object_mut(current, key)?;
        let slot = map.entry(segment.to_string()).or_insert(Value::Null);
        if segments.peek().is_some() && !slot.is_object() {
            *slot = json!({});
        }
        current = slot;
    }
    Ok(current)
}
