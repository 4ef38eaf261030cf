//! Ephemeral key/value map exposed to scripts as `userMap`

use serde_json::{Map, Value};

/// Key holding the default upstream response (`{ body: <context> }` as JSON text)
pub const DEFAULT_RESPONSE_KEY: &str = "api:API01";

/// String-keyed map of JSON values, owned by exactly one run.
///
/// Keys iterate in insertion order, like a JS `Map` (serde_json's
/// `preserve_order` map).
#[derive(Debug, Clone, Default)]
pub struct ScratchMap {
    entries: Map<String, Value>,
}

impl ScratchMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map pre-seeded with the default response payload
    pub fn seeded(default_response: impl Into<String>) -> Self {
        let mut map = Self::new();
        map.put(DEFAULT_RESPONSE_KEY, Value::String(default_response.into()));
        map
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.entries.shift_remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// The JS `typeof` of a stored value, `"undefined"` when absent
pub fn js_typeof(value: Option<&Value>) -> &'static str {
    match value {
        None => "undefined",
        Some(Value::String(_)) => "string",
        Some(Value::Number(_)) => "number",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Null | Value::Array(_) | Value::Object(_)) => "object",
    }
}
