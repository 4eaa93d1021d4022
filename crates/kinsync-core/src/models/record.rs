//! Schemaless record model
//!
//! Records are kept as JSON objects so fields added by newer clients survive a
//! round trip through older ones. Only `id` and `timestamp` carry meaning for
//! replication; everything else is opaque payload.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Record identifier. Clients have historically used both numbers and strings.
///
/// `1` and `"1"` are distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl RecordId {
    /// Interpret a JSON value as an id. Floats, booleans and containers are not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_i64().map(Self::Int),
            Value::String(text) => Some(Self::Text(text.clone())),
            _ => None,
        }
    }

    /// JSON representation of this id.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(number) => Value::from(*number),
            Self::Text(text) => Value::String(text.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for RecordId {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

/// One item of a collection (user, post, message, tree node, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record carrying only an id and a timestamp
    #[must_use]
    pub fn with_id(id: impl Into<RecordId>, timestamp: i64) -> Self {
        let mut record = Self::new();
        record.set("id", id.into().to_value());
        record.set("timestamp", timestamp);
        record
    }

    /// Build a record from an arbitrary JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidInput(format!(
                "record must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn id(&self) -> Option<RecordId> {
        self.0.get("id").and_then(RecordId::from_value)
    }

    /// Like [`Record::id`] but fails for records that cannot be keyed.
    pub fn require_id(&self) -> Result<RecordId> {
        self.id()
            .ok_or_else(|| Error::InvalidInput("record is missing a string or integer id".into()))
    }

    /// Timestamp (Unix ms), if present and integral. Used when stamping records.
    pub fn timestamp(&self) -> Option<i64> {
        self.0.get("timestamp").and_then(Value::as_i64)
    }

    /// Timestamp as compared by last-write-wins: any JSON number, so a
    /// fractional value still takes part in conflict resolution.
    pub fn conflict_time(&self) -> Option<f64> {
        self.0.get("timestamp").and_then(Value::as_f64)
    }

    /// Raise `timestamp` to at least `at`; never lowers it.
    pub fn touch(&mut self, at: i64) {
        let next = self.timestamp().map_or(at, |current| current.max(at));
        self.set("timestamp", next);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Run `f` over an array field. Missing or non-array values start out empty.
    pub fn update_array<R>(&mut self, key: &str, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        let mut items = match self.0.remove(key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let result = f(&mut items);
        self.0.insert(key.to_string(), Value::Array(items));
        result
    }

    /// Whether `field` holds the given id (used for soft references like `userId`).
    pub fn refers_to(&self, field: &str, id: &RecordId) -> bool {
        self.0
            .get(field)
            .and_then(RecordId::from_value)
            .is_some_and(|value| &value == id)
    }

    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(value: Map<String, Value>) -> Self {
        Self(value)
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ids_keep_numeric_and_text_forms_apart() {
        let numeric = Record::from_value(json!({"id": 1})).unwrap();
        let text = Record::from_value(json!({"id": "1"})).unwrap();
        assert_eq!(numeric.id(), Some(RecordId::Int(1)));
        assert_eq!(text.id(), Some(RecordId::Text("1".to_string())));
        assert_ne!(numeric.id(), text.id());
    }

    #[test]
    fn unusable_ids_are_none() {
        let record = Record::from_value(json!({"id": 1.5})).unwrap();
        assert_eq!(record.id(), None);
        assert!(record.require_id().is_err());
        assert_eq!(Record::new().id(), None);
    }

    #[test]
    fn touch_only_moves_forward() {
        let mut record = Record::with_id("p1", 200);
        record.touch(100);
        assert_eq!(record.timestamp(), Some(200));
        record.touch(300);
        assert_eq!(record.timestamp(), Some(300));

        let mut fresh = Record::new();
        fresh.touch(42);
        assert_eq!(fresh.timestamp(), Some(42));
    }

    #[test]
    fn from_value_rejects_non_objects() {
        let err = Record::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn update_array_replaces_non_array_values() {
        let mut record = Record::from_value(json!({"likes": "oops"})).unwrap();
        record.update_array("likes", |likes| likes.push(json!("u1")));
        assert_eq!(record.get("likes"), Some(&json!(["u1"])));
    }

    #[test]
    fn serializes_transparently() {
        let record = Record::from_value(json!({"id": 3, "v": "a"})).unwrap();
        assert_eq!(serde_json::to_value(&record).unwrap(), json!({"id": 3, "v": "a"}));
    }
}
