//! Outbox entry model

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A mutation deferred while the client was offline.
///
/// The payload is kept as raw JSON so an entry written by a newer client (or a
/// damaged one) can still be listed and dropped instead of poisoning the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Queue-unique, strictly increasing (Unix ms, bumped on collision).
    pub id: i64,
    /// Mutation tag, e.g. `ADD_POST`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    /// When the action was invoked (Unix ms).
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn uses_type_on_the_wire() {
        let entry = OutboxEntry {
            id: 7,
            kind: "ADD_POST".to_string(),
            payload: json!({"id": "p1"}),
            timestamp: 7,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({"id": 7, "type": "ADD_POST", "payload": {"id": "p1"}, "timestamp": 7})
        );
    }
}
