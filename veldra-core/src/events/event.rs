//! The event type exchanged over the bus.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An immutable event published on the bus.
///
/// Events carry a type string used for subscription routing, the name of the
/// component that published them, an epoch-millisecond timestamp fixed at
/// construction, and a string-keyed payload of arbitrary JSON values. The
/// serde representation is exactly the JSONL persistence line schema:
/// `{"type", "source", "timestamp", "payload"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    event_type: String,
    source: String,
    timestamp: i64,
    payload: HashMap<String, Value>,
}

impl Event {
    /// Create an event with an empty payload, stamped now.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self::with_payload(event_type, source, HashMap::new())
    }

    /// Create an event with the given payload, stamped now.
    pub fn with_payload(
        event_type: impl Into<String>,
        source: impl Into<String>,
        payload: HashMap<String, Value>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now().timestamp_millis(),
            payload,
        }
    }

    /// Start building an event with a fluent payload API.
    pub fn builder(event_type: impl Into<String>, source: impl Into<String>) -> EventBuilder {
        EventBuilder {
            event_type: event_type.into(),
            source: source.into(),
            payload: HashMap::new(),
        }
    }

    /// Event type used for subscription routing.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Name of the component that published the event.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Milliseconds since the Unix epoch, fixed at construction.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The full payload map.
    pub fn payload(&self) -> &HashMap<String, Value> {
        &self.payload
    }

    /// Look up a payload value by key.
    pub fn payload_value(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Look up a payload value by key, as a string if it is one.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Fluent builder for [`Event`].
#[derive(Debug)]
pub struct EventBuilder {
    event_type: String,
    source: String,
    payload: HashMap<String, Value>,
}

impl EventBuilder {
    /// Add a single payload entry.
    pub fn payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Merge a map of payload entries.
    pub fn payload_map(mut self, payload: HashMap<String, Value>) -> Self {
        self.payload.extend(payload);
        self
    }

    /// Finish the builder; the timestamp is fixed here.
    pub fn build(self) -> Event {
        Event::with_payload(self.event_type, self.source, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_payload() {
        let event = Event::builder("PaymentProcessed", "payments")
            .payload("amount", 42)
            .payload("currency", "EUR")
            .build();

        assert_eq!(event.event_type(), "PaymentProcessed");
        assert_eq!(event.source(), "payments");
        assert_eq!(event.payload_value("amount"), Some(&json!(42)));
        assert_eq!(event.payload_str("currency"), Some("EUR"));
        assert!(event.timestamp() > 0);
    }

    #[test]
    fn serde_line_schema_round_trips() {
        let event = Event::builder("UserCreated", "users").payload("id", "u-1").build();

        let line = serde_json::to_string(&event).expect("serialize");
        assert!(line.contains("\"type\":\"UserCreated\""));

        let back: Event = serde_json::from_str(&line).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn missing_payload_key_is_none() {
        let event = Event::new("T", "s");
        assert!(event.payload_value("absent").is_none());
        assert!(event.payload_str("absent").is_none());
    }
}
