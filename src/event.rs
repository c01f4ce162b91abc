//! Event types for the analytics collector API.
//!
//! Events are opaque JSON objects. The collector expects each one to carry a
//! `"type"` discriminator, but nothing here enforces it.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key of the discriminator field every event should carry.
pub const TYPE_FIELD: &str = "type";

/// A single analytics event.
///
/// Serializes to exactly the JSON object it wraps, so it can be sent as the
/// body of a `/track` request unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    /// Create an event with only its `"type"` field set.
    pub fn new(event_type: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(TYPE_FIELD.to_string(), Value::String(event_type.into()));
        Self(fields)
    }

    /// Add a field, replacing any previous value under the same key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a field in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a field by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The `"type"` discriminator, if present and a string.
    pub fn event_type(&self) -> Option<&str> {
        self.0.get(TYPE_FIELD).and_then(Value::as_str)
    }

    /// Number of fields, including `"type"`.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Body of a `/batch` request.
///
/// Built at send time; `sent_at` is when the batch left the client, not when
/// the individual events were created.
#[derive(Debug, Serialize)]
pub struct BatchEnvelope<'a> {
    pub batch: &'a [Event],

    #[serde(rename = "sentAt")]
    pub sent_at: String,
}

impl<'a> BatchEnvelope<'a> {
    /// Wrap `events` and stamp the envelope with the current time.
    pub fn now(events: &'a [Event]) -> Self {
        Self {
            batch: events,
            sent_at: timestamp_now(),
        }
    }
}

/// Current UTC time as RFC 3339 with millisecond precision, e.g.
/// `2024-05-01T12:00:00.123Z`.
///
/// Read from the system wall clock. Successive calls only produce
/// non-decreasing values while that clock does not step backwards.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_new_sets_type() {
        let event = Event::new("Heartbeat");
        assert_eq!(event.event_type(), Some("Heartbeat"));
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn test_event_serializes_as_plain_object() {
        let event = Event::new("Download Started")
            .with("stream", "lbry://what")
            .with("size", 42);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "Download Started", "stream": "lbry://what", "size": 42})
        );
    }

    #[test]
    fn test_event_deserialization() {
        let event: Event = serde_json::from_str(r#"{"type": "A", "n": 1}"#).unwrap();
        assert_eq!(event.event_type(), Some("A"));
        assert_eq!(event.get("n"), Some(&json!(1)));

        // Objects only
        assert!(serde_json::from_str::<Event>("[1, 2]").is_err());
    }

    #[test]
    fn test_event_without_type_is_allowed() {
        let event: Event = serde_json::from_str(r#"{"name": "untyped"}"#).unwrap();
        assert!(event.event_type().is_none());
        assert!(!event.is_empty());
    }

    #[test]
    fn test_batch_envelope_shape() {
        let events = vec![Event::new("A"), Event::new("B")];
        let envelope = BatchEnvelope::now(&events);
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["batch"], json!([{"type": "A"}, {"type": "B"}]));
        assert!(value["sentAt"].is_string());
        assert!(value.get("sent_at").is_none());
    }

    #[test]
    fn test_timestamp_format() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
