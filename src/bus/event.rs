//! Event records flowing through the bus

use crate::{OverseerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An agent finished initialization and joined the pool
pub const AGENT_SPAWNED: &str = "agent:spawned";
/// Periodic or activity-driven agent status report
pub const AGENT_HEARTBEAT: &str = "agent:heartbeat";
/// An agent left the pool
pub const AGENT_TERMINATED: &str = "agent:terminated";
/// An agent failed, or could not be initialized
pub const AGENT_ERROR: &str = "agent:error";
/// A busy agent stopped reporting
pub const AGENT_STUCK: &str = "agent:stuck";
/// Operational alert with a `level`
pub const SYSTEM_ALERT: &str = "system:alert";
/// Latency report with `response_time_ms`
pub const SYSTEM_PERFORMANCE: &str = "system:performance";
/// Memory growth report
pub const MEMORY_LEAK: &str = "memory:leak";
/// A user opened a page
pub const PAGE_VIEW: &str = "page:view";

/// Immutable event as stored in history and broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalEvent {
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    pub source: String,

    #[serde(default)]
    pub payload: Value,

    pub timestamp: DateTime<Utc>,
}

impl GlobalEvent {
    /// Part of the type before the first `:` (`agent` for `agent:error`)
    pub fn prefix(&self) -> &str {
        self.event_type
            .split_once(':')
            .map_or(self.event_type.as_str(), |(prefix, _)| prefix)
    }

    /// String field of the payload
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Numeric field of the payload
    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(Value::as_f64)
    }

    /// Agent the event refers to, if any
    pub fn agent_id(&self) -> Option<&str> {
        self.payload_str("agent_id")
    }

    /// Session the event belongs to, if any
    pub fn session_id(&self) -> Option<&str> {
        self.payload_str("session_id")
    }
}

/// Event as submitted by a producer, before validation
///
/// Deserializes from the wire shape `{"type": ..., "source": ..., "payload": {...}}`;
/// `data` is accepted as an alias for `payload`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default, alias = "data")]
    pub payload: Value,
}

impl EventDraft {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            event_type: Some(event_type.into()),
            source: Some(source.into()),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Check required fields, returning the trimmed `(type, source)` pair
    pub fn validate(&self) -> Result<(String, String)> {
        let event_type = required(self.event_type.as_deref(), "type")?;
        let source = required(self.source.as_deref(), "source")?;
        if !self.payload.is_null() && !self.payload.is_object() {
            return Err(OverseerError::MalformedEvent(format!(
                "payload of '{}' must be an object",
                event_type
            )));
        }
        Ok((event_type, source))
    }
}

fn required(value: Option<&str>, field: &str) -> Result<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(OverseerError::MalformedEvent(format!(
            "missing required field '{}'",
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_requires_type_and_source() {
        assert!(EventDraft::new("page:view", "web").validate().is_ok());

        let no_type = EventDraft {
            source: Some("web".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            no_type.validate(),
            Err(OverseerError::MalformedEvent(_))
        ));

        let blank_source = EventDraft::new("page:view", "  ");
        assert!(blank_source.validate().is_err());
    }

    #[test]
    fn test_payload_must_be_object() {
        let draft = EventDraft::new("page:view", "web").with_payload(json!([1, 2]));
        assert!(draft.validate().is_err());

        let draft = EventDraft::new("page:view", "web").with_payload(json!({"page": "/"}));
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_draft_wire_shape() {
        let draft: EventDraft = serde_json::from_str(
            r#"{"type": "system:alert", "source": "monitor", "data": {"level": "critical"}}"#,
        )
        .unwrap();
        assert_eq!(draft.event_type.as_deref(), Some("system:alert"));
        assert_eq!(draft.payload["level"], "critical");

        let missing: EventDraft = serde_json::from_str(r#"{"source": "monitor"}"#).unwrap();
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_event_accessors() {
        let event = GlobalEvent {
            id: "evt-1".to_string(),
            event_type: "agent:error".to_string(),
            source: "pool".to_string(),
            payload: json!({"agent_id": "coder-1", "response_time_ms": 12.5}),
            timestamp: Utc::now(),
        };
        assert_eq!(event.prefix(), "agent");
        assert_eq!(event.agent_id(), Some("coder-1"));
        assert_eq!(event.payload_f64("response_time_ms"), Some(12.5));
        assert_eq!(event.session_id(), None);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "agent:error");
    }
}
