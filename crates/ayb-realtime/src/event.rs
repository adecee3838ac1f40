use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Create,
    Update,
    Delete,
    Test,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Create => "create",
            EventAction::Update => "update",
            EventAction::Delete => "delete",
            EventAction::Test => "test",
        }
    }
}

/// One committed row change (or a synthetic admin test), as broadcast to
/// every realtime subscriber and webhook match. Cheap to clone: `record` is
/// an `Arc`-backed `serde_json::Value` internally via `Value`'s own sharing,
/// but nothing here forces a clone — subscribers receive it by value off a
/// `broadcast` channel, which itself clones on send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub action: EventAction,
    pub table: String,
    pub record: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl Event {
    pub fn test(table: impl Into<String>) -> Self {
        Self {
            action: EventAction::Test,
            table: table.into(),
            record: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    /// Parses the compact JSON object the `_ayb_notify_row_change` trigger
    /// publishes: `{"action", "table", "record", "at"}`.
    pub fn from_notify_payload(payload: &str) -> Result<Self, RealtimeError> {
        let event: Event = serde_json::from_str(payload)?;
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trigger_payload() {
        let payload = r#"{"action":"create","table":"widgets","record":{"id":1},"at":"2026-01-01T00:00:00.000Z"}"#;
        let event = Event::from_notify_payload(payload).unwrap();
        assert_eq!(event.action, EventAction::Create);
        assert_eq!(event.table, "widgets");
        assert_eq!(event.record["id"], 1);
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(Event::from_notify_payload("not json").is_err());
    }

    #[test]
    fn test_event_has_null_record() {
        let event = Event::test("widgets");
        assert_eq!(event.action, EventAction::Test);
        assert!(event.record.is_null());
    }
}
