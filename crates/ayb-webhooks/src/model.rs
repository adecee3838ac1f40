use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use ayb_realtime::Event;

/// A registered webhook. `events`/`tables` are `NULL`-able in storage so
/// "subscribe to everything" (`NULL`) and "subscribe to nothing" (`{}`,
/// events only) are distinguishable — see [`Webhook::matches`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Webhook {
    pub id: Uuid,
    pub url: String,
    pub secret: Option<String>,
    pub events: Option<Vec<String>>,
    pub tables: Option<Vec<String>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    /// Exact matching rules: a table list that is absent or empty matches
    /// every table; an event list that is absent matches every action, but
    /// an explicit empty list matches none.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.enabled {
            return false;
        }
        let table_matches = match &self.tables {
            None => true,
            Some(tables) => tables.is_empty() || tables.iter().any(|t| t == &event.table),
        };
        let event_matches = match &self.events {
            None => true,
            Some(events) => !events.is_empty() && events.iter().any(|e| e == event.action.as_str()),
        };
        table_matches && event_matches
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookInput {
    pub url: String,
    pub secret: Option<String>,
    pub events: Option<Vec<String>>,
    pub tables: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// What the API actually returns for a webhook: the secret itself never
/// leaves this crate once stored, only whether one is set.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    pub id: Uuid,
    pub url: String,
    pub has_secret: bool,
    pub events: Option<Vec<String>>,
    pub tables: Option<Vec<String>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Webhook> for WebhookResponse {
    fn from(webhook: Webhook) -> Self {
        Self {
            id: webhook.id,
            url: webhook.url,
            has_secret: webhook.secret.is_some(),
            events: webhook.events,
            tables: webhook.tables,
            enabled: webhook.enabled,
            created_at: webhook.created_at,
            updated_at: webhook.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPatch {
    pub url: Option<String>,
    pub secret: Option<Option<String>>,
    pub events: Option<Option<Vec<String>>>,
    pub tables: Option<Option<Vec<String>>>,
    pub enabled: Option<bool>,
}

/// The paginated envelope for `GET /api/webhooks/{id}/deliveries`, the same
/// shape `ayb_collections::ListResponse` uses for table listings.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPage {
    pub items: Vec<Delivery>,
    pub page: i64,
    pub per_page: i64,
    pub total_items: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Delivery {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_action: String,
    pub event_table: String,
    pub success: bool,
    pub status_code: Option<i32>,
    pub attempt: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayb_realtime::EventAction;

    fn event(table: &str, action: EventAction) -> Event {
        Event {
            action,
            table: table.to_string(),
            record: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    fn webhook(events: Option<Vec<&str>>, tables: Option<Vec<&str>>) -> Webhook {
        Webhook {
            id: Uuid::now_v7(),
            url: "https://example.test/hook".to_string(),
            secret: None,
            events: events.map(|v| v.into_iter().map(String::from).collect()),
            tables: tables.map(|v| v.into_iter().map(String::from).collect()),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn nil_events_matches_everything() {
        let hook = webhook(None, None);
        assert!(hook.matches(&event("widgets", EventAction::Create)));
        assert!(hook.matches(&event("widgets", EventAction::Delete)));
    }

    #[test]
    fn empty_events_matches_nothing() {
        let hook = webhook(Some(vec![]), None);
        assert!(!hook.matches(&event("widgets", EventAction::Create)));
    }

    #[test]
    fn explicit_tables_restrict_to_listed() {
        let hook = webhook(None, Some(vec!["widgets"]));
        assert!(hook.matches(&event("widgets", EventAction::Create)));
        assert!(!hook.matches(&event("gadgets", EventAction::Create)));
    }

    #[test]
    fn disabled_webhook_never_matches() {
        let mut hook = webhook(None, None);
        hook.enabled = false;
        assert!(!hook.matches(&event("widgets", EventAction::Create)));
    }
}
