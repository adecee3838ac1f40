//! C10 — Webhook Dispatcher.
//!
//! One task drains the event queue and, for each event, loads the enabled
//! webhooks straight from the store (no cache layer — the table is tiny and
//! admin-mutated rarely enough that a round trip per event is cheap) and
//! spawns one delivery task per match so a slow endpoint cannot delay
//! delivery to the others.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use uuid::Uuid;

use ayb_realtime::Event;

use crate::model::Webhook;
use crate::signing::sign;
use crate::state::WebhooksState;

// "Up to 3 attempts with fixed delays of 1s, 5s, 25s" reads as 3 retries
// after the initial try, so 4 deliveries total in the worst case.
const MAX_ATTEMPTS: u32 = 4;
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(5),
    Duration::from_secs(25),
];
const MAX_REQUEST_BODY_LOG: usize = 4096;
const MAX_RESPONSE_BODY_LOG: usize = 1024;

pub async fn run(state: Arc<WebhooksState>, mut queue_rx: tokio::sync::mpsc::Receiver<Event>) {
    while let Some(event) = queue_rx.recv().await {
        let webhooks = match load_enabled(&state.pool).await {
            Ok(webhooks) => webhooks,
            Err(err) => {
                tracing::error!(error = %err, "failed to load webhooks for dispatch");
                continue;
            }
        };
        let event = Arc::new(event);
        for webhook in webhooks.into_iter().filter(|w| w.matches(&event)) {
            let state = state.clone();
            let event = event.clone();
            tokio::spawn(async move {
                deliver(&state, &webhook, &event).await;
            });
        }
    }
}

async fn load_enabled(pool: &PgPool) -> Result<Vec<Webhook>, sqlx::Error> {
    sqlx::query_as::<_, Webhook>(
        r#"SELECT id, url, secret, events, tables, enabled, created_at, updated_at
           FROM _ayb_webhooks WHERE enabled = true"#,
    )
    .fetch_all(pool)
    .await
}

/// The outcome of a single HTTP attempt against a webhook's URL, shared by
/// the retrying dispatch loop and the synchronous `/test` endpoint.
pub struct Attempt {
    pub success: bool,
    pub status_code: Option<i32>,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub response_body: Option<String>,
}

async fn send_once(state: &WebhooksState, webhook: &Webhook, body: &str) -> Attempt {
    let started = Instant::now();
    let mut request = state
        .client
        .post(&webhook.url)
        .timeout(state.request_timeout)
        .header("Content-Type", "application/json");
    if let Some(secret) = &webhook.secret {
        request = request.header("X-AYB-Signature", sign(secret, body));
    }

    let outcome = request.body(body.to_string()).send().await;
    let duration_ms = started.elapsed().as_millis() as i64;

    match outcome {
        Ok(response) => {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            Attempt {
                success: status.is_success(),
                status_code: Some(status.as_u16() as i32),
                error: None,
                duration_ms,
                response_body: Some(truncate(&text, MAX_RESPONSE_BODY_LOG)),
            }
        }
        Err(err) => Attempt {
            success: false,
            status_code: None,
            error: Some(err.to_string()),
            duration_ms,
            response_body: None,
        },
    }
}

/// Delivers one synthetic test event to `webhook` with a single attempt —
/// no retries, no queueing — and reports the raw HTTP outcome back to the
/// caller instead of only persisting a delivery row, so `POST
/// /api/webhooks/{id}/test` can respond with what actually happened.
pub async fn deliver_test(state: &WebhooksState, webhook: &Webhook, event: &Event) -> Attempt {
    let body = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    let attempt = send_once(state, webhook, &body).await;

    if let Err(err) = record_delivery(
        &state.pool,
        webhook.id,
        event,
        attempt.success,
        attempt.status_code,
        1,
        attempt.duration_ms,
        attempt.error.as_deref(),
        Some(&truncate(&body, MAX_REQUEST_BODY_LOG)),
        attempt.response_body.as_deref(),
    )
    .await
    {
        tracing::error!(error = %err, webhook_id = %webhook.id, "failed to record webhook test delivery");
    }

    attempt
}

async fn deliver(state: &WebhooksState, webhook: &Webhook, event: &Event) {
    let body = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());

    for attempt in 1..=MAX_ATTEMPTS {
        let outcome = send_once(state, webhook, &body).await;
        let (success, status_code, error, duration_ms, response_body) = (
            outcome.success,
            outcome.status_code,
            outcome.error,
            outcome.duration_ms,
            outcome.response_body,
        );

        if let Err(err) = record_delivery(
            &state.pool,
            webhook.id,
            event,
            success,
            status_code,
            attempt as i32,
            duration_ms,
            error.as_deref(),
            Some(&truncate(&body, MAX_REQUEST_BODY_LOG)),
            response_body.as_deref(),
        )
        .await
        {
            tracing::error!(error = %err, webhook_id = %webhook.id, "failed to record webhook delivery");
        }

        if success {
            return;
        }
        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(RETRY_DELAYS[(attempt - 1) as usize]).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn record_delivery(
    pool: &PgPool,
    webhook_id: Uuid,
    event: &Event,
    success: bool,
    status_code: Option<i32>,
    attempt: i32,
    duration_ms: i64,
    error: Option<&str>,
    request_body: Option<&str>,
    response_body: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO _ayb_webhook_deliveries
           (webhook_id, event_action, event_table, success, status_code, attempt,
            duration_ms, error, request_body, response_body)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
    )
    .bind(webhook_id)
    .bind(event.action.as_str())
    .bind(&event.table)
    .bind(success)
    .bind(status_code)
    .bind(attempt)
    .bind(duration_ms)
    .bind(error)
    .bind(request_body)
    .bind(response_body)
    .execute(pool)
    .await?;
    Ok(())
}

fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_strings_whole() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn truncate_cuts_on_char_boundary() {
        let s = "a".repeat(10) + "é";
        let truncated = truncate(&s, 10);
        assert_eq!(truncated.len(), 10);
    }
}
