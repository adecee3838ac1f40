use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Extension;
use axum::Json;
use ayb_auth::{Principal, Role};
use ayb_error::{ApiError, ApiResult};
use ayb_realtime::Event;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Delivery, DeliveryPage, Webhook, WebhookInput, WebhookPatch, WebhookResponse};
use crate::state::WebhooksState;

const DEFAULT_PER_PAGE: i64 = 30;
const MAX_PER_PAGE: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct DeliveryListParams {
    pub page: Option<i64>,
    #[serde(rename = "perPage")]
    pub per_page: Option<i64>,
}

fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.anonymous {
        return Err(ApiError::Unauthorized);
    }
    match principal.role {
        Role::Admin => Ok(()),
        Role::User => Err(ApiError::ForbiddenScope),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookTestResult {
    pub success: bool,
    pub status_code: Option<i32>,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn list_webhooks(
    State(state): State<Arc<WebhooksState>>,
    Extension(principal): Extension<Arc<Principal>>,
) -> ApiResult<Json<Vec<WebhookResponse>>> {
    require_admin(&principal)?;
    let webhooks = sqlx::query_as::<_, Webhook>(
        "SELECT id, url, secret, events, tables, enabled, created_at, updated_at
         FROM _ayb_webhooks ORDER BY created_at DESC",
    )
    .fetch_all(&state.pool)
    .await
    .map_err(ayb_error::classify_sqlx_error)?;
    Ok(Json(webhooks.into_iter().map(WebhookResponse::from).collect()))
}

pub async fn create_webhook(
    State(state): State<Arc<WebhooksState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Json(input): Json<WebhookInput>,
) -> ApiResult<Json<WebhookResponse>> {
    require_admin(&principal)?;
    if !input.url.starts_with("http://") && !input.url.starts_with("https://") {
        return Err(ApiError::Validation("webhook url must be http(s)".to_string()));
    }
    let webhook = sqlx::query_as::<_, Webhook>(
        r#"INSERT INTO _ayb_webhooks (url, secret, events, tables, enabled)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING id, url, secret, events, tables, enabled, created_at, updated_at"#,
    )
    .bind(&input.url)
    .bind(&input.secret)
    .bind(&input.events)
    .bind(&input.tables)
    .bind(input.enabled)
    .fetch_one(&state.pool)
    .await
    .map_err(ayb_error::classify_sqlx_error)?;
    Ok(Json(webhook.into()))
}

pub async fn get_webhook(
    State(state): State<Arc<WebhooksState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookResponse>> {
    require_admin(&principal)?;
    let webhook = fetch_webhook(&state, id).await?;
    Ok(Json(webhook.into()))
}

pub async fn update_webhook(
    State(state): State<Arc<WebhooksState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Path(id): Path<Uuid>,
    Json(patch): Json<WebhookPatch>,
) -> ApiResult<Json<WebhookResponse>> {
    require_admin(&principal)?;
    let current = fetch_webhook(&state, id).await?;
    let url = patch.url.unwrap_or(current.url);
    let secret = patch.secret.unwrap_or(current.secret);
    let events = patch.events.unwrap_or(current.events);
    let tables = patch.tables.unwrap_or(current.tables);
    let enabled = patch.enabled.unwrap_or(current.enabled);

    let webhook = sqlx::query_as::<_, Webhook>(
        r#"UPDATE _ayb_webhooks
           SET url = $1, secret = $2, events = $3, tables = $4, enabled = $5, updated_at = now()
           WHERE id = $6
           RETURNING id, url, secret, events, tables, enabled, created_at, updated_at"#,
    )
    .bind(&url)
    .bind(&secret)
    .bind(&events)
    .bind(&tables)
    .bind(enabled)
    .bind(id)
    .fetch_one(&state.pool)
    .await
    .map_err(ayb_error::classify_sqlx_error)?;
    Ok(Json(webhook.into()))
}

pub async fn delete_webhook(
    State(state): State<Arc<WebhooksState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Path(id): Path<Uuid>,
) -> ApiResult<()> {
    require_admin(&principal)?;
    let result = sqlx::query("DELETE FROM _ayb_webhooks WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await
        .map_err(ayb_error::classify_sqlx_error)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(())
}

pub async fn test_webhook(
    State(state): State<Arc<WebhooksState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WebhookTestResult>> {
    require_admin(&principal)?;
    let webhook = fetch_webhook(&state, id).await?;
    let event = Event::test("_ayb_test");
    let attempt = crate::dispatch::deliver_test(&state, &webhook, &event).await;
    Ok(Json(WebhookTestResult {
        success: attempt.success,
        status_code: attempt.status_code,
        duration_ms: attempt.duration_ms,
        error: attempt.error,
    }))
}

pub async fn list_deliveries(
    State(state): State<Arc<WebhooksState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Path(id): Path<Uuid>,
    Query(params): Query<DeliveryListParams>,
) -> ApiResult<Json<DeliveryPage>> {
    require_admin(&principal)?;

    let page = params.page.unwrap_or(1).max(1);
    let per_page = params
        .per_page
        .unwrap_or(DEFAULT_PER_PAGE)
        .clamp(1, MAX_PER_PAGE);
    let offset = (page - 1) * per_page;

    let items = sqlx::query_as::<_, Delivery>(
        r#"SELECT id, webhook_id, event_action, event_table, success, status_code, attempt,
                  duration_ms, error, request_body, response_body, delivered_at
           FROM _ayb_webhook_deliveries
           WHERE webhook_id = $1
           ORDER BY delivered_at DESC
           LIMIT $2 OFFSET $3"#,
    )
    .bind(id)
    .bind(per_page)
    .bind(offset)
    .fetch_all(&state.pool)
    .await
    .map_err(ayb_error::classify_sqlx_error)?;

    let total_items: i64 =
        sqlx::query_scalar("SELECT count(*) FROM _ayb_webhook_deliveries WHERE webhook_id = $1")
            .bind(id)
            .fetch_one(&state.pool)
            .await
            .map_err(ayb_error::classify_sqlx_error)?;
    let total_pages = (total_items + per_page - 1) / per_page;

    Ok(Json(DeliveryPage {
        items,
        page,
        per_page,
        total_items,
        total_pages,
    }))
}

pub async fn get_delivery(
    State(state): State<Arc<WebhooksState>>,
    Extension(principal): Extension<Arc<Principal>>,
    Path((webhook_id, delivery_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Delivery>> {
    require_admin(&principal)?;
    let delivery = sqlx::query_as::<_, Delivery>(
        r#"SELECT id, webhook_id, event_action, event_table, success, status_code, attempt,
                  duration_ms, error, request_body, response_body, delivered_at
           FROM _ayb_webhook_deliveries
           WHERE webhook_id = $1 AND id = $2"#,
    )
    .bind(webhook_id)
    .bind(delivery_id)
    .fetch_optional(&state.pool)
    .await
    .map_err(ayb_error::classify_sqlx_error)?
    .ok_or(ApiError::NotFound)?;
    Ok(Json(delivery))
}

async fn fetch_webhook(state: &WebhooksState, id: Uuid) -> ApiResult<Webhook> {
    sqlx::query_as::<_, Webhook>(
        "SELECT id, url, secret, events, tables, enabled, created_at, updated_at
         FROM _ayb_webhooks WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await
    .map_err(ayb_error::classify_sqlx_error)?
    .ok_or(ApiError::NotFound)
}
