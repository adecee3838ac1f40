//! C9 — Realtime Hub.
//!
//! Exposes `GET /api/realtime?tables=a,b,c` as an SSE stream. Each
//! connection owns one `broadcast::Receiver<Event>`; as it trails the shared
//! bus, it filters by requested table, re-checks row-level visibility, and
//! frames the survivors the way the SSE examples in the corpus do —
//! `id:`/`event:`/`data:` — via `axum::response::sse`.

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Extension;
use ayb_auth::Principal;
use ayb_db::{SessionContext, SessionGuard};
use ayb_schema::cache::CacheHolder;
use ayb_schema::snapshot::Table;
use futures::Stream;
use serde::Deserialize;
use sqlx::PgPool;
use tokio::sync::broadcast;

use crate::event::Event;

pub struct HubState {
    pub pool: PgPool,
    pub cache: Arc<CacheHolder>,
    pub events: broadcast::Sender<Event>,
    pub heartbeat: Duration,
}

impl HubState {
    pub fn new(
        pool: PgPool,
        cache: Arc<CacheHolder>,
        events: broadcast::Sender<Event>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            pool,
            cache,
            events,
            heartbeat,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    pub tables: Option<String>,
}

fn session_context(principal: &Principal) -> SessionContext {
    SessionContext {
        role: match principal.role {
            ayb_auth::Role::Admin => "admin".to_string(),
            ayb_auth::Role::User => "user".to_string(),
        },
        user_id: Some(principal.id.clone()),
        user_email: principal.email.clone(),
        app_id: principal.app_id.clone(),
        scope: principal.scope.as_str().to_string(),
        allowed_tables: principal.allowed_tables.clone(),
    }
}

fn single_primary_key(table: &Table) -> Option<&str> {
    match table.primary_key.as_slice() {
        [pk] => Some(pk.as_str()),
        _ => None,
    }
}

struct StreamState {
    rx: broadcast::Receiver<Event>,
    hub: Arc<HubState>,
    session: SessionContext,
    tables: HashSet<String>,
    next_id: u64,
    closed: bool,
}

/// Re-runs the cheap `SELECT 1 ... WHERE pk = $1` the design calls for: the
/// event already cleared the table-membership check, this confirms the
/// subscriber's own RLS policies still see the row. Tables with no single
/// primary key, or a record missing that column (e.g. a delete on a table
/// whose trigger fired before a later migration dropped the column), fall
/// back to allowing the event through rather than silently suppressing it.
async fn rls_visible(hub: &HubState, session: &SessionContext, event: &Event) -> bool {
    let snapshot = hub.cache.get();
    let Some(table) = snapshot.table(&event.table) else {
        return false;
    };
    let Some(pk) = single_primary_key(table) else {
        return true;
    };
    let Some(pk_value) = event.record.get(pk) else {
        return true;
    };
    let pk_str = match pk_value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => return true,
        other => other.to_string(),
    };

    let mut session = match SessionGuard::begin(&hub.pool, session, true).await {
        Ok(session) => session,
        Err(err) => {
            tracing::warn!(error = %err, table = %table.name, "realtime RLS recheck failed to open session");
            return false;
        }
    };

    let sql = format!(
        r#"SELECT 1 FROM "{}"."{}" WHERE "{}" = $1 LIMIT 1"#,
        table.schema, table.name, pk
    );
    let visible = sqlx::query(&sql)
        .bind(&pk_str)
        .fetch_optional(&mut *session.conn())
        .await;
    let _ = session.rollback().await;
    matches!(visible, Ok(Some(_)))
}

pub async fn stream(
    State(hub): State<Arc<HubState>>,
    Query(params): Query<RealtimeParams>,
    Extension(principal): Extension<Arc<Principal>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let snapshot = hub.cache.get();
    let tables: HashSet<String> = match params.tables {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .filter(|t| principal.can_access_table(t) && snapshot.table(t).is_some())
            .map(String::from)
            .collect(),
        None => snapshot
            .tables
            .keys()
            .filter(|t| principal.can_access_table(t))
            .cloned()
            .collect(),
    };

    let state = StreamState {
        rx: hub.events.subscribe(),
        hub: hub.clone(),
        session: session_context(&principal),
        tables,
        next_id: 0,
        closed: false,
    };

    let stream = futures::stream::unfold(state, move |mut state| async move {
        if state.closed {
            return None;
        }
        loop {
            match state.rx.recv().await {
                Ok(event) => {
                    if !state.tables.contains(&event.table) {
                        continue;
                    }
                    if !rls_visible(&state.hub, &state.session, &event).await {
                        continue;
                    }
                    state.next_id += 1;
                    let frame = SseEvent::default()
                        .id(state.next_id.to_string())
                        .event(event.action.as_str())
                        .json_data(&event)
                        .unwrap_or_else(|_| {
                            SseEvent::default()
                                .event("error")
                                .data("{\"code\":\"encode_failed\"}")
                        });
                    return Some((Ok(frame), state));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::counter!("ayb_realtime_subscriber_overflow_total").increment(1);
                    tracing::warn!(skipped, "realtime subscriber overflowed its queue, closing");
                    state.closed = true;
                    let frame = SseEvent::default().event("error").data("{\"code\":\"overflow\"}");
                    return Some((Ok(frame), state));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(hub.heartbeat).text(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayb_schema::snapshot::{Column, JsonType, RelationKind};

    fn table_fixture(name: &str, pk: &[&str]) -> Table {
        Table {
            schema: "public".to_string(),
            name: name.to_string(),
            kind: RelationKind::Table,
            columns: vec![Column {
                name: "id".to_string(),
                json_type: JsonType::String,
                nullable: false,
                default: None,
                is_enum: false,
                enum_values: Vec::new(),
                is_json: false,
                is_array: false,
            }],
            primary_key: pk.iter().map(|s| s.to_string()).collect(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            has_tsvector: false,
        }
    }

    #[test]
    fn single_primary_key_accepts_one_column() {
        let table = table_fixture("widgets", &["id"]);
        assert_eq!(single_primary_key(&table), Some("id"));
    }

    #[test]
    fn single_primary_key_rejects_composite() {
        let table = table_fixture("widgets", &["a", "b"]);
        assert_eq!(single_primary_key(&table), None);
    }
}
