//! `POST /api/rpc/{function}` — calls an operator-defined Postgres function
//! by name, passing the request body as a single `jsonb` argument and
//! returning whatever the function returns, coerced to JSON via
//! `to_jsonb(...)`. The core never introspects or validates these functions
//! beyond their name; RLS and the function's own body are the only access
//! control, same as any other call a client could make through `psql`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Extension;
use axum::Json;
use ayb_auth::Principal;
use ayb_db::SessionGuard;
use ayb_error::{ApiError, ApiResult};
use serde_json::Value;
use sqlx::Row;

use crate::error::CollectionsError;
use crate::handlers::session_context;
use crate::state::CollectionsState;

pub async fn call_function(
    State(state): State<Arc<CollectionsState>>,
    Path(function): Path<String>,
    Extension(principal): Extension<Arc<Principal>>,
    Json(args): Json<Value>,
) -> ApiResult<Json<Value>> {
    validate_identifier(&function)?;

    let ctx = session_context(&principal);
    let mut session = SessionGuard::begin(&state.pool, &ctx, false)
        .await
        .map_err(to_db_error)?;

    let sql = format!("SELECT to_jsonb(\"{function}\"($1)) AS result");
    let row = sqlx::query(&sql)
        .bind(&args)
        .fetch_one(&mut *session.conn())
        .await
        .map_err(CollectionsError::Database)?;
    let result: Value = row.try_get("result").map_err(CollectionsError::Database)?;

    session.commit().await.map_err(to_db_error)?;
    Ok(Json(result))
}

fn validate_identifier(name: &str) -> ApiResult<()> {
    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if starts_ok && rest_ok && name.len() <= 63 {
        Ok(())
    } else {
        Err(ApiError::Validation(format!(
            "{name:?} is not a valid function name"
        )))
    }
}

fn to_db_error(err: ayb_db::SessionError) -> ApiError {
    match err {
        ayb_db::SessionError::Database(e) => ayb_error::classify_sqlx_error(e),
    }
}
