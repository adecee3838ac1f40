use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Extension;
use axum::Json;
use ayb_auth::{Principal, Role};
use ayb_db::{SessionContext, SessionGuard};
use ayb_error::{ApiError, ApiResult};
use ayb_query::QueryBuilder;
use serde::Deserialize;
use serde_json::{Map, Value};
use sqlx::{Row, Transaction};

use crate::dynamic::row_to_json;
use crate::error::CollectionsError;
use crate::expand::attach_expand;
use crate::response::{BatchResult, ListResponse};
use crate::state::CollectionsState;
use crate::values;

pub const MAX_BATCH_SIZE: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub search: Option<String>,
    pub fields: Option<String>,
    pub expand: Option<String>,
    pub page: Option<i64>,
    #[serde(rename = "perPage")]
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RecordParams {
    pub fields: Option<String>,
    pub expand: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchOp {
    pub method: BatchMethod,
    pub id: Option<String>,
    #[serde(default)]
    pub body: Map<String, Value>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchMethod {
    Post,
    Patch,
    Delete,
}

pub(crate) fn session_context(principal: &Principal) -> SessionContext {
    SessionContext {
        role: match principal.role {
            Role::Admin => "admin".to_string(),
            Role::User => "user".to_string(),
        },
        user_id: Some(principal.id.clone()),
        user_email: principal.email.clone(),
        app_id: principal.app_id.clone(),
        scope: principal.scope.as_str().to_string(),
        allowed_tables: principal.allowed_tables.clone(),
    }
}

fn require_table_access(principal: &Principal, table: &str) -> Result<(), CollectionsError> {
    if principal.can_access_table(table) {
        Ok(())
    } else {
        Err(CollectionsError::TableForbidden(table.to_string()))
    }
}

fn require_write_scope(principal: &Principal) -> Result<(), CollectionsError> {
    if principal.anonymous {
        Err(CollectionsError::Unauthenticated)
    } else if principal.scope.allows_write() {
        Ok(())
    } else {
        Err(CollectionsError::ReadOnly)
    }
}

fn single_primary_key(table: &ayb_schema::Table) -> Result<&str, CollectionsError> {
    match table.primary_key.as_slice() {
        [pk] => Ok(pk.as_str()),
        _ => Err(CollectionsError::CompositePrimaryKey(table.name.clone())),
    }
}

pub async fn list_records(
    State(state): State<Arc<CollectionsState>>,
    Path(table_name): Path<String>,
    Query(params): Query<ListParams>,
    Extension(principal): Extension<Arc<Principal>>,
) -> ApiResult<Json<ListResponse>> {
    require_table_access(&principal, &table_name)?;

    let snapshot = state.cache.get();
    let builder = QueryBuilder::new(&snapshot);
    let plan = builder
        .build_list(
            &table_name,
            params.filter.as_deref(),
            params.sort.as_deref(),
            params.search.as_deref(),
            params.fields.as_deref(),
            params.expand.as_deref(),
            params.page,
            params.per_page,
        )
        .map_err(CollectionsError::from)?;

    let ctx = session_context(&principal);
    let mut session = SessionGuard::begin(&state.pool, &ctx, true)
        .await
        .map_err(to_db_error)?;

    let table = snapshot
        .table(&table_name)
        .ok_or_else(|| CollectionsError::Query(ayb_query::QueryError::UnknownTable(table_name.clone())))?;

    let rows = sqlx::query_with(&plan.sql, plan.args)
        .fetch_all(&mut *session.conn())
        .await
        .map_err(CollectionsError::Database)?;
    let count_row = sqlx::query_with(&plan.count_sql, plan.count_args)
        .fetch_one(&mut *session.conn())
        .await
        .map_err(CollectionsError::Database)?;
    let total_items: i64 = count_row.try_get(0).map_err(CollectionsError::Database)?;

    let mut items: Vec<Value> = rows
        .iter()
        .map(|row| Value::Object(row_to_json(row, table)))
        .collect();

    attach_expand(session.conn(), &snapshot, &plan.expand, &mut items).await?;

    session.commit().await.map_err(to_db_error)?;

    let total_pages = if plan.per_page > 0 {
        (total_items + plan.per_page - 1) / plan.per_page
    } else {
        0
    };

    Ok(Json(ListResponse {
        page: plan.page,
        per_page: plan.per_page,
        total_items,
        total_pages,
        items,
    }))
}

pub async fn get_record(
    State(state): State<Arc<CollectionsState>>,
    Path((table_name, id)): Path<(String, String)>,
    Query(params): Query<RecordParams>,
    Extension(principal): Extension<Arc<Principal>>,
) -> ApiResult<Json<Value>> {
    require_table_access(&principal, &table_name).map_err(CollectionsError::into)?;

    let snapshot = state.cache.get();
    let table = snapshot
        .table(&table_name)
        .ok_or_else(|| CollectionsError::Query(ayb_query::QueryError::UnknownTable(table_name.clone())))?;
    let pk = single_primary_key(table)?;

    let builder = QueryBuilder::new(&snapshot);
    let select = builder
        .select_list(table, params.fields.as_deref())
        .map_err(CollectionsError::from)?;
    let expand_fields = builder
        .expand_fields(&table_name, params.expand.as_deref())
        .map_err(CollectionsError::from)?;

    let ctx = session_context(&principal);
    let mut session = SessionGuard::begin(&state.pool, &ctx, true)
        .await
        .map_err(to_db_error)?;

    let sql = format!(
        "SELECT {select} FROM \"{schema}\".\"{tbl}\" WHERE \"{pk}\"::text = $1",
        schema = table.schema,
        tbl = table.name,
    );
    let row = sqlx::query(&sql)
        .bind(&id)
        .fetch_optional(&mut *session.conn())
        .await
        .map_err(CollectionsError::Database)?
        .ok_or(CollectionsError::NotFound)?;

    let mut item = Value::Object(row_to_json(&row, table));
    attach_expand(
        session.conn(),
        &snapshot,
        &expand_fields,
        std::slice::from_mut(&mut item),
    )
    .await?;

    session.commit().await.map_err(to_db_error)?;

    Ok(Json(item))
}

pub async fn insert_record(
    State(state): State<Arc<CollectionsState>>,
    Path(table_name): Path<String>,
    Extension(principal): Extension<Arc<Principal>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    require_table_access(&principal, &table_name).map_err(CollectionsError::into)?;
    require_write_scope(&principal).map_err(CollectionsError::into)?;

    let snapshot = state.cache.get();
    let table = snapshot
        .table(&table_name)
        .ok_or_else(|| CollectionsError::Query(ayb_query::QueryError::UnknownTable(table_name.clone())))?;
    let body = body.as_object().cloned().ok_or(CollectionsError::NotAnObject)?;

    let ctx = session_context(&principal);
    let mut session = SessionGuard::begin(&state.pool, &ctx, false)
        .await
        .map_err(to_db_error)?;

    let row = insert_one(session.conn(), table, &body).await?;
    let item = Value::Object(row_to_json(&row, table));

    session.commit().await.map_err(to_db_error)?;
    Ok(Json(item))
}

pub async fn update_record(
    State(state): State<Arc<CollectionsState>>,
    Path((table_name, id)): Path<(String, String)>,
    Extension(principal): Extension<Arc<Principal>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    require_table_access(&principal, &table_name).map_err(CollectionsError::into)?;
    require_write_scope(&principal).map_err(CollectionsError::into)?;

    let snapshot = state.cache.get();
    let table = snapshot
        .table(&table_name)
        .ok_or_else(|| CollectionsError::Query(ayb_query::QueryError::UnknownTable(table_name.clone())))?;
    let body = body.as_object().cloned().ok_or(CollectionsError::NotAnObject)?;

    let ctx = session_context(&principal);
    let mut session = SessionGuard::begin(&state.pool, &ctx, false)
        .await
        .map_err(to_db_error)?;

    let row = update_one(session.conn(), table, &id, &body).await?;
    let item = Value::Object(row_to_json(&row, table));

    session.commit().await.map_err(to_db_error)?;
    Ok(Json(item))
}

pub async fn delete_record(
    State(state): State<Arc<CollectionsState>>,
    Path((table_name, id)): Path<(String, String)>,
    Extension(principal): Extension<Arc<Principal>>,
) -> ApiResult<()> {
    require_table_access(&principal, &table_name).map_err(CollectionsError::into)?;
    require_write_scope(&principal).map_err(CollectionsError::into)?;

    let snapshot = state.cache.get();
    let table = snapshot
        .table(&table_name)
        .ok_or_else(|| CollectionsError::Query(ayb_query::QueryError::UnknownTable(table_name.clone())))?;
    let pk = single_primary_key(table)?;

    let ctx = session_context(&principal);
    let mut session = SessionGuard::begin(&state.pool, &ctx, false)
        .await
        .map_err(to_db_error)?;

    let sql = format!(
        "DELETE FROM \"{schema}\".\"{tbl}\" WHERE \"{pk}\"::text = $1",
        schema = table.schema,
        tbl = table.name,
    );
    let result = sqlx::query(&sql)
        .bind(&id)
        .execute(&mut *session.conn())
        .await
        .map_err(CollectionsError::Database)?;

    if result.rows_affected() == 0 {
        return Err(CollectionsError::NotFound.into());
    }

    session.commit().await.map_err(to_db_error)?;
    Ok(())
}

pub async fn batch_records(
    State(state): State<Arc<CollectionsState>>,
    Path(table_name): Path<String>,
    Extension(principal): Extension<Arc<Principal>>,
    Json(ops): Json<Vec<BatchOp>>,
) -> ApiResult<Json<Vec<BatchResult>>> {
    require_table_access(&principal, &table_name).map_err(CollectionsError::into)?;
    require_write_scope(&principal).map_err(CollectionsError::into)?;

    if ops.len() > MAX_BATCH_SIZE {
        return Err(CollectionsError::BatchTooLarge { max: MAX_BATCH_SIZE }.into());
    }

    let snapshot = state.cache.get();
    let table = snapshot
        .table(&table_name)
        .ok_or_else(|| CollectionsError::Query(ayb_query::QueryError::UnknownTable(table_name.clone())))?;
    let pk = single_primary_key(table)?;

    let ctx = session_context(&principal);
    let mut session = SessionGuard::begin(&state.pool, &ctx, false)
        .await
        .map_err(to_db_error)?;

    let mut results = Vec::with_capacity(ops.len());
    let mut failed = false;
    for op in ops {
        if failed {
            results.push(BatchResult::Skipped);
            continue;
        }

        let outcome: Result<Value, CollectionsError> = match op.method {
            BatchMethod::Post => insert_one(session.conn(), table, &op.body)
                .await
                .map(|row| Value::Object(row_to_json(&row, table))),
            BatchMethod::Patch => match op.id {
                Some(id) => update_one(session.conn(), table, &id, &op.body)
                    .await
                    .map(|row| Value::Object(row_to_json(&row, table))),
                None => Err(CollectionsError::NotFound),
            },
            BatchMethod::Delete => match op.id {
                Some(id) => {
                    let sql = format!(
                        "DELETE FROM \"{schema}\".\"{tbl}\" WHERE \"{pk}\"::text = $1",
                        schema = table.schema,
                        tbl = table.name,
                    );
                    let result = sqlx::query(&sql)
                        .bind(&id)
                        .execute(&mut *session.conn())
                        .await
                        .map_err(CollectionsError::Database);
                    match result {
                        Ok(r) if r.rows_affected() > 0 => Ok(Value::Bool(true)),
                        Ok(_) => Err(CollectionsError::NotFound),
                        Err(e) => Err(e),
                    }
                }
                None => Err(CollectionsError::NotFound),
            },
        };

        match outcome {
            Ok(data) => results.push(BatchResult::Ok { data }),
            Err(err) => {
                let api_err: ApiError = err.into();
                results.push(BatchResult::Error {
                    message: api_err.to_string(),
                });
                failed = true;
            }
        }
    }

    // Atomic batch: a failed op rolls back every op that ran earlier in
    // this request, but the response is still a 200 carrying the
    // per-operation outcomes — the client reads failure off the array,
    // not off the status line.
    if failed {
        session.rollback().await.map_err(to_db_error)?;
    } else {
        session.commit().await.map_err(to_db_error)?;
    }
    Ok(Json(results))
}

async fn insert_one(
    tx: &mut Transaction<'_, sqlx::Postgres>,
    table: &ayb_schema::Table,
    body: &Map<String, Value>,
) -> Result<sqlx::postgres::PgRow, CollectionsError> {
    let fields = values::writable_fields(body, &table.columns);
    if fields.is_empty() {
        return Err(CollectionsError::NotAnObject);
    }

    let mut args = sqlx::postgres::PgArguments::default();
    let mut placeholders = Vec::with_capacity(fields.len());
    for field in &fields {
        let column = table.column(field).expect("field was filtered against table.columns");
        let idx = values::bind(&mut args, column, &body[*field])?;
        placeholders.push(format!("${idx}"));
    }

    let column_list = fields
        .iter()
        .map(|f| format!("\"{f}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO \"{schema}\".\"{tbl}\" ({column_list}) VALUES ({values}) RETURNING *",
        schema = table.schema,
        tbl = table.name,
        values = placeholders.join(", "),
    );

    sqlx::query_with(&sql, args)
        .fetch_one(&mut **tx)
        .await
        .map_err(CollectionsError::Database)
}

/// Partial update. When the table carries an `updated_at` column and the
/// caller supplies one in the body, it's treated as the last-seen value
/// rather than a new value to write — the update only applies if the row's
/// current `updated_at` still matches, and a mismatch surfaces as
/// [`CollectionsError::StaleWrite`] rather than [`CollectionsError::NotFound`].
async fn update_one(
    tx: &mut Transaction<'_, sqlx::Postgres>,
    table: &ayb_schema::Table,
    id: &str,
    body: &Map<String, Value>,
) -> Result<sqlx::postgres::PgRow, CollectionsError> {
    let pk = single_primary_key(table)?;
    let updated_at_column = table.column("updated_at");
    let expected_updated_at = updated_at_column.and_then(|_| body.get("updated_at"));

    let fields: Vec<&str> = values::writable_fields(body, &table.columns)
        .into_iter()
        .filter(|f| *f != "updated_at")
        .collect();
    if fields.is_empty() {
        return Err(CollectionsError::NotAnObject);
    }

    let mut args = sqlx::postgres::PgArguments::default();
    let mut assignments = Vec::with_capacity(fields.len());
    for field in &fields {
        let column = table.column(field).expect("field was filtered against table.columns");
        let idx = values::bind(&mut args, column, &body[*field])?;
        assignments.push(format!("\"{field}\" = ${idx}"));
    }
    args.add(id.to_string());
    let id_idx = args.len();

    let mut sql = format!(
        "UPDATE \"{schema}\".\"{tbl}\" SET {assignments} WHERE \"{pk}\"::text = ${id_idx}",
        schema = table.schema,
        tbl = table.name,
        assignments = assignments.join(", "),
    );
    if let Some(expected) = expected_updated_at {
        let idx = values::bind(&mut args, updated_at_column.expect("checked above"), expected)?;
        sql.push_str(&format!(" AND \"updated_at\" = ${idx}"));
    }
    sql.push_str(" RETURNING *");

    let updated = sqlx::query_with(&sql, args)
        .fetch_optional(&mut **tx)
        .await
        .map_err(CollectionsError::Database)?;

    match updated {
        Some(row) => Ok(row),
        None if expected_updated_at.is_some() => {
            let exists_sql = format!(
                "SELECT 1 FROM \"{schema}\".\"{tbl}\" WHERE \"{pk}\"::text = $1",
                schema = table.schema,
                tbl = table.name,
            );
            let still_exists = sqlx::query(&exists_sql)
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(CollectionsError::Database)?
                .is_some();
            if still_exists {
                Err(CollectionsError::StaleWrite)
            } else {
                Err(CollectionsError::NotFound)
            }
        }
        None => Err(CollectionsError::NotFound),
    }
}

fn to_db_error(err: ayb_db::SessionError) -> ApiError {
    match err {
        ayb_db::SessionError::Database(e) => ayb_error::classify_sqlx_error(e),
    }
}
