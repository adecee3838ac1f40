//! Decodes a `sqlx::postgres::PgRow` of an arbitrary, schema-resolved table
//! into a `serde_json::Map`, using the column's [`ayb_schema::JsonType`]
//! classification to pick the right concrete decode — sqlx has no
//! `Row -> serde_json::Value` built in because it needs a static `Decode`
//! impl per column, so this is the dynamic dispatch every PostgREST-style
//! service built on it ends up writing once.

use ayb_schema::{JsonType, Table};
use serde_json::{Map, Value};
use sqlx::{postgres::PgRow, Row};

pub fn row_to_json(row: &PgRow, table: &Table) -> Map<String, Value> {
    let mut out = Map::new();
    for column in &table.columns {
        let value = decode_column(row, column);
        out.insert(column.name.clone(), value);
    }
    out
}

fn decode_column(row: &PgRow, column: &ayb_schema::Column) -> Value {
    let name = column.name.as_str();

    if column.is_json {
        return row
            .try_get::<Option<Value>, _>(name)
            .ok()
            .flatten()
            .unwrap_or(Value::Null);
    }

    if column.is_array {
        return decode_array(row, column);
    }

    match column.json_type {
        JsonType::Boolean => row
            .try_get::<Option<bool>, _>(name)
            .ok()
            .flatten()
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        JsonType::Integer => row
            .try_get::<Option<i64>, _>(name)
            .ok()
            .flatten()
            .map(|n| Value::Number(n.into()))
            .unwrap_or(Value::Null),
        JsonType::Number => row
            .try_get::<Option<f64>, _>(name)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        JsonType::Object | JsonType::Array => row
            .try_get::<Option<Value>, _>(name)
            .ok()
            .flatten()
            .unwrap_or(Value::Null),
        JsonType::String => decode_stringish(row, column),
    }
}

/// Text-ish columns cover a wide range of Postgres types (`text`, `uuid`,
/// `timestamptz`, enums) that all stringify cleanly; each is tried in turn
/// since sqlx rejects a decode attempt against the wrong Rust type outright
/// rather than coercing.
fn decode_stringish(row: &PgRow, column: &ayb_schema::Column) -> Value {
    let name = column.name.as_str();

    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(name) {
        return Value::String(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<uuid::Uuid>, _>(name) {
        return Value::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(name) {
        return Value::String(v.to_rfc3339());
    }
    if let Ok(Some(v)) = row.try_get::<Option<chrono::NaiveDate>, _>(name) {
        return Value::String(v.to_string());
    }
    Value::Null
}

fn decode_array(row: &PgRow, column: &ayb_schema::Column) -> Value {
    let name = column.name.as_str();
    match column.json_type {
        JsonType::Integer => row
            .try_get::<Option<Vec<i64>>, _>(name)
            .ok()
            .flatten()
            .map(|items| Value::Array(items.into_iter().map(|n| Value::Number(n.into())).collect()))
            .unwrap_or(Value::Null),
        JsonType::Boolean => row
            .try_get::<Option<Vec<bool>>, _>(name)
            .ok()
            .flatten()
            .map(|items| Value::Array(items.into_iter().map(Value::Bool).collect()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<Option<Vec<String>>, _>(name)
            .ok()
            .flatten()
            .map(|items| Value::Array(items.into_iter().map(Value::String).collect()))
            .unwrap_or(Value::Null),
    }
}
