//! Binds an inbound JSON request body against a table's known columns for
//! `INSERT`/`UPDATE`, the write-side counterpart of
//! [`crate::dynamic::row_to_json`]'s read-side column dispatch.

use ayb_schema::{Column, JsonType};
use serde_json::{Map, Value};
use sqlx::postgres::PgArguments;
use sqlx::Arguments;

use crate::error::CollectionsError;

/// Binds `value` for `column` and returns the 1-based placeholder index.
pub fn bind(
    args: &mut PgArguments,
    column: &Column,
    value: &Value,
) -> Result<usize, CollectionsError> {
    if value.is_null() {
        args.add(Option::<String>::None);
        return Ok(args.len());
    }

    if column.is_json {
        args.add(value.clone());
        return Ok(args.len());
    }

    if column.is_array {
        return bind_array(args, column, value);
    }

    match column.json_type {
        JsonType::Boolean => {
            let b = value.as_bool().ok_or_else(|| unsupported(column))?;
            args.add(b);
        }
        JsonType::Integer => {
            let n = value.as_i64().ok_or_else(|| unsupported(column))?;
            args.add(n);
        }
        JsonType::Number => {
            let n = value.as_f64().ok_or_else(|| unsupported(column))?;
            args.add(n);
        }
        JsonType::Object | JsonType::Array => {
            args.add(value.clone());
        }
        JsonType::String => {
            let s = value
                .as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| unsupported(column))?;
            args.add(s);
        }
    }
    Ok(args.len())
}

fn bind_array(
    args: &mut PgArguments,
    column: &Column,
    value: &Value,
) -> Result<usize, CollectionsError> {
    let items = value.as_array().ok_or_else(|| unsupported(column))?;
    match column.json_type {
        JsonType::Integer => {
            let values: Option<Vec<i64>> = items.iter().map(|v| v.as_i64()).collect();
            args.add(values.ok_or_else(|| unsupported(column))?);
        }
        JsonType::Boolean => {
            let values: Option<Vec<bool>> = items.iter().map(|v| v.as_bool()).collect();
            args.add(values.ok_or_else(|| unsupported(column))?);
        }
        _ => {
            let values: Option<Vec<String>> = items
                .iter()
                .map(|v| v.as_str().map(|s| s.to_string()))
                .collect();
            args.add(values.ok_or_else(|| unsupported(column))?);
        }
    }
    Ok(args.len())
}

fn unsupported(column: &Column) -> CollectionsError {
    CollectionsError::UnsupportedValue {
        field: column.name.clone(),
    }
}

/// Restricts an inbound body to fields that are real, writable columns,
/// preserving request order for deterministic SQL generation.
pub fn writable_fields<'a>(body: &'a Map<String, Value>, columns: &[Column]) -> Vec<&'a str> {
    body.keys()
        .map(|k| k.as_str())
        .filter(|k| columns.iter().any(|c| c.name == *k))
        .collect()
}
