//! Executes the batch follow-up fetches for `expand`. Every relationship
//! this workspace derives is single-column (see
//! `ayb_schema::introspect::derive_relationships`), so this only ever joins
//! on one local and one foreign column — never a real SQL `JOIN`, just a
//! second `WHERE foreign_column = ANY($1)` scoped to the same transaction
//! so it still honors the caller's row-level security.
use std::collections::HashMap;

use ayb_query::ExpandField;
use ayb_schema::SchemaSnapshot;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::{Arguments, Transaction};

use crate::dynamic::row_to_json;
use crate::error::CollectionsError;

pub async fn attach_expand(
    tx: &mut Transaction<'_, Postgres>,
    snapshot: &SchemaSnapshot,
    expand_fields: &[ExpandField],
    items: &mut [Value],
) -> Result<(), CollectionsError> {
    for expand in expand_fields {
        let foreign_table = snapshot
            .table(&expand.foreign_table)
            .ok_or_else(|| CollectionsError::TableForbidden(expand.foreign_table.clone()))?;

        let local_column = &expand.local_columns[0];
        let foreign_column = &expand.foreign_columns[0];

        let keys: Vec<String> = items
            .iter()
            .filter_map(|item| item.get(local_column))
            .filter_map(value_as_key)
            .collect();
        if keys.is_empty() {
            continue;
        }

        let mut args = PgArguments::default();
        args.add(keys);
        let sql = format!(
            "SELECT * FROM \"{schema}\".\"{table}\" WHERE \"{foreign_column}\" = ANY($1)",
            schema = foreign_table.schema,
            table = foreign_table.name,
        );
        let rows = sqlx::query_with(&sql, args)
            .fetch_all(&mut **tx)
            .await
            .map_err(CollectionsError::Database)?;

        let mut by_key: HashMap<String, Vec<Value>> = HashMap::new();
        for row in &rows {
            let json = row_to_json(row, foreign_table);
            if let Some(key) = json.get(foreign_column).and_then(value_as_key) {
                by_key.entry(key).or_default().push(Value::Object(json));
            }
        }

        for item in items.iter_mut() {
            let key = item.get(local_column).and_then(value_as_key);
            let matched = key.and_then(|k| by_key.get(&k)).cloned().unwrap_or_default();
            let attached = if expand.is_to_many {
                Value::Array(matched)
            } else {
                matched.into_iter().next().unwrap_or(Value::Null)
            };
            if let Value::Object(obj) = item {
                obj.entry("expand")
                    .or_insert_with(|| Value::Object(Map::new()))
                    .as_object_mut()
                    .expect("expand key is always an object")
                    .insert(expand.field_name.clone(), attached);
            }
        }
    }
    Ok(())
}

fn value_as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
