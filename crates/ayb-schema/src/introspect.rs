//! Builds a fresh [`SchemaSnapshot`] from `information_schema` and
//! `pg_catalog`. Runs entirely as plain `SELECT`s over a pooled connection —
//! no `LISTEN`/`NOTIFY` here, that lives in [`crate::watcher`].

use std::collections::HashMap;

use sqlx::PgPool;

use crate::error::SchemaError;
use crate::snapshot::{
    is_hidden, Column, ForeignKey, Index, JsonType, RelationKind, Relationship, RelationshipKind,
    SchemaSnapshot, Table,
};

const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema", "pg_toast"];

#[derive(sqlx::FromRow)]
struct RelationRow {
    schema_name: String,
    table_name: String,
    relkind: String,
    is_partitioned: bool,
}

#[derive(sqlx::FromRow)]
struct ColumnRow {
    schema_name: String,
    table_name: String,
    column_name: String,
    data_type: String,
    udt_name: String,
    is_nullable: bool,
    column_default: Option<String>,
    enum_name: Option<String>,
}

#[derive(sqlx::FromRow)]
struct EnumValueRow {
    enum_name: String,
    enum_value: String,
}

#[derive(sqlx::FromRow)]
struct PrimaryKeyRow {
    schema_name: String,
    table_name: String,
    column_name: String,
}

#[derive(sqlx::FromRow)]
struct ForeignKeyRow {
    schema_name: String,
    table_name: String,
    constraint_name: String,
    column_name: String,
    referenced_schema: String,
    referenced_table: String,
    referenced_column: String,
}

#[derive(sqlx::FromRow)]
struct IndexRow {
    schema_name: String,
    table_name: String,
    index_name: String,
    column_name: String,
    is_unique: bool,
}

pub async fn build_cache(pool: &PgPool) -> Result<SchemaSnapshot, SchemaError> {
    let relations = fetch_relations(pool).await?;
    let columns = fetch_columns(pool).await?;
    let enum_values = fetch_enum_values(pool).await?;
    let primary_keys = fetch_primary_keys(pool).await?;
    let foreign_keys = fetch_foreign_keys(pool).await?;
    let indexes = fetch_indexes(pool).await?;

    let mut enum_values_by_name: HashMap<String, Vec<String>> = HashMap::new();
    for row in enum_values {
        enum_values_by_name
            .entry(row.enum_name)
            .or_default()
            .push(row.enum_value);
    }

    let mut columns_by_table: HashMap<String, Vec<Column>> = HashMap::new();
    let mut tsvector_tables: std::collections::HashSet<String> = std::collections::HashSet::new();
    for row in columns {
        if is_hidden(&row.table_name) || SYSTEM_SCHEMAS.contains(&row.schema_name.as_str()) {
            continue;
        }
        if row.udt_name == "tsvector" {
            tsvector_tables.insert(row.table_name.clone());
        }
        let is_array = row.udt_name.starts_with('_');
        let enum_values = row
            .enum_name
            .as_ref()
            .and_then(|name| enum_values_by_name.get(name))
            .cloned()
            .unwrap_or_default();
        columns_by_table
            .entry(row.table_name.clone())
            .or_default()
            .push(Column {
                name: row.column_name,
                json_type: classify_json_type(&row.data_type, &row.udt_name),
                nullable: row.is_nullable,
                default: row.column_default,
                is_enum: row.enum_name.is_some(),
                enum_values,
                is_json: row.data_type == "json" || row.data_type == "jsonb",
                is_array,
            });
    }

    let mut primary_keys_by_table: HashMap<String, Vec<String>> = HashMap::new();
    for row in primary_keys {
        primary_keys_by_table
            .entry(row.table_name)
            .or_default()
            .push(row.column_name);
    }

    let mut foreign_keys_by_table: HashMap<String, Vec<ForeignKey>> = HashMap::new();
    let mut fk_grouping: HashMap<(String, String), ForeignKey> = HashMap::new();
    for row in foreign_keys {
        let key = (row.table_name.clone(), row.constraint_name.clone());
        let entry = fk_grouping.entry(key).or_insert_with(|| ForeignKey {
            constraint_name: row.constraint_name.clone(),
            columns: Vec::new(),
            referenced_table: row.referenced_table.clone(),
            referenced_columns: Vec::new(),
        });
        entry.columns.push(row.column_name);
        entry.referenced_columns.push(row.referenced_column);
        foreign_keys_by_table
            .entry(row.table_name)
            .or_insert_with(Vec::new);
    }
    for ((table_name, _), fk) in fk_grouping {
        foreign_keys_by_table.entry(table_name).or_default().push(fk);
    }

    let mut indexes_by_table: HashMap<String, HashMap<String, Index>> = HashMap::new();
    for row in indexes {
        let table_indexes = indexes_by_table.entry(row.table_name).or_default();
        table_indexes
            .entry(row.index_name.clone())
            .or_insert_with(|| Index {
                name: row.index_name,
                columns: Vec::new(),
                unique: row.is_unique,
            })
            .columns
            .push(row.column_name);
    }

    let mut tables: HashMap<String, Table> = HashMap::new();
    let mut schemas: Vec<String> = Vec::new();

    for rel in relations {
        if is_hidden(&rel.table_name) || SYSTEM_SCHEMAS.contains(&rel.schema_name.as_str()) {
            continue;
        }
        if !schemas.contains(&rel.schema_name) {
            schemas.push(rel.schema_name.clone());
        }
        let columns = columns_by_table
            .remove(&rel.table_name)
            .unwrap_or_default();
        let has_tsvector = tsvector_tables.contains(&rel.table_name);
        let kind = classify_relation_kind(&rel.relkind, rel.is_partitioned);
        let indexes = indexes_by_table
            .remove(&rel.table_name)
            .map(|m| m.into_values().collect())
            .unwrap_or_default();
        tables.insert(
            rel.table_name.clone(),
            Table {
                schema: rel.schema_name,
                name: rel.table_name.clone(),
                kind,
                columns,
                primary_key: primary_keys_by_table
                    .remove(&rel.table_name)
                    .unwrap_or_default(),
                foreign_keys: foreign_keys_by_table
                    .remove(&rel.table_name)
                    .unwrap_or_default(),
                indexes,
                has_tsvector,
            },
        );
    }

    let relationships = derive_relationships(&tables);

    Ok(SchemaSnapshot {
        built_at: chrono::Utc::now(),
        schemas,
        tables,
        relationships,
    })
}

fn classify_relation_kind(relkind: &str, is_partitioned: bool) -> RelationKind {
    if is_partitioned {
        return RelationKind::PartitionedTable;
    }
    match relkind {
        "v" => RelationKind::View,
        "m" => RelationKind::MaterializedView,
        _ => RelationKind::Table,
    }
}

fn classify_json_type(data_type: &str, udt_name: &str) -> JsonType {
    let base = udt_name.trim_start_matches('_');
    match base {
        "bool" => JsonType::Boolean,
        "int2" | "int4" | "int8" => JsonType::Integer,
        "float4" | "float8" | "numeric" => JsonType::Number,
        "json" | "jsonb" => {
            if data_type == "array" {
                JsonType::Array
            } else {
                JsonType::Object
            }
        }
        _ => {
            if data_type == "ARRAY" {
                JsonType::Array
            } else {
                JsonType::String
            }
        }
    }
}

/// Derives `ManyToOne`/`OneToMany` relationships from single-column foreign
/// keys. A field name for the forward (many-to-one) side strips a trailing
/// `_id` off the FK column (`author_id` -> `author`); when that would be
/// empty or ambiguous, falls back to the referenced table's name. The
/// reverse (one-to-many) side is always named after the referencing table.
fn derive_relationships(tables: &HashMap<String, Table>) -> Vec<Relationship> {
    let mut out = Vec::new();
    for table in tables.values() {
        for fk in &table.foreign_keys {
            if fk.columns.len() != 1 {
                continue;
            }
            let column = &fk.columns[0];
            let forward_name = column
                .strip_suffix("_id")
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .unwrap_or_else(|| fk.referenced_table.clone());

            out.push(Relationship {
                field_name: forward_name,
                kind: RelationshipKind::ManyToOne,
                local_table: table.name.clone(),
                local_columns: fk.columns.clone(),
                foreign_table: fk.referenced_table.clone(),
                foreign_columns: fk.referenced_columns.clone(),
            });

            out.push(Relationship {
                field_name: table.name.clone(),
                kind: RelationshipKind::OneToMany,
                local_table: fk.referenced_table.clone(),
                local_columns: fk.referenced_columns.clone(),
                foreign_table: table.name.clone(),
                foreign_columns: fk.columns.clone(),
            });
        }
    }
    out
}

async fn fetch_relations(pool: &PgPool) -> Result<Vec<RelationRow>, sqlx::Error> {
    sqlx::query_as::<_, RelationRow>(
        r#"
        SELECT
            n.nspname AS schema_name,
            c.relname AS table_name,
            c.relkind::text AS relkind,
            (c.relkind = 'p') AS is_partitioned
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind IN ('r', 'v', 'm', 'p')
          AND n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
          AND n.nspname NOT LIKE 'pg_temp_%'
        ORDER BY n.nspname, c.relname
        "#,
    )
    .fetch_all(pool)
    .await
}

async fn fetch_columns(pool: &PgPool) -> Result<Vec<ColumnRow>, sqlx::Error> {
    sqlx::query_as::<_, ColumnRow>(
        r#"
        SELECT
            c.table_schema AS schema_name,
            c.table_name AS table_name,
            c.column_name AS column_name,
            c.data_type AS data_type,
            c.udt_name AS udt_name,
            (c.is_nullable = 'YES') AS is_nullable,
            c.column_default AS column_default,
            t.typname AS enum_name
        FROM information_schema.columns c
        LEFT JOIN pg_catalog.pg_type t
            ON t.typname = c.udt_name
           AND t.typtype = 'e'
        WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
        ORDER BY c.table_name, c.ordinal_position
        "#,
    )
    .fetch_all(pool)
    .await
}

async fn fetch_enum_values(pool: &PgPool) -> Result<Vec<EnumValueRow>, sqlx::Error> {
    sqlx::query_as::<_, EnumValueRow>(
        r#"
        SELECT t.typname AS enum_name, e.enumlabel AS enum_value
        FROM pg_catalog.pg_enum e
        JOIN pg_catalog.pg_type t ON t.oid = e.enumtypid
        ORDER BY t.typname, e.enumsortorder
        "#,
    )
    .fetch_all(pool)
    .await
}

async fn fetch_primary_keys(pool: &PgPool) -> Result<Vec<PrimaryKeyRow>, sqlx::Error> {
    sqlx::query_as::<_, PrimaryKeyRow>(
        r#"
        SELECT
            tc.table_schema AS schema_name,
            tc.table_name AS table_name,
            kcu.column_name AS column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON kcu.constraint_name = tc.constraint_name
           AND kcu.table_schema = tc.table_schema
        WHERE tc.constraint_type = 'PRIMARY KEY'
        ORDER BY tc.table_name, kcu.ordinal_position
        "#,
    )
    .fetch_all(pool)
    .await
}

async fn fetch_foreign_keys(pool: &PgPool) -> Result<Vec<ForeignKeyRow>, sqlx::Error> {
    sqlx::query_as::<_, ForeignKeyRow>(
        r#"
        SELECT
            tc.table_schema AS schema_name,
            tc.table_name AS table_name,
            tc.constraint_name AS constraint_name,
            kcu.column_name AS column_name,
            ccu.table_schema AS referenced_schema,
            ccu.table_name AS referenced_table,
            ccu.column_name AS referenced_column
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON kcu.constraint_name = tc.constraint_name
           AND kcu.table_schema = tc.table_schema
        JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_name = tc.constraint_name
           AND ccu.table_schema = tc.table_schema
        WHERE tc.constraint_type = 'FOREIGN KEY'
        ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position
        "#,
    )
    .fetch_all(pool)
    .await
}

async fn fetch_indexes(pool: &PgPool) -> Result<Vec<IndexRow>, sqlx::Error> {
    sqlx::query_as::<_, IndexRow>(
        r#"
        SELECT
            n.nspname AS schema_name,
            t.relname AS table_name,
            i.relname AS index_name,
            a.attname AS column_name,
            ix.indisunique AS is_unique
        FROM pg_catalog.pg_index ix
        JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid
        JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
        JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_catalog.pg_attribute a
            ON a.attrelid = t.oid
           AND a.attnum = ANY(ix.indkey)
        WHERE n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast')
        ORDER BY t.relname, i.relname
        "#,
    )
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_id_for_forward_relationship_name() {
        let mut tables = HashMap::new();
        tables.insert(
            "posts".to_string(),
            Table {
                schema: "public".to_string(),
                name: "posts".to_string(),
                kind: RelationKind::Table,
                columns: Vec::new(),
                primary_key: vec!["id".to_string()],
                foreign_keys: vec![ForeignKey {
                    constraint_name: "posts_author_id_fkey".to_string(),
                    columns: vec!["author_id".to_string()],
                    referenced_table: "users".to_string(),
                    referenced_columns: vec!["id".to_string()],
                }],
                indexes: Vec::new(),
                has_tsvector: false,
            },
        );
        tables.insert(
            "users".to_string(),
            Table {
                schema: "public".to_string(),
                name: "users".to_string(),
                kind: RelationKind::Table,
                columns: Vec::new(),
                primary_key: vec!["id".to_string()],
                foreign_keys: Vec::new(),
                indexes: Vec::new(),
                has_tsvector: false,
            },
        );

        let rels = derive_relationships(&tables);
        let forward = rels
            .iter()
            .find(|r| r.kind == RelationshipKind::ManyToOne)
            .unwrap();
        assert_eq!(forward.field_name, "author");
        let reverse = rels
            .iter()
            .find(|r| r.kind == RelationshipKind::OneToMany)
            .unwrap();
        assert_eq!(reverse.field_name, "posts");
    }

    #[test]
    fn falls_back_to_referenced_table_name_when_column_has_no_id_suffix() {
        let mut tables = HashMap::new();
        tables.insert(
            "memberships".to_string(),
            Table {
                schema: "public".to_string(),
                name: "memberships".to_string(),
                kind: RelationKind::Table,
                columns: Vec::new(),
                primary_key: vec!["id".to_string()],
                foreign_keys: vec![ForeignKey {
                    constraint_name: "memberships_org_fkey".to_string(),
                    columns: vec!["org".to_string()],
                    referenced_table: "organizations".to_string(),
                    referenced_columns: vec!["id".to_string()],
                }],
                indexes: Vec::new(),
                has_tsvector: false,
            },
        );

        let rels = derive_relationships(&tables);
        let forward = rels
            .iter()
            .find(|r| r.kind == RelationshipKind::ManyToOne)
            .unwrap();
        assert_eq!(forward.field_name, "organizations");
    }
}
