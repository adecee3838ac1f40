//! The immutable value tree published by the schema cache.
//!
//! Per the design note on cyclic graphs: tables reference each other, but we
//! never represent that as object-to-object pointers. Instead every table is
//! keyed by its qualified name in a flat map, and foreign keys are edges that
//! reference that key. This makes a whole snapshot replacement a single,
//! cheap `Arc` swap regardless of how tangled the relationships are.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Reserved prefix for internal tables; anything starting with this is
/// invisible to the snapshot and to every handler built on top of it.
pub const HIDDEN_PREFIX: &str = "_ayb_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelationKind {
    Table,
    View,
    MaterializedView,
    PartitionedTable,
}

/// The JSON-type classification a column is bucketed into, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

#[derive(Debug, Clone, Serialize)]
pub struct Column {
    pub name: String,
    pub json_type: JsonType,
    pub nullable: bool,
    pub default: Option<String>,
    pub is_enum: bool,
    pub enum_values: Vec<String>,
    pub is_json: bool,
    pub is_array: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForeignKey {
    pub constraint_name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// A derived many-to-one (this table -> referent) or one-to-many (referent
/// -> this table) relationship, named per spec.md §4.2's derivation rule:
/// strip a trailing `_id` on single-column FKs, otherwise fall back to the
/// referenced table's name.
#[derive(Debug, Clone, Serialize)]
pub struct Relationship {
    pub field_name: String,
    pub kind: RelationshipKind,
    pub local_table: String,
    pub local_columns: Vec<String>,
    pub foreign_table: String,
    pub foreign_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelationshipKind {
    ManyToOne,
    OneToMany,
}

#[derive(Debug, Clone, Serialize)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub kind: RelationKind,
    pub columns: Vec<Column>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<Index>,
    pub has_tsvector: bool,
}

impl Table {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A fully-materialized, immutable description of the database at one
/// instant. Built by `build_cache` and never mutated in place — only ever
/// replaced wholesale by [`crate::cache::CacheHolder::reload_wait`].
#[derive(Debug, Clone, Serialize)]
pub struct SchemaSnapshot {
    pub built_at: DateTime<Utc>,
    pub schemas: Vec<String>,
    /// Keyed by unqualified table name. Unqualified lookup is sufficient for
    /// this system's scope (no cross-schema name collisions are resolved);
    /// the fully qualified name is still carried on `Table` for display.
    pub tables: HashMap<String, Table>,
    pub relationships: Vec<Relationship>,
}

impl SchemaSnapshot {
    pub fn empty() -> Self {
        Self {
            built_at: Utc::now(),
            schemas: Vec::new(),
            tables: HashMap::new(),
            relationships: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn relationships_for(&self, table: &str) -> impl Iterator<Item = &Relationship> {
        self.relationships
            .iter()
            .filter(move |r| r.local_table == table)
    }

    pub fn relationship(&self, table: &str, field_name: &str) -> Option<&Relationship> {
        self.relationships_for(table)
            .find(|r| r.field_name == field_name)
    }
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with(HIDDEN_PREFIX)
}
