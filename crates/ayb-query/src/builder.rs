//! Turns a validated [`crate::filter::Expr`] plus the `sort`/`search`/
//! `page`/`perPage`/`expand`/`fields` query-string parameters into
//! parameterized SQL, checked at every step against a [`SchemaSnapshot`] so
//! a request can never reach an identifier that isn't a real column —
//! every identifier is schema-checked and quoted, every value is bound as a
//! parameter, never interpolated into the string.

use ayb_schema::{SchemaSnapshot, Table};
use sqlx::postgres::PgArguments;
use sqlx::Arguments;

use crate::error::QueryError;
use crate::filter::{self, Expr, Op, Value};

pub const DEFAULT_PER_PAGE: i64 = 30;
pub const MAX_PER_PAGE: i64 = 500;

#[derive(Debug, Clone)]
pub struct ExpandField {
    pub field_name: String,
    pub foreign_table: String,
    pub local_columns: Vec<String>,
    pub foreign_columns: Vec<String>,
    pub is_to_many: bool,
}

/// A search predicate plus, when the match came from the `tsvector` branch,
/// the `ts_rank` expression `build_list` falls back to ordering by when the
/// caller gave no explicit `sort`.
pub struct SearchClause {
    pub predicate: String,
    pub rank_expr: Option<String>,
}

pub struct ListPlan {
    pub sql: String,
    pub count_sql: String,
    pub args: PgArguments,
    pub count_args: PgArguments,
    pub expand: Vec<ExpandField>,
    pub page: i64,
    pub per_page: i64,
}

pub struct QueryBuilder<'a> {
    snapshot: &'a SchemaSnapshot,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(snapshot: &'a SchemaSnapshot) -> Self {
        Self { snapshot }
    }

    fn table(&self, name: &str) -> Result<&'a Table, QueryError> {
        self.snapshot
            .table(name)
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }

    fn validate_column(&self, table: &Table, column: &str) -> Result<(), QueryError> {
        if table.column(column).is_some() {
            return Ok(());
        }
        Err(QueryError::UnknownColumn {
            table: table.name.clone(),
            column: column.to_string(),
        })
    }

    /// Builds a `SELECT` list for a single table: `*` when `fields` is
    /// absent, otherwise only the columns explicitly named, each validated
    /// against the schema.
    pub fn select_list(&self, table: &Table, fields: Option<&str>) -> Result<String, QueryError> {
        match fields {
            None => Ok("*".to_string()),
            Some(raw) => {
                let mut cols = Vec::new();
                for field in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    self.validate_column(table, field)?;
                    cols.push(format!("\"{field}\""));
                }
                if cols.is_empty() {
                    Ok("*".to_string())
                } else {
                    Ok(cols.join(", "))
                }
            }
        }
    }

    /// Validates a comma-separated `expand` parameter against the table's
    /// derived relationships and returns what the collections service needs
    /// to run the follow-up batch fetches.
    pub fn expand_fields(
        &self,
        table_name: &str,
        raw: Option<&str>,
    ) -> Result<Vec<ExpandField>, QueryError> {
        let raw = match raw {
            None => return Ok(Vec::new()),
            Some(r) if r.trim().is_empty() => return Ok(Vec::new()),
            Some(r) => r,
        };

        let mut out = Vec::new();
        for field in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let rel = self
                .snapshot
                .relationship(table_name, field)
                .ok_or_else(|| QueryError::InvalidExpand(field.to_string()))?;
            out.push(ExpandField {
                field_name: rel.field_name.clone(),
                foreign_table: rel.foreign_table.clone(),
                local_columns: rel.local_columns.clone(),
                foreign_columns: rel.foreign_columns.clone(),
                is_to_many: matches!(rel.kind, ayb_schema::RelationshipKind::OneToMany),
            });
        }
        Ok(out)
    }

    pub fn order_by(&self, table: &Table, raw: Option<&str>) -> Result<String, QueryError> {
        let raw = match raw {
            None => return Ok(String::new()),
            Some(r) if r.trim().is_empty() => return Ok(String::new()),
            Some(r) => r,
        };

        let mut parts = Vec::new();
        for spec in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (column, direction) = if let Some(rest) = spec.strip_prefix('-') {
                (rest, "DESC")
            } else if let Some(rest) = spec.strip_prefix('+') {
                (rest, "ASC")
            } else {
                (spec, "ASC")
            };
            self.validate_column(table, column)
                .map_err(|_| QueryError::InvalidSort(spec.to_string()))?;
            parts.push(format!("\"{column}\" {direction}"));
        }
        if parts.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" ORDER BY {}", parts.join(", ")))
        }
    }

    /// `search` is a plain substring match across every textual column,
    /// falling back to a `plainto_tsquery` match against the table's
    /// `tsvector` column (conventionally named `search_vector`) when one
    /// exists, which is both faster and ranked. `plainto_tsquery` treats the
    /// whole input as plain terms to AND together (no `OR`/`-`/quoting
    /// operators for an end user to trip over), unlike `websearch_to_tsquery`.
    pub fn search_clause(
        &self,
        table: &Table,
        search: Option<&str>,
        args: &mut PgArguments,
    ) -> Result<Option<SearchClause>, QueryError> {
        let search = match search {
            None => return Ok(None),
            Some(s) if s.trim().is_empty() => return Ok(None),
            Some(s) => s,
        };

        if table.has_tsvector {
            let idx = bind(args, Value::Str(search.to_string()));
            let tsquery = format!("plainto_tsquery('english', ${idx})");
            return Ok(Some(SearchClause {
                predicate: format!("\"search_vector\" @@ {tsquery}"),
                rank_expr: Some(format!("ts_rank(\"search_vector\", {tsquery})")),
            }));
        }

        let text_columns: Vec<&str> = table
            .columns
            .iter()
            .filter(|c| matches!(c.json_type, ayb_schema::JsonType::String) && !c.is_array)
            .map(|c| c.name.as_str())
            .collect();
        if text_columns.is_empty() {
            return Ok(None);
        }

        let idx = bind(args, Value::Str(format!("%{search}%")));
        let clauses: Vec<String> = text_columns
            .iter()
            .map(|c| format!("\"{c}\"::text ILIKE ${idx}"))
            .collect();
        Ok(Some(SearchClause {
            predicate: format!("({})", clauses.join(" OR ")),
            rank_expr: None,
        }))
    }

    pub fn where_clause(
        &self,
        table: &Table,
        filter_str: Option<&str>,
        args: &mut PgArguments,
    ) -> Result<Option<String>, QueryError> {
        let filter_str = match filter_str {
            None => return Ok(None),
            Some(s) if s.trim().is_empty() => return Ok(None),
            Some(s) => s,
        };
        let expr = filter::parse(filter_str)?;
        Ok(Some(self.render_expr(table, &expr, args)?))
    }

    fn render_expr(
        &self,
        table: &Table,
        expr: &Expr,
        args: &mut PgArguments,
    ) -> Result<String, QueryError> {
        match expr {
            Expr::And(left, right) => Ok(format!(
                "({} AND {})",
                self.render_expr(table, left, args)?,
                self.render_expr(table, right, args)?
            )),
            Expr::Or(left, right) => Ok(format!(
                "({} OR {})",
                self.render_expr(table, left, args)?,
                self.render_expr(table, right, args)?
            )),
            Expr::Compare { field, op, value } => {
                self.validate_column(table, field)?;
                self.render_comparison(field, *op, value, args)
            }
        }
    }

    fn render_comparison(
        &self,
        field: &str,
        op: Op,
        value: &Value,
        args: &mut PgArguments,
    ) -> Result<String, QueryError> {
        let quoted = format!("\"{field}\"");
        Ok(match op {
            Op::IsNull => format!("{quoted} IS NULL"),
            Op::IsNotNull => format!("{quoted} IS NOT NULL"),
            Op::Eq => format!("{quoted} = ${}", bind(args, value.clone())),
            Op::Neq => format!("{quoted} != ${}", bind(args, value.clone())),
            Op::Gt => format!("{quoted} > ${}", bind(args, value.clone())),
            Op::Gte => format!("{quoted} >= ${}", bind(args, value.clone())),
            Op::Lt => format!("{quoted} < ${}", bind(args, value.clone())),
            Op::Lte => format!("{quoted} <= ${}", bind(args, value.clone())),
            Op::Like => format!("{quoted}::text ILIKE ${}", bind_like(args, value.clone())),
            Op::NotLike => format!(
                "{quoted}::text NOT ILIKE ${}",
                bind_like(args, value.clone())
            ),
            Op::In => {
                let idx = bind(args, value.clone());
                format!("{quoted} = ANY(${idx})")
            }
            Op::NotIn => {
                let idx = bind(args, value.clone());
                format!("{quoted} != ALL(${idx})")
            }
        })
    }

    /// Builds the full list query (rows + a matching count query for total
    /// pagination) for a collection listing request.
    #[allow(clippy::too_many_arguments)]
    pub fn build_list(
        &self,
        table_name: &str,
        filter_str: Option<&str>,
        sort: Option<&str>,
        search: Option<&str>,
        fields: Option<&str>,
        expand: Option<&str>,
        page: Option<i64>,
        per_page: Option<i64>,
    ) -> Result<ListPlan, QueryError> {
        let table = self.table(table_name)?;
        let page = page.unwrap_or(1).max(1);
        let per_page = per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);

        let select = self.select_list(table, fields)?;
        let expand_fields = self.expand_fields(table_name, expand)?;
        let explicit_order = self.order_by(table, sort)?;

        let mut args = PgArguments::default();
        let mut predicates = Vec::new();
        let mut rank_expr = None;
        if let Some(where_sql) = self.where_clause(table, filter_str, &mut args)? {
            predicates.push(where_sql);
        }
        if let Some(search) = self.search_clause(table, search, &mut args)? {
            predicates.push(search.predicate);
            rank_expr = search.rank_expr;
        }
        let where_clause = if predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", predicates.join(" AND "))
        };

        // No explicit sort given but the search matched via the tsvector
        // branch: rank the results instead of falling back to insertion
        // order.
        let order = if !explicit_order.is_empty() {
            explicit_order
        } else if let Some(rank) = &rank_expr {
            format!(" ORDER BY {rank} DESC")
        } else {
            String::new()
        };

        let mut count_args = PgArguments::default();
        let mut count_predicates = Vec::new();
        if let Some(where_sql) = self.where_clause(table, filter_str, &mut count_args)? {
            count_predicates.push(where_sql);
        }
        if let Some(search) = self.search_clause(table, search, &mut count_args)? {
            count_predicates.push(search.predicate);
        }
        let count_where = if count_predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", count_predicates.join(" AND "))
        };

        let offset = (page - 1) * per_page;
        let limit_idx = bind(&mut args, Value::Num(per_page as f64));
        let offset_idx = bind(&mut args, Value::Num(offset as f64));

        let sql = format!(
            "SELECT {select} FROM \"{schema}\".\"{table}\"{where_clause}{order} LIMIT ${limit_idx} OFFSET ${offset_idx}",
            schema = table.schema,
            table = table.name,
        );
        let count_sql = format!(
            "SELECT COUNT(*) FROM \"{schema}\".\"{table}\"{count_where}",
            schema = table.schema,
            table = table.name,
        );

        Ok(ListPlan {
            sql,
            count_sql,
            args,
            count_args,
            expand: expand_fields,
            page,
            per_page,
        })
    }
}

/// Binds a [`Value`] as the next positional parameter and returns its 1-based
/// placeholder index. `List` values bind as a single Postgres array
/// parameter so `= ANY($n)` / `!= ALL($n)` can consume them directly.
fn bind(args: &mut PgArguments, value: Value) -> usize {
    match value {
        Value::Str(s) => args.add(s),
        Value::Num(n) => {
            if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                args.add(n as i64)
            } else {
                args.add(n)
            }
        }
        Value::Bool(b) => args.add(b),
        Value::Null => args.add(Option::<String>::None),
        Value::List(items) => {
            let strings: Vec<String> = items
                .into_iter()
                .map(|v| match v {
                    Value::Str(s) => s,
                    Value::Num(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                    Value::List(_) => String::new(),
                })
                .collect();
            args.add(strings)
        }
    }
    args.len()
}

fn bind_like(args: &mut PgArguments, value: Value) -> usize {
    let pattern = match value {
        Value::Str(s) => format!("%{s}%"),
        other => format!("%{other:?}%"),
    };
    bind(args, Value::Str(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ayb_schema::{Column, ForeignKey, JsonType, RelationKind, Relationship, RelationshipKind};
    use std::collections::HashMap;

    fn fixture_snapshot() -> SchemaSnapshot {
        let mut tables = HashMap::new();
        tables.insert(
            "posts".to_string(),
            Table {
                schema: "public".to_string(),
                name: "posts".to_string(),
                kind: RelationKind::Table,
                columns: vec![
                    Column {
                        name: "id".to_string(),
                        json_type: JsonType::String,
                        nullable: false,
                        default: None,
                        is_enum: false,
                        enum_values: Vec::new(),
                        is_json: false,
                        is_array: false,
                    },
                    Column {
                        name: "title".to_string(),
                        json_type: JsonType::String,
                        nullable: false,
                        default: None,
                        is_enum: false,
                        enum_values: Vec::new(),
                        is_json: false,
                        is_array: false,
                    },
                    Column {
                        name: "author_id".to_string(),
                        json_type: JsonType::String,
                        nullable: false,
                        default: None,
                        is_enum: false,
                        enum_values: Vec::new(),
                        is_json: false,
                        is_array: false,
                    },
                ],
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

        SchemaSnapshot {
            built_at: chrono::Utc::now(),
            schemas: vec!["public".to_string()],
            relationships: vec![Relationship {
                field_name: "author".to_string(),
                kind: RelationshipKind::ManyToOne,
                local_table: "posts".to_string(),
                local_columns: vec!["author_id".to_string()],
                foreign_table: "users".to_string(),
                foreign_columns: vec!["id".to_string()],
            }],
            tables,
        }
    }

    #[test]
    fn rejects_unknown_table() {
        let snapshot = fixture_snapshot();
        let builder = QueryBuilder::new(&snapshot);
        let err = builder
            .build_list("ghosts", None, None, None, None, None, None, None)
            .unwrap_err();
        assert_eq!(err, QueryError::UnknownTable("ghosts".to_string()));
    }

    #[test]
    fn rejects_unknown_column_in_filter() {
        let snapshot = fixture_snapshot();
        let builder = QueryBuilder::new(&snapshot);
        let err = builder
            .build_list(
                "posts",
                Some("nonexistent='x'"),
                None,
                None,
                None,
                None,
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn { .. }));
    }

    #[test]
    fn builds_a_parameterized_select() {
        let snapshot = fixture_snapshot();
        let builder = QueryBuilder::new(&snapshot);
        let plan = builder
            .build_list(
                "posts",
                Some("title~'hello'"),
                Some("-title"),
                None,
                None,
                Some("author"),
                Some(2),
                Some(10),
            )
            .unwrap();
        assert!(plan.sql.contains("FROM \"public\".\"posts\""));
        assert!(plan.sql.contains("ORDER BY \"title\" DESC"));
        assert_eq!(plan.page, 2);
        assert_eq!(plan.per_page, 10);
        assert_eq!(plan.expand.len(), 1);
        assert_eq!(plan.expand[0].foreign_table, "users");
    }

    #[test]
    fn rejects_unknown_expand_field() {
        let snapshot = fixture_snapshot();
        let builder = QueryBuilder::new(&snapshot);
        let err = builder
            .build_list("posts", None, None, None, None, Some("ghost"), None, None)
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidExpand(_)));
    }

    #[test]
    fn clamps_per_page_to_the_maximum() {
        let snapshot = fixture_snapshot();
        let builder = QueryBuilder::new(&snapshot);
        let plan = builder
            .build_list("posts", None, None, None, None, None, None, Some(10_000))
            .unwrap();
        assert_eq!(plan.per_page, MAX_PER_PAGE);
    }
}
