use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown table {0:?}")]
    UnknownTable(String),

    #[error("unknown column {column:?} on table {table:?}")]
    UnknownColumn { table: String, column: String },

    #[error("unknown relation {0:?}")]
    UnknownRelation(String),

    #[error("unknown operator {0:?}")]
    UnknownOperator(String),

    #[error("invalid filter expression: {0}")]
    InvalidFilter(String),

    #[error("invalid expand expression: {0:?}")]
    InvalidExpand(String),

    #[error("invalid sort expression: {0:?}")]
    InvalidSort(String),

    #[error("page and perPage must be positive integers")]
    InvalidPagination,
}
