use ayb_error::ApiError;
use ayb_query::QueryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectionsError {
    #[error("{0}")]
    Query(#[from] QueryError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record not found")]
    NotFound,

    #[error("body field {field:?} has an unsupported value for its column type")]
    UnsupportedValue { field: String },

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("table {0:?} has a composite primary key; single-id lookups are not supported")]
    CompositePrimaryKey(String),

    #[error("scope does not permit write access")]
    ReadOnly,

    #[error("this endpoint requires a principal, none was presented")]
    Unauthenticated,

    #[error("access to table {0:?} is not permitted for this principal")]
    TableForbidden(String),

    #[error("batch request exceeds the maximum of {max} operations")]
    BatchTooLarge { max: usize },

    #[error("record was modified since the supplied updated_at")]
    StaleWrite,
}

impl From<CollectionsError> for ApiError {
    fn from(err: CollectionsError) -> Self {
        match err {
            CollectionsError::Query(QueryError::UnknownTable(_)) => ApiError::NotFound,
            CollectionsError::Query(other) => ApiError::Validation(other.to_string()),
            CollectionsError::Database(e) => ayb_error::classify_sqlx_error(e),
            CollectionsError::NotFound => ApiError::NotFound,
            CollectionsError::UnsupportedValue { field } => {
                ApiError::Validation(format!("unsupported value for field {field:?}"))
            }
            CollectionsError::NotAnObject => {
                ApiError::Validation("request body must be a JSON object".to_string())
            }
            CollectionsError::CompositePrimaryKey(t) => {
                ApiError::Validation(format!("table {t:?} has a composite primary key"))
            }
            CollectionsError::ReadOnly => ApiError::ForbiddenScope,
            CollectionsError::Unauthenticated => ApiError::Unauthorized,
            CollectionsError::TableForbidden(_) => ApiError::ForbiddenTable,
            CollectionsError::BatchTooLarge { max } => {
                ApiError::Validation(format!("batch request exceeds the maximum of {max} operations"))
            }
            CollectionsError::StaleWrite => ApiError::StaleWrite,
        }
    }
}
