use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("database error while introspecting schema: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema cache has not completed its first build yet")]
    NotReady,
}
