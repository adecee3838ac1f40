use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error reading migrations directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration {name} has already been applied with a different checksum")]
    ChecksumMismatch { name: String },

    #[error("migration file name {0:?} does not start with a numeric version prefix")]
    BadFileName(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
