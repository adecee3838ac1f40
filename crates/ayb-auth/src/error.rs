use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("malformed authorization header")]
    MalformedHeader,

    #[error("invalid or expired token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("unknown or revoked api key")]
    UnknownApiKey,

    #[error("invalid admin password")]
    InvalidAdminPassword,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
