use ayb_error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum WebhooksError {
    #[error("webhook not found")]
    NotFound,
    #[error("webhook url must be http(s)")]
    InvalidUrl,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<WebhooksError> for ApiError {
    fn from(err: WebhooksError) -> Self {
        match err {
            WebhooksError::NotFound => ApiError::NotFound,
            WebhooksError::InvalidUrl => ApiError::Validation(err.to_string()),
            WebhooksError::Database(err) => ayb_error::classify_sqlx_error(err),
        }
    }
}
