#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("malformed row-change notification payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Listen(#[from] sqlx::Error),
}
