use ayb_error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum JobsError {
    #[error("job not found")]
    NotFound,
    #[error("schedule not found")]
    ScheduleNotFound,
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<JobsError> for ApiError {
    fn from(err: JobsError) -> Self {
        match err {
            JobsError::NotFound | JobsError::ScheduleNotFound => ApiError::NotFound,
            JobsError::InvalidCron(msg) => ApiError::Validation(msg),
            JobsError::Database(err) => ayb_error::classify_sqlx_error(err),
        }
    }
}
