//! The single place errors are rendered to HTTP.
//!
//! Every leaf crate in this workspace defines its own `thiserror` error enum
//! (following `hook-common::pgqueue::PgQueueError` and
//! `hook-worker::error::WorkerError`) and maps it into [`ApiError`] at the
//! point it crosses into an axum handler. Handlers themselves never build an
//! HTTP response by hand.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The stable `code` values from the error handling design.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden: scope does not permit this operation")]
    ForbiddenScope,
    #[error("forbidden: table is not in the principal's allowed set")]
    ForbiddenTable,
    #[error("not found")]
    NotFound,
    #[error("validation error: {0}")]
    Validation(String),
    #[error("unique constraint violated: {constraint}")]
    ConstraintUnique { constraint: String },
    #[error("check constraint violated: {constraint}")]
    ConstraintCheck { constraint: String },
    #[error("foreign key constraint violated: {constraint}")]
    ConstraintFk { constraint: String },
    #[error("rate limited")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset_seconds: u64,
    },
    #[error("a conflicting operation is already in progress")]
    ConflictInProgress,
    #[error("record was modified by another request; refetch and retry")]
    StaleWrite,
    #[error("payload too large")]
    PayloadTooLarge,
    #[error("unsupported media type")]
    UnsupportedMediaType,
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::ForbiddenScope => "forbidden_scope",
            ApiError::ForbiddenTable => "forbidden_table",
            ApiError::NotFound => "not_found",
            ApiError::Validation(_) => "validation",
            ApiError::ConstraintUnique { .. } => "constraint_unique",
            ApiError::ConstraintCheck { .. } => "constraint_check",
            ApiError::ConstraintFk { .. } => "constraint_fk",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::ConflictInProgress => "conflict_in_progress",
            ApiError::StaleWrite => "stale_write",
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::UnsupportedMediaType => "unsupported_media_type",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::ForbiddenScope | ApiError::ForbiddenTable => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::ConstraintUnique { .. } => StatusCode::CONFLICT,
            ApiError::ConstraintCheck { .. } | ApiError::ConstraintFk { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ConflictInProgress => StatusCode::CONFLICT,
            ApiError::StaleWrite => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    doc_url: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "internal error rendered to client");
        }

        let status = self.status();
        let mut response = (
            status,
            Json(ErrorBody {
                code: self.code(),
                message: self.to_string(),
                doc_url: None,
            }),
        )
            .into_response();

        if let ApiError::RateLimited {
            limit,
            remaining,
            reset_seconds,
        } = &self
        {
            let headers = response.headers_mut();
            headers.insert(
                "X-App-RateLimit-Limit",
                limit.to_string().parse().expect("numeric header value"),
            );
            headers.insert(
                "X-App-RateLimit-Remaining",
                remaining
                    .to_string()
                    .parse()
                    .expect("numeric header value"),
            );
            headers.insert(
                "X-App-RateLimit-Reset",
                reset_seconds
                    .to_string()
                    .parse()
                    .expect("numeric header value"),
            );
        }

        response
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Classify a `sqlx::Error` into the appropriate constraint-violation variant,
/// following the design note that "database constraint violations are
/// translated by the binder, not the handler."
pub fn classify_sqlx_error(error: sqlx::Error) -> ApiError {
    match &error {
        sqlx::Error::Database(db_err) => {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => ApiError::ConstraintUnique { constraint },
                // check_violation / not_null_violation
                Some("23514") | Some("23502") => ApiError::ConstraintCheck { constraint },
                // foreign_key_violation
                Some("23503") => ApiError::ConstraintFk { constraint },
                _ => ApiError::Internal(anyhow::Error::new(error)),
            }
        }
        sqlx::Error::RowNotFound => ApiError::NotFound,
        _ => ApiError::Internal(anyhow::Error::new(error)),
    }
}
