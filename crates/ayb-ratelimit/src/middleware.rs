use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ayb_auth::{Principal, Role};
use ayb_error::ApiError;

use crate::state::RateLimiterState;

/// C12, run ahead of the session binder. Admin principals bypass
/// entirely; everyone else is gated on their own `app_rate_limit`, keyed
/// by `app_id` (falling back to the principal id for callers with no app
/// of their own). A request with no resolved [`Principal`] at all — an
/// anonymous read — is never rate limited here.
pub async fn enforce(
    State(state): State<RateLimiterState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let principal = request.extensions().get::<Arc<Principal>>().cloned();

    let Some(principal) = principal else {
        return next.run(request).await;
    };
    if principal.role == Role::Admin {
        return next.run(request).await;
    }
    let Some(rps) = principal.app_rate_limit.filter(|rps| *rps > 0) else {
        return next.run(request).await;
    };

    let key = principal.app_id.as_deref().unwrap_or(principal.id.as_str());
    let decision = state.registry.check(key, rps);

    if !decision.allowed {
        return ApiError::RateLimited {
            limit: decision.limit,
            remaining: decision.remaining,
            reset_seconds: decision.reset_seconds,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "X-App-RateLimit-Limit",
        decision.limit.to_string().parse().expect("numeric header value"),
    );
    headers.insert(
        "X-App-RateLimit-Remaining",
        decision
            .remaining
            .to_string()
            .parse()
            .expect("numeric header value"),
    );
    headers.insert(
        "X-App-RateLimit-Reset",
        decision
            .reset_seconds
            .to_string()
            .parse()
            .expect("numeric header value"),
    );
    response
}
