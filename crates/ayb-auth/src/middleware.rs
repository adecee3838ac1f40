//! Resolves the `Authorization` header of every inbound request into a
//! [`Principal`] extension, the way `ayb_ratelimit::middleware::enforce`
//! reads one back out. A request with no header at all is not rejected
//! here — it is handed [`Principal::anonymous`] and left to the handler
//! (or a downstream middleware) to decide whether an anonymous principal
//! is good enough for the endpoint it hit.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ayb_error::ApiError;
use sqlx::PgPool;

use crate::api_key::{self, API_KEY_PREFIX};
use crate::error::AuthError;
use crate::jwt::TokenIssuer;
use crate::principal::Principal;

pub struct AuthState {
    pub pool: PgPool,
    pub issuer: TokenIssuer,
    /// When auth is disabled every request resolves to a full-access
    /// admin principal, matching `AUTH_ENABLED=false` being a deliberate
    /// "trust the network boundary" choice for local development, not a
    /// half-enforced mode.
    pub enabled: bool,
}

impl AuthState {
    pub fn new(pool: PgPool, issuer: TokenIssuer, enabled: bool) -> Self {
        Self {
            pool,
            issuer,
            enabled,
        }
    }
}

pub async fn resolve(
    State(state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.enabled {
        request
            .extensions_mut()
            .insert(Arc::new(Principal::admin("auth-disabled")));
        return next.run(request).await;
    }

    match extract_principal(&state, &request).await {
        Ok(principal) => {
            request.extensions_mut().insert(Arc::new(principal));
            next.run(request).await
        }
        Err(AuthError::MissingCredentials) => {
            request
                .extensions_mut()
                .insert(Arc::new(Principal::anonymous()));
            next.run(request).await
        }
        Err(err) => {
            tracing::debug!(error = %err, "rejecting request during auth resolution");
            ApiError::Unauthorized.into_response()
        }
    }
}

async fn extract_principal(state: &AuthState, request: &Request) -> Result<Principal, AuthError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingCredentials)?;
    let value = header.to_str().map_err(|_| AuthError::MalformedHeader)?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or(AuthError::MalformedHeader)?
        .trim();

    if token.starts_with(API_KEY_PREFIX) {
        api_key::resolve(&state.pool, token).await
    } else {
        state.issuer.verify(token)
    }
}
