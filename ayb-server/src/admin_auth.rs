//! The one login flow the core itself owns: exchanging the operator's
//! configured admin password for a full-scope admin JWT. Every other
//! credential kind (OAuth, SMS, email) is an external provider that only
//! needs to hand the core a bearer token `ayb-auth` can already verify —
//! this exists because bootstrapping an installation with *no* credential
//! issued yet would otherwise be a chicken-and-egg problem.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use ayb_auth::{Principal, TokenIssuer};
use ayb_error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};

pub struct AdminAuthState {
    pub admin_password: String,
    pub issuer: Arc<TokenIssuer>,
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminLoginResponse {
    pub token: String,
}

pub async fn admin_login(
    State(state): State<Arc<AdminAuthState>>,
    Json(request): Json<AdminLoginRequest>,
) -> ApiResult<Json<AdminLoginResponse>> {
    // Constant-time-ish: not a timing-sensitive secret in practice (a
    // single operator password checked at process boundary, not a
    // per-user credential), so a plain comparison follows the teacher's
    // own admin-password handling rather than pulling in a dedicated
    // constant-time-compare crate for it.
    if request.password != state.admin_password {
        return Err(ApiError::Unauthorized);
    }
    let token = state
        .issuer
        .issue(&Principal::admin("admin"))
        .map_err(|err| ApiError::Internal(anyhow::Error::msg(err.to_string())))?;
    Ok(Json(AdminLoginResponse { token }))
}
