//! API keys: a long-lived, revocable credential for machine clients,
//! identified by a `ayb_k_<hex>` token whose SHA-256 hash (never the raw
//! token) is the only thing stored in the database — the same
//! hash-at-rest, compare-the-hash pattern used for session tokens, just
//! without HMAC since there is no separate payload to authenticate here.

use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::error::AuthError;
use crate::principal::{Principal, Role, Scope};

pub const API_KEY_PREFIX: &str = "ayb_k_";

/// A freshly minted key, returned exactly once — only its hash is
/// persisted, so this is the caller's only chance to see the plaintext.
pub struct IssuedApiKey {
    pub plaintext: String,
    pub hash: String,
}

pub fn generate() -> IssuedApiKey {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let plaintext = format!("{API_KEY_PREFIX}{}", hex::encode(bytes));
    let hash = hash_key(&plaintext);
    IssuedApiKey { plaintext, hash }
}

pub fn hash_key(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: uuid::Uuid,
    role: String,
    scope: String,
    allowed_tables: Option<Vec<String>>,
    app_id: Option<String>,
    app_rate_limit: Option<i32>,
    revoked_at: Option<chrono::DateTime<chrono::Utc>>,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn resolve(pool: &PgPool, plaintext: &str) -> Result<Principal, AuthError> {
    let hash = hash_key(plaintext);
    let row = sqlx::query_as::<_, ApiKeyRow>(
        r#"
        SELECT id, role, scope, allowed_tables, app_id, app_rate_limit, revoked_at, expires_at
        FROM _ayb_api_keys
        WHERE key_hash = $1
        "#,
    )
    .bind(&hash)
    .fetch_optional(pool)
    .await?
    .ok_or(AuthError::UnknownApiKey)?;

    if row.revoked_at.is_some() {
        return Err(AuthError::UnknownApiKey);
    }
    if row.expires_at.is_some_and(|expires| expires <= chrono::Utc::now()) {
        return Err(AuthError::UnknownApiKey);
    }

    let role = if row.role == "admin" {
        Role::Admin
    } else {
        Role::User
    };
    let scope = Scope::parse(&row.scope).unwrap_or(Scope::Readonly);

    Ok(Principal {
        id: row.id.to_string(),
        email: None,
        role,
        scope,
        allowed_tables: row.allowed_tables,
        app_id: row.app_id,
        app_rate_limit: row.app_rate_limit.map(|n| n as u32),
        anonymous: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_the_expected_prefix() {
        let issued = generate();
        assert!(issued.plaintext.starts_with(API_KEY_PREFIX));
        assert_eq!(issued.hash, hash_key(&issued.plaintext));
    }

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(hash_key("ayb_k_abc"), hash_key("ayb_k_abc"));
        assert_ne!(hash_key("ayb_k_abc"), hash_key("ayb_k_abd"));
    }
}
