//! HS256 bearer tokens for both the admin and ordinary-user login flows.
//! There is deliberately one claims shape for both: an admin token is just
//! a user token with `role: admin` and `scope: full`.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::principal::{Principal, Role, Scope};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
    role: String,
    scope: String,
    allowed_tables: Option<Vec<String>>,
    app_id: Option<String>,
    app_rate_limit: Option<u32>,
    iat: i64,
    exp: i64,
}

pub struct TokenIssuer {
    secret: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<String>, ttl: std::time::Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::hours(24)),
        }
    }

    pub fn issue(&self, principal: &Principal) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal.id.clone(),
            email: principal.email.clone(),
            role: match principal.role {
                Role::Admin => "admin".to_string(),
                Role::User => "user".to_string(),
            },
            scope: principal.scope.as_str().to_string(),
            allowed_tables: principal.allowed_tables.clone(),
            app_id: principal.app_id.clone(),
            app_rate_limit: principal.app_rate_limit,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(AuthError::InvalidToken)
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(jsonwebtoken::Algorithm::HS256),
        )?;
        let claims = data.claims;
        let role = if claims.role == "admin" {
            Role::Admin
        } else {
            Role::User
        };
        let scope = Scope::parse(&claims.scope).unwrap_or(Scope::Readonly);
        Ok(Principal {
            id: claims.sub,
            email: claims.email,
            role,
            scope,
            allowed_tables: claims.allowed_tables,
            app_id: claims.app_id,
            app_rate_limit: claims.app_rate_limit,
            anonymous: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_principal_through_a_token() {
        let issuer = TokenIssuer::new("test-secret", std::time::Duration::from_secs(3600));
        let principal = Principal {
            id: "user-1".to_string(),
            email: Some("a@example.com".to_string()),
            role: Role::User,
            scope: Scope::Readwrite,
            allowed_tables: Some(vec!["posts".to_string()]),
            app_id: Some("app-1".to_string()),
            app_rate_limit: Some(100),
            anonymous: false,
        };

        let token = issuer.issue(&principal).expect("issue token");
        let resolved = issuer.verify(&token).expect("verify token");

        assert_eq!(resolved.id, "user-1");
        assert_eq!(resolved.scope, Scope::Readwrite);
        assert_eq!(resolved.allowed_tables, Some(vec!["posts".to_string()]));
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let issuer_a = TokenIssuer::new("secret-a", std::time::Duration::from_secs(3600));
        let issuer_b = TokenIssuer::new("secret-b", std::time::Duration::from_secs(3600));
        let token = issuer_a.issue(&Principal::admin("root")).unwrap();
        assert!(issuer_b.verify(&token).is_err());
    }
}
