//! The resolved identity and authorization scope for one request, shared by
//! every downstream crate (query builder, collections service, realtime
//! hub, rate limiter) that needs to know who is asking and what they're
//! allowed to touch.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Readonly,
    Readwrite,
    Full,
}

impl Scope {
    /// `"*"` is accepted anywhere a scope is configured or requested and is
    /// treated exactly as `full` — it exists for operators who want to say
    /// "no restriction" without naming one.
    pub fn parse(raw: &str) -> Option<Scope> {
        match raw {
            "*" | "full" => Some(Scope::Full),
            "readwrite" => Some(Scope::Readwrite),
            "readonly" => Some(Scope::Readonly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Readonly => "readonly",
            Scope::Readwrite => "readwrite",
            Scope::Full => "full",
        }
    }

    pub fn allows_write(&self) -> bool {
        matches!(self, Scope::Readwrite | Scope::Full)
    }

    pub fn allows_schema_changes(&self) -> bool {
        matches!(self, Scope::Full)
    }
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub id: String,
    pub email: Option<String>,
    pub role: Role,
    pub scope: Scope,
    /// `None` means no restriction beyond `scope`; `Some(vec![])` means no
    /// tables at all, which is a legitimate (if useless) configuration.
    pub allowed_tables: Option<Vec<String>>,
    pub app_id: Option<String>,
    pub app_rate_limit: Option<u32>,
    /// True only for the synthetic principal the auth middleware attaches
    /// when a request carries no `Authorization` header at all. Handlers
    /// that need to tell "no credentials" (401) apart from "credentials
    /// present but insufficient" (403) check this instead of guessing from
    /// `scope`/`role`.
    pub anonymous: bool,
}

impl Principal {
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            role: Role::Admin,
            scope: Scope::Full,
            allowed_tables: None,
            app_id: None,
            app_rate_limit: None,
            anonymous: false,
        }
    }

    /// The principal attached to an unauthenticated request. It carries
    /// read-only scope and no table restriction, so anonymous reads work
    /// out of the box against tables whose RLS policies allow a null
    /// `ayb.user_id`; any write or admin-only handler rejects it because
    /// `anonymous` is set, not because its scope happens to be narrow.
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            email: None,
            role: Role::User,
            scope: Scope::Readonly,
            allowed_tables: None,
            app_id: None,
            app_rate_limit: None,
            anonymous: true,
        }
    }

    pub fn can_access_table(&self, table: &str) -> bool {
        match &self.allowed_tables {
            None => true,
            Some(tables) => tables.iter().any(|t| t == table),
        }
    }
}
