//! Binds a request's resolved principal onto a single Postgres transaction
//! via session-local GUCs, so that any row-level security policy the
//! operator writes against `current_setting('ayb.user_role', true)` and
//! friends sees a consistent, scoped view for the lifetime of that
//! transaction.
//!
//! The GUCs are set with `set_config(..., true)` — the `true` is the
//! `is_local` flag, equivalent to `SET LOCAL` — so they evaporate on
//! commit or rollback and can never leak onto a connection a later,
//! differently-scoped request borrows back from the pool.

use sqlx::{PgPool, Postgres, Transaction};

use crate::error::SessionError;

/// Everything a row-level security policy might want to branch on. Built
/// from whatever `ayb-auth` resolved, but defined here so this crate does
/// not need to depend on the auth crate.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub role: String,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub app_id: Option<String>,
    pub scope: String,
    pub allowed_tables: Option<Vec<String>>,
}

/// An open transaction with the principal's GUCs already set. Dropping this
/// without calling [`SessionGuard::commit`] rolls the transaction back —
/// `sqlx::Transaction`'s own `Drop` impl issues the rollback, so a handler
/// that returns early on error can never leave a half-applied mutation or a
/// connection stuck holding stale session GUCs.
pub struct SessionGuard<'c> {
    tx: Transaction<'c, Postgres>,
}

impl<'c> SessionGuard<'c> {
    pub async fn begin(
        pool: &'c PgPool,
        ctx: &SessionContext,
        read_only: bool,
    ) -> Result<Self, SessionError> {
        let mut tx = pool.begin().await?;

        if read_only {
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("SELECT set_config('ayb.user_role', $1, true)")
            .bind(&ctx.role)
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config('ayb.user_id', $1, true)")
            .bind(ctx.user_id.as_deref().unwrap_or(""))
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config('ayb.user_email', $1, true)")
            .bind(ctx.user_email.as_deref().unwrap_or(""))
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config('ayb.app_id', $1, true)")
            .bind(ctx.app_id.as_deref().unwrap_or(""))
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT set_config('ayb.scope', $1, true)")
            .bind(&ctx.scope)
            .execute(&mut *tx)
            .await?;
        let allowed_tables = ctx.allowed_tables.as_ref().map(|t| t.join(","));
        sqlx::query("SELECT set_config('ayb.allowed_tables', $1, true)")
            .bind(allowed_tables.as_deref().unwrap_or(""))
            .execute(&mut *tx)
            .await?;

        Ok(Self { tx })
    }

    pub fn conn(&mut self) -> &mut Transaction<'c, Postgres> {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<(), SessionError> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), SessionError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_context_has_empty_scope() {
        let ctx = SessionContext::default();
        assert_eq!(ctx.role, "");
        assert!(ctx.user_id.is_none());
    }
}
