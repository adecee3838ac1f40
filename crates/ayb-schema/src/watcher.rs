//! Watches for DDL changes, debounces schema cache reloads, and keeps the
//! row-change trigger installed on every user table.
//!
//! Postgres has no native DDL change feed, so the migration runner installs
//! an event trigger (`ddl_command_end`) that calls
//! `pg_notify('ayb_schema_changed', ...)` on CREATE/ALTER/DROP TABLE and
//! friends. This module just listens on that channel, the same way
//! `PgListener::connect_with(&pool).listen(channel)` is used elsewhere for
//! row-change fan-out, and coalesces bursts of notifications (a migration
//! touching ten tables fires ten notifies) into a single reload followed by
//! a trigger-sync pass, so a table created mid-burst still ends up wired for
//! change notification by the time the reload settles.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgListener;
use sqlx::Row;
use tokio::sync::mpsc;

use crate::cache::CacheHolder;
use crate::snapshot::RelationKind;

pub const SCHEMA_CHANGED_CHANNEL: &str = "ayb_schema_changed";
pub const ROW_CHANGED_CHANNEL: &str = "ayb_row_changed";
const ROW_TRIGGER_NAME: &str = "_ayb_row_changed_trigger";

/// Installs (or re-installs) the `_ayb_row_changed_trigger` AFTER
/// INSERT/UPDATE/DELETE trigger on every user table visible in `cache`'s
/// current snapshot. Idempotent: a table that already carries the trigger
/// is left alone. Views and the hidden `_ayb_*` tables are skipped — the
/// former have nothing to fire on, the latter would turn internal
/// bookkeeping into user-visible realtime/webhook traffic.
pub async fn sync_row_triggers(pool: &sqlx::PgPool, cache: &CacheHolder) -> Result<(), sqlx::Error> {
    let snapshot = cache.get();
    for table in snapshot.tables.values() {
        if table.kind != RelationKind::Table && table.kind != RelationKind::PartitionedTable {
            continue;
        }

        let already_installed = sqlx::query(
            r#"
            SELECT 1 FROM pg_trigger t
            JOIN pg_class c ON c.oid = t.tgrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE n.nspname = $1 AND c.relname = $2 AND t.tgname = $3
            "#,
        )
        .bind(&table.schema)
        .bind(&table.name)
        .bind(ROW_TRIGGER_NAME)
        .fetch_optional(pool)
        .await?
        .is_some();

        if already_installed {
            continue;
        }

        let sql = format!(
            r#"CREATE TRIGGER "{trigger}" AFTER INSERT OR UPDATE OR DELETE ON "{schema}"."{table}"
               FOR EACH ROW EXECUTE FUNCTION _ayb_notify_row_change()"#,
            trigger = ROW_TRIGGER_NAME,
            schema = table.schema,
            table = table.name,
        );
        sqlx::query(&sql).execute(pool).await?;
        tracing::info!(table = %table.name, "installed row-change trigger");
    }
    Ok(())
}

/// Runs until the listener connection is lost or the pool is closed.
/// Intended to be spawned as a long-lived background task; the caller
/// decides whether a listener failure is fatal to the process.
pub async fn run(
    pool: sqlx::PgPool,
    cache: Arc<CacheHolder>,
    debounce: Duration,
) -> Result<(), sqlx::Error> {
    let mut listener = PgListener::connect_with(&pool).await?;
    listener.listen(SCHEMA_CHANGED_CHANNEL).await?;

    let (tx, mut rx) = mpsc::channel::<()>(1);

    let debounce_pool = pool.clone();
    let debounce_task = tokio::spawn(async move {
        while rx.recv().await.is_some() {
            // Drain anything else that arrived while we were waiting, so a
            // burst of ten notifications still only produces one reload.
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(debounce) => break,
                    more = rx.recv() => {
                        if more.is_none() {
                            return;
                        }
                    }
                }
            }
            if let Err(err) = cache.reload_wait().await {
                tracing::error!(error = %err, "schema cache reload failed after DDL notification");
                continue;
            }
            tracing::info!("schema cache reloaded after DDL change");
            if let Err(err) = sync_row_triggers(&debounce_pool, &cache).await {
                tracing::error!(error = %err, "failed to sync row-change triggers after DDL change");
            }
        }
    });

    loop {
        match listener.recv().await {
            Ok(_notification) => {
                // A full channel means a reload is already pending; dropping
                // this wakeup is correct, not lossy — the pending reload will
                // pick up this change too since it hasn't run yet.
                let _ = tx.try_send(());
            }
            Err(err) => {
                tracing::warn!(error = %err, "schema watcher listener error, reconnecting");
                debounce_task.abort();
                return Err(err);
            }
        }
    }
}
