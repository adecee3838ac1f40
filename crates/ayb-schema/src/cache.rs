//! Lock-free holder for the current [`SchemaSnapshot`].
//!
//! Grounded on the `ArcSwap`-wrapped-policy pattern used for hot-reloadable,
//! read-mostly state: load the current value with a single atomic pointer
//! read, publish a new one with a single atomic pointer write. Readers never
//! block on a writer and never see a half-built snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;

use crate::error::SchemaError;
use crate::introspect::build_cache;
use crate::snapshot::SchemaSnapshot;

/// Holds the live snapshot and lets callers force or await a rebuild.
///
/// `get` is the hot path and is entirely lock-free. `reload_wait` goes
/// through the database and is expected to be called occasionally — on
/// startup, and from the schema watcher in response to a DDL change
/// notification.
pub struct CacheHolder {
    snapshot: ArcSwap<SchemaSnapshot>,
    pool: sqlx::PgPool,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl CacheHolder {
    pub fn new(pool: sqlx::PgPool) -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        Self {
            snapshot: ArcSwap::from_pointee(SchemaSnapshot::empty()),
            pool,
            ready_tx,
            ready_rx,
        }
    }

    /// Current snapshot. Always returns immediately, even before the first
    /// successful build — callers see an empty snapshot (no tables) until
    /// then, rather than blocking.
    pub fn get(&self) -> Arc<SchemaSnapshot> {
        self.snapshot.load_full()
    }

    /// Unconditionally re-introspect and block the caller until it has
    /// completed, surfacing any introspection error. Used at startup, where
    /// a broken schema should fail the boot rather than silently serve an
    /// empty snapshot, and after an admin-triggered DDL where the caller
    /// needs to observe their own change before responding.
    pub async fn reload_wait(&self) -> Result<(), SchemaError> {
        let fresh = build_cache(&self.pool).await?;
        self.snapshot.store(Arc::new(fresh));
        let _ = self.ready_tx.send(true);
        Ok(())
    }

    /// Resolves once the first successful `reload_wait` has completed. Cloning
    /// the receiver is cheap; every caller gets its own cursor over the same
    /// underlying signal.
    pub fn ready(&self) -> impl std::future::Future<Output = ()> + 'static {
        let mut rx = self.ready_rx.clone();
        async move {
            if *rx.borrow() {
                return;
            }
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return;
                }
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.ready_rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{JsonType, RelationKind, Table};

    fn table_fixture(name: &str) -> Table {
        Table {
            schema: "public".to_string(),
            name: name.to_string(),
            kind: RelationKind::Table,
            columns: vec![crate::snapshot::Column {
                name: "id".to_string(),
                json_type: JsonType::String,
                nullable: false,
                default: None,
                is_enum: false,
                enum_values: Vec::new(),
                is_json: false,
                is_array: false,
            }],
            primary_key: vec!["id".to_string()],
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            has_tsvector: false,
        }
    }

    #[test]
    fn empty_snapshot_has_no_tables() {
        let snap = SchemaSnapshot::empty();
        assert!(snap.table("anything").is_none());
    }

    #[test]
    fn table_lookup_by_name() {
        let mut snap = SchemaSnapshot::empty();
        snap.tables.insert("widgets".to_string(), table_fixture("widgets"));
        assert!(snap.table("widgets").is_some());
        assert!(snap.table("gadgets").is_none());
    }
}
