//! Two independent, append-only migration ledgers.
//!
//! System migrations (bundled at compile time under `migrations/`) bootstrap
//! the internal tables this crate and its siblings depend on. User
//! migrations live in an operator-chosen directory on disk
//! (`USER_MIGRATIONS_DIR`) and are picked up at startup and re-applied on
//! every boot — already-applied files are skipped by version, and a
//! checksum mismatch on an already-applied file is refused rather than
//! silently re-run, since editing a shipped migration in place is almost
//! always a mistake.
//!
//! Every migration file runs inside its own transaction; a failure rolls
//! back just that file; migrations that ran earlier in the same boot stay
//! applied.

use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};

use crate::error::MigrateError;

const SYSTEM_BOOTSTRAP: &[(i64, &str, &str)] = &[(
    1,
    "bootstrap",
    include_str!("../migrations/0001_bootstrap.sql"),
)];

fn checksum(sql: &str) -> String {
    let digest = Sha256::digest(sql.as_bytes());
    hex::encode(digest)
}

async fn ensure_ledgers(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _ayb_migrations (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _ayb_user_migrations (
            version BIGINT PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Applies the bundled system migrations, creating the internal tables
/// every other crate in this workspace relies on existing.
pub async fn run_system_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    ensure_ledgers(pool).await?;

    for (version, name, sql) in SYSTEM_BOOTSTRAP {
        apply_one(pool, "_ayb_migrations", *version, name, sql).await?;
    }

    Ok(())
}

/// Applies operator-supplied migrations from `dir`, in ascending filename
/// order. File names must start with a numeric version prefix, e.g.
/// `0003_add_comments_table.sql`; everything up to the first `_` is parsed
/// as the version.
pub async fn run_user_migrations(pool: &PgPool, dir: &str) -> Result<(), MigrateError> {
    ensure_ledgers(pool).await?;

    let dir_path = std::path::Path::new(dir);
    if !dir_path.is_dir() {
        tracing::info!(dir, "user migrations directory does not exist, skipping");
        return Ok(());
    }

    let mut entries = tokio::fs::read_dir(dir_path).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("sql") {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let file_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let version_str = file_name
            .split('_')
            .next()
            .ok_or_else(|| MigrateError::BadFileName(file_name.clone()))?;
        let version: i64 = version_str
            .parse()
            .map_err(|_| MigrateError::BadFileName(file_name.clone()))?;
        let sql = tokio::fs::read_to_string(&path).await?;
        apply_one(pool, "_ayb_user_migrations", version, &file_name, &sql).await?;
    }

    Ok(())
}

async fn apply_one(
    pool: &PgPool,
    ledger_table: &str,
    version: i64,
    name: &str,
    sql: &str,
) -> Result<(), MigrateError> {
    let sum = checksum(sql);

    let existing = sqlx::query(&format!(
        "SELECT checksum FROM {ledger_table} WHERE version = $1"
    ))
    .bind(version)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = existing {
        let existing_checksum: String = row.try_get("checksum")?;
        if existing_checksum != sum {
            return Err(MigrateError::ChecksumMismatch {
                name: name.to_string(),
            });
        }
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    sqlx::raw_sql(sql).execute(&mut *tx).await?;
    sqlx::query(&format!(
        "INSERT INTO {ledger_table} (version, name, checksum) VALUES ($1, $2, $3)"
    ))
    .bind(version)
    .bind(name)
    .bind(&sum)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(version, name, "applied migration");
    Ok(())
}
