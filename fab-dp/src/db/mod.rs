//! Database access for the design pipeline
//!
//! SQLite via sqlx. Designs, the quota ledger, and subscriptions live in one
//! database file; tables are created on startup if missing. Timestamps are
//! stored as RFC 3339 text except quota period bounds, which are unix epoch
//! seconds so the current-period lookup can range-compare in SQL.

pub mod designs;
pub mod quota;
pub mod subscriptions;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Initialize the database connection pool, creating the file and schema if
/// missing. WAL mode keeps concurrent readers off the single writer's back.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!(path = %db_path.display(), "Connecting to database");

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create pipeline tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS designs (
            design_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            state TEXT NOT NULL,
            source_images TEXT NOT NULL DEFAULT '[]',
            prompt TEXT,
            original_design_id TEXT,
            analysis TEXT,
            three_d TEXT,
            failed_stage TEXT,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_designs_owner ON designs(owner_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quota_ledger (
            user_id TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            period_start INTEGER NOT NULL,
            period_end INTEGER NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, resource_type, period_start)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subscriptions (
            user_id TEXT PRIMARY KEY,
            plan_type TEXT NOT NULL,
            current_period_start TEXT NOT NULL,
            current_period_end TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (designs, quota_ledger, subscriptions)");

    Ok(())
}

/// Whether an error is transient SQLite lock contention worth retrying
pub(crate) fn is_lock_error(err: &fab_common::Error) -> bool {
    match err {
        fab_common::Error::Database(db_err) => db_err.to_string().contains("database is locked"),
        _ => false,
    }
}
