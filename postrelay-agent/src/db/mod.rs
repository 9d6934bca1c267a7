//! Ledger database access
//!
//! The transfer ledger lives in its own SQLite file next to the
//! human-readable transfer log.

use postrelay_common::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory ledger database (tests, `--once` dry runs)
///
/// Pinned to a single connection that is never recycled; each SQLite
/// in-memory connection is a separate database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create ledger tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transfer_ledger (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id TEXT NOT NULL,
            post_label TEXT NOT NULL,
            scheduled TEXT NOT NULL,
            file_name TEXT NOT NULL,
            success INTEGER NOT NULL,
            status_code TEXT NOT NULL,
            detail TEXT,
            content_hash TEXT,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_transfer_ledger_task
            ON transfer_ledger (post_label, scheduled, file_name)
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Database tables initialized (transfer_ledger)");

    Ok(())
}
