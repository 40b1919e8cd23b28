use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes on an open pool. Idempotent.
///
/// Timestamps are stored as Unix milliseconds.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Current entry set, including tombstones (removed_at IS NOT NULL)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog_entries (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            source_provider TEXT NOT NULL,
            source_url TEXT,
            remote_capable INTEGER NOT NULL DEFAULT 0,
            featured INTEGER NOT NULL DEFAULT 0,
            popularity_score REAL NOT NULL DEFAULT 0,
            first_seen_at INTEGER NOT NULL,
            last_seen_at INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            removed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only change log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS server_changes (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id TEXT NOT NULL,
            change_kind TEXT NOT NULL,
            occurred_at INTEGER NOT NULL,
            previous_hash TEXT,
            new_hash TEXT,
            cycle_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS provider_status (
            provider TEXT PRIMARY KEY,
            last_attempt_at INTEGER NOT NULL,
            last_success_at INTEGER,
            last_error TEXT,
            entry_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refresh_cycles (
            id TEXT PRIMARY KEY,
            started_at INTEGER NOT NULL,
            finished_at INTEGER NOT NULL,
            providers_attempted INTEGER NOT NULL,
            providers_failed INTEGER NOT NULL,
            change_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_server_changes_entry ON server_changes(entry_id, occurred_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_server_changes_occurred ON server_changes(occurred_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_catalog_entries_provider ON catalog_entries(source_provider)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_catalog_entries_removed ON catalog_entries(removed_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
