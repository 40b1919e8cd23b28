//! Durable catalog store with copy-on-write snapshots.
//!
//! SQLite holds the authoritative state: the current entry set (tombstones
//! included), the append-only change log, per-provider status and one row
//! per refresh cycle. Readers never touch SQLite. They clone an
//! `Arc<CatalogSnapshot>` that is replaced wholesale after each successful
//! commit, so a reader either sees the state before a cycle or after it,
//! never a mix.
//!
//! # Tables
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `catalog_entries` | Entry set keyed by `id`; `removed_at` marks tombstones |
//! | `server_changes` | Change log ordered by `(occurred_at, seq)` |
//! | `provider_status` | Last attempt / success / error per provider |
//! | `refresh_cycles` | One row per committed cycle |

use anyhow::Context;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{Config, RetentionConfig};
use crate::db;
use crate::error::{CatalogError, Result};
use crate::migrate;
use crate::models::{CatalogEntry, CatalogSnapshot, ChangeKind, ServerChange};
use crate::reconcile::{sort_by_priority, ProviderDiff};

/// Identity and timing of one refresh cycle, recorded alongside its diffs.
#[derive(Debug, Clone)]
pub struct CycleRecord {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CycleRecord {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at,
            finished_at: started_at,
        }
    }
}

/// A stored entry together with its tombstone marker.
#[derive(Debug, Clone, Serialize)]
pub struct StoredEntry {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    pub removed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub last_attempt_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub entry_count: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub tombstones_purged: u64,
    pub changes_pruned: u64,
}

/// Current time truncated to the millisecond precision stored on disk, so
/// in-memory snapshots and reloaded ones compare equal.
pub fn now_ms() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub struct CatalogStore {
    pool: SqlitePool,
    current: RwLock<Arc<CatalogSnapshot>>,
    write_lock: Mutex<()>,
}

impl CatalogStore {
    /// Connect to the configured database, migrate it and load the last
    /// committed snapshot.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        Self::open(pool).await
    }

    /// Open a store over an existing pool.
    ///
    /// If the durable state cannot be read the store starts cold rather
    /// than failing; the next successful commit or [`reload`](Self::reload)
    /// populates it.
    pub async fn open(pool: SqlitePool) -> anyhow::Result<Self> {
        migrate::migrate_pool(&pool)
            .await
            .context("Failed to migrate catalog database")?;

        let snapshot = match load_snapshot(&pool, 1).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not load catalog snapshot, starting cold");
                CatalogSnapshot::cold()
            }
        };
        debug!(
            entries = snapshot.len(),
            populated = snapshot.populated,
            "catalog store opened"
        );

        Ok(Self {
            pool,
            current: RwLock::new(Arc::new(snapshot)),
            write_lock: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The most recently committed snapshot. Never blocks on I/O.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Live entries for one provider, keyed by id: the reconciler's input.
    pub fn provider_slice(&self, provider: &str) -> HashMap<String, CatalogEntry> {
        self.snapshot()
            .provider_entries(provider)
            .map(|e| (e.id.clone(), e.clone()))
            .collect()
    }

    fn swap(&self, snapshot: CatalogSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.current.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    /// Re-read durable state, picking up commits made by other processes
    /// sharing the database file.
    ///
    /// The snapshot is swapped (and its generation bumped) only when the
    /// durable state differs from the one being served. Returns `false` and
    /// keeps serving the in-memory snapshot if the database cannot be read.
    pub async fn reload(&self) -> bool {
        let _guard = self.write_lock.lock().await;
        let current = self.snapshot();
        match load_snapshot(&self.pool, current.generation + 1).await {
            Ok(snapshot) => {
                if !same_state(&current, &snapshot) {
                    debug!(
                        entries = snapshot.len(),
                        generation = snapshot.generation,
                        "catalog reloaded from durable state"
                    );
                    self.swap(snapshot);
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "catalog reload failed, serving last known snapshot");
                false
            }
        }
    }

    /// Apply one cycle's diffs atomically.
    ///
    /// Entries, change records, provider status and the cycle row are
    /// written in one transaction. The in-memory snapshot is swapped only
    /// after the commit succeeds; on any error nothing changes and the
    /// previous snapshot stays authoritative.
    pub async fn apply_reconciliation(
        &self,
        diffs: &[ProviderDiff],
        cycle: &CycleRecord,
    ) -> Result<Vec<ServerChange>> {
        let _guard = self.write_lock.lock().await;

        let committed = self
            .write_cycle(diffs, cycle)
            .await
            .map_err(CatalogError::StoreWrite)?;

        let previous = self.snapshot();
        self.swap(next_snapshot(&previous, diffs, cycle));

        Ok(committed)
    }

    async fn write_cycle(
        &self,
        diffs: &[ProviderDiff],
        cycle: &CycleRecord,
    ) -> std::result::Result<Vec<ServerChange>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut committed = Vec::new();

        for diff in diffs {
            for (entry, kind) in &diff.changes {
                match kind {
                    ChangeKind::Added | ChangeKind::Updated => {
                        upsert_entry(&mut *tx, entry).await?;
                    }
                    ChangeKind::Removed => {
                        sqlx::query("UPDATE catalog_entries SET removed_at = ? WHERE id = ?")
                            .bind(cycle.finished_at.timestamp_millis())
                            .bind(&entry.id)
                            .execute(&mut *tx)
                            .await?;
                    }
                }
            }

            for entry in &diff.unchanged {
                sqlx::query("UPDATE catalog_entries SET last_seen_at = ? WHERE id = ?")
                    .bind(entry.last_seen_at.timestamp_millis())
                    .bind(&entry.id)
                    .execute(&mut *tx)
                    .await?;
            }

            for record in &diff.records {
                insert_change(&mut *tx, record, &cycle.id).await?;
                committed.push(record.clone());
            }

            record_provider_status(&mut *tx, diff, cycle.finished_at).await?;
        }

        let failed = diffs.iter().filter(|d| !d.fetched).count();
        sqlx::query(
            r#"
            INSERT INTO refresh_cycles (id, started_at, finished_at, providers_attempted, providers_failed, change_count)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cycle.id)
        .bind(cycle.started_at.timestamp_millis())
        .bind(cycle.finished_at.timestamp_millis())
        .bind(diffs.len() as i64)
        .bind(failed as i64)
        .bind(committed.len() as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(committed)
    }

    /// Change history for one entry, oldest first.
    pub async fn history(&self, entry_id: &str) -> Result<Vec<ServerChange>> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, change_kind, occurred_at, previous_hash, new_hash
            FROM server_changes
            WHERE entry_id = ?
            ORDER BY occurred_at ASC, seq ASC
            "#,
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await
        .map_err(CatalogError::StoreRead)?;

        rows.iter()
            .map(row_to_change)
            .collect::<std::result::Result<_, _>>()
            .map_err(CatalogError::StoreRead)
    }

    /// Most recent change records across all entries, newest first.
    pub async fn recent_changes(&self, limit: i64) -> Result<Vec<ServerChange>> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, change_kind, occurred_at, previous_hash, new_hash
            FROM server_changes
            ORDER BY occurred_at DESC, seq DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(CatalogError::StoreRead)?;

        rows.iter()
            .map(row_to_change)
            .collect::<std::result::Result<_, _>>()
            .map_err(CatalogError::StoreRead)
    }

    /// Look up a stored entry by id, including tombstoned ones.
    pub async fn entry(&self, entry_id: &str) -> Result<Option<StoredEntry>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_ENTRY))
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(CatalogError::StoreRead)?;

        row.map(|row| -> std::result::Result<StoredEntry, sqlx::Error> {
            let removed_at: Option<i64> = row.try_get("removed_at")?;
            Ok(StoredEntry {
                entry: row_to_entry(&row)?,
                removed_at: removed_at.map(from_millis),
            })
        })
        .transpose()
        .map_err(CatalogError::StoreRead)
    }

    pub async fn provider_status(&self) -> Result<Vec<ProviderStatus>> {
        let rows = sqlx::query(
            r#"
            SELECT provider, last_attempt_at, last_success_at, last_error, entry_count
            FROM provider_status
            ORDER BY provider ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CatalogError::StoreRead)?;

        rows.iter()
            .map(|row| -> std::result::Result<ProviderStatus, sqlx::Error> {
                let last_success_at: Option<i64> = row.try_get("last_success_at")?;
                Ok(ProviderStatus {
                    provider: row.try_get("provider")?,
                    last_attempt_at: from_millis(row.try_get("last_attempt_at")?),
                    last_success_at: last_success_at.map(from_millis),
                    last_error: row.try_get("last_error")?,
                    entry_count: row.try_get("entry_count")?,
                })
            })
            .collect::<std::result::Result<_, sqlx::Error>>()
            .map_err(CatalogError::StoreRead)
    }

    /// Number of committed refresh cycles.
    pub async fn cycle_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM refresh_cycles")
            .fetch_one(&self.pool)
            .await
            .map_err(CatalogError::StoreRead)
    }

    /// Apply the retention policy. Never touches the served snapshot: only
    /// tombstones and change records are deleted.
    pub async fn prune(
        &self,
        retention: &RetentionConfig,
        now: DateTime<Utc>,
    ) -> Result<PruneReport> {
        let _guard = self.write_lock.lock().await;
        let mut report = PruneReport::default();

        if retention.tombstone_days == 0 && retention.change_log_days == 0 {
            return Ok(report);
        }

        let mut tx = self.pool.begin().await.map_err(CatalogError::StoreWrite)?;

        if retention.tombstone_days > 0 {
            let cutoff = now - Duration::days(retention.tombstone_days as i64);
            report.tombstones_purged = sqlx::query(
                "DELETE FROM catalog_entries WHERE removed_at IS NOT NULL AND removed_at < ?",
            )
            .bind(cutoff.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(CatalogError::StoreWrite)?
            .rows_affected();
        }

        if retention.change_log_days > 0 {
            let cutoff = now - Duration::days(retention.change_log_days as i64);
            report.changes_pruned = sqlx::query("DELETE FROM server_changes WHERE occurred_at < ?")
                .bind(cutoff.timestamp_millis())
                .execute(&mut *tx)
                .await
                .map_err(CatalogError::StoreWrite)?
                .rows_affected();
        }

        tx.commit().await.map_err(CatalogError::StoreWrite)?;
        Ok(report)
    }
}

const SELECT_ENTRY: &str = r#"
    SELECT id, name, description, source_provider, source_url, remote_capable, featured,
           popularity_score, first_seen_at, last_seen_at, content_hash, removed_at
    FROM catalog_entries
"#;

async fn load_snapshot(
    pool: &SqlitePool,
    generation: u64,
) -> std::result::Result<CatalogSnapshot, sqlx::Error> {
    let rows = sqlx::query(&format!("{} WHERE removed_at IS NULL", SELECT_ENTRY))
        .fetch_all(pool)
        .await?;

    let mut entries = rows
        .iter()
        .map(row_to_entry)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    sort_by_priority(&mut entries);

    let last_success: Option<i64> =
        sqlx::query_scalar("SELECT MAX(last_success_at) FROM provider_status")
            .fetch_one(pool)
            .await?;

    Ok(CatalogSnapshot {
        entries,
        populated: last_success.is_some(),
        refreshed_at: last_success.map(from_millis),
        generation: if last_success.is_some() { generation } else { 0 },
    })
}

/// Whether two snapshots describe the same committed state, ignoring
/// their generation.
fn same_state(a: &CatalogSnapshot, b: &CatalogSnapshot) -> bool {
    a.populated == b.populated && a.refreshed_at == b.refreshed_at && a.entries == b.entries
}

/// Build the post-commit snapshot from the previous one plus the diffs.
fn next_snapshot(
    previous: &CatalogSnapshot,
    diffs: &[ProviderDiff],
    cycle: &CycleRecord,
) -> CatalogSnapshot {
    let mut by_id: HashMap<String, CatalogEntry> = previous
        .entries
        .iter()
        .map(|e| (e.id.clone(), e.clone()))
        .collect();

    for diff in diffs {
        for (entry, kind) in &diff.changes {
            match kind {
                ChangeKind::Added | ChangeKind::Updated => {
                    by_id.insert(entry.id.clone(), entry.clone());
                }
                ChangeKind::Removed => {
                    by_id.remove(&entry.id);
                }
            }
        }
        for entry in &diff.unchanged {
            by_id.insert(entry.id.clone(), entry.clone());
        }
    }

    let mut entries: Vec<CatalogEntry> = by_id.into_values().collect();
    sort_by_priority(&mut entries);

    let fetched_any = diffs.iter().any(|d| d.fetched);
    CatalogSnapshot {
        entries,
        populated: previous.populated || fetched_any,
        refreshed_at: if fetched_any {
            Some(cycle.finished_at)
        } else {
            previous.refreshed_at
        },
        generation: previous.generation + 1,
    }
}

async fn upsert_entry(
    conn: &mut SqliteConnection,
    entry: &CatalogEntry,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO catalog_entries (id, name, description, source_provider, source_url,
                                     remote_capable, featured, popularity_score,
                                     first_seen_at, last_seen_at, content_hash, removed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            source_provider = excluded.source_provider,
            source_url = excluded.source_url,
            remote_capable = excluded.remote_capable,
            featured = excluded.featured,
            popularity_score = excluded.popularity_score,
            first_seen_at = excluded.first_seen_at,
            last_seen_at = excluded.last_seen_at,
            content_hash = excluded.content_hash,
            removed_at = NULL
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.name)
    .bind(&entry.description)
    .bind(&entry.source_provider)
    .bind(&entry.source_url)
    .bind(entry.remote_capable)
    .bind(entry.featured)
    .bind(entry.popularity_score)
    .bind(entry.first_seen_at.timestamp_millis())
    .bind(entry.last_seen_at.timestamp_millis())
    .bind(&entry.content_hash)
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_change(
    conn: &mut SqliteConnection,
    change: &ServerChange,
    cycle_id: &str,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO server_changes (entry_id, change_kind, occurred_at, previous_hash, new_hash, cycle_id)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&change.entry_id)
    .bind(change.change_kind.as_str())
    .bind(change.occurred_at.timestamp_millis())
    .bind(&change.previous_hash)
    .bind(&change.new_hash)
    .bind(cycle_id)
    .execute(conn)
    .await?;

    Ok(())
}

async fn record_provider_status(
    conn: &mut SqliteConnection,
    diff: &ProviderDiff,
    at: DateTime<Utc>,
) -> std::result::Result<(), sqlx::Error> {
    let at = at.timestamp_millis();
    if diff.fetched {
        sqlx::query(
            r#"
            INSERT INTO provider_status (provider, last_attempt_at, last_success_at, last_error, entry_count)
            VALUES (?, ?, ?, NULL, ?)
            ON CONFLICT(provider) DO UPDATE SET
                last_attempt_at = excluded.last_attempt_at,
                last_success_at = excluded.last_success_at,
                last_error = NULL,
                entry_count = excluded.entry_count
            "#,
        )
        .bind(&diff.provider)
        .bind(at)
        .bind(at)
        .bind(diff.live_count() as i64)
        .execute(conn)
        .await?;
    } else {
        // A failed fetch keeps the previous success time and entry count
        sqlx::query(
            r#"
            INSERT INTO provider_status (provider, last_attempt_at, last_success_at, last_error, entry_count)
            VALUES (?, ?, NULL, ?, 0)
            ON CONFLICT(provider) DO UPDATE SET
                last_attempt_at = excluded.last_attempt_at,
                last_error = excluded.last_error
            "#,
        )
        .bind(&diff.provider)
        .bind(at)
        .bind(diff.error.as_deref().unwrap_or("unknown error"))
        .execute(conn)
        .await?;
    }

    Ok(())
}

fn row_to_entry(row: &SqliteRow) -> std::result::Result<CatalogEntry, sqlx::Error> {
    Ok(CatalogEntry {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        source_provider: row.try_get("source_provider")?,
        source_url: row.try_get("source_url")?,
        remote_capable: row.try_get::<i64, _>("remote_capable")? != 0,
        featured: row.try_get::<i64, _>("featured")? != 0,
        popularity_score: row.try_get("popularity_score")?,
        first_seen_at: from_millis(row.try_get("first_seen_at")?),
        last_seen_at: from_millis(row.try_get("last_seen_at")?),
        content_hash: row.try_get("content_hash")?,
    })
}

fn row_to_change(row: &SqliteRow) -> std::result::Result<ServerChange, sqlx::Error> {
    let kind: String = row.try_get("change_kind")?;
    let change_kind = kind
        .parse::<ChangeKind>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;
    Ok(ServerChange {
        entry_id: row.try_get("entry_id")?,
        change_kind,
        occurred_at: from_millis(row.try_get("occurred_at")?),
        previous_hash: row.try_get("previous_hash")?,
        new_hash: row.try_get("new_hash")?,
    })
}
