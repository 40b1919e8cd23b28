//! Catalog listing, history and change-log output.
//!
//! [`CatalogQuery`] is shared by `harbor-catalog list` and `GET /catalog`.
//! The CLI commands here read the last committed state from SQLite and never
//! contact a provider.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::{CatalogEntry, CatalogSnapshot, ServerChange};
use crate::store::CatalogStore;

/// Filters applied on top of a snapshot's priority order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogQuery {
    /// Collapse the same server listed by several providers.
    #[serde(default)]
    pub dedupe: bool,
    #[serde(default)]
    pub remote_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl CatalogQuery {
    pub fn apply(&self, snapshot: &CatalogSnapshot) -> Vec<CatalogEntry> {
        let entries = if self.dedupe {
            snapshot.deduplicated()
        } else {
            snapshot.entries.clone()
        };

        entries
            .into_iter()
            .filter(|e| !self.remote_only || e.remote_capable)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Response shape of `GET /catalog` and `list --json`.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogListing {
    pub populated: bool,
    pub generation: u64,
    pub refreshed_at: Option<String>,
    pub count: usize,
    pub entries: Vec<CatalogEntry>,
}

impl CatalogListing {
    pub fn new(snapshot: &CatalogSnapshot, query: &CatalogQuery) -> Self {
        let entries = query.apply(snapshot);
        Self {
            populated: snapshot.populated,
            generation: snapshot.generation,
            refreshed_at: snapshot.refreshed_at.map(|t| t.to_rfc3339()),
            count: entries.len(),
            entries,
        }
    }
}

/// Open the store, build the listing and close the pool again.
pub async fn load_listing(config: &Config, query: &CatalogQuery) -> Result<CatalogListing> {
    let store = CatalogStore::connect(config).await?;
    let listing = CatalogListing::new(&store.snapshot(), query);
    store.pool().close().await;
    Ok(listing)
}

pub async fn run_list(config: &Config, query: &CatalogQuery, json: bool) -> Result<()> {
    let listing = load_listing(config, query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if !listing.populated {
        println!("Catalog is empty: no refresh has completed yet. Run `harbor-catalog refresh`.");
        return Ok(());
    }

    println!(
        "{:<48} {:<6} {:<8} {:>10}   {}",
        "ID", "REMOTE", "FEATURED", "POPULARITY", "NAME"
    );
    println!("{}", "-".repeat(100));
    for e in &listing.entries {
        println!(
            "{:<48} {:<6} {:<8} {:>10.0}   {}",
            truncate(&e.id, 48),
            if e.remote_capable { "yes" } else { "-" },
            if e.featured { "yes" } else { "-" },
            e.popularity_score,
            e.name
        );
    }
    println!();
    println!("{} entries", listing.count);
    Ok(())
}

pub async fn run_history(config: &Config, id: &str) -> Result<()> {
    let store = CatalogStore::connect(config).await?;

    let stored = store.entry(id).await?;
    let history = store.history(id).await?;
    store.pool().close().await;
    if stored.is_none() && history.is_empty() {
        bail!("entry not found: {}", id);
    }

    println!("--- Entry ---");
    println!("id:           {}", id);
    if let Some(stored) = &stored {
        println!("name:         {}", stored.entry.name);
        println!("provider:     {}", stored.entry.source_provider);
        if let Some(url) = &stored.entry.source_url {
            println!("source_url:   {}", url);
        }
        println!("first_seen:   {}", stored.entry.first_seen_at.to_rfc3339());
        println!("last_seen:    {}", stored.entry.last_seen_at.to_rfc3339());
        match stored.removed_at {
            Some(at) => println!("removed_at:   {}", at.to_rfc3339()),
            None => println!("status:       live"),
        }
    } else {
        println!("status:       purged");
    }
    println!();

    println!("--- History ({}) ---", history.len());
    for change in &history {
        print_change(change);
    }
    Ok(())
}

pub async fn run_changes(config: &Config, limit: i64) -> Result<()> {
    let store = CatalogStore::connect(config).await?;
    let changes = store.recent_changes(limit).await?;
    store.pool().close().await;

    if changes.is_empty() {
        println!("No changes recorded.");
    }
    for change in &changes {
        print_change(change);
    }
    Ok(())
}

fn print_change(change: &ServerChange) {
    println!(
        "{}  {:<8} {}  {} -> {}",
        change.occurred_at.format("%Y-%m-%d %H:%M:%S"),
        change.change_kind,
        change.entry_id,
        short_hash(change.previous_hash.as_deref()),
        short_hash(change.new_hash.as_deref()),
    );
}

fn short_hash(hash: Option<&str>) -> &str {
    match hash {
        Some(h) => &h[..h.len().min(8)],
        None => "-",
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot() -> CatalogSnapshot {
        let now = Utc::now();
        let mut entries = vec![
            CatalogEntry::new("a", "weather", "Weather", now)
                .with_source_url("https://github.com/acme/weather")
                .with_remote_capable(true),
            CatalogEntry::new("b", "weather", "weather", now)
                .with_source_url("https://github.com/acme/weather/"),
            CatalogEntry::new("a", "files", "Files", now),
        ];
        crate::reconcile::sort_by_priority(&mut entries);
        CatalogSnapshot {
            entries,
            populated: true,
            refreshed_at: Some(now),
            generation: 3,
        }
    }

    #[test]
    fn test_default_query_returns_everything_in_order() {
        let snap = snapshot();
        let listed = CatalogQuery::default().apply(&snap);
        assert_eq!(listed, snap.entries);
    }

    #[test]
    fn test_query_filters() {
        let snap = snapshot();

        let remote = CatalogQuery {
            remote_only: true,
            ..Default::default()
        }
        .apply(&snap);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].id, "a:weather");

        let deduped = CatalogQuery {
            dedupe: true,
            ..Default::default()
        }
        .apply(&snap);
        assert_eq!(deduped.len(), 2);

        let limited = CatalogQuery {
            limit: Some(1),
            ..Default::default()
        }
        .apply(&snap);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, snap.entries[0].id);
    }

    #[test]
    fn test_listing_counts() {
        let listing = CatalogListing::new(&snapshot(), &CatalogQuery::default());
        assert!(listing.populated);
        assert_eq!(listing.generation, 3);
        assert_eq!(listing.count, 3);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }
}
