//! Core data models used throughout Harbor Catalog.
//!
//! These types represent the catalog entries, provider fetch results, change
//! records, and served snapshots that flow through the refresh pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// One normalized catalog item, independent of which provider produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    /// Stable identity: `"{provider}:{upstream_key}"`.
    pub id: String,
    pub name: String,
    pub description: String,
    pub source_provider: String,
    pub source_url: Option<String>,
    /// Can run without a local installation.
    pub remote_capable: bool,
    pub featured: bool,
    pub popularity_score: f64,
    pub last_seen_at: DateTime<Utc>,
    pub first_seen_at: DateTime<Utc>,
    /// SHA-256 over the displayed fields. See [`CatalogEntry::compute_hash`].
    pub content_hash: String,
}

impl CatalogEntry {
    /// Build a freshly observed entry. Both timestamps are set to `seen_at`
    /// and the content hash is computed from the displayed fields.
    ///
    /// Use the `with_*` setters for optional attributes; each one keeps the
    /// hash in sync.
    pub fn new(
        provider: &str,
        upstream_key: &str,
        name: impl Into<String>,
        seen_at: DateTime<Utc>,
    ) -> Self {
        let mut entry = Self {
            id: entry_id(provider, upstream_key),
            name: name.into(),
            description: String::new(),
            source_provider: provider.to_string(),
            source_url: None,
            remote_capable: false,
            featured: false,
            popularity_score: 0.0,
            last_seen_at: seen_at,
            first_seen_at: seen_at,
            content_hash: String::new(),
        };
        entry.rehash();
        entry
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self.rehash();
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self.rehash();
        self
    }

    pub fn with_remote_capable(mut self, remote_capable: bool) -> Self {
        self.remote_capable = remote_capable;
        self.rehash();
        self
    }

    pub fn with_featured(mut self, featured: bool) -> Self {
        self.featured = featured;
        self.rehash();
        self
    }

    pub fn with_popularity(mut self, score: f64) -> Self {
        self.popularity_score = score;
        self.rehash();
        self
    }

    /// Hash of every field a reader can see. Timestamps and the id are
    /// excluded so that re-observing an unchanged item yields the same hash.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.description.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.source_url.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update([self.remote_capable as u8, self.featured as u8]);
        hasher.update(self.popularity_score.to_bits().to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn rehash(&mut self) {
        self.content_hash = self.compute_hash();
    }
}

/// Derive the stable entry id from a provider name and the upstream key.
pub fn entry_id(provider: &str, upstream_key: &str) -> String {
    format!("{}:{}", provider, upstream_key)
}

/// Outcome of one provider fetch. Transient: consumed by the reconciler.
#[derive(Debug, Clone)]
pub struct ProviderResult {
    pub provider_name: String,
    /// Provider-native order; not guaranteed stable between fetches.
    pub entries: Vec<CatalogEntry>,
    pub fetched_at: DateTime<Utc>,
    pub success: bool,
    /// Present iff `success` is false.
    pub error_detail: Option<String>,
}

impl ProviderResult {
    pub fn success(provider_name: impl Into<String>, entries: Vec<CatalogEntry>) -> Self {
        Self {
            provider_name: provider_name.into(),
            entries,
            fetched_at: Utc::now(),
            success: true,
            error_detail: None,
        }
    }

    pub fn failure(provider_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            entries: Vec::new(),
            fetched_at: Utc::now(),
            success: false,
            error_detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Updated => "updated",
            ChangeKind::Removed => "removed",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "added" => Ok(ChangeKind::Added),
            "updated" => Ok(ChangeKind::Updated),
            "removed" => Ok(ChangeKind::Removed),
            other => Err(format!("unknown change kind: '{}'", other)),
        }
    }
}

/// Append-only change-log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerChange {
    pub entry_id: String,
    pub change_kind: ChangeKind,
    pub occurred_at: DateTime<Utc>,
    pub previous_hash: Option<String>,
    /// `None` for [`ChangeKind::Removed`].
    pub new_hash: Option<String>,
}

/// The served view: every non-removed entry, sorted by priority.
///
/// Immutable once built. The store hands out `Arc<CatalogSnapshot>` and
/// replaces the pointer on commit, so a reader's copy never changes under it.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSnapshot {
    pub entries: Vec<CatalogEntry>,
    /// False until a refresh cycle has ever committed.
    pub populated: bool,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Bumped on every swap.
    pub generation: u64,
}

impl CatalogSnapshot {
    /// The cold, never-refreshed snapshot.
    pub fn cold() -> Self {
        Self {
            entries: Vec::new(),
            populated: false,
            refreshed_at: None,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries currently sourced from `provider`.
    pub fn provider_entries<'a>(
        &'a self,
        provider: &'a str,
    ) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.source_provider == provider)
    }

    /// Priority-ordered entries with cross-provider duplicates collapsed.
    pub fn deduplicated(&self) -> Vec<CatalogEntry> {
        crate::reconcile::dedupe(&self.entries)
    }
}
