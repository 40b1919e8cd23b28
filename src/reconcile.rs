//! Diffing and priority ordering.
//!
//! Everything in this module is pure: given the store's view of one
//! provider's entries and a fresh [`ProviderResult`], [`diff`] computes what
//! was added, updated and removed. The manager applies the result; nothing
//! here touches the database or the network.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::models::{CatalogEntry, ChangeKind, ProviderResult, ServerChange};

/// Reconciliation output for one provider in one cycle.
#[derive(Debug, Clone, Default)]
pub struct ProviderDiff {
    pub provider: String,
    /// Entries whose state changed, in the order changes were detected:
    /// result order for additions and updates, then removals by id.
    pub changes: Vec<(CatalogEntry, ChangeKind)>,
    /// Re-observed entries with identical content; only `last_seen_at` moved.
    pub unchanged: Vec<CatalogEntry>,
    /// One record per element of `changes`.
    pub records: Vec<ServerChange>,
    /// Whether the fetch behind this diff succeeded.
    pub fetched: bool,
    pub error: Option<String>,
    /// Ids dropped because the provider returned them more than once.
    pub duplicates: Vec<String>,
    /// Ids dropped because they sit outside the provider's `<name>:`
    /// namespace.
    pub foreign: Vec<String>,
}

impl ProviderDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.unchanged.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|(_, k)| *k == kind).count()
    }

    /// Number of entries this provider contributes after the diff applies.
    pub fn live_count(&self) -> usize {
        self.unchanged.len() + self.changes.len() - self.count(ChangeKind::Removed)
    }
}

/// Compute the diff between `previous` (the provider's live entries, keyed
/// by id) and a fresh `result`.
///
/// A failed fetch yields an empty diff: absence of data is never read as
/// removal.
pub fn diff(
    previous: &HashMap<String, CatalogEntry>,
    result: &ProviderResult,
    now: DateTime<Utc>,
) -> ProviderDiff {
    let mut out = ProviderDiff {
        provider: result.provider_name.clone(),
        fetched: result.success,
        error: result.error_detail.clone(),
        ..Default::default()
    };

    if !result.success {
        return out;
    }

    let prefix = format!("{}:", result.provider_name);
    let mut seen: HashSet<&str> = HashSet::with_capacity(result.entries.len());

    for fresh in &result.entries {
        // One provider never owns another provider's entry
        if !fresh.id.starts_with(&prefix) {
            out.foreign.push(fresh.id.clone());
            continue;
        }
        if !seen.insert(fresh.id.as_str()) {
            out.duplicates.push(fresh.id.clone());
            continue;
        }

        let mut entry = fresh.clone();
        entry.source_provider = result.provider_name.clone();
        entry.last_seen_at = now;

        match previous.get(&entry.id) {
            None => {
                entry.first_seen_at = now;
                out.records.push(ServerChange {
                    entry_id: entry.id.clone(),
                    change_kind: ChangeKind::Added,
                    occurred_at: now,
                    previous_hash: None,
                    new_hash: Some(entry.content_hash.clone()),
                });
                out.changes.push((entry, ChangeKind::Added));
            }
            Some(old) => {
                entry.first_seen_at = old.first_seen_at;
                if old.content_hash != entry.content_hash {
                    out.records.push(ServerChange {
                        entry_id: entry.id.clone(),
                        change_kind: ChangeKind::Updated,
                        occurred_at: now,
                        previous_hash: Some(old.content_hash.clone()),
                        new_hash: Some(entry.content_hash.clone()),
                    });
                    out.changes.push((entry, ChangeKind::Updated));
                } else {
                    out.unchanged.push(entry);
                }
            }
        }
    }

    let mut gone: Vec<&CatalogEntry> = previous
        .values()
        .filter(|e| !seen.contains(e.id.as_str()))
        .collect();
    gone.sort_by(|a, b| a.id.cmp(&b.id));

    for old in gone {
        out.records.push(ServerChange {
            entry_id: old.id.clone(),
            change_kind: ChangeKind::Removed,
            occurred_at: now,
            previous_hash: Some(old.content_hash.clone()),
            new_hash: None,
        });
        out.changes.push((old.clone(), ChangeKind::Removed));
    }

    out
}

/// Total priority order: remote-capable first, then featured, then by
/// popularity (descending), then name, then id.
pub fn priority_cmp(a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
    b.remote_capable
        .cmp(&a.remote_capable)
        .then_with(|| b.featured.cmp(&a.featured))
        .then_with(|| b.popularity_score.total_cmp(&a.popularity_score))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_by_priority(entries: &mut [CatalogEntry]) {
    entries.sort_by(priority_cmp);
}

/// Collapse entries from different providers that describe the same server.
///
/// Two entries are the same server when their normalized source URLs match,
/// or, when either lacks a URL, when their lowercase names match. The
/// highest-priority entry of each group survives; output is priority-ordered.
pub fn dedupe(entries: &[CatalogEntry]) -> Vec<CatalogEntry> {
    let mut sorted = entries.to_vec();
    sort_by_priority(&mut sorted);

    let mut urls: HashSet<String> = HashSet::new();
    let mut names: HashSet<String> = HashSet::new();
    let mut url_less_names: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(sorted.len());

    for entry in sorted {
        let name_key = entry.name.trim().to_lowercase();
        let url_key = entry.source_url.as_deref().map(normalize_url);

        let duplicate = match &url_key {
            Some(url) => urls.contains(url) || url_less_names.contains(&name_key),
            None => names.contains(&name_key),
        };
        if duplicate {
            continue;
        }

        match url_key {
            Some(url) => {
                urls.insert(url);
            }
            None => {
                url_less_names.insert(name_key.clone());
            }
        }
        names.insert(name_key);
        out.push(entry);
    }

    out
}

/// Canonical form used for URL comparison: scheme-less, lowercase, without
/// `www.`, trailing slashes or a `.git` suffix.
pub fn normalize_url(url: &str) -> String {
    let lower = url.trim().to_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);
    let trimmed = without_www.trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}
