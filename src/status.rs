//! Provider status overview and maintenance commands.
//!
//! `harbor-catalog providers` lists every configured provider alongside its
//! last recorded attempt, so a stale or failing upstream is visible without
//! reading logs. `harbor-catalog prune` applies the retention policy.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::provider::ProviderRegistry;
use crate::store::{now_ms, CatalogStore, ProviderStatus};

pub async fn run_providers(config: &Config) -> Result<()> {
    let registry = ProviderRegistry::from_config(config);
    let store = CatalogStore::connect(config).await?;
    let statuses = store.provider_status().await?;
    let snapshot = store.snapshot();

    println!("Harbor Catalog: Providers");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Entries:     {}", snapshot.len());
    println!(
        "  Refreshed:   {}",
        snapshot
            .refreshed_at
            .map(format_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    if registry.is_empty() {
        println!("  No providers configured. Add [providers] to the config file.");
        store.pool().close().await;
        return Ok(());
    }

    println!(
        "  {:<28} {:<18} {:>7}   {:<16} {}",
        "PROVIDER", "TYPE", "ENTRIES", "LAST SUCCESS", "STATUS"
    );
    println!("  {}", "-".repeat(90));

    for provider in registry.providers() {
        let status = statuses.iter().find(|s| s.provider == provider.name());
        let (entries, last_success, health) = describe(status);
        println!(
            "  {:<28} {:<18} {:>7}   {:<16} {}",
            provider.name(),
            provider.provider_type(),
            entries,
            last_success,
            health
        );
    }

    // Providers removed from the config still own entries until pruned
    for status in statuses
        .iter()
        .filter(|s| registry.get(&s.provider).is_none())
    {
        let (entries, last_success, _) = describe(Some(status));
        println!(
            "  {:<28} {:<18} {:>7}   {:<16} {}",
            status.provider, "-", entries, last_success, "NOT CONFIGURED"
        );
    }

    println!();
    store.pool().close().await;
    Ok(())
}

pub async fn run_prune(config: &Config) -> Result<()> {
    let store = CatalogStore::connect(config).await?;
    let report = store.prune(&config.retention, now_ms()).await?;

    println!(
        "Pruned {} tombstone{} and {} change record{}.",
        report.tombstones_purged,
        if report.tombstones_purged == 1 { "" } else { "s" },
        report.changes_pruned,
        if report.changes_pruned == 1 { "" } else { "s" },
    );

    store.pool().close().await;
    Ok(())
}

fn describe(status: Option<&ProviderStatus>) -> (String, String, String) {
    match status {
        None => ("-".to_string(), "never".to_string(), "PENDING".to_string()),
        Some(s) => {
            let last_success = s
                .last_success_at
                .map(format_relative)
                .unwrap_or_else(|| "never".to_string());
            let health = match &s.last_error {
                Some(err) => format!("FAILING: {}", err),
                None => "OK".to_string(),
            };
            (s.entry_count.to_string(), last_success, health)
        }
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        ts.format("%Y-%m-%d %H:%M").to_string()
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_relative() {
        let now = Utc::now();
        assert_eq!(format_relative(now), "just now");
        assert_eq!(format_relative(now - Duration::minutes(5)), "5 mins ago");
        assert_eq!(format_relative(now - Duration::hours(1)), "1 hour ago");
        assert_eq!(format_relative(now - Duration::days(2)), "2 days ago");
    }

    #[test]
    fn test_describe_failing_provider() {
        let status = ProviderStatus {
            provider: "official_registry".to_string(),
            last_attempt_at: Utc::now(),
            last_success_at: None,
            last_error: Some("timed out after 30s".to_string()),
            entry_count: 0,
        };
        let (entries, last_success, health) = describe(Some(&status));
        assert_eq!(entries, "0");
        assert_eq!(last_success, "never");
        assert_eq!(health, "FAILING: timed out after 30s");

        assert_eq!(describe(None).2, "PENDING");
    }
}
