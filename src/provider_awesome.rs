//! Awesome-list provider.
//!
//! Downloads a community-maintained markdown list of MCP servers and parses
//! its bullet lines:
//!
//! ```text
//! - [github/github-mcp-server](https://github.com/github/github-mcp-server) 🎖️ 📇 ☁️ - GitHub's official server
//! ```
//!
//! Markers between the link and the ` - ` separator carry flags: 🎖️ marks
//! an official implementation (featured) and ☁️ a cloud service that needs
//! no local install (remote-capable). Lists carry no popularity signal, so
//! the score stays at zero. List position must not feed the hash: inserting
//! one bullet would otherwise update every entry below it.
//!
//! # Configuration
//!
//! ```toml
//! [providers.awesome.punkpeye]
//! url = "https://raw.githubusercontent.com/punkpeye/awesome-mcp-servers/main/README.md"
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::config::AwesomeListConfig;
use crate::models::{CatalogEntry, ProviderResult};
use crate::provider::{FetchContext, Provider};
use crate::reconcile::normalize_url;

const FEATURED_MARKER: char = '🎖';
const REMOTE_MARKER: char = '☁';

pub struct AwesomeListProvider {
    /// Provider name, `"awesome:<instance>"`.
    name: String,
    config: AwesomeListConfig,
}

impl AwesomeListProvider {
    pub fn new(instance: String, config: AwesomeListConfig) -> Self {
        Self {
            name: format!("awesome:{}", instance),
            config,
        }
    }

    async fn download(&self, ctx: &FetchContext) -> Result<String> {
        ctx.client
            .get(&self.config.url)
            .send()
            .await
            .context("awesome list request failed")?
            .error_for_status()
            .context("awesome list returned an error status")?
            .text()
            .await
            .context("failed to read awesome list body")
    }
}

#[async_trait]
impl Provider for AwesomeListProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Community awesome-list of MCP servers (markdown)"
    }

    fn provider_type(&self) -> &str {
        "awesome"
    }

    async fn fetch(&self, ctx: &FetchContext) -> ProviderResult {
        let body = match tokio::time::timeout(ctx.timeout, self.download(ctx)).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => return ProviderResult::failure(&self.name, format!("{:#}", e)),
            Err(_) => {
                return ProviderResult::failure(
                    &self.name,
                    format!("timed out after {}s", ctx.timeout.as_secs()),
                )
            }
        };

        let mut entries = parse_markdown(&self.name, &body, Utc::now());
        if let Some(max) = self.config.max_entries {
            entries.truncate(max);
        }

        if entries.is_empty() {
            // An empty parse is a format change, not an empty list
            return ProviderResult::failure(&self.name, "no server entries found in document");
        }

        ProviderResult::success(&self.name, entries)
    }
}

/// Parse every server bullet in `markdown`. Entries are keyed by their
/// normalized URL; repeated URLs keep the first occurrence.
pub fn parse_markdown(provider: &str, markdown: &str, seen_at: DateTime<Utc>) -> Vec<CatalogEntry> {
    let mut seen = HashSet::new();
    markdown
        .lines()
        .filter_map(parse_line)
        .filter_map(|item| {
            let key = normalize_url(&item.url);
            seen.insert(key.clone()).then_some((key, item))
        })
        .map(|(key, item)| {
            CatalogEntry::new(provider, &key, item.name, seen_at)
                .with_description(item.description)
                .with_source_url(item.url)
                .with_featured(item.featured)
                .with_remote_capable(item.remote)
        })
        .collect()
}

#[derive(Debug, PartialEq)]
struct ListItem {
    name: String,
    url: String,
    description: String,
    featured: bool,
    remote: bool,
}

fn parse_line(line: &str) -> Option<ListItem> {
    let line = line.trim();
    let rest = line
        .strip_prefix("- [")
        .or_else(|| line.strip_prefix("* ["))?;

    let close = rest.find("](")?;
    let name = rest[..close].trim().trim_matches('`').trim();
    let after_name = &rest[close + 2..];
    let url_end = after_name.find(')')?;
    let url = after_name[..url_end].trim();

    // Table-of-contents links and relative anchors are not servers
    if name.is_empty() || !(url.starts_with("https://") || url.starts_with("http://")) {
        return None;
    }

    let tail = &after_name[url_end + 1..];
    let (markers, description) = match tail.find(" - ") {
        Some(i) => (&tail[..i], tail[i + 3..].trim()),
        None => (tail, ""),
    };

    Some(ListItem {
        name: name.to_string(),
        url: url.to_string(),
        description: description.to_string(),
        featured: markers.contains(FEATURED_MARKER),
        remote: markers.contains(REMOTE_MARKER),
    })
}
