//! Official MCP registry provider.
//!
//! Pages through `GET {base_url}/v0/servers?limit=N&cursor=C` and maps each
//! listed server to a [`CatalogEntry`]. Both response shapes the registry
//! has served are accepted: items wrapped as `{ "server": {...}, "_meta": {...} }`
//! and bare server objects.
//!
//! # Configuration
//!
//! ```toml
//! [providers.official_registry]
//! base_url = "https://registry.modelcontextprotocol.io"
//! page_size = 100
//! max_pages = 50
//! ```
//!
//! # Mapping
//!
//! | Entry field | Source |
//! |-------------|--------|
//! | upstream key | `name` (reverse-DNS server name) |
//! | `name` | `title`, falling back to `name` |
//! | `source_url` | `repository.url`, falling back to `websiteUrl` |
//! | `remote_capable` | `remotes` is non-empty |
//! | `featured` | any `_meta` object with `"featured": true` |
//! | `popularity_score` | first numeric `popularity`, `stars` or `downloads` in `_meta` |

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

use crate::config::OfficialRegistryConfig;
use crate::models::{CatalogEntry, ProviderResult};
use crate::provider::{FetchContext, Provider};

pub const PROVIDER_NAME: &str = "official_registry";

pub struct OfficialRegistryProvider {
    config: OfficialRegistryConfig,
}

impl OfficialRegistryProvider {
    pub fn new(config: OfficialRegistryConfig) -> Self {
        Self { config }
    }

    async fn fetch_all(&self, ctx: &FetchContext) -> Result<Vec<CatalogEntry>> {
        let base = self.config.base_url.trim_end_matches('/');
        let fetched_at = Utc::now();
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        for page in 0..self.config.max_pages {
            let mut request = ctx
                .client
                .get(format!("{}/v0/servers", base))
                .query(&[("limit", self.config.page_size.to_string())]);
            if let Some(c) = &cursor {
                request = request.query(&[("cursor", c.as_str())]);
            }

            let body = request
                .send()
                .await
                .context("registry request failed")?
                .error_for_status()
                .context("registry returned an error status")?
                .text()
                .await
                .context("failed to read registry response")?;

            let (page_entries, next) = parse_page(&body, fetched_at)?;
            debug!(page, count = page_entries.len(), "fetched registry page");

            for entry in page_entries {
                if seen.insert(entry.id.clone()) {
                    entries.push(entry);
                }
            }

            match next {
                Some(n) if !n.is_empty() => cursor = Some(n),
                _ => break,
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl Provider for OfficialRegistryProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn description(&self) -> &str {
        "Official MCP server registry"
    }

    fn provider_type(&self) -> &str {
        "official_registry"
    }

    async fn fetch(&self, ctx: &FetchContext) -> ProviderResult {
        match tokio::time::timeout(ctx.timeout, self.fetch_all(ctx)).await {
            Ok(Ok(entries)) => ProviderResult::success(PROVIDER_NAME, entries),
            Ok(Err(e)) => ProviderResult::failure(PROVIDER_NAME, format!("{:#}", e)),
            Err(_) => ProviderResult::failure(
                PROVIDER_NAME,
                format!("timed out after {}s", ctx.timeout.as_secs()),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServerListResponse {
    #[serde(default)]
    servers: Vec<ServerListItem>,
    #[serde(default)]
    metadata: Option<ListMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerListItem {
    Wrapped {
        server: ServerJson,
        #[serde(default, rename = "_meta")]
        meta: Option<Value>,
    },
    Bare(ServerJson),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerJson {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    repository: Option<Repository>,
    #[serde(default)]
    website_url: Option<String>,
    #[serde(default)]
    remotes: Vec<Value>,
    #[serde(default, rename = "_meta")]
    meta: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Repository {
    #[serde(default)]
    url: Option<String>,
}

/// Parse one page of the registry listing into entries plus the next
/// cursor. Servers marked deleted, or non-latest versions, are skipped.
pub fn parse_page(
    body: &str,
    fetched_at: DateTime<Utc>,
) -> Result<(Vec<CatalogEntry>, Option<String>)> {
    let response: ServerListResponse =
        serde_json::from_str(body).context("failed to parse registry response")?;

    let mut entries = Vec::with_capacity(response.servers.len());
    for item in response.servers {
        let (server, outer_meta) = match item {
            ServerListItem::Wrapped { server, meta } => (server, meta),
            ServerListItem::Bare(server) => (server, None),
        };
        let metas: Vec<&Value> = outer_meta.iter().chain(server.meta.iter()).collect();

        if metas.iter().any(|m| is_hidden(m)) {
            continue;
        }

        let name = server
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&server.name)
            .to_string();
        let mut entry = CatalogEntry::new(PROVIDER_NAME, &server.name, name, fetched_at)
            .with_description(server.description.trim())
            .with_remote_capable(!server.remotes.is_empty())
            .with_featured(metas.iter().any(|m| find_bool(m, "featured")))
            .with_popularity(
                metas
                    .iter()
                    .find_map(|m| find_number(m, &["popularity", "stars", "downloads"]))
                    .unwrap_or(0.0),
            );

        let url = server
            .repository
            .and_then(|r| r.url)
            .filter(|u| !u.trim().is_empty())
            .or(server.website_url);
        if let Some(url) = url {
            entry = entry.with_source_url(url);
        }

        entries.push(entry);
    }

    let next = response.metadata.and_then(|m| m.next_cursor);
    Ok((entries, next))
}

/// A server is hidden when any meta object reports `status: "deleted"` or
/// `isLatest: false`.
fn is_hidden(meta: &Value) -> bool {
    walk(meta).any(|obj| {
        obj.get("status").and_then(Value::as_str) == Some("deleted")
            || obj.get("isLatest").and_then(Value::as_bool) == Some(false)
    })
}

fn find_bool(meta: &Value, key: &str) -> bool {
    walk(meta).any(|obj| obj.get(key).and_then(Value::as_bool) == Some(true))
}

fn find_number(meta: &Value, keys: &[&str]) -> Option<f64> {
    walk(meta).find_map(|obj| keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_f64)))
}

/// The meta value itself plus every object nested one level below it,
/// which is where the registry puts namespaced extension data.
fn walk(meta: &Value) -> impl Iterator<Item = &serde_json::Map<String, Value>> {
    let top = meta.as_object();
    let nested = top
        .into_iter()
        .flat_map(|m| m.values())
        .filter_map(Value::as_object);
    top.into_iter().chain(nested)
}
