//! Provider trait and registry.
//!
//! A [`Provider`] adapts one upstream catalog source (the official MCP
//! registry, an awesome-list document, a test fixture) to a uniform
//! [`ProviderResult`]. The manager treats every provider identically.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ProviderRegistry              │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐  │
//! │  │ Official │ │ Awesome  │ │  Custom  │  │
//! │  │ registry │ │  lists   │ │  (Rust)  │  │
//! │  └──────────┘ └──────────┘ └──────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     CatalogManager::refresh() → reconcile → store
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::models::ProviderResult;

/// Per-fetch inputs handed to every provider.
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Shared HTTP client (connection pool, user agent).
    pub client: reqwest::Client,
    /// Upper bound the provider must enforce on its own fetch.
    pub timeout: Duration,
}

impl FetchContext {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

/// Build the HTTP client shared by all providers.
pub fn build_http_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(Duration::from_secs(15).min(timeout))
        .timeout(timeout)
        .build()?;
    Ok(client)
}

/// An adapter to one external catalog source.
///
/// # Contract
///
/// - [`fetch`](Provider::fetch) must finish within `ctx.timeout` and must
///   not panic. Every failure is reported as
///   [`ProviderResult::failure`], never as a pending future or an unwind.
/// - For unchanged upstream state, two fetches must produce entries with
///   identical ids and content hashes.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use chrono::Utc;
/// use harbor_catalog::models::{CatalogEntry, ProviderResult};
/// use harbor_catalog::provider::{FetchContext, Provider};
///
/// pub struct StaticProvider;
///
/// #[async_trait]
/// impl Provider for StaticProvider {
///     fn name(&self) -> &str { "static" }
///     fn description(&self) -> &str { "A fixed list of servers" }
///
///     async fn fetch(&self, _ctx: &FetchContext) -> ProviderResult {
///         let entry = CatalogEntry::new("static", "time", "Time", Utc::now());
///         ProviderResult::success("static", vec![entry])
///     }
/// }
/// ```
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique provider name; also the prefix of every entry id it produces.
    fn name(&self) -> &str;

    /// One-line description for `providers` output.
    fn description(&self) -> &str;

    /// Provider type identifier (e.g. `"official_registry"`, `"awesome"`).
    fn provider_type(&self) -> &str {
        "custom"
    }

    /// Fetch the provider's full current listing.
    async fn fetch(&self, ctx: &FetchContext) -> ProviderResult;
}

/// Registry mapping provider names to instances.
///
/// Use [`ProviderRegistry::from_config`] for the built-in providers, then
/// [`register`](ProviderRegistry::register) to add custom ones.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// Create a registry with every provider configured in `[providers]`.
    pub fn from_config(config: &Config) -> Self {
        use crate::provider_awesome::AwesomeListProvider;
        use crate::provider_registry::OfficialRegistryProvider;

        let mut registry = Self::new();

        if let Some(cfg) = &config.providers.official_registry {
            registry.register(Arc::new(OfficialRegistryProvider::new(cfg.clone())));
        }
        for (name, cfg) in &config.providers.awesome {
            registry.register(Arc::new(AwesomeListProvider::new(name.clone(), cfg.clone())));
        }

        registry
    }

    /// Register a provider. A provider with the same name is replaced.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.providers.get(name)
    }

    /// All providers, ordered by name.
    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }
}
