use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CatalogError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            cycle_timeout_secs: default_cycle_timeout_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

fn default_interval_secs() -> u64 {
    3600
}
fn default_cycle_timeout_secs() -> u64 {
    120
}
fn default_provider_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("harbor-catalog/{}", env!("CARGO_PKG_VERSION"))
}

/// Retention for tombstones and change records. Zero means keep forever.
#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    #[serde(default = "default_tombstone_days")]
    pub tombstone_days: u64,
    #[serde(default)]
    pub change_log_days: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            tombstone_days: default_tombstone_days(),
            change_log_days: 0,
        }
    }
}

fn default_tombstone_days() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    pub official_registry: Option<OfficialRegistryConfig>,
    /// Awesome-list documents keyed by instance name.
    #[serde(default)]
    pub awesome: BTreeMap<String, AwesomeListConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OfficialRegistryConfig {
    #[serde(default = "default_registry_url")]
    pub base_url: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for OfficialRegistryConfig {
    fn default() -> Self {
        Self {
            base_url: default_registry_url(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_registry_url() -> String {
    "https://registry.modelcontextprotocol.io".to_string()
}
fn default_page_size() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct AwesomeListConfig {
    /// Raw markdown URL.
    pub url: String,
    /// Entries listed after this many bullets are ignored. Unlimited if unset.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl Config {
    /// Configuration with only a database path, used by tests and `init`
    /// when no providers are needed.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            refresh: RefreshConfig::default(),
            retention: RetentionConfig::default(),
            server: ServerConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> std::result::Result<(), CatalogError> {
    let refresh = &config.refresh;
    if refresh.cycle_timeout_secs == 0 {
        return Err(invalid("refresh.cycle_timeout_secs must be > 0"));
    }
    if refresh.provider_timeout_secs == 0 {
        return Err(invalid("refresh.provider_timeout_secs must be > 0"));
    }
    if refresh.provider_timeout_secs > refresh.cycle_timeout_secs {
        return Err(invalid(format!(
            "refresh.provider_timeout_secs ({}) must not exceed refresh.cycle_timeout_secs ({})",
            refresh.provider_timeout_secs, refresh.cycle_timeout_secs
        )));
    }
    if refresh.interval_secs == 0 {
        return Err(invalid("refresh.interval_secs must be > 0"));
    }

    if let Some(registry) = &config.providers.official_registry {
        if !(1..=100).contains(&registry.page_size) {
            return Err(invalid(
                "providers.official_registry.page_size must be in [1, 100]",
            ));
        }
        if registry.max_pages == 0 {
            return Err(invalid("providers.official_registry.max_pages must be > 0"));
        }
        if registry.base_url.trim().is_empty() {
            return Err(invalid(
                "providers.official_registry.base_url must not be empty",
            ));
        }
    }

    for (name, list) in &config.providers.awesome {
        if list.url.trim().is_empty() {
            return Err(invalid(format!(
                "providers.awesome.{}.url must not be empty",
                name
            )));
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> CatalogError {
    CatalogError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/catalog.sqlite\"\n").unwrap();
        assert_eq!(cfg.refresh.interval_secs, 3600);
        assert_eq!(cfg.refresh.provider_timeout_secs, 30);
        assert_eq!(cfg.retention.tombstone_days, 30);
        assert_eq!(cfg.retention.change_log_days, 0);
        assert!(cfg.providers.official_registry.is_none());
        assert!(cfg.providers.awesome.is_empty());
    }

    #[test]
    fn test_full_config() {
        let cfg = parse_config(
            r#"
[db]
path = "/tmp/catalog.sqlite"

[refresh]
interval_secs = 600
cycle_timeout_secs = 60
provider_timeout_secs = 20

[retention]
tombstone_days = 0
change_log_days = 90

[server]
bind = "0.0.0.0:9000"

[providers.official_registry]
page_size = 50

[providers.awesome.punkpeye]
url = "https://raw.githubusercontent.com/punkpeye/awesome-mcp-servers/main/README.md"
max_entries = 500
"#,
        )
        .unwrap();

        assert_eq!(cfg.refresh.interval_secs, 600);
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        let registry = cfg.providers.official_registry.unwrap();
        assert_eq!(registry.page_size, 50);
        assert_eq!(registry.base_url, "https://registry.modelcontextprotocol.io");
        assert_eq!(cfg.providers.awesome["punkpeye"].max_entries, Some(500));
    }

    #[test]
    fn test_provider_timeout_must_fit_cycle() {
        let err = parse_config(
            r#"
[db]
path = "x.sqlite"

[refresh]
cycle_timeout_secs = 10
provider_timeout_secs = 30
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must not exceed"));
    }

    #[test]
    fn test_rejects_bad_page_size() {
        let err = parse_config(
            r#"
[db]
path = "x.sqlite"

[providers.official_registry]
page_size = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_rejects_empty_awesome_url() {
        let err = parse_config(
            r#"
[db]
path = "x.sqlite"

[providers.awesome.empty]
url = " "
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("providers.awesome.empty.url"));
    }
}
