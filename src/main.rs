//! # Harbor Catalog CLI (`harbor-catalog`)
//!
//! Maintains a local, cached catalog of MCP servers aggregated from several
//! upstream providers, and serves it over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! harbor-catalog --config ./config/catalog.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Create the SQLite database and run schema migrations |
//! | `providers` | List configured providers and their last status |
//! | `refresh [--provider NAME]...` | Run one refresh cycle now |
//! | `list` | Print the cached catalog in priority order |
//! | `history <id>` | Show one entry and its change history |
//! | `changes` | Show the most recent changes across the catalog |
//! | `prune` | Apply the retention policy |
//! | `serve` | Start the HTTP server with periodic refresh |
//!
//! Logs go to stderr; set `RUST_LOG` to override the default
//! `harbor_catalog=info` filter.

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use harbor_catalog::listing::{self, CatalogQuery};
use harbor_catalog::manager::{CatalogManager, RefreshOutcome};
use harbor_catalog::{config, migrate, server, status};

/// Harbor Catalog: a cached, multi-provider catalog of MCP servers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/catalog.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "harbor-catalog",
    about = "A cached, multi-provider catalog of MCP servers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catalog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent: running it on an existing database is safe.
    Init,

    /// List configured providers and their last refresh status.
    Providers,

    /// Fetch from providers and commit the reconciled catalog.
    ///
    /// Refreshes every configured provider unless `--provider` is given.
    /// A failing provider keeps its previous entries.
    Refresh {
        /// Only refresh this provider (repeatable).
        #[arg(long = "provider")]
        providers: Vec<String>,
    },

    /// Print the cached catalog.
    List {
        /// Collapse the same server listed by several providers.
        #[arg(long)]
        dedupe: bool,

        /// Only show servers that can be used without a local install.
        #[arg(long)]
        remote_only: bool,

        /// Maximum number of entries to print.
        #[arg(long)]
        limit: Option<usize>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show an entry and its change history.
    History {
        /// Entry id, e.g. `official_registry:io.github.acme/weather`.
        id: String,
    },

    /// Show recent changes across all entries, newest first.
    Changes {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Purge expired tombstones and change records.
    Prune,

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and refreshes every
    /// `[refresh].interval_secs` in the background.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("harbor_catalog=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Providers => {
            status::run_providers(&cfg).await?;
        }
        Commands::Refresh { providers } => {
            run_refresh(&cfg, providers).await?;
        }
        Commands::List {
            dedupe,
            remote_only,
            limit,
            json,
        } => {
            let query = CatalogQuery {
                dedupe,
                remote_only,
                limit,
            };
            listing::run_list(&cfg, &query, json).await?;
        }
        Commands::History { id } => {
            listing::run_history(&cfg, &id).await?;
        }
        Commands::Changes { limit } => {
            listing::run_changes(&cfg, limit).await?;
        }
        Commands::Prune => {
            status::run_prune(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_refresh(cfg: &config::Config, providers: Vec<String>) -> anyhow::Result<()> {
    let manager = CatalogManager::from_config(cfg).await?;
    if manager.providers().is_empty() {
        bail!("no providers configured; add a [providers] section to the config file");
    }

    let subset = (!providers.is_empty()).then_some(providers);
    let report = match manager.refresh(subset.as_deref()).await? {
        RefreshOutcome::Completed(report) => report,
        RefreshOutcome::Coalesced => {
            println!("A refresh is already running; this request was merged into it.");
            return Ok(());
        }
    };

    println!(
        "{:<28} {:<8} {:>7} {:>7} {:>7} {:>7}   {}",
        "PROVIDER", "STATUS", "ENTRIES", "ADDED", "UPDATED", "REMOVED", "TIME"
    );
    println!("{}", "-".repeat(86));
    for p in &report.providers {
        println!(
            "{:<28} {:<8} {:>7} {:>7} {:>7} {:>7}   {}ms",
            p.provider,
            if p.success { "ok" } else { "FAILED" },
            p.entries,
            p.added,
            p.updated,
            p.removed,
            p.duration_ms
        );
        if let Some(err) = &p.error {
            println!("    error: {}", err);
        }
    }
    println!();
    println!(
        "Cycle {} committed {} change{}; catalog now has {} entries.",
        report.cycle_id,
        report.changes.len(),
        if report.changes.len() == 1 { "" } else { "s" },
        manager.catalog().len()
    );

    manager.store().pool().close().await;
    Ok(())
}
