//! # Harbor Catalog
//!
//! A cached, multi-provider catalog of MCP servers.
//!
//! Harbor Catalog pulls server listings from several upstream providers (the
//! official MCP registry, community awesome-lists, custom Rust providers),
//! reconciles them against the last known state, and serves the merged
//! catalog from memory. Every add, update and removal is recorded in a
//! durable change log, and a provider outage never erases that provider's
//! entries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐
//! │  Providers  │──▶│  Reconciler │──▶│   SQLite   │
//! │ registry,   │   │  diff per   │   │ entries +  │
//! │ awesome,... │   │  provider   │   │ change log │
//! └─────────────┘   └─────────────┘   └─────┬──────┘
//!                                          │ commit
//!                                          ▼
//!                                   ┌────────────┐
//!                                   │  Snapshot  │◀── CLI / HTTP reads
//!                                   │ (Arc swap) │
//!                                   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harbor-catalog init                 # create database
//! harbor-catalog refresh              # fetch from every provider
//! harbor-catalog list --dedupe        # print the merged catalog
//! harbor-catalog serve                # HTTP API with periodic refresh
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Entries, provider results, change records, snapshots |
//! | [`error`] | Catalog error type |
//! | [`provider`] | Provider trait and registry |
//! | [`provider_registry`] | Official MCP registry provider |
//! | [`provider_awesome`] | Awesome-list markdown provider |
//! | [`reconcile`] | Diffing, priority order, de-duplication |
//! | [`store`] | Durable store and copy-on-write snapshots |
//! | [`manager`] | Refresh cycle, coalescing, observers |
//! | [`listing`] | Catalog queries and CLI output |
//! | [`status`] | Provider status and retention commands |
//! | [`server`] | HTTP query surface |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod error;
pub mod listing;
pub mod manager;
pub mod migrate;
pub mod models;
pub mod provider;
pub mod provider_awesome;
pub mod provider_registry;
pub mod reconcile;
pub mod server;
pub mod status;
pub mod store;
