//! Catalog manager: cached reads and the refresh cycle.
//!
//! Reads go straight to the store's in-memory snapshot. Refreshes run the
//! cycle below, one at a time:
//!
//! ```text
//! Idle ──▶ Fetching ──▶ Reconciling ──▶ Committing ──▶ Idle
//!          (one task     (pure diff       (one store
//!          per provider)  per provider)    transaction)
//! ```
//!
//! A refresh requested while a cycle is in flight is not queued as a
//! separate cycle. It is merged into a single pending request that the
//! in-flight owner runs once its own cycle finishes, and the requester gets
//! [`RefreshOutcome::Coalesced`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RetentionConfig};
use crate::error::{CatalogError, Result};
use crate::models::{CatalogSnapshot, ChangeKind, ProviderResult, ServerChange};
use crate::provider::{build_http_client, FetchContext, Provider, ProviderRegistry};
use crate::reconcile::{self, ProviderDiff};
use crate::store::{now_ms, CatalogStore, CycleRecord, ProviderStatus};

/// Timeouts and retention applied to every cycle.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub cycle_timeout: Duration,
    pub provider_timeout: Duration,
    pub user_agent: String,
    pub retention: RetentionConfig,
}

impl RefreshSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cycle_timeout: config.refresh.cycle_timeout(),
            provider_timeout: config.refresh.provider_timeout(),
            user_agent: config.refresh.user_agent.clone(),
            retention: config.retention.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    Idle,
    Fetching,
    Reconciling,
    Committing,
}

impl RefreshPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RefreshPhase::Fetching,
            2 => RefreshPhase::Reconciling,
            3 => RefreshPhase::Committing,
            _ => RefreshPhase::Idle,
        }
    }
}

/// Per-provider summary of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderOutcome {
    pub provider: String,
    pub success: bool,
    pub error: Option<String>,
    pub entries: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub providers: Vec<ProviderOutcome>,
    pub changes: Vec<ServerChange>,
}

impl RefreshReport {
    pub fn failed_providers(&self) -> impl Iterator<Item = &ProviderOutcome> {
        self.providers.iter().filter(|p| !p.success)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    Completed(RefreshReport),
    /// Another cycle was in flight; this request was folded into its
    /// follow-up cycle.
    Coalesced,
}

/// Receives every committed cycle.
pub trait ChangeObserver: Send + Sync {
    fn on_commit(&self, report: &RefreshReport);
}

/// Logs each committed change at `info`.
pub struct TracingObserver;

impl ChangeObserver for TracingObserver {
    fn on_commit(&self, report: &RefreshReport) {
        for change in &report.changes {
            info!(
                cycle_id = %report.cycle_id,
                entry_id = %change.entry_id,
                kind = %change.change_kind,
                "catalog change"
            );
        }
    }
}

/// Snapshot of the manager's state for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub phase: RefreshPhase,
    pub refresh_pending: bool,
    pub populated: bool,
    pub generation: u64,
    pub entry_count: usize,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Selection {
    All,
    Only(BTreeSet<String>),
}

impl Selection {
    fn merge(self, other: Selection) -> Selection {
        match (self, other) {
            (Selection::Only(mut a), Selection::Only(b)) => {
                a.extend(b);
                Selection::Only(a)
            }
            _ => Selection::All,
        }
    }
}

/// Resets the phase to idle when a cycle ends, including by cancellation.
struct PhaseReset<'a>(&'a AtomicU8);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        self.0.store(RefreshPhase::Idle as u8, Ordering::SeqCst);
    }
}

pub struct CatalogManager {
    store: Arc<CatalogStore>,
    providers: ProviderRegistry,
    client: reqwest::Client,
    settings: RefreshSettings,
    cycle_lock: tokio::sync::Mutex<()>,
    pending: Mutex<Option<Selection>>,
    phase: AtomicU8,
    observers: RwLock<Vec<Arc<dyn ChangeObserver>>>,
}

impl CatalogManager {
    pub fn new(
        store: Arc<CatalogStore>,
        providers: ProviderRegistry,
        settings: RefreshSettings,
    ) -> anyhow::Result<Self> {
        let client = build_http_client(&settings.user_agent, settings.provider_timeout)?;
        Ok(Self {
            store,
            providers,
            client,
            settings,
            cycle_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            phase: AtomicU8::new(RefreshPhase::Idle as u8),
            observers: RwLock::new(Vec::new()),
        })
    }

    /// Open the configured store and register the configured providers.
    pub async fn from_config(config: &Config) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(CatalogStore::connect(config).await?);
        let providers = ProviderRegistry::from_config(config);
        let manager = Self::new(store, providers, RefreshSettings::from_config(config))?;
        manager.add_observer(Arc::new(TracingObserver));
        Ok(Arc::new(manager))
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn add_observer(&self, observer: Arc<dyn ChangeObserver>) {
        match self.observers.write() {
            Ok(mut list) => list.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// The current catalog. Never waits on a provider or the database.
    pub fn catalog(&self) -> Arc<CatalogSnapshot> {
        self.store.snapshot()
    }

    pub async fn history(&self, entry_id: &str) -> Result<Vec<ServerChange>> {
        self.store.history(entry_id).await
    }

    pub async fn recent_changes(&self, limit: i64) -> Result<Vec<ServerChange>> {
        self.store.recent_changes(limit).await
    }

    pub async fn provider_status(&self) -> Result<Vec<ProviderStatus>> {
        self.store.provider_status().await
    }

    pub fn phase(&self) -> RefreshPhase {
        RefreshPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn status(&self) -> ManagerStatus {
        let snapshot = self.catalog();
        ManagerStatus {
            phase: self.phase(),
            refresh_pending: self.lock_pending().is_some(),
            populated: snapshot.populated,
            generation: snapshot.generation,
            entry_count: snapshot.len(),
            refreshed_at: snapshot.refreshed_at,
            providers: self.providers.names(),
        }
    }

    /// Run a refresh cycle over `subset` (all providers when `None`).
    ///
    /// Returns [`RefreshOutcome::Coalesced`] without waiting if a cycle is
    /// already running. Fails only when the subset names an unknown
    /// provider or the commit fails; provider failures are reported inside
    /// the [`RefreshReport`].
    pub async fn refresh(&self, subset: Option<&[String]>) -> Result<RefreshOutcome> {
        let selection = self.selection(subset)?;

        let guard = {
            let mut pending = self.lock_pending();
            match self.cycle_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    let merged = match pending.take() {
                        Some(existing) => existing.merge(selection),
                        None => selection,
                    };
                    *pending = Some(merged);
                    debug!("refresh already in flight, request coalesced");
                    return Ok(RefreshOutcome::Coalesced);
                }
            }
        };

        let outcome = self.run_cycle(&selection).await;

        loop {
            let next = {
                let mut pending = self.lock_pending();
                match pending.take() {
                    Some(next) => next,
                    None => {
                        drop(guard);
                        break;
                    }
                }
            };
            info!("running coalesced follow-up refresh");
            if let Err(e) = self.run_cycle(&next).await {
                error!(error = %e, "follow-up refresh failed");
            }
        }

        outcome.map(RefreshOutcome::Completed)
    }

    /// Run [`refresh`](Self::refresh) on the runtime without waiting.
    pub fn trigger_refresh(self: &Arc<Self>, subset: Option<Vec<String>>) -> RefreshHandle {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.refresh(subset.as_deref()).await });
        RefreshHandle { handle }
    }

    /// Refresh every `interval`, starting immediately. Failures are logged
    /// and the loop keeps going.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match manager.refresh(None).await {
                    Ok(RefreshOutcome::Completed(report)) => {
                        debug!(
                            cycle_id = %report.cycle_id,
                            changes = report.changes.len(),
                            "periodic refresh finished"
                        );
                    }
                    Ok(RefreshOutcome::Coalesced) => {}
                    Err(e) => error!(error = %e, "periodic refresh failed"),
                }
            }
        })
    }

    /// Check that every name refers to a registered provider.
    pub fn validate_subset(&self, names: &[String]) -> Result<()> {
        self.selection(Some(names)).map(|_| ())
    }

    fn selection(&self, subset: Option<&[String]>) -> Result<Selection> {
        match subset {
            None => Ok(Selection::All),
            Some(names) => {
                let mut set = BTreeSet::new();
                for name in names {
                    if self.providers.get(name).is_none() {
                        return Err(CatalogError::UnknownProvider(name.clone()));
                    }
                    set.insert(name.clone());
                }
                Ok(Selection::Only(set))
            }
        }
    }

    fn selected_providers(&self, selection: &Selection) -> Vec<Arc<dyn Provider>> {
        match selection {
            Selection::All => self.providers.providers().cloned().collect(),
            Selection::Only(names) => names
                .iter()
                .filter_map(|n| self.providers.get(n).cloned())
                .collect(),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<Selection>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_phase(&self, phase: RefreshPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    async fn run_cycle(&self, selection: &Selection) -> Result<RefreshReport> {
        let _reset = PhaseReset(&self.phase);
        let selected = self.selected_providers(selection);
        let mut cycle = CycleRecord::new(now_ms());
        info!(cycle_id = %cycle.id, providers = selected.len(), "refresh cycle started");

        self.set_phase(RefreshPhase::Fetching);
        let fetched = self.fetch_all(&selected).await;

        self.set_phase(RefreshPhase::Reconciling);
        // Diff against durable state: another process may have committed
        // to the same database since this snapshot was loaded.
        self.store.reload().await;
        let now = now_ms();
        let diffs: Vec<ProviderDiff> = fetched
            .iter()
            .map(|(result, _)| {
                let previous = self.store.provider_slice(&result.provider_name);
                let diff = reconcile::diff(&previous, result, now);
                if let Some(detail) = &diff.error {
                    let err = CatalogError::ProviderFetch {
                        provider: diff.provider.clone(),
                        detail: detail.clone(),
                    };
                    warn!(error = %err, "keeping previously committed entries");
                }
                if !diff.duplicates.is_empty() {
                    warn!(provider = %diff.provider, count = diff.duplicates.len(), "provider returned duplicate ids");
                }
                if !diff.foreign.is_empty() {
                    warn!(provider = %diff.provider, ids = ?diff.foreign, "provider returned ids outside its namespace");
                }
                diff
            })
            .collect();

        self.set_phase(RefreshPhase::Committing);
        cycle.finished_at = now;
        let changes = match self.store.apply_reconciliation(&diffs, &cycle).await {
            Ok(changes) => changes,
            Err(e) => {
                error!(cycle_id = %cycle.id, error = %e, "refresh commit failed, previous snapshot kept");
                return Err(e);
            }
        };

        let providers = diffs
            .iter()
            .zip(fetched.iter())
            .map(|(diff, (result, elapsed))| ProviderOutcome {
                provider: diff.provider.clone(),
                success: diff.fetched,
                error: diff.error.clone(),
                entries: result.entries.len(),
                added: diff.count(ChangeKind::Added),
                updated: diff.count(ChangeKind::Updated),
                removed: diff.count(ChangeKind::Removed),
                duration_ms: elapsed.as_millis() as u64,
            })
            .collect();

        let report = RefreshReport {
            cycle_id: cycle.id.clone(),
            started_at: cycle.started_at,
            finished_at: cycle.finished_at,
            providers,
            changes,
        };

        info!(
            cycle_id = %report.cycle_id,
            changes = report.changes.len(),
            failed = report.failed_providers().count(),
            "refresh cycle committed"
        );

        self.notify(&report);
        self.apply_retention().await;

        Ok(report)
    }

    /// Fetch every selected provider concurrently, one task each. A task
    /// that panics or outlives its deadline becomes a failed result.
    async fn fetch_all(&self, selected: &[Arc<dyn Provider>]) -> Vec<(ProviderResult, Duration)> {
        let started = Instant::now();
        let limit = self.settings.provider_timeout.min(self.settings.cycle_timeout);
        let deadline = tokio::time::Instant::now() + limit;
        let ctx = FetchContext::new(self.client.clone(), self.settings.provider_timeout);

        let tasks: Vec<(String, JoinHandle<(ProviderResult, Duration)>)> = selected
            .iter()
            .map(|provider| {
                let provider = Arc::clone(provider);
                let ctx = ctx.clone();
                let name = provider.name().to_string();
                let handle = tokio::spawn(async move {
                    let fetch_started = Instant::now();
                    let result = provider.fetch(&ctx).await;
                    (result, fetch_started.elapsed())
                });
                (name, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (name, mut handle) in tasks {
            let (mut result, elapsed) = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(timed)) => timed,
                Ok(Err(e)) => (
                    ProviderResult::failure(&name, format!("provider task failed: {}", e)),
                    started.elapsed(),
                ),
                Err(_) => {
                    handle.abort();
                    (
                        ProviderResult::failure(
                            &name,
                            format!("timed out after {}ms", limit.as_millis()),
                        ),
                        started.elapsed(),
                    )
                }
            };
            // Entry ids and slices are keyed by the registered name
            result.provider_name = name;
            results.push((result, elapsed));
        }

        results
    }

    fn notify(&self, report: &RefreshReport) {
        let observers = match self.observers.read() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for observer in observers {
            observer.on_commit(report);
        }
    }

    async fn apply_retention(&self) {
        let retention = &self.settings.retention;
        if retention.tombstone_days == 0 && retention.change_log_days == 0 {
            return;
        }
        match self.store.prune(retention, now_ms()).await {
            Ok(report) if report.tombstones_purged > 0 || report.changes_pruned > 0 => {
                info!(
                    tombstones = report.tombstones_purged,
                    changes = report.changes_pruned,
                    "retention applied"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "retention pass failed"),
        }
    }
}

/// Handle to a refresh started with [`CatalogManager::trigger_refresh`].
pub struct RefreshHandle {
    handle: JoinHandle<Result<RefreshOutcome>>,
}

impl RefreshHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> Result<RefreshOutcome> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(CatalogError::RefreshAborted(e.to_string())),
        }
    }
}
