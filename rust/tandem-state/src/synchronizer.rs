//! State synchronizer
//!
//! Orchestrates reconciliation across registered sources: reads the source
//! payload, diffs it against the target's latest snapshot, classifies and
//! resolves conflicts, and writes the merged state back atomically. Batch
//! and scheduled timing run on background tasks; filesystem watches feed the
//! same pipeline.

use crate::conflict::{
    Conflict, ConflictResolver, DetectionContext, MergeWeights, Resolution, ResolutionStrategy,
    Severity,
};
use crate::diff::{diff, set_path, StateDiff};
use crate::error::{SyncError, SyncResult};
use crate::store::{StateStore, StateStoreStats};
use crate::strategy::{BatchQueue, ScheduleStatus, SyncMode};
use crate::watcher::{FsWatcher, WatchEvent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::config::StateConfig;
use tandem_events::{EventBus, PublishOptions};
use tokio::sync::mpsc;

/// Options for one sync invocation
#[derive(Clone, Default)]
pub struct SyncOptions {
    /// Resolution strategy; falls back to the configured default
    pub strategy: Option<ResolutionStrategy>,
    /// Timing mode; `Batch` enqueues instead of syncing now
    pub mode: Option<SyncMode>,
    /// Weights for AutoMerge numeric averaging
    pub weights: Option<MergeWeights>,
}

/// Result of one sync
#[derive(Debug, Clone, serde::Serialize)]
pub struct SyncOutcome {
    /// False when conflicts were left unresolved
    pub ok: bool,
    pub state_id: Option<String>,
    pub version: Option<u64>,
    pub conflicts: Vec<Conflict>,
    pub resolutions: Vec<Resolution>,
    /// True when the change was queued for a batch flush
    pub queued: bool,
    /// True when nothing diverged and no snapshot was written
    pub unchanged: bool,
}

impl SyncOutcome {
    fn queued() -> Self {
        Self {
            ok: true,
            state_id: None,
            version: None,
            conflicts: Vec::new(),
            resolutions: Vec::new(),
            queued: true,
            unchanged: false,
        }
    }
}

/// Result of [`StateSynchronizer::detect_differences`]
#[derive(Debug, Clone, serde::Serialize)]
pub struct DifferenceReport {
    pub has_changes: bool,
    pub changes: StateDiff,
}

/// Options for [`StateSynchronizer::watch`]
#[derive(Clone)]
pub struct WatchOptions {
    pub mode: SyncMode,
    pub recursive: bool,
    /// Target type key; defaults to the watched path
    pub target: Option<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Immediate,
            recursive: false,
            target: None,
        }
    }
}

/// Synchronizer status for `sync:status`
#[derive(Debug, Clone, serde::Serialize)]
pub struct SynchronizerStatus {
    pub sources: Vec<String>,
    pub links: Vec<(String, String)>,
    pub pending_batch: usize,
    pub schedules: Vec<ScheduleStatus>,
    pub watched: Vec<PathBuf>,
    pub syncs_total: u64,
    pub syncs_failed: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
    pub last_sync: Option<DateTime<Utc>>,
    pub store: StateStoreStats,
}

enum SourceKind {
    /// Payload pushed via `update_source`
    Memory(Mutex<Value>),
    /// Payload read from a JSON file on every sync
    File(PathBuf),
}

struct SourceEntry {
    kind: SourceKind,
    updated_at: Mutex<DateTime<Utc>>,
}

struct WatchBinding {
    source: String,
    target: String,
    mode: SyncMode,
}

struct ScheduleCell {
    status: Arc<Mutex<ScheduleStatus>>,
    handle: tokio::task::JoinHandle<()>,
}

struct SyncInner {
    config: StateConfig,
    store: Arc<StateStore>,
    resolver: ConflictResolver,
    bus: Option<EventBus>,
    sources: DashMap<String, Arc<SourceEntry>>,
    /// Last merged payload per (source, target); the three-way base
    bases: DashMap<(String, String), Value>,
    /// Every pair that ever synced; `force_sync` walks these
    links: DashMap<(String, String), ()>,
    pending_conflicts: DashMap<(String, String), Vec<Conflict>>,
    batch: BatchQueue,
    schedules: DashMap<String, ScheduleCell>,
    watcher: FsWatcher,
    watch_rx: Mutex<Option<mpsc::UnboundedReceiver<WatchEvent>>>,
    bindings: DashMap<PathBuf, WatchBinding>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    syncs_total: AtomicU64,
    syncs_failed: AtomicU64,
    conflicts_detected: AtomicU64,
    conflicts_resolved: AtomicU64,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

/// Multi-source state reconciliation engine
#[derive(Clone)]
pub struct StateSynchronizer {
    inner: Arc<SyncInner>,
}

impl StateSynchronizer {
    pub fn new(
        config: StateConfig,
        store: Arc<StateStore>,
        resolver: ConflictResolver,
        bus: Option<EventBus>,
    ) -> Self {
        let (watcher, watch_rx) = FsWatcher::new();
        let batch = BatchQueue::new(
            config.max_batch_size,
            Duration::from_millis(config.max_wait_time_ms),
        );
        Self {
            inner: Arc::new(SyncInner {
                config,
                store,
                resolver,
                bus,
                sources: DashMap::new(),
                bases: DashMap::new(),
                links: DashMap::new(),
                pending_conflicts: DashMap::new(),
                batch,
                schedules: DashMap::new(),
                watcher,
                watch_rx: Mutex::new(Some(watch_rx)),
                bindings: DashMap::new(),
                tasks: Mutex::new(Vec::new()),
                syncs_total: AtomicU64::new(0),
                syncs_failed: AtomicU64::new(0),
                conflicts_detected: AtomicU64::new(0),
                conflicts_resolved: AtomicU64::new(0),
                last_sync: Mutex::new(None),
            }),
        }
    }

    /// Spawn the batch flush loop and the watch event pump
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock();

        let inner = self.inner.clone();
        let interval = Duration::from_millis(self.inner.config.batch_interval_ms.max(1));
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                SyncInner::flush_batch(&inner).await;
            }
        }));

        if let Some(mut rx) = self.inner.watch_rx.lock().take() {
            let inner = self.inner.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    SyncInner::handle_watch_event(&inner, event).await;
                }
            }));
        }
    }

    /// Stop background tasks and persist the conflict history
    pub async fn shutdown(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        for entry in self.inner.schedules.iter() {
            entry.value().handle.abort();
        }
        if let Err(e) = self.inner.resolver.persist_history().await {
            tracing::warn!(error = %e, "conflict history persist failed during shutdown");
        }
    }

    /// Register an in-memory source
    pub fn register_source(&self, name: &str, initial: Value) {
        self.inner.sources.insert(
            name.to_string(),
            Arc::new(SourceEntry {
                kind: SourceKind::Memory(Mutex::new(initial)),
                updated_at: Mutex::new(Utc::now()),
            }),
        );
    }

    /// Register a source backed by a JSON file
    pub fn register_file_source(&self, name: &str, path: &Path) {
        self.inner.sources.insert(
            name.to_string(),
            Arc::new(SourceEntry {
                kind: SourceKind::File(path.to_path_buf()),
                updated_at: Mutex::new(Utc::now()),
            }),
        );
    }

    /// Push a new payload into a memory source
    pub fn update_source(&self, name: &str, value: Value) -> SyncResult<()> {
        let entry = self
            .inner
            .sources
            .get(name)
            .ok_or_else(|| SyncError::NoSuchSource(name.to_string()))?;
        match &entry.kind {
            SourceKind::Memory(slot) => {
                *slot.lock() = value;
                *entry.updated_at.lock() = Utc::now();
                Ok(())
            }
            SourceKind::File(path) => Err(SyncError::SourceRead {
                source_name: name.to_string(),
                message: format!("{} is file-backed and read-only", path.display()),
            }),
        }
    }

    /// Reconcile `source` into `target`
    pub async fn sync(
        &self,
        source: &str,
        target: &str,
        options: SyncOptions,
    ) -> SyncResult<SyncOutcome> {
        match options.mode.unwrap_or(SyncMode::Immediate) {
            SyncMode::Immediate | SyncMode::Scheduled => {
                let (payload, ts) = SyncInner::source_value(&self.inner, source)?;
                SyncInner::sync_with_payload(&self.inner, source, target, payload, ts, &options)
                    .await
            }
            SyncMode::Batch => {
                let (payload, _) = SyncInner::source_value(&self.inner, source)?;
                self.inner
                    .links
                    .insert((source.to_string(), target.to_string()), ());
                let flush_now = self.inner.batch.offer(source, target, payload);
                if flush_now {
                    SyncInner::flush_batch(&self.inner).await;
                }
                Ok(SyncOutcome::queued())
            }
        }
    }

    /// Manual reconciliation across every known pair, or one named pair
    pub async fn force_sync(
        &self,
        pair: Option<(&str, &str)>,
        options: SyncOptions,
    ) -> SyncResult<Vec<SyncOutcome>> {
        let pairs: Vec<(String, String)> = match pair {
            Some((source, target)) => vec![(source.to_string(), target.to_string())],
            None => self.inner.links.iter().map(|e| e.key().clone()).collect(),
        };
        let mut outcomes = Vec::new();
        for (source, target) in pairs {
            let outcome = self
                .sync(
                    &source,
                    &target,
                    SyncOptions {
                        mode: Some(SyncMode::Immediate),
                        ..options.clone()
                    },
                )
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Diff a source against a target without applying anything
    pub async fn detect_differences(
        &self,
        source: &str,
        target: &str,
    ) -> SyncResult<DifferenceReport> {
        let (payload, _) = SyncInner::source_value(&self.inner, source)?;
        let target_payload = self
            .inner
            .store
            .latest(target)
            .await
            .map(|s| s.payload)
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let changes = diff(&payload, &target_payload);
        Ok(DifferenceReport {
            has_changes: changes.has_changes(),
            changes,
        })
    }

    /// Bind a filesystem watch to sync triggers
    pub fn watch(&self, path: &Path, options: WatchOptions) -> SyncResult<()> {
        let source = path.display().to_string();
        let target = options.target.unwrap_or_else(|| source.clone());
        self.register_file_source(&source, path);
        self.inner.links.insert((source.clone(), target.clone()), ());
        self.inner.watcher.watch(path, options.recursive)?;
        self.inner.bindings.insert(
            path.to_path_buf(),
            WatchBinding {
                source,
                target,
                mode: options.mode,
            },
        );
        Ok(())
    }

    /// Release a filesystem watch
    pub fn unwatch(&self, path: &Path) -> SyncResult<()> {
        if !self.inner.watcher.unwatch(path) {
            return Err(SyncError::Watcher(format!(
                "{} is not watched",
                path.display()
            )));
        }
        self.inner.bindings.remove(&path.to_path_buf());
        Ok(())
    }

    /// Register a fixed-interval schedule for one pair
    pub fn add_schedule(&self, name: &str, source: &str, target: &str) {
        let status = Arc::new(Mutex::new(ScheduleStatus {
            name: name.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            interval_ms: self.inner.config.schedule_interval_ms,
            ticks: 0,
            skipped: 0,
            last_sync: None,
        }));
        self.inner
            .links
            .insert((source.to_string(), target.to_string()), ());

        let inner = self.inner.clone();
        let cell_status = status.clone();
        let (source, target) = (source.to_string(), target.to_string());
        let interval = Duration::from_millis(self.inner.config.schedule_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick is not a sync
            loop {
                ticker.tick().await;
                cell_status.lock().ticks += 1;
                SyncInner::scheduled_tick(&inner, &source, &target, &cell_status).await;
            }
        });

        self.inner
            .schedules
            .insert(name.to_string(), ScheduleCell { status, handle });
    }

    /// Remove a named schedule
    pub fn remove_schedule(&self, name: &str) -> SyncResult<()> {
        match self.inner.schedules.remove(name) {
            Some((_, cell)) => {
                cell.handle.abort();
                Ok(())
            }
            None => Err(SyncError::NoSuchSchedule(name.to_string())),
        }
    }

    /// Unresolved conflicts, optionally restricted to one pair
    pub fn pending_conflicts(&self, pair: Option<(&str, &str)>) -> Vec<Conflict> {
        match pair {
            Some((source, target)) => self
                .inner
                .pending_conflicts
                .get(&(source.to_string(), target.to_string()))
                .map(|e| e.clone())
                .unwrap_or_default(),
            None => {
                let mut all = Vec::new();
                for entry in self.inner.pending_conflicts.iter() {
                    all.extend(entry.value().clone());
                }
                all
            }
        }
    }

    /// Re-run syncs applying `strategy` to pending conflicts
    pub async fn resolve_pending(
        &self,
        strategy: ResolutionStrategy,
        pair: Option<(&str, &str)>,
    ) -> SyncResult<Vec<SyncOutcome>> {
        let pairs: Vec<(String, String)> = match pair {
            Some((source, target)) => vec![(source.to_string(), target.to_string())],
            None => self
                .inner
                .pending_conflicts
                .iter()
                .map(|e| e.key().clone())
                .collect(),
        };
        let mut outcomes = Vec::new();
        for (source, target) in pairs {
            let outcome = self
                .sync(
                    &source,
                    &target,
                    SyncOptions {
                        strategy: Some(strategy),
                        mode: Some(SyncMode::Immediate),
                        weights: None,
                    },
                )
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Resolution history records
    pub fn resolution_history(&self) -> Vec<crate::conflict::ResolutionRecord> {
        self.inner.resolver.history()
    }

    /// Snapshot history for a type key
    pub async fn state_history(
        &self,
        type_key: &str,
        limit: usize,
    ) -> Vec<crate::snapshot::StateSnapshot> {
        self.inner.store.history(type_key, limit).await
    }

    /// Prune snapshots and history
    pub async fn cleanup(
        &self,
        max_age: Option<chrono::Duration>,
        max_versions: Option<usize>,
    ) -> SyncResult<crate::store::CleanupReport> {
        self.inner.store.cleanup(max_age, max_versions).await
    }

    pub fn status(&self) -> SynchronizerStatus {
        let mut sources: Vec<String> = self.inner.sources.iter().map(|e| e.key().clone()).collect();
        sources.sort();
        let mut links: Vec<(String, String)> =
            self.inner.links.iter().map(|e| e.key().clone()).collect();
        links.sort();
        let mut schedules: Vec<ScheduleStatus> = self
            .inner
            .schedules
            .iter()
            .map(|e| e.value().status.lock().clone())
            .collect();
        schedules.sort_by(|a, b| a.name.cmp(&b.name));

        SynchronizerStatus {
            sources,
            links,
            pending_batch: self.inner.batch.len(),
            schedules,
            watched: self.inner.watcher.watched(),
            syncs_total: self.inner.syncs_total.load(Ordering::Relaxed),
            syncs_failed: self.inner.syncs_failed.load(Ordering::Relaxed),
            conflicts_detected: self.inner.conflicts_detected.load(Ordering::Relaxed),
            conflicts_resolved: self.inner.conflicts_resolved.load(Ordering::Relaxed),
            last_sync: *self.inner.last_sync.lock(),
            store: self.inner.store.stats(),
        }
    }
}

impl SyncInner {
    /// Current payload and freshness timestamp of a source
    fn source_value(inner: &Arc<SyncInner>, name: &str) -> SyncResult<(Value, DateTime<Utc>)> {
        let entry = inner
            .sources
            .get(name)
            .ok_or_else(|| SyncError::NoSuchSource(name.to_string()))?;
        match &entry.kind {
            SourceKind::Memory(slot) => Ok((slot.lock().clone(), *entry.updated_at.lock())),
            SourceKind::File(path) => {
                let content =
                    std::fs::read_to_string(path).map_err(|e| SyncError::SourceRead {
                        source_name: name.to_string(),
                        message: e.to_string(),
                    })?;
                let payload: Value =
                    serde_json::from_str(&content).map_err(|e| SyncError::SourceRead {
                        source_name: name.to_string(),
                        message: e.to_string(),
                    })?;
                let ts = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok((payload, ts))
            }
        }
    }

    async fn sync_with_payload(
        inner: &Arc<SyncInner>,
        source: &str,
        target: &str,
        payload: Value,
        source_ts: DateTime<Utc>,
        options: &SyncOptions,
    ) -> SyncResult<SyncOutcome> {
        inner.syncs_total.fetch_add(1, Ordering::Relaxed);
        inner
            .links
            .insert((source.to_string(), target.to_string()), ());
        Self::publish(
            inner,
            "sync.started",
            serde_json::json!({"source": source, "target": target}),
        )
        .await;

        let latest = inner.store.latest(target).await;
        let (target_payload, target_ts) = match &latest {
            Some(snapshot) => (snapshot.payload.clone(), snapshot.timestamp),
            None => (Value::Object(serde_json::Map::new()), Utc::now()),
        };

        let pair = (source.to_string(), target.to_string());
        let base = inner.bases.get(&pair).map(|e| e.clone());
        let ctx = DetectionContext {
            source: &payload,
            target: &target_payload,
            base: base.as_ref(),
            source_ts,
            target_ts,
        };

        let changes = diff(&payload, &target_payload);
        if !changes.has_changes() {
            let outcome = SyncOutcome {
                ok: true,
                state_id: latest.as_ref().map(|s| s.state_id.clone()),
                version: latest.as_ref().map(|s| s.version),
                conflicts: Vec::new(),
                resolutions: Vec::new(),
                queued: false,
                unchanged: true,
            };
            *inner.last_sync.lock() = Some(Utc::now());
            return Ok(outcome);
        }

        let conflicts = inner.resolver.detect(&ctx);
        inner
            .conflicts_detected
            .fetch_add(conflicts.len() as u64, Ordering::Relaxed);

        let strategy = match options.strategy {
            Some(strategy) => strategy,
            None => ResolutionStrategy::from_str(&inner.config.default_strategy)
                .unwrap_or(ResolutionStrategy::NewestWins),
        };

        let mut resolutions = Vec::new();
        let mut unresolved = Vec::new();
        for conflict in &conflicts {
            match inner.resolver.resolve(conflict, strategy, &ctx, options.weights) {
                Some(resolution) => resolutions.push(resolution),
                None => unresolved.push(conflict.clone()),
            }
        }
        inner
            .conflicts_resolved
            .fetch_add(resolutions.len() as u64, Ordering::Relaxed);

        // Unresolved critical conflicts abort before anything is applied
        if unresolved.iter().any(|c| c.severity == Severity::Critical) {
            inner.syncs_failed.fetch_add(1, Ordering::Relaxed);
            inner.pending_conflicts.insert(pair, conflicts.clone());
            Self::publish(
                inner,
                "sync.conflict",
                serde_json::json!({
                    "source": source,
                    "target": target,
                    "unresolved": unresolved.len(),
                }),
            )
            .await;
            return Err(SyncError::ConflictUnresolved { conflicts });
        }

        // Merge: target is the base document, source-only keys union in,
        // resolutions overwrite their fields
        let mut merged = target_payload.clone();
        for (path, value) in &changes.added {
            set_path(&mut merged, path, value.clone());
        }
        for resolution in &resolutions {
            set_path(&mut merged, &resolution.field, resolution.resolved_value.clone());
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("synced_from".to_string(), Value::String(source.to_string()));
        metadata.insert(
            "conflicts".to_string(),
            Value::Number(conflicts.len().into()),
        );
        metadata.insert("strategy".to_string(), Value::String(strategy.to_string()));

        // A storage failure aborts the sync atomically; nothing was applied
        let snapshot = inner.store.put(target, merged.clone(), metadata).await?;

        inner.bases.insert(pair.clone(), merged);
        if unresolved.is_empty() {
            inner.pending_conflicts.remove(&pair);
        } else {
            inner.pending_conflicts.insert(pair, unresolved.clone());
        }
        *inner.last_sync.lock() = Some(Utc::now());
        if let Err(e) = inner.resolver.persist_history().await {
            tracing::warn!(error = %e, "conflict history persist failed");
        }

        let ok = unresolved.is_empty();
        if !ok {
            inner.syncs_failed.fetch_add(1, Ordering::Relaxed);
        }
        Self::publish(
            inner,
            "sync.completed",
            serde_json::json!({
                "source": source,
                "target": target,
                "ok": ok,
                "version": snapshot.version,
                "conflicts": conflicts.len(),
                "resolutions": resolutions.len(),
            }),
        )
        .await;

        Ok(SyncOutcome {
            ok,
            state_id: Some(snapshot.state_id),
            version: Some(snapshot.version),
            conflicts: unresolved,
            resolutions,
            queued: false,
            unchanged: false,
        })
    }

    async fn flush_batch(inner: &Arc<SyncInner>) {
        for change in inner.batch.drain() {
            let options = SyncOptions::default();
            let result = Self::sync_with_payload(
                inner,
                &change.source,
                &change.target,
                change.payload,
                Utc::now(),
                &options,
            )
            .await;
            if let Err(e) = result {
                tracing::warn!(
                    source = change.source,
                    target = change.target,
                    error = %e,
                    "batched sync failed"
                );
            }
        }
    }

    async fn scheduled_tick(
        inner: &Arc<SyncInner>,
        source: &str,
        target: &str,
        status: &Arc<Mutex<ScheduleStatus>>,
    ) {
        if inner.config.skip_if_no_changes {
            let unchanged = match Self::source_value(inner, source) {
                Ok((payload, _)) => {
                    let target_payload = inner
                        .store
                        .latest(target)
                        .await
                        .map(|s| s.payload)
                        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
                    !diff(&payload, &target_payload).has_changes()
                }
                Err(_) => false,
            };
            if unchanged {
                status.lock().skipped += 1;
                return;
            }
        }

        let result = match Self::source_value(inner, source) {
            Ok((payload, ts)) => {
                Self::sync_with_payload(
                    inner,
                    source,
                    target,
                    payload,
                    ts,
                    &SyncOptions::default(),
                )
                .await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => status.lock().last_sync = Some(Utc::now()),
            Err(e) => {
                tracing::warn!(source, target, error = %e, "scheduled sync failed");
            }
        }
    }

    /// A watcher event triggers a sync per the binding's mode; only the
    /// merged state is persisted, the file stays the source of truth
    async fn handle_watch_event(inner: &Arc<SyncInner>, event: WatchEvent) {
        let Some(binding) = inner.bindings.get(&event.watch_path) else {
            return;
        };
        let (source, target, mode) = (
            binding.source.clone(),
            binding.target.clone(),
            binding.mode,
        );
        drop(binding);

        tracing::debug!(
            path = %event.changed_path.display(),
            source,
            target,
            "watch event"
        );
        match mode {
            SyncMode::Batch => match Self::source_value(inner, &source) {
                Ok((payload, _)) => {
                    if inner.batch.offer(&source, &target, payload) {
                        Self::flush_batch(inner).await;
                    }
                }
                Err(e) => Self::rearm_watch(inner, &event.watch_path, &source, &e),
            },
            SyncMode::Immediate | SyncMode::Scheduled => {
                match Self::source_value(inner, &source) {
                    Ok((payload, ts)) => {
                        if let Err(e) = Self::sync_with_payload(
                            inner,
                            &source,
                            &target,
                            payload,
                            ts,
                            &SyncOptions::default(),
                        )
                        .await
                        {
                            tracing::warn!(source, target, error = %e, "watch-triggered sync failed");
                        }
                    }
                    Err(e) => Self::rearm_watch(inner, &event.watch_path, &source, &e),
                }
            }
        }
    }

    /// Watched-source failures are logged and the watch re-armed
    fn rearm_watch(inner: &Arc<SyncInner>, path: &Path, source: &str, error: &SyncError) {
        tracing::warn!(source, error = %error, "watched source unreadable, re-arming watch");
        if let Err(e) = inner.watcher.rearm(path) {
            tracing::warn!(path = %path.display(), error = %e, "re-arm failed");
        }
    }

    async fn publish(inner: &Arc<SyncInner>, event_type: &str, data: Value) {
        if let Some(bus) = &inner.bus {
            let options = PublishOptions {
                source: "synchronizer".to_string(),
                ..Default::default()
            };
            if let Err(e) = bus.publish(event_type, data, options).await {
                tracing::debug!(event_type, error = %e, "lifecycle publish failed");
            }
        }
    }
}
