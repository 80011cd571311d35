//! Versioned keyed snapshot store
//!
//! Writes serialize per type key under a keyed lock and parallelize across
//! keys. A snapshot is persisted to `states/<type_key>/v<N>.json` before the
//! in-memory commit, so a storage failure aborts the write atomically.

use crate::error::{SyncError, SyncResult};
use crate::snapshot::StateSnapshot;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of a [`StateStore::cleanup`] pass
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CleanupReport {
    pub removed_versions: usize,
    pub removed_files: usize,
}

/// Store statistics for status reporting
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StateStoreStats {
    pub keys: usize,
    pub total_versions: u64,
    pub last_write: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct KeyState {
    latest: Option<StateSnapshot>,
    history: VecDeque<StateSnapshot>,
}

/// Keyed snapshot store with per-key locking
pub struct StateStore {
    root: PathBuf,
    keys: DashMap<String, Arc<Mutex<KeyState>>>,
    max_versions: usize,
    last_write: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl StateStore {
    /// Create a store rooted at `<data_dir>/states`
    pub fn new(data_dir: &Path, max_versions: usize) -> Self {
        Self {
            root: data_dir.join("states"),
            keys: DashMap::new(),
            max_versions: max_versions.max(1),
            last_write: parking_lot::Mutex::new(None),
        }
    }

    fn key_dir(&self, type_key: &str) -> PathBuf {
        // Type keys may contain path separators; they map to subdirectories.
        // Traversal segments are neutralized.
        let safe: Vec<&str> = type_key
            .split('/')
            .map(|seg| if seg == ".." { "_" } else { seg })
            .collect();
        self.root.join(safe.join("/"))
    }

    fn cell(&self, type_key: &str) -> Arc<Mutex<KeyState>> {
        self.keys
            .entry(type_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(KeyState::default())))
            .clone()
    }

    /// Write the next version for `type_key`
    ///
    /// The version is assigned under the per-key lock, so versions are
    /// strictly increasing and never reused.
    pub async fn put(
        &self,
        type_key: &str,
        payload: Value,
        metadata: BTreeMap<String, Value>,
    ) -> SyncResult<StateSnapshot> {
        let cell = self.cell(type_key);
        let mut state = cell.lock().await;

        let version = state.latest.as_ref().map_or(1, |s| s.version + 1);
        let snapshot = StateSnapshot::next(type_key, version, payload, metadata);

        // Persist first; a failed write leaves memory untouched
        let dir = self.key_dir(type_key);
        tokio::fs::create_dir_all(&dir).await?;
        let file = dir.join(format!("v{version}.json"));
        let encoded = serde_json::to_vec_pretty(&snapshot)?;
        tokio::fs::write(&file, encoded).await?;

        state.history.push_back(snapshot.clone());
        while state.history.len() > self.max_versions {
            state.history.pop_front();
        }
        state.latest = Some(snapshot.clone());
        *self.last_write.lock() = Some(snapshot.timestamp);

        tracing::debug!(type_key, version, "snapshot written");
        Ok(snapshot)
    }

    /// Latest snapshot for `type_key`, if any
    pub async fn latest(&self, type_key: &str) -> Option<StateSnapshot> {
        let cell = self.cell(type_key);
        let state = cell.lock().await;
        state.latest.clone()
    }

    /// In-memory history for `type_key`, newest last, bounded by `limit`
    pub async fn history(&self, type_key: &str, limit: usize) -> Vec<StateSnapshot> {
        let cell = self.cell(type_key);
        let state = cell.lock().await;
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// All known type keys
    pub fn type_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Seed latest versions from snapshot files written by earlier runs
    pub async fn hydrate(&self) -> SyncResult<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut loaded = 0;
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            let mut newest: Option<(u64, PathBuf)> = None;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                if let Some(version) = parse_version(&path) {
                    if newest.as_ref().is_none_or(|(v, _)| version > *v) {
                        newest = Some((version, path));
                    }
                }
            }
            if let Some((_, path)) = newest {
                let content = tokio::fs::read_to_string(&path).await?;
                match serde_json::from_str::<StateSnapshot>(&content) {
                    Ok(snapshot) => {
                        let type_key = snapshot.type_key.clone();
                        let cell = self.cell(&type_key);
                        let mut state = cell.lock().await;
                        state.history.push_back(snapshot.clone());
                        state.latest = Some(snapshot);
                        loaded += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping unreadable snapshot");
                    }
                }
            }
        }
        Ok(loaded)
    }

    /// Prune history and snapshot files; the newest version always survives
    pub async fn cleanup(
        &self,
        max_age: Option<chrono::Duration>,
        max_versions: Option<usize>,
    ) -> SyncResult<CleanupReport> {
        let mut report = CleanupReport::default();
        let cutoff = max_age.map(|age| Utc::now() - age);

        for entry in self.keys.iter() {
            let type_key = entry.key().clone();
            let cell = entry.value().clone();
            let mut state = cell.lock().await;
            let keep_from_version = match (max_versions, state.latest.as_ref()) {
                (Some(n), Some(latest)) => latest.version.saturating_sub(n as u64 - 1),
                _ => 0,
            };

            let before = state.history.len();
            let latest_version = state.latest.as_ref().map(|l| l.version);
            state.history.retain(|snapshot| {
                let too_old = cutoff.is_some_and(|c| snapshot.timestamp < c);
                let beyond_retention = snapshot.version < keep_from_version;
                let is_latest = latest_version == Some(snapshot.version);
                is_latest || (!too_old && !beyond_retention)
            });
            report.removed_versions += before - state.history.len();

            // Remove files for versions no longer retained
            let dir = self.key_dir(&type_key);
            if let Ok(mut entries) = tokio::fs::read_dir(&dir).await {
                while let Ok(Some(file)) = entries.next_entry().await {
                    let path = file.path();
                    let Some(version) = parse_version(&path) else {
                        continue;
                    };
                    let retained = state.history.iter().any(|s| s.version == version);
                    if !retained {
                        if tokio::fs::remove_file(&path).await.is_ok() {
                            report.removed_files += 1;
                        }
                    }
                }
            }
        }
        tracing::info!(
            removed_versions = report.removed_versions,
            removed_files = report.removed_files,
            "state store cleanup"
        );
        Ok(report)
    }

    pub fn stats(&self) -> StateStoreStats {
        let mut total_versions = 0;
        for entry in self.keys.iter() {
            // try_lock is fine for statistics; a held lock means a write is
            // in flight and the count is about to change anyway
            if let Ok(state) = entry.value().try_lock() {
                total_versions += state.latest.as_ref().map_or(0, |s| s.version);
            }
        }
        StateStoreStats {
            keys: self.keys.len(),
            total_versions,
            last_write: *self.last_write.lock(),
        }
    }
}

fn parse_version(path: &Path) -> Option<u64> {
    let name = path.file_stem()?.to_str()?;
    name.strip_prefix('v')?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versions_strictly_increase() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 50);

        let first = store
            .put("cfg", serde_json::json!({"a": 1}), BTreeMap::new())
            .await
            .unwrap();
        let second = store
            .put("cfg", serde_json::json!({"a": 2}), BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(first.state_id, "cfg@v1");
        assert!(dir.path().join("states/cfg/v1.json").exists());
        assert!(dir.path().join("states/cfg/v2.json").exists());
    }

    #[tokio::test]
    async fn test_versions_are_independent_across_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 50);
        store
            .put("a", serde_json::json!(1), BTreeMap::new())
            .await
            .unwrap();
        let b = store
            .put("b", serde_json::json!(2), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(b.version, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writes_never_share_a_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(StateStore::new(dir.path(), 100));

        let mut handles = Vec::new();
        for n in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put("shared", serde_json::json!({ "n": n }), BTreeMap::new())
                    .await
                    .map(|s| s.version)
            }));
        }
        let mut versions: Vec<u64> = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap().unwrap());
        }
        versions.sort_unstable();
        let expected: Vec<u64> = (1..=20).collect();
        assert_eq!(versions, expected);
    }

    #[tokio::test]
    async fn test_history_is_bounded_by_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 3);
        for n in 0..5 {
            store
                .put("k", serde_json::json!({ "n": n }), BTreeMap::new())
                .await
                .unwrap();
        }
        let history = store.history("k", 10).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().map(|s| s.version), Some(5));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), 50);
        for n in 0..4 {
            store
                .put("k", serde_json::json!({ "n": n }), BTreeMap::new())
                .await
                .unwrap();
        }

        let report = store.cleanup(None, Some(2)).await.unwrap();
        assert_eq!(report.removed_versions, 2);
        let history = store.history("k", 10).await;
        assert_eq!(history.len(), 2);
        assert!(dir.path().join("states/k/v4.json").exists());
        assert!(!dir.path().join("states/k/v1.json").exists());
    }

    #[tokio::test]
    async fn test_hydrate_restores_latest() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = StateStore::new(dir.path(), 50);
            store
                .put("cfg", serde_json::json!({"a": 1}), BTreeMap::new())
                .await
                .unwrap();
            store
                .put("cfg", serde_json::json!({"a": 2}), BTreeMap::new())
                .await
                .unwrap();
        }

        let store = StateStore::new(dir.path(), 50);
        let loaded = store.hydrate().await.unwrap();
        assert_eq!(loaded, 1);
        let latest = store.latest("cfg").await.unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.payload, serde_json::json!({"a": 2}));

        // New writes continue the sequence
        let next = store
            .put("cfg", serde_json::json!({"a": 3}), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(next.version, 3);
    }
}
