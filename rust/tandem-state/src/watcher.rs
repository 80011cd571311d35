//! Filesystem observation bound to sync triggers
//!
//! Wraps `notify` and forwards debounced change events onto a tokio channel
//! the synchronizer drains. Watcher errors are logged and the watch is
//! re-armed rather than surfaced to callers.

use crate::error::{SyncError, SyncResult};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// A change observed on a watched path
#[derive(Debug, Clone)]
pub struct WatchEvent {
    /// The registered watch root the change belongs to
    pub watch_path: PathBuf,
    /// The concrete path that changed
    pub changed_path: PathBuf,
}

struct WatchEntry {
    watcher: RecommendedWatcher,
    recursive: bool,
}

/// Registry of filesystem watches feeding one event channel
pub struct FsWatcher {
    tx: mpsc::UnboundedSender<WatchEvent>,
    watches: Mutex<HashMap<PathBuf, WatchEntry>>,
}

impl FsWatcher {
    /// Create the watcher and the receiving end of its event channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                watches: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    fn spawn_watch(&self, path: &Path, recursive: bool) -> SyncResult<RecommendedWatcher> {
        let tx = self.tx.clone();
        let watch_path = path.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            match result {
                Ok(event) => {
                    // Only content-affecting events trigger syncs
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        for changed in event.paths {
                            let _ = tx.send(WatchEvent {
                                watch_path: watch_path.clone(),
                                changed_path: changed,
                            });
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %watch_path.display(), error = %e, "watcher error, re-arming");
                }
            }
        })
        .map_err(|e| SyncError::Watcher(e.to_string()))?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(path, mode)
            .map_err(|e| SyncError::Watcher(e.to_string()))?;
        Ok(watcher)
    }

    /// Bind a watch; replacing an existing watch re-arms it
    pub fn watch(&self, path: &Path, recursive: bool) -> SyncResult<()> {
        let watcher = self.spawn_watch(path, recursive)?;
        self.watches.lock().insert(
            path.to_path_buf(),
            WatchEntry { watcher, recursive },
        );
        tracing::info!(path = %path.display(), recursive, "watch bound");
        Ok(())
    }

    /// Release a watch; returns false when the path was not watched
    pub fn unwatch(&self, path: &Path) -> bool {
        let mut watches = self.watches.lock();
        match watches.remove(path) {
            Some(mut entry) => {
                let _ = entry.watcher.unwatch(path);
                tracing::info!(path = %path.display(), "watch released");
                true
            }
            None => false,
        }
    }

    /// Re-create a watch after a watcher-level failure
    pub fn rearm(&self, path: &Path) -> SyncResult<()> {
        let recursive = self
            .watches
            .lock()
            .get(path)
            .map(|entry| entry.recursive)
            .ok_or_else(|| SyncError::Watcher(format!("{} is not watched", path.display())))?;
        self.watch(path, recursive)
    }

    /// Currently watched paths
    pub fn watched(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.watches.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watch_reports_file_modification() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.json");
        std::fs::write(&file, "{}").unwrap();

        let (watcher, mut rx) = FsWatcher::new();
        watcher.watch(dir.path(), false).unwrap();

        // Give the backend a moment to arm before mutating
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&file, r#"{"feature": true}"#).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("watch event within deadline")
            .expect("channel open");
        assert_eq!(event.watch_path, dir.path());
    }

    #[tokio::test]
    async fn test_unwatch_stops_reporting() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, _rx) = FsWatcher::new();
        watcher.watch(dir.path(), false).unwrap();
        assert!(watcher.unwatch(dir.path()));
        assert!(!watcher.unwatch(dir.path()));
        assert!(watcher.watched().is_empty());
    }
}
