//! Append-only persisted event log
//!
//! Layout: `events/YYYY/MM/DD/events.log` under the data directory, one
//! JSON-encoded record per line. Writes retry with bounded backoff; replay
//! streams records in store order filtered by time window and type.

use crate::error::{EventError, EventResult};
use crate::event::Event;
use crate::serializer::EventSerializer;
use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const WRITE_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 25;

/// Time/type window for [`EventStore::replay`]
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub from_ts: Option<DateTime<Utc>>,
    pub to_ts: Option<DateTime<Utc>>,
    pub type_filter: Option<String>,
}

impl ReplayOptions {
    fn matches(&self, event: &Event) -> bool {
        if let Some(from) = self.from_ts {
            if event.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to_ts {
            if event.timestamp > to {
                return false;
            }
        }
        if let Some(filter) = &self.type_filter {
            if &event.event_type != filter {
                return false;
            }
        }
        true
    }
}

/// Store statistics for status reporting
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub files: usize,
    pub records: usize,
    pub bytes: u64,
}

/// Append-only event log under `<root>/events`
pub struct EventStore {
    root: PathBuf,
    serializer: EventSerializer,
}

impl EventStore {
    /// Create a store rooted at `<data_dir>/events`
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("events"),
            serializer: EventSerializer,
        }
    }

    fn day_file(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.root
            .join(format!("{:04}", timestamp.year()))
            .join(format!("{:02}", timestamp.month()))
            .join(format!("{:02}", timestamp.day()))
            .join("events.log")
    }

    /// Append one event, retrying transient failures with backoff
    pub async fn append(&self, event: &Event) -> EventResult<()> {
        self.append_batch(std::slice::from_ref(event)).await
    }

    /// Append a batch of events in one write per day file
    pub async fn append_batch(&self, events: &[Event]) -> EventResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        // Events within one batch almost always share a day; group anyway so
        // a midnight rollover lands records in the right file.
        let mut by_file: Vec<(PathBuf, String)> = Vec::new();
        for event in events {
            let path = self.day_file(event.timestamp);
            let line = self.serializer.encode(event)?;
            match by_file.iter_mut().find(|(p, _)| p == &path) {
                Some((_, buf)) => {
                    buf.push('\n');
                    buf.push_str(&line);
                }
                None => by_file.push((path, line)),
            }
        }

        for (path, buf) in by_file {
            self.write_lines(&path, &buf).await?;
        }
        Ok(())
    }

    async fn write_lines(&self, path: &Path, buf: &str) -> EventResult<()> {
        let mut last_err = None;
        for attempt in 0..WRITE_ATTEMPTS {
            if attempt > 0 {
                let backoff = BACKOFF_BASE_MS * (1 << (attempt - 1));
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
            match self.try_write(path, buf).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), attempt, error = %e, "event store write failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| EventError::Storage("write failed".to_string())))
    }

    async fn try_write(&self, path: &Path, buf: &str) -> EventResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    /// All log files in store order (by date, then filename)
    async fn log_files(&self) -> EventResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.root.exists() {
            return Ok(files);
        }
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            let mut here = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.is_dir() {
                    here.push(path);
                } else if path.extension().is_some_and(|e| e == "log") {
                    files.push(path);
                }
            }
            here.sort();
            // Reverse so the stack pops directories in ascending order
            for d in here.into_iter().rev() {
                stack.push(d);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Stream stored events in store order through `visit`
    ///
    /// Lines that fail to decode are skipped with a warning; a corrupt tail
    /// must not make the whole log unreadable.
    pub async fn replay_with<F>(&self, options: &ReplayOptions, mut visit: F) -> EventResult<usize>
    where
        F: FnMut(Event) -> EventResult<()>,
    {
        let mut delivered = 0;
        for path in self.log_files().await? {
            let content = tokio::fs::read_to_string(&path).await?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let event = match self.serializer.decode(line) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping undecodable record");
                        continue;
                    }
                };
                if options.matches(&event) {
                    visit(event)?;
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }

    /// Collect matching stored events in store order
    pub async fn replay(&self, options: &ReplayOptions) -> EventResult<Vec<Event>> {
        let mut events = Vec::new();
        self.replay_with(options, |event| {
            events.push(event);
            Ok(())
        })
        .await?;
        Ok(events)
    }

    /// File/record/byte counts for status reporting
    pub async fn stats(&self) -> EventResult<StoreStats> {
        let mut stats = StoreStats::default();
        for path in self.log_files().await? {
            let content = tokio::fs::read_to_string(&path).await?;
            stats.files += 1;
            stats.records += content.lines().filter(|l| !l.trim().is_empty()).count();
            stats.bytes += content.len() as u64;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tandem_core::EventId;

    fn event(seq: u64, event_type: &str, ts: DateTime<Utc>) -> Event {
        Event {
            id: EventId::new("storetst", seq),
            event_type: event_type.to_string(),
            data: serde_json::json!({"seq": seq}),
            timestamp: ts,
            source: "test".to_string(),
            priority: 0,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_append_and_replay_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let now = Utc::now();

        for seq in 1..=5 {
            store.append(&event(seq, "a", now)).await.unwrap();
        }

        let events = store.replay(&ReplayOptions::default()).await.unwrap();
        assert_eq!(events.len(), 5);
        let ids: Vec<_> = events.iter().map(|e| e.id.clone()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_replay_filters_by_type_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let now = Utc::now();

        store.append(&event(1, "keep", now)).await.unwrap();
        store.append(&event(2, "drop", now)).await.unwrap();
        store
            .append(&event(3, "keep", now - chrono::Duration::days(2)))
            .await
            .unwrap();

        let options = ReplayOptions {
            from_ts: Some(now - chrono::Duration::hours(1)),
            to_ts: None,
            type_filter: Some("keep".to_string()),
        };
        let events = store.replay(&options).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, EventId::new("storetst", 1));
    }

    #[tokio::test]
    async fn test_replay_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let now = Utc::now();
        store.append(&event(1, "a", now)).await.unwrap();

        // Corrupt the tail of the day file
        let path = store.day_file(now);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{not json\n");
        std::fs::write(&path, content).unwrap();

        let events = store.replay(&ReplayOptions::default()).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_append_counts_once_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::new(dir.path());
        let now = Utc::now();
        let batch: Vec<Event> = (1..=10).map(|seq| event(seq, "b", now)).collect();

        store.append_batch(&batch).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.records, 10);
    }
}
