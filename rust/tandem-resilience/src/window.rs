//! Sliding statistics window
//!
//! Fixed-width buckets cover `window_duration`; the ring is indexed by
//! monotonic epoch so stale buckets are reset lazily on first touch.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
struct Bucket {
    epoch: u64,
    total: u64,
    success: u64,
    failures: u64,
    total_response_ms: u64,
    max_response_ms: u64,
    min_response_ms: u64,
}

/// Aggregated view over the live buckets
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WindowStats {
    pub total: u64,
    pub success: u64,
    pub failures: u64,
    pub avg_response_ms: f64,
    pub max_response_ms: u64,
    pub min_response_ms: u64,
}

impl WindowStats {
    /// Failure fraction; zero when the window is empty
    pub fn failure_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.failures as f64 / self.total as f64
        }
    }
}

/// Ring of fixed-width buckets
#[derive(Debug)]
pub(crate) struct SlidingWindow {
    origin: Instant,
    bucket_width: Duration,
    buckets: Mutex<Vec<Bucket>>,
}

impl SlidingWindow {
    pub(crate) fn new(window_duration: Duration, max_buckets: usize) -> Self {
        let slots = max_buckets.max(1);
        let width = window_duration / slots as u32;
        Self {
            origin: Instant::now(),
            bucket_width: width.max(Duration::from_millis(1)),
            buckets: Mutex::new(vec![Bucket::default(); slots]),
        }
    }

    fn current_epoch(&self) -> u64 {
        (self.origin.elapsed().as_nanos() / self.bucket_width.as_nanos().max(1)) as u64
    }

    /// Record one call outcome
    pub(crate) fn record(&self, success: bool, duration: Duration) {
        let epoch = self.current_epoch();
        let mut buckets = self.buckets.lock();
        let slots = buckets.len() as u64;
        let bucket = &mut buckets[(epoch % slots) as usize];
        if bucket.epoch != epoch {
            *bucket = Bucket {
                epoch,
                ..Bucket::default()
            };
        }
        let ms = duration.as_millis() as u64;
        bucket.total += 1;
        if success {
            bucket.success += 1;
        } else {
            bucket.failures += 1;
        }
        bucket.total_response_ms += ms;
        bucket.max_response_ms = bucket.max_response_ms.max(ms);
        bucket.min_response_ms = if bucket.total == 1 {
            ms
        } else {
            bucket.min_response_ms.min(ms)
        };
    }

    /// Aggregate buckets that still fall inside the window
    pub(crate) fn snapshot(&self) -> WindowStats {
        let epoch = self.current_epoch();
        let buckets = self.buckets.lock();
        let slots = buckets.len() as u64;
        let oldest_live = epoch.saturating_sub(slots - 1);

        let mut stats = WindowStats {
            min_response_ms: u64::MAX,
            ..WindowStats::default()
        };
        for bucket in buckets.iter() {
            if bucket.total == 0 || bucket.epoch < oldest_live || bucket.epoch > epoch {
                continue;
            }
            stats.total += bucket.total;
            stats.success += bucket.success;
            stats.failures += bucket.failures;
            stats.max_response_ms = stats.max_response_ms.max(bucket.max_response_ms);
            stats.min_response_ms = stats.min_response_ms.min(bucket.min_response_ms);
            stats.avg_response_ms += bucket.total_response_ms as f64;
        }
        if stats.total > 0 {
            stats.avg_response_ms /= stats.total as f64;
        }
        if stats.min_response_ms == u64::MAX {
            stats.min_response_ms = 0;
        }
        stats
    }

    /// Drop all recorded outcomes
    pub(crate) fn reset(&self) {
        let mut buckets = self.buckets.lock();
        for bucket in buckets.iter_mut() {
            *bucket = Bucket::default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_response_stats() {
        let window = SlidingWindow::new(Duration::from_secs(60), 10);
        window.record(true, Duration::from_millis(10));
        window.record(false, Duration::from_millis(30));
        window.record(true, Duration::from_millis(20));

        let stats = window.snapshot();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.max_response_ms, 30);
        assert_eq!(stats.min_response_ms, 10);
        assert!((stats.avg_response_ms - 20.0).abs() < f64::EPSILON);
        assert!((stats.failure_rate() - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_empty_window_rate_is_zero() {
        let window = SlidingWindow::new(Duration::from_secs(60), 10);
        let stats = window.snapshot();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.failure_rate(), 0.0);
        assert_eq!(stats.min_response_ms, 0);
    }

    #[test]
    fn test_reset_clears_counts() {
        let window = SlidingWindow::new(Duration::from_secs(60), 4);
        window.record(false, Duration::from_millis(5));
        window.reset();
        assert_eq!(window.snapshot().total, 0);
    }

    #[test]
    fn test_stale_buckets_fall_out_of_the_window() {
        // 4 buckets x 10ms: records older than ~40ms disappear
        let window = SlidingWindow::new(Duration::from_millis(40), 4);
        window.record(false, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(window.snapshot().total, 0);
    }
}
