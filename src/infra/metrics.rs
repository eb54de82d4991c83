//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting swaps the periodic counters.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters only,
//! the single-flight guard does not live here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Frame read latency bucket boundaries (milliseconds)
/// Buckets: ≤1, ≤2, ≤5, ≤10, ≤20, ≤40, ≤80, ≤160, ≤320, ≤640, >640
const READ_BUCKET_BOUNDS: [u64; 10] = [1, 2, 5, 10, 20, 40, 80, 160, 320, 640];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    READ_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [1, 2, 5, 10, 20, 40, 80, 160, 320, 640, 1280];

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Tag event batches received (monotonic)
    batches_total: AtomicU64,
    /// Tag events received (monotonic)
    tag_events_total: AtomicU64,
    /// Recording triggers fired by the classifier (monotonic)
    triggers_total: AtomicU64,
    /// Triggers dropped because the trigger channel was full (monotonic)
    triggers_dropped: AtomicU64,
    /// Sessions that entered Opening (monotonic)
    sessions_started: AtomicU64,
    /// Sessions that reached the end of their frame budget (monotonic)
    sessions_completed: AtomicU64,
    /// Start attempts rejected by the single-flight guard (monotonic)
    sessions_rejected: AtomicU64,
    /// Sessions that failed to open or faulted (monotonic)
    sessions_failed: AtomicU64,
    /// Frames read from the capture device (monotonic)
    frames_read: AtomicU64,
    /// Empty or failed reads (monotonic)
    frames_skipped: AtomicU64,
    /// Frames the video writer refused (monotonic)
    video_append_failures: AtomicU64,
    /// Still images and crops written (monotonic)
    artifacts_written: AtomicU64,
    /// Still images and crops that failed to write (monotonic)
    artifacts_failed: AtomicU64,
    /// Notifications delivered (monotonic)
    notifications_sent: AtomicU64,
    /// Notifications that failed (monotonic)
    notifications_failed: AtomicU64,
    /// Frame read latency histogram (reset on report)
    read_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Max frame read latency in ms (reset on report)
    read_latency_max_ms: AtomicU64,
    /// Frames read since last report (reset on report)
    frames_since_report: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            batches_total: AtomicU64::new(0),
            tag_events_total: AtomicU64::new(0),
            triggers_total: AtomicU64::new(0),
            triggers_dropped: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            sessions_failed: AtomicU64::new(0),
            frames_read: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            video_append_failures: AtomicU64::new(0),
            artifacts_written: AtomicU64::new(0),
            artifacts_failed: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            read_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            read_latency_max_ms: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_batch(&self, events: usize) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.tag_events_total.fetch_add(events as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trigger(&self) {
        self.triggers_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_trigger_dropped(&self) {
        self.triggers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful frame read and how long the read call took
    #[inline]
    pub fn record_frame_read(&self, latency_ms: u64) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.read_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.read_latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_video_append_failure(&self) {
        self.video_append_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_artifact_written(&self) {
        self.artifacts_written.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_artifact_failed(&self) {
        self.artifacts_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification(&self, delivered: bool) {
        if delivered {
            self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn triggers_total(&self) -> u64 {
        self.triggers_total.load(Ordering::Relaxed)
    }

    pub fn sessions_rejected(&self) -> u64 {
        self.sessions_rejected.load(Ordering::Relaxed)
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn artifacts_written(&self) -> u64 {
        self.artifacts_written.load(Ordering::Relaxed)
    }

    /// Snapshot all counters, resetting the periodic ones
    pub fn report(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let read_buckets = swap_buckets(&self.read_latency_buckets);
        let read_max_ms = self.read_latency_max_ms.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            batches_total: self.batches_total.load(Ordering::Relaxed),
            tag_events_total: self.tag_events_total.load(Ordering::Relaxed),
            triggers_total: self.triggers_total.load(Ordering::Relaxed),
            triggers_dropped: self.triggers_dropped.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            video_append_failures: self.video_append_failures.load(Ordering::Relaxed),
            artifacts_written: self.artifacts_written.load(Ordering::Relaxed),
            artifacts_failed: self.artifacts_failed.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            frames_per_sec,
            read_p50_ms: percentile_from_buckets(&read_buckets, 0.50),
            read_p99_ms: percentile_from_buckets(&read_buckets, 0.99),
            read_max_ms,
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub batches_total: u64,
    pub tag_events_total: u64,
    pub triggers_total: u64,
    pub triggers_dropped: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_rejected: u64,
    pub sessions_failed: u64,
    pub frames_read: u64,
    pub frames_skipped: u64,
    pub video_append_failures: u64,
    pub artifacts_written: u64,
    pub artifacts_failed: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub frames_per_sec: f64,
    pub read_p50_ms: u64,
    pub read_p99_ms: u64,
    pub read_max_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            batches = %self.batches_total,
            tag_events = %self.tag_events_total,
            triggers = %self.triggers_total,
            triggers_dropped = %self.triggers_dropped,
            sessions_started = %self.sessions_started,
            sessions_completed = %self.sessions_completed,
            sessions_rejected = %self.sessions_rejected,
            sessions_failed = %self.sessions_failed,
            frames_read = %self.frames_read,
            frames_skipped = %self.frames_skipped,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            read_p50_ms = %self.read_p50_ms,
            read_p99_ms = %self.read_p99_ms,
            read_max_ms = %self.read_max_ms,
            artifacts_written = %self.artifacts_written,
            artifacts_failed = %self.artifacts_failed,
            notifications_sent = %self.notifications_sent,
            notifications_failed = %self.notifications_failed,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(1), 0);
        assert_eq!(bucket_index(3), 2);
        assert_eq!(bucket_index(66), 6);
        assert_eq!(bucket_index(10_000), 10);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; NUM_BUCKETS];
        assert_eq!(percentile_from_buckets(&buckets, 0.5), 0);
        buckets[3] = 90;
        buckets[7] = 10;
        assert_eq!(percentile_from_buckets(&buckets, 0.5), 10);
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 160);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_frame_read(30);
        metrics.record_frame_read(70);
        metrics.record_frame_skipped();

        let summary = metrics.report();
        assert_eq!(summary.frames_read, 2);
        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(summary.read_max_ms, 70);

        let summary = metrics.report();
        assert_eq!(summary.frames_read, 2);
        assert_eq!(summary.read_max_ms, 0);
        assert_eq!(summary.read_p50_ms, 0);
    }

    #[test]
    fn test_session_counters() {
        let metrics = Metrics::new();
        metrics.record_session_started();
        metrics.record_session_rejected();
        metrics.record_notification(true);
        metrics.record_notification(false);

        let summary = metrics.report();
        assert_eq!(summary.sessions_started, 1);
        assert_eq!(summary.sessions_rejected, 1);
        assert_eq!(summary.notifications_sent, 1);
        assert_eq!(summary.notifications_failed, 1);
    }
}
