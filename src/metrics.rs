//! In-process pipeline counters.
//!
//! Plain atomic counters shared across the subscriber and dispatcher; the
//! subscriber logs a snapshot periodically. There is no exposition
//! endpoint; structured logs are the observability surface.

use crate::dispatch::Disposition;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for one pipeline instance.
pub struct PipelineMetrics {
    frames_received: AtomicU64,
    events_validated: AtomicU64,
    events_ignored: AtomicU64,
    events_rejected: AtomicU64,
    fully_delivered: AtomicU64,
    partially_delivered: AtomicU64,
    undelivered: AtomicU64,
    reconnects: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub events_validated: u64,
    pub events_ignored: u64,
    pub events_rejected: u64,
    pub fully_delivered: u64,
    pub partially_delivered: u64,
    pub undelivered: u64,
    pub reconnects: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            events_validated: AtomicU64::new(0),
            events_ignored: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            fully_delivered: AtomicU64::new(0),
            partially_delivered: AtomicU64::new(0),
            undelivered: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the running total so the caller can log periodic stats.
    pub fn record_validated(&self) -> u64 {
        self.events_validated.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_ignored(&self) {
        self.events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disposition(&self, disposition: Disposition) {
        let counter = match disposition {
            Disposition::Fully => &self.fully_delivered,
            Disposition::Partial { .. } => &self.partially_delivered,
            Disposition::Undelivered => &self.undelivered,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            events_validated: self.events_validated.load(Ordering::Relaxed),
            events_ignored: self.events_ignored.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            fully_delivered: self.fully_delivered.load(Ordering::Relaxed),
            partially_delivered: self.partially_delivered.load(Ordering::Relaxed),
            undelivered: self.undelivered.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::SinkKind;

    #[test]
    fn test_counters() {
        let metrics = PipelineMetrics::new();

        metrics.record_frame();
        metrics.record_frame();
        assert_eq!(metrics.record_validated(), 1);
        assert_eq!(metrics.record_validated(), 2);
        metrics.record_ignored();
        metrics.record_rejected();
        metrics.record_reconnect();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_received, 2);
        assert_eq!(snapshot.events_validated, 2);
        assert_eq!(snapshot.events_ignored, 1);
        assert_eq!(snapshot.events_rejected, 1);
        assert_eq!(snapshot.reconnects, 1);
    }

    #[test]
    fn test_dispositions() {
        let metrics = PipelineMetrics::new();

        metrics.record_disposition(Disposition::Fully);
        metrics.record_disposition(Disposition::Fully);
        metrics.record_disposition(Disposition::Partial {
            failed: SinkKind::Store,
        });
        metrics.record_disposition(Disposition::Undelivered);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fully_delivered, 2);
        assert_eq!(snapshot.partially_delivered, 1);
        assert_eq!(snapshot.undelivered, 1);
    }
}
