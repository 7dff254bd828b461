use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-stage counters, shared between the stage thread and the pipeline handle
#[derive(Debug, Clone)]
pub struct StageMetrics {
    /// Values taken from upstream (or read from input, for the source)
    received: Arc<AtomicU64>,
    /// Values handed to the next stage (or pushed into the buffer)
    forwarded: Arc<AtomicU64>,
    /// Values discarded by a predicate or a parse failure
    rejected: Arc<AtomicU64>,
    start_time: Instant,
}

impl StageMetrics {
    /// Create a new metrics collector for a stage
    pub fn new() -> Self {
        Self {
            received: Arc::new(AtomicU64::new(0)),
            forwarded: Arc::new(AtomicU64::new(0)),
            rejected: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn total_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Forwarded values per second since the stage was created
    pub fn throughput_vps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.total_forwarded() as f64 / elapsed
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self, stage: &str) -> MetricsSnapshot {
        MetricsSnapshot {
            stage: stage.to_string(),
            received: self.total_received(),
            forwarded: self.total_forwarded(),
            rejected: self.total_rejected(),
            throughput_vps: self.throughput_vps(),
            elapsed: self.start_time.elapsed(),
        }
    }
}

impl Default for StageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of one stage's counters at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub stage: String,
    pub received: u64,
    pub forwarded: u64,
    pub rejected: u64,
    pub throughput_vps: f64,
    pub elapsed: Duration,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: received {}, forwarded {}, rejected {}, {:.2} values/s over {:.2}s",
            self.stage,
            self.received,
            self.forwarded,
            self.rejected,
            self.throughput_vps,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_metrics() {
        let metrics = StageMetrics::new();
        for i in 0..10 {
            metrics.record_received();
            if i % 2 == 0 {
                metrics.record_forwarded();
            } else {
                metrics.record_rejected();
            }
        }
        assert_eq!(metrics.total_received(), 10);
        assert_eq!(metrics.total_forwarded(), 5);
        assert_eq!(metrics.total_rejected(), 5);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = StageMetrics::new();
        let handle = metrics.clone();
        handle.record_forwarded();
        assert_eq!(metrics.total_forwarded(), 1);
    }

    #[test]
    fn test_snapshot_format() {
        let metrics = StageMetrics::new();
        metrics.record_received();
        let text = metrics.snapshot("source").to_string();
        assert!(text.starts_with("source: received 1, forwarded 0, rejected 0"));
    }
}
