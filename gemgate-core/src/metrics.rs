//! Counters for admission and dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::ErrorKind;

/// Metrics for monitoring gate admission and backend calls
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Batches dispatched (individual calls count as batches of one)
    pub batches_dispatched: AtomicU64,

    /// Items submitted to the dispatcher
    pub items_received: AtomicU64,

    /// Items currently waiting for a gate permit
    pub items_waiting: AtomicU64,

    /// Items currently holding a permit
    pub items_in_flight: AtomicU64,

    /// Items that finished with a value
    pub items_succeeded: AtomicU64,

    /// Items that finished with an error (including validation failures)
    pub items_failed: AtomicU64,

    /// Items whose backend call timed out
    pub items_timed_out: AtomicU64,

    /// Items rejected before reaching the gate
    pub items_invalid: AtomicU64,

    /// Items whose task was aborted because the caller went away
    pub items_cancelled: AtomicU64,

    /// Total gate wait time in milliseconds (for averaging)
    pub total_gate_wait_ms: AtomicU64,

    /// Total backend time in milliseconds (for averaging)
    pub total_backend_ms: AtomicU64,

    /// Items admitted through a gate
    pub items_admitted: AtomicU64,

    /// Maximum number of simultaneous waiters observed
    pub max_waiting: AtomicU64,

    /// Largest batch seen
    pub largest_batch: AtomicU64,

    /// Total items across all batches (for batch size averaging)
    pub total_batch_items: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a batch entering the dispatcher
    pub fn record_batch(&self, size: usize) {
        let size = size as u64;
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.items_received.fetch_add(size, Ordering::Relaxed);
        self.total_batch_items.fetch_add(size, Ordering::Relaxed);
        self.largest_batch.fetch_max(size, Ordering::Relaxed);
    }

    /// Record an item that failed validation and never touched a gate
    pub fn record_invalid(&self) {
        self.items_invalid.fetch_add(1, Ordering::Relaxed);
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an item starting to wait for a permit
    pub fn record_waiting(&self) {
        let waiting = self.items_waiting.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_waiting.fetch_max(waiting, Ordering::Relaxed);
    }

    /// Record an item that obtained its permit
    pub fn record_admitted(&self, wait_time: Duration) {
        self.items_waiting.fetch_sub(1, Ordering::Relaxed);
        self.items_in_flight.fetch_add(1, Ordering::Relaxed);
        self.items_admitted.fetch_add(1, Ordering::Relaxed);
        self.total_gate_wait_ms
            .fetch_add(wait_time.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record an item that waited but never obtained a permit
    pub fn record_abandoned(&self) {
        self.items_waiting.fetch_sub(1, Ordering::Relaxed);
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an item dropped before it finished; `admitted` says whether
    /// it held a permit at that point
    pub fn record_cancelled(&self, admitted: bool) {
        if admitted {
            self.items_in_flight.fetch_sub(1, Ordering::Relaxed);
        } else {
            self.items_waiting.fetch_sub(1, Ordering::Relaxed);
        }
        self.items_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an admitted item finishing, successfully or not
    pub fn record_finished(&self, backend_time: Duration, failure: Option<ErrorKind>) {
        self.items_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.total_backend_ms
            .fetch_add(backend_time.as_millis() as u64, Ordering::Relaxed);

        match failure {
            None => {
                self.items_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Some(kind) => {
                self.items_failed.fetch_add(1, Ordering::Relaxed);
                if kind == ErrorKind::Timeout {
                    self.items_timed_out.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Items currently holding a permit across all gates
    pub fn in_flight(&self) -> u64 {
        self.items_in_flight.load(Ordering::Relaxed)
    }

    /// Items currently waiting for a permit across all gates
    pub fn waiting(&self) -> u64 {
        self.items_waiting.load(Ordering::Relaxed)
    }

    /// Calculate average gate wait time in milliseconds
    pub fn avg_gate_wait_ms(&self) -> f64 {
        let admitted = self.items_admitted.load(Ordering::Relaxed);
        if admitted == 0 {
            return 0.0;
        }
        self.total_gate_wait_ms.load(Ordering::Relaxed) as f64 / admitted as f64
    }

    /// Calculate average backend time in milliseconds
    pub fn avg_backend_ms(&self) -> f64 {
        let finished = self
            .items_admitted
            .load(Ordering::Relaxed)
            .saturating_sub(self.in_flight());
        if finished == 0 {
            return 0.0;
        }
        self.total_backend_ms.load(Ordering::Relaxed) as f64 / finished as f64
    }

    /// Calculate average batch size
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_dispatched.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        self.total_batch_items.load(Ordering::Relaxed) as f64 / batches as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            items_received: self.items_received.load(Ordering::Relaxed),
            items_waiting: self.waiting(),
            items_in_flight: self.in_flight(),
            items_succeeded: self.items_succeeded.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_timed_out: self.items_timed_out.load(Ordering::Relaxed),
            items_invalid: self.items_invalid.load(Ordering::Relaxed),
            items_cancelled: self.items_cancelled.load(Ordering::Relaxed),
            max_waiting: self.max_waiting.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
            avg_gate_wait_ms: self.avg_gate_wait_ms(),
            avg_backend_ms: self.avg_backend_ms(),
            avg_batch_size: self.avg_batch_size(),
        }
    }
}

/// Snapshot of dispatch metrics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub batches_dispatched: u64,
    pub items_received: u64,
    pub items_waiting: u64,
    pub items_in_flight: u64,
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub items_timed_out: u64,
    pub items_invalid: u64,
    pub items_cancelled: u64,
    pub max_waiting: u64,
    pub largest_batch: u64,
    pub avg_gate_wait_ms: f64,
    pub avg_backend_ms: f64,
    pub avg_batch_size: f64,
}

/// Timer for one item: gate wait, then backend time
#[derive(Debug)]
pub struct ItemTimer {
    pub submitted_at: Instant,
    pub admitted_at: Option<Instant>,
}

impl ItemTimer {
    pub fn new() -> Self {
        Self { submitted_at: Instant::now(), admitted_at: None }
    }

    pub fn admit(&mut self) {
        self.admitted_at = Some(Instant::now());
    }

    pub fn gate_wait_time(&self) -> Duration {
        self.admitted_at
            .map(|s| s.duration_since(self.submitted_at))
            .unwrap_or_else(|| self.submitted_at.elapsed())
    }

    pub fn backend_time(&self) -> Duration {
        self.admitted_at.map(|s| s.elapsed()).unwrap_or(Duration::ZERO)
    }
}

impl Default for ItemTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_lifecycle() {
        let metrics = DispatchMetrics::new();

        metrics.record_batch(1);
        metrics.record_waiting();
        assert_eq!(metrics.waiting(), 1);

        metrics.record_admitted(Duration::from_millis(40));
        assert_eq!(metrics.waiting(), 0);
        assert_eq!(metrics.in_flight(), 1);

        metrics.record_finished(Duration::from_millis(200), None);
        assert_eq!(metrics.in_flight(), 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.items_received, 1);
        assert_eq!(snapshot.items_succeeded, 1);
        assert_eq!(snapshot.avg_gate_wait_ms, 40.0);
        assert_eq!(snapshot.avg_backend_ms, 200.0);
    }

    #[test]
    fn test_failures_and_timeouts() {
        let metrics = DispatchMetrics::new();

        metrics.record_batch(3);
        metrics.record_invalid();
        for kind in [ErrorKind::Timeout, ErrorKind::BackendError] {
            metrics.record_waiting();
            metrics.record_admitted(Duration::ZERO);
            metrics.record_finished(Duration::ZERO, Some(kind));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.items_failed, 3);
        assert_eq!(snapshot.items_timed_out, 1);
        assert_eq!(snapshot.items_invalid, 1);
        assert_eq!(snapshot.items_succeeded, 0);
    }

    #[test]
    fn test_cancelled_items_leave_gauges() {
        let metrics = DispatchMetrics::new();

        metrics.record_waiting();
        metrics.record_waiting();
        metrics.record_admitted(Duration::ZERO);

        metrics.record_cancelled(true);
        metrics.record_cancelled(false);

        assert_eq!(metrics.in_flight(), 0);
        assert_eq!(metrics.waiting(), 0);
        assert_eq!(metrics.snapshot().items_cancelled, 2);
    }

    #[test]
    fn test_batch_sizes() {
        let metrics = DispatchMetrics::new();

        metrics.record_batch(4);
        metrics.record_batch(6);

        assert_eq!(metrics.avg_batch_size(), 5.0);
        assert_eq!(metrics.largest_batch.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_max_waiting() {
        let metrics = DispatchMetrics::new();

        for _ in 0..5 {
            metrics.record_waiting();
        }
        for _ in 0..3 {
            metrics.record_admitted(Duration::ZERO);
        }

        assert_eq!(metrics.max_waiting.load(Ordering::Relaxed), 5);
        assert_eq!(metrics.waiting(), 2);
    }
}
