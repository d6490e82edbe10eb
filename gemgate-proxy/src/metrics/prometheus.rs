//! Prometheus metrics for the gemgate gateway
//!
//! Exposes metrics in Prometheus format for monitoring and observability.

use std::collections::BTreeMap;

use gemgate_core::{GateSnapshot, ResultRecord};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    /// Global Prometheus registry for gemgate metrics
    pub static ref REGISTRY: Registry = Registry::new();

    // ============== Request Metrics ==============

    /// Total HTTP requests counter with endpoint and status labels
    pub static ref REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("requests_total", "Total number of requests")
            .namespace("gemgate"),
        &["endpoint", "status"]
    ).expect("metric can be created");

    /// Request duration histogram with endpoint label
    pub static ref REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "request_duration_seconds",
            "Request duration in seconds"
        )
        .namespace("gemgate")
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]),
        &["endpoint"]
    ).expect("metric can be created");

    /// Active requests gauge (currently being processed)
    pub static ref ACTIVE_REQUESTS: Gauge = Gauge::with_opts(
        Opts::new("active_requests", "Number of HTTP requests currently being processed")
            .namespace("gemgate")
    ).expect("metric can be created");

    /// Authentication failures by reason
    pub static ref AUTH_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("auth_failures_total", "Total requests rejected during credential resolution")
            .namespace("gemgate"),
        &["reason"]
    ).expect("metric can be created");

    // ============== Item Metrics ==============

    /// Sub-request outcomes with kind and status labels
    pub static ref ITEMS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("items_total", "Total sub-requests by outcome")
            .namespace("gemgate"),
        &["kind", "status"]
    ).expect("metric can be created");

    /// Batch size histogram
    pub static ref BATCH_SIZE: Histogram = Histogram::with_opts(
        HistogramOpts::new("batch_size", "Number of items per dispatched batch")
            .namespace("gemgate")
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0])
    ).expect("metric can be created");

    /// Items holding a gate permit
    pub static ref ITEMS_IN_FLIGHT: Gauge = Gauge::with_opts(
        Opts::new("items_in_flight", "Sub-requests currently holding a gate permit")
            .namespace("gemgate")
    ).expect("metric can be created");

    /// Items waiting for a gate permit
    pub static ref ITEMS_WAITING: Gauge = Gauge::with_opts(
        Opts::new("items_waiting", "Sub-requests currently waiting for a gate permit")
            .namespace("gemgate")
    ).expect("metric can be created");

    // ============== Gate Metrics ==============

    /// Capacity of each gate
    pub static ref GATE_CAPACITY: GaugeVec = GaugeVec::new(
        Opts::new("gate_capacity", "Permit capacity of each gate")
            .namespace("gemgate"),
        &["gate"]
    ).expect("metric can be created");

    /// Permits held on each gate
    pub static ref GATE_HELD: GaugeVec = GaugeVec::new(
        Opts::new("gate_held", "Permits currently held on each gate")
            .namespace("gemgate"),
        &["gate"]
    ).expect("metric can be created");
}

/// Register all metrics with the global registry.
/// Should be called once at startup.
pub fn register_metrics() -> prometheus::Result<()> {
    // Request metrics
    REGISTRY.register(Box::new(REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(AUTH_FAILURES_TOTAL.clone()))?;

    // Item metrics
    REGISTRY.register(Box::new(ITEMS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCH_SIZE.clone()))?;
    REGISTRY.register(Box::new(ITEMS_IN_FLIGHT.clone()))?;
    REGISTRY.register(Box::new(ITEMS_WAITING.clone()))?;

    // Gate metrics
    REGISTRY.register(Box::new(GATE_CAPACITY.clone()))?;
    REGISTRY.register(Box::new(GATE_HELD.clone()))?;

    Ok(())
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_else(|e| format!("# Error encoding metrics: {}", e))
}

/// Helper struct for tracking request duration.
/// Automatically records the duration when dropped.
pub struct RequestTimer {
    endpoint: &'static str,
    start: std::time::Instant,
}

impl RequestTimer {
    /// Start a new request timer for the given endpoint.
    pub fn new(endpoint: &'static str) -> Self {
        ACTIVE_REQUESTS.inc();
        Self { endpoint, start: std::time::Instant::now() }
    }

    /// Record a successful request completion.
    pub fn record_success(self) {
        self.finish("success");
    }

    /// Record a failed request with its error type.
    pub fn record_failure(self, error_type: &str) {
        self.finish(error_type);
    }

    fn finish(self, status: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        REQUEST_DURATION_SECONDS
            .with_label_values(&[self.endpoint])
            .observe(duration);
        REQUESTS_TOTAL
            .with_label_values(&[self.endpoint, status])
            .inc();

        ACTIVE_REQUESTS.dec();
        // Prevent the Drop impl from running
        std::mem::forget(self);
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        // If dropped without explicit record, count as error
        ACTIVE_REQUESTS.dec();
        REQUESTS_TOTAL
            .with_label_values(&[self.endpoint, "dropped"])
            .inc();
    }
}

/// Record the outcome of one sub-request.
pub fn record_item(kind: &str, status: &str) {
    ITEMS_TOTAL.with_label_values(&[kind, status]).inc();
}

/// Status label for a result record: "success" or the error kind.
pub fn record_status(record: &ResultRecord) -> &'static str {
    match &record.error {
        None => "success",
        Some(error) => error.kind.as_str(),
    }
}

/// Record the size of a dispatched batch.
pub fn record_batch_size(size: usize) {
    BATCH_SIZE.observe(size as f64);
}

/// Record a credential resolution failure.
pub fn record_auth_failure(reason: &str) {
    AUTH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}

/// Update item gauges from the dispatcher's counters.
pub fn set_item_gauges(in_flight: u64, waiting: u64) {
    ITEMS_IN_FLIGHT.set(in_flight as f64);
    ITEMS_WAITING.set(waiting as f64);
}

/// Update gate gauges from a registry snapshot.
pub fn set_gate_gauges(snapshot: &BTreeMap<String, GateSnapshot>) {
    for (id, gate) in snapshot {
        GATE_CAPACITY.with_label_values(&[id.as_str()]).set(gate.capacity as f64);
        GATE_HELD.with_label_values(&[id.as_str()]).set(gate.held as f64);
    }
}
