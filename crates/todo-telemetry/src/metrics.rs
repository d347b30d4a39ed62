//! Prometheus metrics for the todo RPC layer.
//!
//! All metrics follow the naming convention: `todo_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: requests sent, timeouts, dropped replies, dispatch outcomes
//! - **Gauge**: calls currently awaiting a reply
//! - **Histogram**: request round-trip latency

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, IntCounter,
    Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // RPC CLIENT METRICS
    // =========================================================================

    /// Requests published, by destination queue
    pub static ref RPC_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("todo_rpc_requests_total", "Total RPC requests published"),
        &["destination"]
    ).expect("metric creation failed");

    /// Requests that gave up waiting for a reply
    pub static ref RPC_TIMEOUTS: CounterVec = CounterVec::new(
        Opts::new("todo_rpc_timeouts_total", "Total RPC requests that timed out"),
        &["destination"]
    ).expect("metric creation failed");

    /// Replies with no (or an unknown) correlation id
    pub static ref RPC_REPLIES_DROPPED: IntCounter = IntCounter::new(
        "todo_rpc_replies_dropped_total",
        "Replies discarded because no caller was waiting for them"
    ).expect("metric creation failed");

    /// Calls currently awaiting a reply
    pub static ref RPC_PENDING: Gauge = Gauge::new(
        "todo_rpc_pending_requests",
        "Number of RPC calls awaiting a reply"
    ).expect("metric creation failed");

    /// Round-trip latency of answered requests
    pub static ref RPC_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "todo_rpc_request_duration_seconds",
            "Time from publish to reply"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("valid buckets")),
        &["destination"]
    ).expect("metric creation failed");

    // =========================================================================
    // WORKER METRICS
    // =========================================================================

    /// Dispatch outcomes per queue (outcome: acked/requeued/dead_lettered)
    pub static ref WORKER_DISPATCH: CounterVec = CounterVec::new(
        Opts::new("todo_worker_dispatch_total", "Deliveries settled by the worker"),
        &["queue", "outcome"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; already-registered metrics are skipped.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Client
        Box::new(RPC_REQUESTS.clone()),
        Box::new(RPC_TIMEOUTS.clone()),
        Box::new(RPC_REPLIES_DROPPED.clone()),
        Box::new(RPC_PENDING.clone()),
        Box::new(RPC_DURATION.clone()),
        // Worker
        Box::new(WORKER_DISPATCH.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
