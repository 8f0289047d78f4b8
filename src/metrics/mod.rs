//! Prometheus metrics for murmur instances
//!
//! This module provides metrics tracking for:
//! - Durable log: append outcomes and latency, replay volume and failures
//! - Fan-out: local deliveries, dropped deliveries, cross-instance relay
//! - Connections: live client count per instance
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all instance metrics
struct Metrics {
    appends: CounterVec,
    append_duration: HistogramVec,
    replayed_messages: CounterVec,
    replay_failures: CounterVec,
    local_deliveries: CounterVec,
    dropped_deliveries: CounterVec,
    relayed_messages: CounterVec,
    bus_publish_failures: CounterVec,
    connections: GaugeVec,
}

/// Global metric storage; `None` when registration failed
static METRICS: OnceLock<Option<Metrics>> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

fn register() -> Result<Metrics, prometheus::Error> {
    Ok(Metrics {
        appends: register_counter_vec!(
            "murmur_log_appends_total",
            "Append attempts by instance and outcome (accepted, duplicate, error)",
            &["instance", "outcome"]
        )?,
        append_duration: register_histogram_vec!(
            "murmur_log_append_duration_seconds",
            "Time spent appending to the durable log",
            &["instance"],
            vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
        )?,
        replayed_messages: register_counter_vec!(
            "murmur_replay_messages_total",
            "Messages delivered to reconnecting clients by replay",
            &["instance"]
        )?,
        replay_failures: register_counter_vec!(
            "murmur_replay_failures_total",
            "Replays abandoned because the log could not be read",
            &["instance"]
        )?,
        local_deliveries: register_counter_vec!(
            "murmur_local_deliveries_total",
            "Live messages handed to clients connected to this instance",
            &["instance"]
        )?,
        dropped_deliveries: register_counter_vec!(
            "murmur_dropped_deliveries_total",
            "Live messages dropped because a client's outbound buffer was full",
            &["instance"]
        )?,
        relayed_messages: register_counter_vec!(
            "murmur_relayed_messages_total",
            "Messages received from other instances through the bus",
            &["instance"]
        )?,
        bus_publish_failures: register_counter_vec!(
            "murmur_bus_publish_failures_total",
            "Messages delivered locally only because the bus was unreachable",
            &["instance"]
        )?,
        connections: register_gauge_vec!(
            "murmur_connections",
            "Clients currently connected to this instance",
            &["instance"]
        )?,
    })
}

/// Initialize all Prometheus metrics
///
/// Safe to call more than once and from several instances in the same
/// process; registration happens exactly once. If it fails, the error is
/// logged and subsequent metric operations become no-ops.
pub fn init_metrics() -> bool {
    METRICS
        .get_or_init(|| match register() {
            Ok(metrics) => {
                tracing::info!("Prometheus metrics initialized successfully");
                Some(metrics)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
                None
            }
        })
        .is_some()
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    matches!(METRICS.get(), Some(Some(_)))
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get().and_then(Option::as_ref)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the outcome of an append (`accepted`, `duplicate` or `error`)
pub fn record_append(instance: &str, outcome: &str) {
    if let Some(m) = metrics() {
        m.appends.with_label_values(&[instance, outcome]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start an append timer (returns a timer handle)
pub fn start_append_timer(instance: &str) -> MetricsTimer {
    match metrics() {
        Some(m) => MetricsTimer::new(m.append_duration.with_label_values(&[instance]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

/// Record messages delivered by a replay
pub fn record_replayed(instance: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = metrics() {
        m.replayed_messages
            .with_label_values(&[instance])
            .inc_by(count as f64);
    }
}

/// Record a replay that stopped on a storage error
pub fn record_replay_failure(instance: &str) {
    if let Some(m) = metrics() {
        m.replay_failures.with_label_values(&[instance]).inc();
    }
}

/// Record live deliveries to local clients
pub fn record_local_deliveries(instance: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(m) = metrics() {
        m.local_deliveries
            .with_label_values(&[instance])
            .inc_by(count as f64);
    }
}

/// Record a live delivery dropped for a slow client
pub fn record_dropped_delivery(instance: &str) {
    if let Some(m) = metrics() {
        m.dropped_deliveries.with_label_values(&[instance]).inc();
    }
}

/// Record a message received from another instance
pub fn record_relayed(instance: &str) {
    if let Some(m) = metrics() {
        m.relayed_messages.with_label_values(&[instance]).inc();
    }
}

/// Record a failed publish to the bus
pub fn record_bus_publish_failure(instance: &str) {
    if let Some(m) = metrics() {
        m.bus_publish_failures.with_label_values(&[instance]).inc();
    }
}

/// Update the connected client gauge
pub fn set_connections(instance: &str, count: usize) {
    if let Some(m) = metrics() {
        m.connections
            .with_label_values(&[instance])
            .set(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================
