//! Prometheus metrics for the control plane
//!
//! Route outcomes, pool size, bus depth and supervisor activity.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

lazy_static! {
    /// Counter: route attempts by model and outcome
    pub static ref ROUTE_ATTEMPTS: CounterVec = register_counter_vec!(
        "overseer_route_attempts_total",
        "Route attempts by model and outcome",
        &["model", "outcome"]
    )
    .expect("Failed to create route_attempts metric");

    /// Histogram: provider call latency per model (seconds)
    pub static ref ROUTE_LATENCY: HistogramVec = register_histogram_vec!(
        "overseer_route_latency_seconds",
        "Latency of successful provider calls",
        &["model"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to create route_latency metric");

    /// Gauge: agents in the registry
    pub static ref AGENT_COUNT: Gauge = register_gauge!(
        "overseer_agents",
        "Number of registered agents"
    )
    .expect("Failed to create agents metric");

    /// Counter: agent spawn results
    pub static ref AGENT_SPAWNS: CounterVec = register_counter_vec!(
        "overseer_agent_spawns_total",
        "Agent spawn attempts by result",
        &["result"]
    )
    .expect("Failed to create agent_spawns metric");

    /// Gauge: events accepted by the bus but not yet processed
    pub static ref EVENT_QUEUE_DEPTH: Gauge = register_gauge!(
        "overseer_event_queue_depth",
        "Current depth of the event queue"
    )
    .expect("Failed to create event_queue_depth metric");

    /// Counter: processed events by type prefix
    pub static ref EVENTS_PROCESSED: CounterVec = register_counter_vec!(
        "overseer_events_processed_total",
        "Processed events by type prefix",
        &["prefix"]
    )
    .expect("Failed to create events_processed metric");

    /// Counter: handler failures by event type
    pub static ref HANDLER_FAILURES: CounterVec = register_counter_vec!(
        "overseer_handler_failures_total",
        "Event handler failures by event type",
        &["event_type"]
    )
    .expect("Failed to create handler_failures metric");

    /// Counter: interventions by strategy and result
    pub static ref INTERVENTIONS: CounterVec = register_counter_vec!(
        "overseer_interventions_total",
        "Interventions by strategy and result",
        &["strategy", "result"]
    )
    .expect("Failed to create interventions metric");
}

/// Record one route attempt
pub fn record_route_attempt(model: &str, outcome: &str) {
    ROUTE_ATTEMPTS.with_label_values(&[model, outcome]).inc();
}

/// Record a successful provider call's latency
pub fn observe_route_latency(model: &str, latency_secs: f64) {
    ROUTE_LATENCY.with_label_values(&[model]).observe(latency_secs);
}

/// Set registered agent count
pub fn set_agent_count(count: usize) {
    AGENT_COUNT.set(count as f64);
}

/// Record a spawn result ("spawned", "no_candidate", "capacity")
pub fn record_spawn(result: &str) {
    AGENT_SPAWNS.with_label_values(&[result]).inc();
}

/// Set event queue depth
pub fn set_queue_depth(depth: usize) {
    EVENT_QUEUE_DEPTH.set(depth as f64);
}

/// Count a processed event under its type prefix (`agent`, `page`, ...)
pub fn record_event(event_type: &str) {
    let prefix = event_type.split(':').next().unwrap_or(event_type);
    EVENTS_PROCESSED.with_label_values(&[prefix]).inc();
}

/// Count a failed handler invocation
pub fn record_handler_failure(event_type: &str) {
    HANDLER_FAILURES.with_label_values(&[event_type]).inc();
}

/// Count an executed intervention
pub fn record_intervention(strategy: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    INTERVENTIONS.with_label_values(&[strategy, result]).inc();
}

/// Encode all metrics as Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
