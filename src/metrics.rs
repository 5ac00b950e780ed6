// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

// Macros for metrics when observability is disabled
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "queue_claims_total",
        Unit::Count,
        "Queue items claimed, labeled by network and type."
    );
    describe_counter!(
        "queue_outcomes_total",
        Unit::Count,
        "Completion policy outcomes (complete, release, park, error) by network and type."
    );
    describe_counter!(
        "queue_refused_total",
        Unit::Count,
        "Items refused at dispatch for exceeding the retry ceiling."
    );
    describe_counter!(
        "queue_enqueued_total",
        Unit::Count,
        "Queue items written by the dependency expander and the operation feed."
    );
    describe_counter!(
        "queue_leases_lost_total",
        Unit::Count,
        "Completion writes skipped because the lease had moved to another claimant."
    );
    describe_counter!(
        "queue_leases_reaped_total",
        Unit::Count,
        "Expired leases released by the reaper."
    );
    describe_histogram!(
        "queue_processing_seconds",
        Unit::Seconds,
        "Time between claim and completion of a queue item."
    );
    describe_histogram!(
        "queue_lifetime_seconds",
        Unit::Seconds,
        "Time between creation and completion of a queue item."
    );
    describe_counter!("rpc_requests_total", Unit::Count, "RPC requests by endpoint.");
    describe_counter!("rpc_429_total", Unit::Count, "Rate-limited RPC responses by endpoint.");
    describe_counter!(
        "rpc_cooldowns_total",
        Unit::Count,
        "Endpoint cooldowns, labeled short or long."
    );
    describe_gauge!("queue_stuck_items", "Parked or refused items waiting for a manual unlock.");
}

/// Starts the Prometheus exporter on `addr`.
#[cfg(feature = "observability")]
pub fn install_exporter(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

// --- Helper functions to update metrics ---

pub fn increment_claims(network: &str, item_type: &str) {
    counter!("queue_claims_total", 1, "network" => network.to_string(), "type" => item_type.to_string());
}

pub fn increment_outcome(network: &str, item_type: &str, outcome: &'static str) {
    counter!(
        "queue_outcomes_total",
        1,
        "network" => network.to_string(),
        "type" => item_type.to_string(),
        "outcome" => outcome
    );
}

pub fn increment_refused(network: &str) {
    counter!("queue_refused_total", 1, "network" => network.to_string());
}

pub fn increment_lease_lost(network: &str) {
    counter!("queue_leases_lost_total", 1, "network" => network.to_string());
}

pub fn increment_enqueued(network: &str, count: u64) {
    counter!("queue_enqueued_total", count, "network" => network.to_string());
}

pub fn increment_reaped(network: &str, count: u64) {
    counter!("queue_leases_reaped_total", count, "network" => network.to_string());
}

pub fn record_completion(item_type: &str, processing_secs: f64, lifetime_secs: f64) {
    histogram!("queue_processing_seconds", processing_secs, "type" => item_type.to_string());
    histogram!("queue_lifetime_seconds", lifetime_secs, "type" => item_type.to_string());
}

pub fn set_stuck_items(network: &str, count: f64) {
    gauge!("queue_stuck_items", count, "network" => network.to_string());
}

pub fn record_rpc_request(endpoint: &str) {
    increment_counter!("rpc_requests_total", "endpoint" => endpoint.to_string());
}

pub fn increment_rpc_429(endpoint: &str) {
    counter!("rpc_429_total", 1, "endpoint" => endpoint.to_string());
}

pub fn increment_rpc_cooldown(endpoint: &str, kind: &'static str) {
    counter!("rpc_cooldowns_total", 1, "endpoint" => endpoint.to_string(), "kind" => kind);
}
