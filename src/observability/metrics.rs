//! Metrics collection and exposition.
//!
//! # Metrics
//! - `registry_reader_ticks_total` (counter): poll ticks by outcome
//! - `registry_reader_tick_duration_seconds` (histogram): tick latency
//! - `registry_reader_sync_failures_total` (counter): failed domain syncs
//! - `registry_reader_consecutive_failures` (gauge): per-domain failure streak
//! - `registry_reader_config_changes_total` (counter): observed slot changes
//! - `registry_store_transitions_total` (counter): store mutations by outcome
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Labels are domain names and fixed strings only

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one reader tick.
pub fn record_tick(outcome: &'static str, duration: Duration) {
    counter!("registry_reader_ticks_total", "outcome" => outcome).increment(1);
    histogram!("registry_reader_tick_duration_seconds").record(duration.as_secs_f64());
}

/// Record a failed domain sync and the current failure streak.
pub fn record_sync_failure(domain: &str, consecutive: u32) {
    counter!("registry_reader_sync_failures_total", "domain" => domain.to_string()).increment(1);
    gauge!("registry_reader_consecutive_failures", "domain" => domain.to_string())
        .set(consecutive as f64);
}

/// Reset the failure streak after a successful sync.
pub fn record_sync_success(domain: &str) {
    gauge!("registry_reader_consecutive_failures", "domain" => domain.to_string()).set(0.0);
}

/// Record a slot change observed by the reader.
pub fn record_config_change(domain: &str, slot: &'static str) {
    counter!(
        "registry_reader_config_changes_total",
        "domain" => domain.to_string(),
        "slot" => slot
    )
    .increment(1);
}

/// Record a store mutation attempt.
pub fn record_transition(domain: &str, operation: &'static str, outcome: &'static str) {
    counter!(
        "registry_store_transitions_total",
        "domain" => domain.to_string(),
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}
