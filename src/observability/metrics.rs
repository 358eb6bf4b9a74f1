//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method and status
//! - `http_request_duration_seconds` (histogram): latency distribution
//! - `http_connections_active` (gauge): live HTTP connections
//! - `ws_sessions_active` (gauge): open WebSocket sessions
//! - `search_upstream_attempts_total` (counter): upstream search calls by outcome

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn set_active_connections(count: u64) {
    gauge!("http_connections_active").set(count as f64);
}

pub fn set_ws_sessions(count: usize) {
    gauge!("ws_sessions_active").set(count as f64);
}

pub fn record_upstream_attempt(outcome: &'static str) {
    counter!("search_upstream_attempts_total", "outcome" => outcome).increment(1);
}
