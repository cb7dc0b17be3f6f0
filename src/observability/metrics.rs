//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, status
//! - `http_request_duration_seconds` (histogram): pipeline latency
//! - `http_errors_total` (counter): error-handler responses by status
//! - `rate_limited_total` (counter): requests rejected by the limiter
//! - `cache_lookups_total` (counter): response cache hits and misses
//! - `sanitized_keys_total` (counter): operator-injection keys removed

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, started: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_error(status: u16) {
    metrics::counter!("http_errors_total", "status" => status.to_string()).increment(1);
}

pub fn record_rate_limited() {
    metrics::counter!("rate_limited_total").increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    metrics::counter!("cache_lookups_total", "result" => result).increment(1);
}

pub fn record_sanitized(count: usize) {
    metrics::counter!("sanitized_keys_total").increment(count as u64);
}
