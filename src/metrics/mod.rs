//! Metrics module for Prometheus
//!
//! This module provides metrics collection for the relay service:
//! - Request count by method, path, and status
//! - Request latency histogram
//! - Outbound upstream call count by upstream and outcome

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Relay metrics collector
#[derive(Clone)]
pub struct RelayMetrics {
    registry: Registry,
    request_counter: CounterVec,
    request_latency: HistogramVec,
    upstream_counter: CounterVec,
}

impl RelayMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_counter = CounterVec::new(
            Opts::new("relay_requests_total", "Total number of requests"),
            &["method", "path", "status"],
        )
        .expect("Failed to create request counter");

        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "relay_request_latency_seconds",
                "Request latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "path"],
        )
        .expect("Failed to create latency histogram");

        let upstream_counter = CounterVec::new(
            Opts::new(
                "relay_upstream_requests_total",
                "Total number of outbound upstream calls",
            ),
            &["upstream", "outcome"],
        )
        .expect("Failed to create upstream counter");

        registry
            .register(Box::new(request_counter.clone()))
            .expect("Failed to register request counter");
        registry
            .register(Box::new(request_latency.clone()))
            .expect("Failed to register latency histogram");
        registry
            .register(Box::new(upstream_counter.clone()))
            .expect("Failed to register upstream counter");

        Self {
            registry,
            request_counter,
            request_latency,
            upstream_counter,
        }
    }

    /// Record a request with its status and latency.
    ///
    /// `path` is the route template (e.g. `/token/{user_name}`), not the
    /// raw request path, so user names never become label values.
    pub fn record_request(&self, method: &str, path: &str, status: u16, latency: Duration) {
        let status_str = status.to_string();

        self.request_counter
            .with_label_values(&[method, path, &status_str])
            .inc();

        self.request_latency
            .with_label_values(&[method, path])
            .observe(latency.as_secs_f64());
    }

    /// Record the outcome of an outbound upstream call
    pub fn record_upstream(&self, upstream: &str, outcome: &str) {
        self.upstream_counter
            .with_label_values(&[upstream, outcome])
            .inc();
    }

    /// Get the Prometheus metrics output
    pub fn prometheus_output(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
