// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Prometheus metrics for the gateway.
///
/// Cloneable handle over a private registry tracking request outcomes,
/// backend latency, backend health and live sessions.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    /// Inbound requests: gateway_requests_total{transport, outcome}
    requests_total: CounterVec,

    /// Backend call latency: gateway_backend_request_duration_seconds{backend, outcome}
    backend_duration: HistogramVec,

    /// Instance health: gateway_backend_health_status{backend, instance} (1=up, 0=down)
    backend_health: GaugeVec,

    /// Live sessions: gateway_active_sessions
    active_sessions: IntGauge,
}

impl Metrics {
    /// Create a new metrics registry.
    ///
    /// Metric construction only fails on invalid names or duplicate
    /// registration, both fixed at compile time here.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("gateway_requests_total", "Total number of inbound requests"),
            &["transport", "outcome"],
        )
        .expect("failed to create requests_total counter");

        // Buckets from 1ms to 30s, the default backend timeout.
        let backend_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_backend_request_duration_seconds",
                "Backend call duration in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["backend", "outcome"],
        )
        .expect("failed to create backend_duration histogram");

        let backend_health = GaugeVec::new(
            Opts::new(
                "gateway_backend_health_status",
                "Backend instance health status (1=up, 0=down)",
            ),
            &["backend", "instance"],
        )
        .expect("failed to create backend_health gauge");

        let active_sessions = IntGauge::new("gateway_active_sessions", "Number of live sessions")
            .expect("failed to create active_sessions gauge");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("failed to register requests_total");
        registry
            .register(Box::new(backend_duration.clone()))
            .expect("failed to register backend_duration");
        registry
            .register(Box::new(backend_health.clone()))
            .expect("failed to register backend_health");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("failed to register active_sessions");

        Self {
            registry: Arc::new(registry),
            requests_total,
            backend_duration,
            backend_health,
            active_sessions,
        }
    }

    /// Record one inbound request and how it ended.
    pub fn record_request(&self, transport: &str, outcome: &str) {
        self.requests_total
            .with_label_values(&[transport, outcome])
            .inc();
    }

    /// Record one backend call.
    pub fn record_backend_request(&self, backend: &str, duration: Duration, outcome: &str) {
        self.backend_duration
            .with_label_values(&[backend, outcome])
            .observe(duration.as_secs_f64());
    }

    /// Set instance health status.
    pub fn set_backend_health(&self, backend: &str, instance: &str, healthy: bool) {
        self.backend_health
            .with_label_values(&[backend, instance])
            .set(if healthy { 1.0 } else { 0.0 });
    }

    pub fn set_active_sessions(&self, count: usize) {
        self.active_sessions.set(count as i64);
    }

    /// Encode metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
