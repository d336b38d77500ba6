// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::backend::BackendInstance;
use crate::metrics::Metrics;

/// Health checker for backend instances.
///
/// Probes `GET <url>/health` and flips each instance's `healthy` flag.
/// Instances are never removed, only marked unavailable.
pub struct HealthChecker {
    check_timeout: Duration,
    client: reqwest::Client,
    metrics: Metrics,
}

impl HealthChecker {
    /// Create a new health checker.
    ///
    /// # Arguments
    /// * `check_timeout` - Timeout for each probe request (default: 2s)
    /// * `metrics` - Registry receiving per-instance health gauges
    pub fn new(check_timeout: Duration, metrics: Metrics) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(check_timeout).build()?;

        Ok(Self {
            check_timeout,
            client,
            metrics,
        })
    }

    /// Run the probe loop for one backend's instances.
    ///
    /// This method will run until a shutdown signal is received.
    pub async fn run(
        &self,
        backend_id: &str,
        instances: Vec<Arc<BackendInstance>>,
        check_interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = tokio::time::interval(check_interval);
        // Don't burst after a stall
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The pool already probed once during initialization.
        interval.tick().await;

        tracing::info!(
            backend = %backend_id,
            instances = instances.len(),
            interval_secs = check_interval.as_secs(),
            timeout_secs = self.check_timeout.as_secs(),
            "starting health checker"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for instance in &instances {
                        self.check(instance).await;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!(backend = %backend_id, "health checker received shutdown signal");
                    break;
                }
            }
        }

        tracing::info!(backend = %backend_id, "health checker stopped");
    }

    /// Probe one instance, record the result and log transitions.
    pub async fn check(&self, instance: &BackendInstance) -> bool {
        let is_healthy = self.probe(instance).await;
        let was_healthy = instance.record_health_check(is_healthy);
        self.metrics
            .set_backend_health(&instance.backend_id, &instance.id, is_healthy);

        if was_healthy && !is_healthy {
            tracing::warn!(
                event = "unhealthy",
                backend = %instance.backend_id,
                instance = %instance.id,
                "backend instance became unhealthy, removed from selection"
            );
        } else if !was_healthy && is_healthy {
            tracing::info!(
                event = "recovery",
                backend = %instance.backend_id,
                instance = %instance.id,
                "backend instance recovered"
            );
        }

        is_healthy
    }

    async fn probe(&self, instance: &BackendInstance) -> bool {
        let health_url = format!("{}/health", instance.url);

        match self.client.get(&health_url).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    tracing::trace!(status = %status, url = %health_url, "health check passed");
                    true
                } else {
                    tracing::warn!(
                        status = %status,
                        url = %health_url,
                        "health check returned non-success status"
                    );
                    false
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    url = %health_url,
                    "health check failed"
                );
                false
            }
        }
    }
}
