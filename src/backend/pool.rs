// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Backend Pool
//!
//! Owns the configured capability providers, their live instances and the
//! health probes that keep each instance's `healthy` flag current.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::instance::{BackendInstance, InstanceLease};
use crate::config::BackendConfig;
use crate::health::HealthChecker;
use crate::metrics::Metrics;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Backend {backend} has an invalid url {url}: {reason}")]
    InvalidUrl {
        backend: String,
        url: String,
        reason: String,
    },
}

// =============================================================================
// Health Snapshot
// =============================================================================

/// Point-in-time health of one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub instance_count: usize,
    pub healthy_count: usize,
    pub active_connections: usize,
    pub capabilities: Vec<String>,
    pub description: String,
    pub last_check_timestamp: Option<DateTime<Utc>>,
}

// =============================================================================
// Pool
// =============================================================================

struct Backend {
    config: BackendConfig,
    instances: Vec<Arc<BackendInstance>>,
}

/// Set of backends and their instances.
///
/// The instance set is fixed at construction; only per-instance atomic
/// state changes afterwards, so lookups take no lock.
pub struct BackendPool {
    backends: Vec<Backend>,
    checker: Arc<HealthChecker>,
    shutdown_tx: broadcast::Sender<()>,
    probes: Mutex<Vec<JoinHandle<()>>>,
    initialized: AtomicBool,
}

impl BackendPool {
    pub fn new(
        configs: Vec<BackendConfig>,
        health_check_timeout: Duration,
        metrics: Metrics,
    ) -> Result<Self, PoolError> {
        let checker = Arc::new(HealthChecker::new(health_check_timeout, metrics)?);
        let backends = configs
            .into_iter()
            .map(|config| {
                let instances = config
                    .urls()
                    .enumerate()
                    .map(|(n, url)| {
                        Arc::new(BackendInstance::new(
                            format!("{}-{}", config.id, n),
                            config.id.clone(),
                            url,
                            config.capabilities.clone(),
                        ))
                    })
                    .collect();
                Backend { config, instances }
            })
            .collect();
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            backends,
            checker,
            shutdown_tx,
            probes: Mutex::new(Vec::new()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Verify every backend and start its recurring health probe.
    ///
    /// Invalid URLs are fatal. Unreachable backends are only marked
    /// unhealthy; their probe keeps running and will bring them back.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("backend pool already initialized");
            return Ok(());
        }

        for backend in &self.backends {
            for instance in &backend.instances {
                if let Err(e) = reqwest::Url::parse(&instance.url) {
                    self.initialized.store(false, Ordering::SeqCst);
                    return Err(PoolError::InvalidUrl {
                        backend: backend.config.id.clone(),
                        url: instance.url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let checks = self
            .backends
            .iter()
            .flat_map(|b| b.instances.iter())
            .map(|instance| self.checker.check(instance));
        futures::future::join_all(checks).await;

        let mut probes = self.probes.lock().unwrap_or_else(|e| e.into_inner());
        for backend in &self.backends {
            let checker = Arc::clone(&self.checker);
            let backend_id = backend.config.id.clone();
            let instances = backend.instances.clone();
            let interval = backend.config.health_check_interval();
            let shutdown = self.shutdown_tx.subscribe();

            let healthy = instances.iter().filter(|i| i.is_healthy()).count();
            info!(
                backend = %backend_id,
                url = %backend.config.url,
                instances = instances.len(),
                healthy,
                "backend registered"
            );

            probes.push(tokio::spawn(async move {
                checker.run(&backend_id, instances, interval, shutdown).await;
            }));
        }

        Ok(())
    }

    /// Stop all probes. Best effort: failures are logged, never returned.
    pub async fn shutdown(&self) {
        let probes: Vec<JoinHandle<()>> = {
            let mut guard = self.probes.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        if probes.is_empty() {
            return;
        }

        let _ = self.shutdown_tx.send(());
        for probe in probes {
            match tokio::time::timeout(Duration::from_secs(5), probe).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "health probe task failed"),
                Err(_) => warn!("health probe task did not stop in time"),
            }
        }
        info!("backend pool stopped");
    }

    /// Check out the least-loaded healthy instance of `backend_id`.
    pub fn get_server_instance(&self, backend_id: &str, method: &str) -> Option<InstanceLease> {
        let backend = self.backends.iter().find(|b| b.config.id == backend_id)?;
        let instance = backend
            .instances
            .iter()
            .filter(|i| i.is_healthy())
            .min_by_key(|i| i.active_connections())?;

        debug!(
            backend = %backend_id,
            instance = %instance.id,
            method = %method,
            active = instance.active_connections(),
            "instance selected"
        );
        Some(InstanceLease::acquire(Arc::clone(instance)))
    }

    /// Return a checked-out instance to the pool.
    pub fn release_server_instance(&self, lease: InstanceLease) {
        drop(lease);
    }

    pub fn get_health_status(&self) -> BTreeMap<String, HealthStatus> {
        self.backends
            .iter()
            .map(|backend| {
                let status = HealthStatus {
                    instance_count: backend.instances.len(),
                    healthy_count: backend
                        .instances
                        .iter()
                        .filter(|i| i.is_healthy())
                        .count(),
                    active_connections: backend
                        .instances
                        .iter()
                        .map(|i| i.active_connections())
                        .sum(),
                    capabilities: backend.config.capabilities.clone(),
                    description: backend.config.description.clone(),
                    last_check_timestamp: backend
                        .instances
                        .iter()
                        .filter_map(|i| i.last_health_check())
                        .max(),
                };
                (backend.config.id.clone(), status)
            })
            .collect()
    }

    pub fn instances(&self, backend_id: &str) -> Vec<Arc<BackendInstance>> {
        self.backends
            .iter()
            .find(|b| b.config.id == backend_id)
            .map(|b| b.instances.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(id: &str, url: &str, replicas: &[&str]) -> BackendConfig {
        BackendConfig {
            id: id.to_string(),
            url: url.to_string(),
            capabilities: vec![format!("{}/*", id)],
            description: format!("{} backend", id),
            health_check_interval_secs: 30,
            replicas: replicas.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn pool(configs: Vec<BackendConfig>) -> BackendPool {
        BackendPool::new(configs, Duration::from_millis(200), Metrics::new()).unwrap()
    }

    #[test]
    fn test_acquire_release_restores_count() {
        let pool = pool(vec![backend("fs", "http://127.0.0.1:1", &[])]);
        let instance = Arc::clone(&pool.instances("fs")[0]);

        let lease = pool.get_server_instance("fs", "fs/read").unwrap();
        assert_eq!(instance.active_connections(), 1);
        pool.release_server_instance(lease);
        assert_eq!(instance.active_connections(), 0);
    }

    #[test]
    fn test_unknown_backend() {
        let pool = pool(vec![backend("fs", "http://127.0.0.1:1", &[])]);
        assert!(pool.get_server_instance("nope", "x").is_none());
    }

    #[test]
    fn test_no_healthy_instance() {
        let pool = pool(vec![backend("fs", "http://127.0.0.1:1", &[])]);
        pool.instances("fs")[0].record_health_check(false);

        assert!(pool.get_server_instance("fs", "fs/read").is_none());
    }

    #[test]
    fn test_least_loaded_selection() {
        let pool = pool(vec![backend(
            "fs",
            "http://127.0.0.1:1",
            &["http://127.0.0.1:2"],
        )]);

        let first = pool.get_server_instance("fs", "fs/read").unwrap();
        let second = pool.get_server_instance("fs", "fs/read").unwrap();
        assert_ne!(first.id, second.id);

        drop(first);
        let third = pool.get_server_instance("fs", "fs/read").unwrap();
        assert_eq!(third.id, "fs-0");
    }

    #[test]
    fn test_unhealthy_replica_skipped() {
        let pool = pool(vec![backend(
            "fs",
            "http://127.0.0.1:1",
            &["http://127.0.0.1:2"],
        )]);
        pool.instances("fs")[0].record_health_check(false);

        for _ in 0..3 {
            let lease = pool.get_server_instance("fs", "fs/read").unwrap();
            assert_eq!(lease.id, "fs-1");
        }
    }

    #[test]
    fn test_health_status_snapshot() {
        let pool = pool(vec![
            backend("fs", "http://127.0.0.1:1", &["http://127.0.0.1:2"]),
            backend("linear", "http://127.0.0.1:3", &[]),
        ]);
        pool.instances("fs")[1].record_health_check(false);
        let _lease = pool.get_server_instance("linear", "linear/x").unwrap();

        let status = pool.get_health_status();
        assert_eq!(status.len(), 2);
        assert_eq!(status["fs"].instance_count, 2);
        assert_eq!(status["fs"].healthy_count, 1);
        assert!(status["fs"].last_check_timestamp.is_some());
        assert_eq!(status["linear"].active_connections, 1);
        assert_eq!(status["linear"].capabilities, vec!["linear/*"]);
        assert!(status["linear"].last_check_timestamp.is_none());
    }

    #[tokio::test]
    async fn test_invalid_url_is_fatal() {
        let pool = pool(vec![backend("fs", "not a url", &[])]);
        assert!(matches!(
            pool.initialize().await,
            Err(PoolError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_initialize_marks_unreachable_and_shutdown_twice() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pool = pool(vec![backend("fs", &format!("http://{}", addr), &[])]);
        pool.initialize().await.unwrap();
        assert_eq!(pool.get_health_status()["fs"].healthy_count, 0);
        assert!(pool.get_server_instance("fs", "fs/read").is_none());

        pool.shutdown().await;
        pool.shutdown().await;
    }
}
