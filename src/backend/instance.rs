// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use chrono::{DateTime, TimeZone, Utc};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// One reachable endpoint of a backend.
///
/// All mutable state is atomic so health probes and the request path never
/// contend on a lock.
#[derive(Debug)]
pub struct BackendInstance {
    pub id: String,
    pub backend_id: String,
    pub url: String,
    pub capabilities: Vec<String>,
    healthy: AtomicBool,
    /// Milliseconds since epoch of the last probe, 0 when never probed
    last_health_check_ms: AtomicI64,
    active_connections: AtomicUsize,
}

impl BackendInstance {
    pub fn new(
        id: impl Into<String>,
        backend_id: impl Into<String>,
        url: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            backend_id: backend_id.into(),
            url: url.into().trim_end_matches('/').to_string(),
            capabilities,
            // Assume healthy until the first probe says otherwise
            healthy: AtomicBool::new(true),
            last_health_check_ms: AtomicI64::new(0),
            active_connections: AtomicUsize::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Store a probe result, returning the previous health state.
    pub fn record_health_check(&self, healthy: bool) -> bool {
        self.last_health_check_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.healthy.swap(healthy, Ordering::SeqCst)
    }

    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        match self.last_health_check_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the connection count, saturating at zero.
    pub fn release(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// A checked-out instance. Dropping the lease releases it exactly once.
#[derive(Debug)]
pub struct InstanceLease {
    instance: Arc<BackendInstance>,
}

impl InstanceLease {
    pub(crate) fn acquire(instance: Arc<BackendInstance>) -> Self {
        instance.acquire();
        Self { instance }
    }
}

impl Deref for InstanceLease {
    type Target = BackendInstance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        self.instance.release();
    }
}
