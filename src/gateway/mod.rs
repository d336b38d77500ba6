// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Gateway Orchestrator
//!
//! Ties sessions, the backend pool and the protocol adapter together.
//! HTTP calls are one `resolve session → route → respond` transaction;
//! WebSocket connections are handled in [`websocket`].

mod websocket;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendPool, HealthStatus, PoolError};
use crate::config::{BackendConfig, Config};
use crate::mcp::{
    AdapterError, CapabilityMap, ErrorCode, HttpEnvelope, McpRequest, McpResponse,
    ProtocolAdapter, RpcError,
};
use crate::metrics::Metrics;
use crate::session::{
    Session, SessionConfig, SessionManager, TokenError, Transport, ANONYMOUS_USER,
};

/// Error returned when the session cap is reached.
pub const CAPACITY_ERROR: &str = "Maximum concurrent sessions reached";

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("backend pool error: {0}")]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("invalid capability pattern: {0}")]
    Capability(#[from] regex::Error),

    #[error("failed to issue session token: {0}")]
    Token(#[from] TokenError),
}

impl GatewayError {
    /// JSON-RPC code surfaced to HTTP clients, when one applies.
    fn code(&self) -> Option<i32> {
        match self {
            GatewayError::Adapter(e) => Some(e.code()),
            _ => None,
        }
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Process-wide orchestrator, shared behind an `Arc`.
pub struct Gateway {
    sessions: Arc<SessionManager>,
    pool: Arc<BackendPool>,
    adapter: ProtocolAdapter,
    capabilities: CapabilityMap,
    capability_names: Vec<String>,
    metrics: Metrics,
    sweep_interval: std::time::Duration,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    /// Build every component. Nothing is started until [`Gateway::initialize`].
    pub fn new(
        config: &Config,
        backends: Vec<BackendConfig>,
        metrics: Metrics,
    ) -> Result<Self, GatewayError> {
        let capabilities = CapabilityMap::from_backends(&backends)?;
        let capability_names = capabilities.all_capabilities();

        let sessions = Arc::new(SessionManager::new(SessionConfig {
            jwt_secret: config.jwt_secret.clone(),
            session_timeout: config.session_timeout(),
            max_concurrent_sessions: config.max_concurrent_sessions,
            token_ttl: config.token_ttl(),
        }));
        let pool = Arc::new(BackendPool::new(
            backends,
            config.health_check_timeout(),
            metrics.clone(),
        )?);
        let adapter = ProtocolAdapter::new(config.request_timeout())?;

        Ok(Self {
            sessions,
            pool,
            adapter,
            capabilities,
            capability_names,
            metrics,
            sweep_interval: config.session_sweep_interval(),
            reaper: Mutex::new(None),
        })
    }

    /// Start the backend pool, then the session reaper.
    ///
    /// A pool failure is fatal and returned to the caller.
    pub async fn initialize(&self) -> Result<(), GatewayError> {
        self.pool.initialize().await?;

        let mut reaper = self.reaper.lock().unwrap_or_else(|e| e.into_inner());
        if reaper.is_none() {
            *reaper = Some(self.sessions.start_reaper(self.sweep_interval));
        }

        info!(
            backends = self.capabilities.len(),
            capabilities = self.capability_names.len(),
            "gateway initialized"
        );
        Ok(())
    }

    /// Stop sessions, then the pool. Failures are logged only.
    pub async fn shutdown(&self) {
        info!("gateway shutting down");
        self.sessions.shutdown();

        let reaper = self.reaper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(reaper) = reaper {
            if let Err(e) = reaper.await {
                error!(error = %e, "session reaper task failed");
            }
        }

        self.pool.shutdown().await;
        self.refresh_session_gauge();
    }

    // ===== HTTP =====

    /// Handle one `POST /mcp` call. Never fails: every error becomes an
    /// envelope with `success: false`.
    pub async fn handle_http_request(&self, body: &[u8], headers: &HeaderMap) -> HttpEnvelope {
        let auth = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

        let (session, is_new) = match self.sessions.get_session_from_auth_header(auth) {
            Some(session) => (session, false),
            None => match self
                .sessions
                .try_create_session(ANONYMOUS_USER, Transport::Http)
            {
                Some(session) => {
                    self.refresh_session_gauge();
                    (session, true)
                }
                None => {
                    warn!("session capacity reached, rejecting request");
                    self.metrics.record_request("http", "rejected");
                    return HttpEnvelope::failure(CAPACITY_ERROR, None);
                }
            },
        };

        let mut envelope = match self.process_http(body, &session).await {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(session_id = %session.id, error = %e, "http request failed");
                HttpEnvelope::failure(e.to_string(), e.code())
            }
        };

        if is_new {
            match self.sessions.generate_token(&session.id) {
                Ok(token) => envelope.session_token = Some(token),
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "failed to issue session token");
                    envelope = HttpEnvelope::failure(GatewayError::from(e).to_string(), None);
                }
            }
        }

        let outcome = if envelope.success { "success" } else { "error" };
        self.metrics.record_request("http", outcome);
        envelope
    }

    async fn process_http(
        &self,
        body: &[u8],
        session: &Session,
    ) -> Result<HttpEnvelope, GatewayError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| AdapterError::Parse(e.to_string()))?;
        let request = self.adapter.handle_http_to_mcp(&value)?;
        let response = self.route_and_execute_request(request, session).await;
        Ok(self.adapter.handle_mcp_to_http(response))
    }

    // ===== Routing =====

    /// Resolve, check out an instance, forward and translate failures.
    ///
    /// Always returns a well-formed response. The instance is released on
    /// every exit path, including cancellation.
    pub async fn route_and_execute_request(
        &self,
        request: McpRequest,
        session: &Session,
    ) -> McpResponse {
        let id = request.id.clone();

        let Some(backend_id) = self
            .adapter
            .resolve_capability(&request.method, &self.capabilities)
        else {
            debug!(method = %request.method, "no backend declares method");
            return McpResponse::failure(id, RpcError::method_not_found(&request.method));
        };

        let Some(lease) = self.pool.get_server_instance(backend_id, &request.method) else {
            warn!(backend = %backend_id, method = %request.method, "no healthy instances");
            return McpResponse::failure(
                id,
                RpcError::internal(format!(
                    "No healthy instances available for backend {}",
                    backend_id
                )),
            );
        };

        let _binding = BackendBinding::new(&self.sessions, &session.id, backend_id, &lease.id);
        let started = Instant::now();
        let result = self.adapter.send_mcp_request(&lease, &request, None).await;
        let elapsed = started.elapsed();
        self.pool.release_server_instance(lease);

        match result {
            Ok(mut response) => {
                self.metrics
                    .record_backend_request(backend_id, elapsed, "success");
                if id.is_some() {
                    response.id = id;
                }
                response
            }
            Err(e) => {
                let outcome = if e.is_timeout() { "timeout" } else { "error" };
                self.metrics
                    .record_backend_request(backend_id, elapsed, outcome);
                McpResponse::failure(
                    id,
                    RpcError::new(
                        ErrorCode::InternalError,
                        ErrorCode::InternalError.message(),
                    )
                    .with_data(e.to_string()),
                )
            }
        }
    }

    // ===== Introspection =====

    pub fn get_health_status(&self) -> BTreeMap<String, HealthStatus> {
        self.pool.get_health_status()
    }

    /// Sorted, deduplicated union of every declared capability.
    pub fn capabilities(&self) -> &[String] {
        &self.capability_names
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Publish the live session count to the metrics registry.
    pub fn refresh_session_gauge(&self) {
        self.metrics
            .set_active_sessions(self.sessions.live_session_count());
    }
}

/// Records `backend → instance` on a session while a call is in flight.
struct BackendBinding<'a> {
    sessions: &'a SessionManager,
    session_id: &'a str,
    backend_id: &'a str,
}

impl<'a> BackendBinding<'a> {
    fn new(
        sessions: &'a SessionManager,
        session_id: &'a str,
        backend_id: &'a str,
        instance_id: &str,
    ) -> Self {
        sessions.bind_backend(session_id, backend_id, instance_id);
        Self {
            sessions,
            session_id,
            backend_id,
        }
    }
}

impl Drop for BackendBinding<'_> {
    fn drop(&mut self) {
        self.sessions.unbind_backend(self.session_id, self.backend_id);
    }
}
