// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Protocol Adapter
//!
//! Translation between transport payloads and the canonical JSON-RPC
//! envelope, capability resolution, and the outbound call to a backend.
//!
//! Malformed client input is answered here: HTTP callers get a typed
//! [`AdapterError`], WebSocket callers get an error frame sent directly on
//! their connection.

use reqwest::Client;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::capability::CapabilityMap;
use super::connection::WsConnection;
use super::protocol::{
    ErrorCode, HttpEnvelope, LegacyRequest, McpRequest, McpResponse, Outcome, RequestId,
    RpcError,
};
use crate::backend::BackendInstance;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid Request: {0}")]
    InvalidRequest(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend request timed out after {0}ms")]
    Timeout(u128),

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),
}

impl AdapterError {
    /// JSON-RPC code reported to the client for this failure.
    pub fn code(&self) -> i32 {
        match self {
            AdapterError::Parse(_) => ErrorCode::ParseError.code(),
            AdapterError::InvalidRequest(_) => ErrorCode::InvalidRequest.code(),
            AdapterError::InvalidParams(_) => ErrorCode::InvalidParams.code(),
            AdapterError::Http(_)
            | AdapterError::Status { .. }
            | AdapterError::Timeout(_)
            | AdapterError::InvalidResponse(_) => ErrorCode::InternalError.code(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            AdapterError::Timeout(_) => true,
            AdapterError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Stateless translator shared by both transports.
#[derive(Clone)]
pub struct ProtocolAdapter {
    client: Client,
    request_timeout: Duration,
}

impl ProtocolAdapter {
    /// Create an adapter.
    ///
    /// # Arguments
    /// * `request_timeout` - Default bound on one backend call (default: 30s)
    pub fn new(request_timeout: Duration) -> Result<Self, AdapterError> {
        // Timeouts are enforced per call so callers can override them.
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    // ===== HTTP =====

    /// Normalize an HTTP body into a canonical request.
    ///
    /// Canonical bodies pass through untouched. Bodies carrying `action` or
    /// `resource` are treated as the legacy shape and become
    /// `"<resource>/<action>"` with a generated id.
    pub fn handle_http_to_mcp(&self, body: &Value) -> Result<McpRequest, AdapterError> {
        let canonical_error = match McpRequest::from_value(body) {
            Ok(request) => return Ok(request),
            Err(e) => e,
        };

        let obj = body
            .as_object()
            .ok_or_else(|| AdapterError::InvalidRequest(canonical_error.clone()))?;
        if !obj.contains_key("action") && !obj.contains_key("resource") {
            return Err(AdapterError::InvalidRequest(canonical_error));
        }

        let legacy = legacy_from_object(obj)?;
        debug!(
            action = %legacy.action,
            resource = %legacy.resource,
            "converted legacy HTTP request"
        );
        Ok(legacy.into_canonical())
    }

    /// Flatten a canonical response into the HTTP envelope.
    pub fn handle_mcp_to_http(&self, response: McpResponse) -> HttpEnvelope {
        match response.outcome {
            Outcome::Result(result) => HttpEnvelope {
                success: true,
                data: Some(result),
                id: response.id,
                error: None,
                code: None,
                session_token: None,
            },
            Outcome::Error(error) => HttpEnvelope {
                success: false,
                data: error.data,
                id: None,
                error: Some(error.message),
                code: Some(error.code),
                session_token: None,
            },
        }
    }

    // ===== WebSocket =====

    /// Parse one inbound text frame.
    ///
    /// Returns `None` after replying with `-32700` (not JSON) or `-32600`
    /// (JSON of the wrong shape) on the connection itself.
    pub fn handle_websocket_message(
        &self,
        connection: &WsConnection,
        raw: &str,
    ) -> Option<McpRequest> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                debug!(connection = %connection.id(), error = %e, "unparseable websocket frame");
                self.send_websocket_response(
                    connection,
                    &McpResponse::failure(None, RpcError::parse_error(e.to_string())),
                );
                return None;
            }
        };

        match McpRequest::from_value(&value) {
            Ok(request) => Some(request),
            Err(reason) => {
                debug!(connection = %connection.id(), reason = %reason, "invalid websocket request");
                let id = value
                    .get("id")
                    .and_then(|raw| serde_json::from_value::<RequestId>(raw.clone()).ok());
                self.send_websocket_response(
                    connection,
                    &McpResponse::failure(id, RpcError::invalid_request(reason)),
                );
                None
            }
        }
    }

    /// Serialize and queue a frame. Failures are logged and dropped.
    pub fn send_websocket_response(&self, connection: &WsConnection, response: &McpResponse) {
        let text = match serde_json::to_string(response) {
            Ok(text) => text,
            Err(e) => {
                warn!(connection = %connection.id(), error = %e, "failed to serialize response");
                return;
            }
        };
        if let Err(e) = connection.send_text(text) {
            debug!(error = %e, "dropping response for closed connection");
        }
    }

    // ===== Backend =====

    /// POST `request` to `<instance.url>/mcp`.
    ///
    /// A non-2xx status, an undecodable body or exceeding `timeout`
    /// (default: the adapter's request timeout) is an error.
    pub async fn send_mcp_request(
        &self,
        instance: &BackendInstance,
        request: &McpRequest,
        timeout: Option<Duration>,
    ) -> Result<McpResponse, AdapterError> {
        let timeout = timeout.unwrap_or(self.request_timeout);
        let url = format!("{}/mcp", instance.url);

        debug!(
            url = %url,
            instance = %instance.id,
            method = %request.method,
            "forwarding request to backend"
        );

        let call = async {
            let response = self.client.post(&url).json(request).send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AdapterError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            let bytes = response.bytes().await?;
            serde_json::from_slice::<McpResponse>(&bytes)
                .map_err(|e| AdapterError::InvalidResponse(e.to_string()))
        };

        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(timeout.as_millis())),
        };

        if let Err(e) = &result {
            warn!(
                instance = %instance.id,
                method = %request.method,
                timeout = e.is_timeout(),
                error = %e,
                "backend request failed"
            );
        }
        result
    }

    /// Backend id serving `method`, exact matches first.
    pub fn resolve_capability<'a>(
        &self,
        method: &str,
        capabilities: &'a CapabilityMap,
    ) -> Option<&'a str> {
        capabilities.resolve(method)
    }
}

fn legacy_from_object(obj: &Map<String, Value>) -> Result<LegacyRequest, AdapterError> {
    let field = |name: &str| -> Result<String, AdapterError> {
        match obj.get(name).and_then(Value::as_str) {
            Some(s) if !s.is_empty() => Ok(s.to_string()),
            _ => Err(AdapterError::InvalidParams(format!(
                "{} must be a non-empty string",
                name
            ))),
        }
    };

    Ok(LegacyRequest {
        action: field("action")?,
        resource: field("resource")?,
        params: obj.get("params").cloned(),
    })
}

// =============================================================================
// Tests
// =============================================================================
