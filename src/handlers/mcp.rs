// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use axum::{
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    Json,
};
use bytes::Bytes;

use super::AppState;
use crate::mcp::HttpEnvelope;

/// MCP over HTTP.
///
/// Accepts a canonical JSON-RPC body or the `{action, resource, params}`
/// shape. Always 200; failures are reported in the envelope.
///
/// # Endpoint
/// `POST /mcp`
pub async fn mcp_http(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<HttpEnvelope> {
    Json(state.gateway.handle_http_request(&body, &headers).await)
}

/// MCP over WebSocket.
///
/// # Endpoint
/// `GET /mcp/ws`
pub async fn mcp_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        state.gateway.handle_websocket_connection(socket).await;
    })
}
