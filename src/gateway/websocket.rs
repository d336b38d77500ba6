// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! WebSocket connection lifecycle.
//!
//! `Connecting → Connected (session created, welcome sent) → Active
//! (message loop) → Closed | Errored (session removed)`.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::Gateway;
use crate::mcp::WsConnection;
use crate::session::{Transport, WEBSOCKET_USER};

/// First frame sent on every connection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WelcomeFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    session_id: &'a str,
    session_token: &'a str,
    capabilities: &'a [String],
}

impl Gateway {
    /// Drive one WebSocket connection until the client goes away.
    ///
    /// Frames are handled one at a time, so replies keep request order.
    pub async fn handle_websocket_connection(&self, socket: WebSocket) {
        let session = self
            .sessions
            .create_session(WEBSOCKET_USER, Transport::Websocket);
        let session_id = session.id.clone();

        let (connection, outgoing_rx) = WsConnection::new();
        self.sessions
            .attach_websocket(&session_id, connection.clone());
        self.refresh_session_gauge();

        let (sink, stream) = socket.split();
        let forwarder = tokio::spawn(forward_outgoing(sink, outgoing_rx));

        match self.sessions.generate_token(&session_id) {
            Ok(token) => {
                let welcome = WelcomeFrame {
                    kind: "connection",
                    session_id: &session_id,
                    session_token: &token,
                    capabilities: self.capabilities(),
                };
                match serde_json::to_string(&welcome) {
                    Ok(text) => {
                        if connection.send_text(text).is_ok() {
                            info!(session_id = %session_id, connection = %connection.id(), "websocket connected");
                            self.process_incoming(stream, &connection, &session_id).await;
                        }
                    }
                    Err(e) => error!(error = %e, "failed to serialize welcome frame"),
                }
            }
            Err(e) => error!(session_id = %session_id, error = %e, "failed to issue session token"),
        }

        self.sessions.remove_session(&session_id);
        self.refresh_session_gauge();
        // Last sender gone: the forwarder flushes what is queued and exits.
        drop(connection);
        if let Err(e) = forwarder.await {
            warn!(session_id = %session_id, error = %e, "websocket forwarder failed");
        }
        info!(session_id = %session_id, "websocket disconnected");
    }

    async fn process_incoming(
        &self,
        mut stream: SplitStream<WebSocket>,
        connection: &WsConnection,
        session_id: &str,
    ) {
        while let Some(result) = stream.next().await {
            let raw = match result {
                Ok(Message::Text(text)) => text.as_str().to_owned(),
                Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                Ok(Message::Close(_)) => {
                    debug!(session_id = %session_id, "websocket closed by client");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "websocket error");
                    break;
                }
            };

            let Some(request) = self.adapter.handle_websocket_message(connection, &raw) else {
                self.metrics.record_request("websocket", "error");
                continue;
            };

            // Also refreshes last activity.
            let Some(session) = self.sessions.get_session(session_id) else {
                debug!(session_id = %session_id, "session gone, closing websocket");
                break;
            };

            let response = self.route_and_execute_request(request, &session).await;
            let outcome = if response.is_error() { "error" } else { "success" };
            self.metrics.record_request("websocket", outcome);
            self.adapter.send_websocket_response(connection, &response);
        }
    }
}

/// Write queued frames to the socket until the channel or the socket closes.
async fn forward_outgoing(
    mut sink: SplitSink<WebSocket, Message>,
    mut outgoing_rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = outgoing_rx.recv().await {
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            debug!(error = %e, "websocket send failed");
            return;
        }
    }
    let _ = sink.close().await;
}
