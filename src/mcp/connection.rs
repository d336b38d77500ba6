// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Outbound half of a WebSocket connection.
//!
//! Frames are queued on an unbounded channel and written to the socket by a
//! dedicated forwarder task, so sends never block the message loop and keep
//! per-connection ordering.

use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
#[error("websocket connection {0} is closed")]
pub struct ConnectionClosed(pub String);

/// Cloneable handle used to push text frames to one client.
#[derive(Debug, Clone)]
pub struct WsConnection {
    id: String,
    tx: mpsc::UnboundedSender<String>,
}

impl WsConnection {
    /// Create a handle and the receiver its forwarder drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            id: uuid::Uuid::new_v4().to_string(),
            tx,
        };
        (conn, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn send_text(&self, text: String) -> Result<(), ConnectionClosed> {
        self.tx
            .send(text)
            .map_err(|_| ConnectionClosed(self.id.clone()))
    }

    /// True once the forwarder has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
