// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! MCP Gateway
//!
//! Single entry point in front of independently deployed MCP backends.
//! Clients speak JSON-RPC over HTTP (`POST /mcp`) or WebSocket
//! (`GET /mcp/ws`); the gateway tracks their sessions, resolves each method
//! to the backend declaring it and forwards the call to a healthy instance.

pub mod backend;
pub mod config;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod mcp;
pub mod metrics;
pub mod session;

pub use config::{BackendConfig, BackendsFile, Config, ConfigError};
pub use gateway::{Gateway, GatewayError};
pub use handlers::{router, AppState};
pub use metrics::Metrics;
