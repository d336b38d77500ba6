// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! MCP (Model Context Protocol) Module
//!
//! This module provides:
//! - Protocol types for JSON-RPC requests/responses and the HTTP envelope
//! - Capability map with glob matching
//! - The protocol adapter used by both transports
//! - The outbound handle of a WebSocket connection

pub mod adapter;
pub mod capability;
pub mod connection;
pub mod protocol;

pub use adapter::{AdapterError, ProtocolAdapter};
pub use capability::{glob_to_regex, CapabilityMap};
pub use connection::{ConnectionClosed, WsConnection};
pub use protocol::*;
