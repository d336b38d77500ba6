// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Session Management
//!
//! - **manager**: session lifecycle, capacity limits and the idle reaper
//! - **token**: HS256 session tokens carried as `Authorization: Bearer`

pub mod manager;
pub mod token;

pub use manager::{
    Session, SessionConfig, SessionManager, Transport, ANONYMOUS_USER, WEBSOCKET_USER,
};
pub use token::{bearer_token, SessionClaims, TokenError, TokenSigner};
