// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use axum::{extract::State, http::header, response::IntoResponse};

use super::AppState;

/// Prometheus metrics endpoint.
///
/// Returns metrics in Prometheus text format.
///
/// # Endpoint
/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    // Reaped sessions are only visible here.
    state.gateway.refresh_session_gauge();
    let body = state.gateway.metrics().encode();
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}
