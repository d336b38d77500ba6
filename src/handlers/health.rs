// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use super::AppState;
use crate::backend::HealthStatus;

/// Probe response body.
#[derive(Serialize)]
struct ProbeResponse {
    status: &'static str,
}

/// Aggregate health response body.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: DateTime<Utc>,
    servers: BTreeMap<String, HealthStatus>,
}

/// True when every backend has at least one healthy instance.
fn all_backends_up(servers: &BTreeMap<String, HealthStatus>) -> bool {
    servers.values().all(|s| s.healthy_count > 0)
}

/// Gateway health with a per-backend snapshot.
///
/// Always 200; `status` is `degraded` when a backend has no healthy instance.
///
/// # Endpoint
/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    let servers = state.gateway.get_health_status();
    let response = HealthResponse {
        status: if all_backends_up(&servers) {
            "healthy"
        } else {
            "degraded"
        },
        timestamp: Utc::now(),
        servers,
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// Kubernetes liveness probe endpoint.
///
/// Returns 200 OK if the process is alive.
///
/// # Endpoint
/// `GET /health/live`
pub async fn health_live() -> Response {
    (StatusCode::OK, Json(ProbeResponse { status: "ok" })).into_response()
}

/// Kubernetes readiness probe endpoint.
///
/// Returns 503 once shutdown has begun. A backend outage only degrades the
/// status; the gateway still answers every request.
///
/// # Endpoint
/// `GET /health/ready`
pub async fn health_ready(State(state): State<AppState>) -> Response {
    if state.shutting_down.load(Ordering::SeqCst) {
        let response = ProbeResponse {
            status: "shutting_down",
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response();
    }

    let status = if all_backends_up(&state.gateway.get_health_status()) {
        "ok"
    } else {
        "degraded"
    };
    (StatusCode::OK, Json(ProbeResponse { status })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::{read_json, test_state};
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    fn app(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/health/live", get(health_live))
            .route("/health/ready", get(health_ready))
            .with_state(state)
    }

    async fn get_uri(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_live() {
        let response = get_uri(app(test_state()), "/health/live").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_backends() {
        let state = test_state();
        let response = get_uri(app(state), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = read_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_string());
        assert_eq!(body["servers"]["fs"]["instanceCount"], 1);
        assert_eq!(body["servers"]["fs"]["healthyCount"], 1);
        assert_eq!(body["servers"]["fs"]["capabilities"][0], "fs/*");
        assert!(body["servers"]["fs"]["lastCheckTimestamp"].is_null());
        assert!(body["servers"]["fs"].get("lastCheckTimestamp").is_some());
    }

    #[tokio::test]
    async fn test_health_degraded() {
        let state = test_state();
        state.gateway.pool().instances("fs")[0].record_health_check(false);

        let response = get_uri(app(state.clone()), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["status"], "degraded");

        let response = get_uri(app(state), "/health/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await["status"], "degraded");
    }

    #[tokio::test]
    async fn test_health_ready_shutting_down() {
        let state = test_state();
        state.shutting_down.store(true, Ordering::SeqCst);

        let response = get_uri(app(state), "/health/ready").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(read_json(response).await["status"], "shutting_down");
    }
}
