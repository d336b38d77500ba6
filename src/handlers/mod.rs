// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! HTTP surface: MCP endpoints, health probes and metrics.

mod health;
mod mcp;
mod metrics;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::gateway::Gateway;

pub use health::{health, health_live, health_ready};
pub use mcp::{mcp_http, mcp_ws};
pub use metrics::metrics_handler;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Flag indicating if we're shutting down
    pub shutting_down: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Build the application router.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/metrics", get(metrics_handler))
        .route("/mcp", post(mcp_http))
        .route("/mcp/ws", get(mcp_ws))
        .with_state(state)
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
}

/// CORS from `ALLOWED_ORIGINS`; `*` allows any origin.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{BackendConfig, Config};
    use crate::metrics::Metrics;
    use axum::response::Response;
    use http_body_util::BodyExt;
    use serde_json::Value;

    /// State over one unprobed backend that nothing listens on.
    pub fn test_state() -> AppState {
        let config =
            Config::from_vars(vec![("JWT_SECRET".to_string(), "handler-test".to_string())])
                .unwrap();
        let backends = vec![BackendConfig {
            id: "fs".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            capabilities: vec!["fs/*".to_string()],
            description: "filesystem".to_string(),
            health_check_interval_secs: 30,
            replicas: vec![],
        }];
        let gateway = Gateway::new(&config, backends, Metrics::new()).unwrap();
        AppState::new(Arc::new(gateway))
    }

    pub async fn read_json(response: Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }
}
