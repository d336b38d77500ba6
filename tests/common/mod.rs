// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Shared harness: a mock MCP backend and a gateway served on a random port.

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use mcp_gateway::{router, AppState, BackendConfig, Config, Gateway, Metrics};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Backend answering every call with `{method, params}` as its result.
pub async fn mock_backend() -> String {
    let app = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route(
            "/mcp",
            post(|Json(req): Json<Value>| async move {
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": req["id"],
                    "result": {"method": req["method"], "params": req["params"]}
                }))
            }),
        );
    serve(app).await
}

pub struct TestServer {
    pub base_url: String,
    pub gateway: Arc<Gateway>,
}

impl TestServer {
    pub async fn start() -> Self {
        let backend_url = mock_backend().await;
        let config = Config::from_vars(vec![
            ("JWT_SECRET".to_string(), "e2e-secret".to_string()),
            ("MAX_CONCURRENT_SESSIONS".to_string(), "50".to_string()),
        ])
        .unwrap();
        let backends = vec![
            BackendConfig {
                id: "filesystem".to_string(),
                url: backend_url.clone(),
                capabilities: vec!["filesystem/*".to_string()],
                description: "Filesystem access".to_string(),
                health_check_interval_secs: 30,
                replicas: vec![],
            },
            BackendConfig {
                id: "issues".to_string(),
                url: backend_url,
                capabilities: vec!["issues/create".to_string(), "issues/list".to_string()],
                description: "Issue tracker".to_string(),
                health_check_interval_secs: 30,
                replicas: vec![],
            },
        ];

        let gateway = Arc::new(Gateway::new(&config, backends, Metrics::new()).unwrap());
        gateway.initialize().await.unwrap();

        let app = router(AppState::new(Arc::clone(&gateway)), &config.allowed_origins);
        let base_url = serve(app).await;

        Self { base_url, gateway }
    }

    pub fn ws_url(&self) -> String {
        self.base_url.replace("http://", "ws://") + "/mcp/ws"
    }
}
