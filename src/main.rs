// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mcp_gateway::{router, AppState, BackendsFile, Config, Gateway, Metrics};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config);

    config.validate()?;
    let backends = BackendsFile::load(&config.backends_file)
        .with_context(|| format!("loading {}", config.backends_file))?
        .backends;

    tracing::info!(
        host = %config.host,
        port = config.port,
        backends = backends.len(),
        max_sessions = config.max_concurrent_sessions,
        "starting mcp-gateway"
    );

    // Create metrics registry
    let metrics = Metrics::new();

    // Build and start the gateway; a backend pool failure is fatal
    let gateway = Arc::new(Gateway::new(&config, backends, metrics)?);
    gateway.initialize().await?;

    let state = AppState::new(Arc::clone(&gateway));
    let shutting_down = Arc::clone(&state.shutting_down);

    // Build application router
    let app = router(state, &config.allowed_origins);

    // Create TCP listener
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "listening for connections");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received, initiating graceful shutdown");

            // Mark as shutting down (readiness will return 503)
            shutting_down.store(true, Ordering::SeqCst);
        })
        .await?;

    gateway.shutdown().await;

    tracing::info!("mcp-gateway stopped");
    Ok(())
}

/// Initialize tracing based on configuration.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
