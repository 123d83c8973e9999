//! AgentFlow API - AI Agent Pipeline Orchestrator
//!
//! Feature requests come in as plain prompts and flow through a governed
//! pipeline: plan generation by the external Architect agent, strict schema
//! validation, signed dispatch to the execution gateway, and scoring by the
//! Auditor agent. Cost and rate governance gate every paid call, prior
//! failures feed back as advisory memory, and a drift detector watches the
//! audit score distribution.
//!
//! Run with the `supervise` argument to start the crash-loop supervisor,
//! which runs this same binary as a restarted child process.

mod alert;
mod architect;
mod audit;
mod config;
mod drift;
mod error;
mod gateway;
mod governance;
mod job;
mod memory;
mod pipeline;
mod routes;
mod state;
mod supervisor;

use crate::alert::AlertChannel;
use crate::config::Settings;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    // Load configuration
    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    if std::env::args().nth(1).as_deref() == Some("supervise") {
        let alerts = AlertChannel::new(settings.agents.alert_webhook_url.clone());
        return supervisor::run(settings.supervisor.clone(), alerts).await;
    }

    info!("🚀 Starting AgentFlow - AI Agent Pipeline Orchestrator...");

    let state = Arc::new(AppState::new(settings.clone()));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   POST /request            - Submit a feature request prompt");
    info!("   GET  /status/:jobId      - Poll one job's record");
    info!("   GET  /jobs?status=X      - List jobs, optionally by status");
    info!("   POST /execute/:jobId     - Dispatch a READY job to the gateway");
    info!("   GET  /audits/:jobId      - Audit results for one job");
    info!("   GET  /telemetry          - Cost, drift and load snapshot");
    info!("   GET  /health             - Health check");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,agentflow_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
