use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

mod handlers;
mod middleware;
mod routes;
mod state;

use common::config::{Settings, StorageBackend};
use common::db::{DbPool, InMemoryStore, PgStore, ScheduleStore};
use common::events::TracingPublisher;
use common::lifecycle::ScheduleService;
use common::reasoning::{HttpReasoningClient, ReasoningService, ReferencePlanner};
use common::telemetry;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Settings::load()?;

    telemetry::init_logging(&config.observability.log_level, config.observability.json_logs)?;
    tracing::info!("Starting API server");

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        backend = ?config.database.backend,
        "Configuration loaded"
    );

    // Storage backend
    let store: Arc<dyn ScheduleStore> = match config.database.backend {
        StorageBackend::Postgres => {
            let db_pool = DbPool::new(&config.database).await?;
            tracing::info!("Database connection pool established");
            db_pool.migrate().await?;
            Arc::new(PgStore::new(db_pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; schedules are lost on shutdown");
            Arc::new(InMemoryStore::new())
        }
    };

    // Placement proposals
    let reasoning: Arc<dyn ReasoningService> = match &config.reasoning.endpoint {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "Using external reasoning service");
            Arc::new(HttpReasoningClient::new(endpoint.clone(), &config.reasoning)?)
        }
        None => {
            tracing::info!("No reasoning endpoint configured, using built-in planner");
            Arc::new(ReferencePlanner)
        }
    };

    // Initialize Prometheus metrics exporter
    let metrics_handle = telemetry::init_metrics()?;

    let service = ScheduleService::new(store, reasoning, Arc::new(TracingPublisher), &config);
    let state = AppState::new(service, config.clone(), Some(metrics_handle));

    // Create router
    let app = routes::create_router(state);

    // Start server
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("API server stopped");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Initiating graceful shutdown");
}
