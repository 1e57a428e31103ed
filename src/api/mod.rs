//! SimpleJSON API
//!
//! HTTP surface of the bridge, built with Axum. Speaks the Grafana
//! SimpleJSON datasource protocol.
//!
//! # Endpoints
//!
//! ## SimpleJSON
//! - `GET /` - Connection test
//! - `POST /search` - List targets or template variable values
//! - `POST /query` - Run targets over a time range
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe
//! - `GET /health` - Full health status
//!
//! # Example
//!
//! ```rust,ignore
//! use chronicle_bridge::api::{serve, ApiConfig, AppState};
//! use chronicle_bridge::catalog::TargetCatalog;
//! use chronicle_bridge::query::{QueryRunner, RunnerOptions};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(TargetCatalog::build(&cfg.datasource, store.as_ref()).await?);
//! let runner = Arc::new(QueryRunner::new(catalog, store.clone(), RunnerOptions::from_config(&cfg.datasource)));
//! let config = ApiConfig::from_server(&cfg.server);
//!
//! serve(AppState::new(runner, store, config.clone()), &config).await?;
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{ApiConfig, AppState};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the API router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let datasource_routes = Router::new()
        .route("/", get(routes::health::root))
        .route("/search", post(routes::search::search))
        .route("/query", post(routes::query::execute_query))
        .layer(DefaultBodyLimit::max(state.config.max_body_size));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/ready", get(routes::health::readiness))
        .route("/", get(routes::health::full_health));

    // Create shared state
    let shared_state = Arc::new(state);

    Router::new()
        .merge(datasource_routes)
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Start the API server
pub async fn serve(state: AppState, config: &ApiConfig) -> Result<(), ApiError> {
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Chronicle bridge listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Chronicle bridge shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
