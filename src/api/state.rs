//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use crate::catalog::TargetCatalog;
use crate::config::ServerConfig;
use crate::query::QueryRunner;
use crate::store::DocumentStore;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Runs search and query requests against the catalog
    pub runner: Arc<QueryRunner>,
    /// Store the runner executes against, for health checks
    pub store: Arc<dyn DocumentStore>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    /// Create a new AppState
    pub fn new(runner: Arc<QueryRunner>, store: Arc<dyn DocumentStore>, config: ApiConfig) -> Self {
        Self {
            runner,
            store,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// The catalog the runner resolves targets against
    pub fn catalog(&self) -> &TargetCatalog {
        self.runner.catalog()
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8082,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Take host and port from the `[server]` section
    pub fn from_server(server: &ServerConfig) -> Self {
        Self::new(server.host.clone(), server.port)
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
