//! # Chronicle Bridge
//!
//! Grafana SimpleJSON datasource over ArangoDB. Dashboards pick targets from
//! a catalog generated out of a few templates, and every target is compiled
//! to a time-bucketed AQL query when it is requested.
//!
//! ## Modules
//!
//! - [`catalog`]: Target catalog built from axis variables and aggregations
//! - [`query`]: Dashboard variable expansion, AQL compilation, execution
//! - [`store`]: Document store abstraction with ArangoDB and in-memory backends
//! - [`api`]: SimpleJSON REST API with Axum
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chronicle_bridge::{
//!     ApiConfig, AppState, ArangoStore, Config, DocumentStore, QueryRunner, RunnerOptions,
//!     TargetCatalog,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::load_default();
//!
//!     let store: Arc<dyn DocumentStore> = Arc::new(ArangoStore::new(cfg.store.arango())?);
//!     let catalog = Arc::new(TargetCatalog::build(&cfg.datasource, store.as_ref()).await?);
//!     println!("Serving {} targets", catalog.len());
//!
//!     let runner = QueryRunner::new(
//!         catalog,
//!         Arc::clone(&store),
//!         RunnerOptions::from_config(&cfg.datasource),
//!     );
//!
//!     let api = ApiConfig::from_server(&cfg.server);
//!     chronicle_bridge::serve(AppState::new(Arc::new(runner), store, api.clone()), &api).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cartesian;
pub mod catalog;
pub mod config;
pub mod query;
pub mod store;
pub mod template;

// Re-export top-level types for convenience
pub use cartesian::Cartesian;

pub use template::{Bindings, Template, TemplateError};

pub use catalog::{
    Aggregation, ConfigurationError, ConfigurationResult, FieldSource, TargetCatalog,
    TargetDefinition,
};

pub use query::{
    compile, AqlQuery, OutputShape, QueryError, QueryParams, QueryPlan, QueryRunner,
    RunnerOptions, ScopedVariableExpander, ScopedVars, TargetQuery, TargetResponse, TimeRange,
};

pub use store::{ArangoConfig, ArangoStore, DocumentStore, MemoryStore, StoreError, StoreResult};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{
    Config, ConfigError, DatasourceConfig, LoggingConfig, ServerConfig, StoreBackend, StoreConfig,
};
