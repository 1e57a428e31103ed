//! Query Compilation and Execution
//!
//! Turns SimpleJSON `/query` and `/search` requests into store calls:
//!
//! - **Scoped**: Expand dashboard variables into per-combination namespaces
//! - **Plan**: Render a target's templates and compile it to AQL
//! - **Runner**: Resolve targets, execute plans, shape responses
//!
//! # Flow
//!
//! ```text
//! scopedVars ──► ScopedVariableExpander ──► grafana namespaces
//!                                                 │
//! target name ──► TargetCatalog ──► TargetDefinition ──► compile() ──► QueryPlan
//!                                                                          │
//!                                         DocumentStore::execute ◄─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use chronicle_bridge::query::{QueryParams, QueryRunner, RunnerOptions, TimeRange};
//!
//! let runner = QueryRunner::new(catalog, store, RunnerOptions::from_config(&cfg.datasource));
//! let responses = runner
//!     .query(&QueryParams {
//!         range: TimeRange::last_hours(6),
//!         interval_ms: 60_000,
//!         targets,
//!         scoped_vars,
//!     })
//!     .await?;
//! ```

mod error;
mod plan;
mod runner;
mod scoped;

pub use error::{QueryError, QueryResult};
pub use plan::{
    compile, layer_bindings, AqlQuery, OutputShape, PlanSource, QueryPlan, TimeRange,
};
pub use runner::{
    Column, PlannedTarget, QueryDefinition, QueryParams, QueryRunner, RunnerOptions, TargetQuery,
    TargetResponse,
};
pub use scoped::{
    html_decode, ScopedExpansion, ScopedVariable, ScopedVariableExpander, ScopedVars,
};
