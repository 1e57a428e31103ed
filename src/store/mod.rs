//! Document Store
//!
//! The boundary between the query compiler and the database that runs the
//! compiled plans. The compiler never touches a store; request handling hands
//! each [`QueryPlan`] to a [`DocumentStore`] and shapes whatever rows come back.
//!
//! - [`ArangoStore`]: ArangoDB over its HTTP cursor API
//! - [`MemoryStore`]: in-process collections, used for tests and demos

mod arango;
mod error;
mod expr;
mod memory;

pub use arango::{ArangoConfig, ArangoStore};
pub use error::{StoreError, StoreResult};
pub use expr::{parse_expression, Expr};
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::query::QueryPlan;

/// A document database able to run compiled query plans
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name for logs and health output
    fn name(&self) -> &str;

    /// Check the store is reachable
    async fn ping(&self) -> StoreResult<()>;

    /// Check whether a collection exists
    async fn collection_exists(&self, collection: &str) -> StoreResult<bool>;

    /// Run a compiled plan, returning one two-element array per row
    async fn execute(&self, plan: &QueryPlan) -> StoreResult<Vec<Value>>;

    /// Run a literal query string, as configured for template variables
    async fn query_raw(&self, query: &str) -> StoreResult<Vec<Value>>;
}
