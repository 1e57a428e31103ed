//! Query error types
//!
//! Defines all error conditions that can occur while compiling and running
//! target queries.

use thiserror::Error;

use crate::store::StoreError;
use crate::template::TemplateError;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Requested target is not in the catalog
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// Invalid time range specified
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    /// Bucket interval must be positive
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// A request-time template could not be parsed
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Store layer error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
