//! Catalog error types
//!
//! Every variant is fatal: a catalog that fails to build must never serve
//! traffic.

use thiserror::Error;

use crate::store::StoreError;
use crate::template::TemplateError;

/// Errors raised while building the target catalog
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// The `target` setting is missing or lists no templates
    #[error("Invalid service configuration. No target templates configured")]
    NoTargets,

    /// The `collection` setting is missing
    #[error("Invalid service configuration. No collection configured")]
    NoCollection,

    /// An aggregation name outside the canonical set and alias table
    #[error("Invalid service configuration. Unknown aggregation: {0}")]
    UnknownAggregation(String),

    /// A rendered collection name that does not exist in the store
    #[error("Invalid service configuration. Unknown collection: {0}")]
    UnknownCollection(String),

    /// Two expansions rendered to the same target name
    #[error("Invalid service configuration. Duplicate target name: {name}")]
    DuplicateTarget { name: String },

    /// A configured template with invalid syntax
    #[error("Invalid service configuration. Bad template in '{field}': {source}")]
    Template {
        field: &'static str,
        #[source]
        source: TemplateError,
    },

    /// The store could not be asked about a collection
    #[error("Failed to verify collections: {0}")]
    Store(#[from] StoreError),
}

/// Result type for catalog operations
pub type ConfigurationResult<T> = Result<T, ConfigurationError>;
