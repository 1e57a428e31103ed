//! Store error types

use thiserror::Error;

/// Errors raised by a document store
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The request exceeded its timeout
    #[error("Store request timed out")]
    Timeout,

    /// HTTP transport failure
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The store rejected the request
    #[error("Store error {status} ({error_num}): {message}")]
    Api {
        status: u16,
        error_num: i64,
        message: String,
    },

    /// The store answered with something we could not read
    #[error("Invalid store response: {0}")]
    Decode(String),

    /// A plan referenced a collection the store does not have
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// An expression could not be parsed or evaluated
    #[error("Expression error: {0}")]
    Expression(String),

    /// The store cannot run this kind of query
    #[error("Unsupported query: {0}")]
    Unsupported(String),

    /// IO error while loading fixtures
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
