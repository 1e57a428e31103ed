//! Data Transfer Objects
//!
//! Request and response types for the SimpleJSON endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Serialize};

use crate::query::{ScopedVars, TargetQuery};

// ============================================
// SEARCH DTOs
// ============================================

/// Search request, the body is optional
#[derive(Debug, Default, Deserialize)]
pub struct SearchRequest {
    /// Template variable name, or empty to list targets
    #[serde(default)]
    pub target: Option<String>,
}

// ============================================
// QUERY DTOs
// ============================================

/// Query request as sent by the dashboard
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Bucket width in milliseconds
    #[serde(default)]
    pub interval_ms: Option<i64>,
    /// Requested time range
    pub range: RangeDto,
    /// Targets in display order
    #[serde(default)]
    pub targets: Vec<TargetQuery>,
    /// Dashboard variables
    #[serde(default)]
    pub scoped_vars: ScopedVars,
}

/// Time range with string or numeric bounds
#[derive(Debug, Deserialize)]
pub struct RangeDto {
    pub from: TimestampDto,
    pub to: TimestampDto,
}

/// A timestamp as ISO-8601 text or epoch milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TimestampDto {
    Millis(i64),
    Text(String),
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: healthy, degraded
    pub status: String,
    /// Store status
    pub store: String,
    /// Store backend name
    pub backend: String,
    /// Number of catalog targets
    pub targets: usize,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Application version
    pub version: String,
}

/// Connection test response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ok: bool,
}
