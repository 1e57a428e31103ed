//! Query Routes
//!
//! - POST /query - Compile and run the requested targets

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;

use crate::api::dto::{QueryRequest, RangeDto, TimestampDto};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::query::{QueryParams, TargetResponse, TimeRange};

lazy_static! {
    static ref RELATIVE_TIME: Regex =
        Regex::new(r"^now-(\d+)([smhdw])$").expect("relative time pattern is valid");
}

/// POST /query
///
/// Returns one entry per target and multi-value combination, in request order.
pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> ApiResult<Json<Vec<TargetResponse>>> {
    let Json(req) = payload?;
    let params = to_params(req)?;

    tracing::debug!(
        targets = params.targets.len(),
        start = params.range.start,
        end = params.range.end,
        interval_ms = params.interval_ms,
        "Query request"
    );

    let responses = state.runner.query(&params).await?;
    Ok(Json(responses))
}

/// Validate a request and convert it into runner parameters
pub fn to_params(req: QueryRequest) -> ApiResult<QueryParams> {
    let interval_ms = match req.interval_ms {
        Some(ms) if ms > 0 => ms,
        Some(ms) => {
            return Err(ApiError::Validation(format!(
                "intervalMs must be positive, got {}",
                ms
            )))
        }
        None => return Err(ApiError::Validation("intervalMs is required".to_string())),
    };

    Ok(QueryParams {
        range: parse_time_range(&req.range)?,
        interval_ms,
        targets: req.targets,
        scoped_vars: req.scoped_vars,
    })
}

/// Parse time range from DTO
fn parse_time_range(dto: &RangeDto) -> ApiResult<TimeRange> {
    let start = parse_bound(&dto.from)?;
    let end = parse_bound(&dto.to)?;

    TimeRange::try_new(start, end)
        .ok_or_else(|| ApiError::Validation("range.from must be before range.to".to_string()))
}

fn parse_bound(dto: &TimestampDto) -> ApiResult<i64> {
    match dto {
        TimestampDto::Millis(ms) => Ok(*ms),
        TimestampDto::Text(s) => parse_timestamp(s.trim()),
    }
}

/// Parse a timestamp string
fn parse_timestamp(s: &str) -> ApiResult<i64> {
    // Raw milliseconds timestamp
    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }

    // Handle relative times like "now", "now-6h"
    if s.starts_with("now") {
        return parse_relative_time(s);
    }

    // Try parsing as ISO 8601
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }

    // Try parsing as ISO 8601 without timezone (assume UTC)
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }

    // Try parsing as date only
    if let Some(dt) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(dt.and_utc().timestamp_millis());
    }

    Err(ApiError::Validation(format!(
        "Cannot parse timestamp: {}",
        s
    )))
}

/// Parse relative time like "now-6h"
fn parse_relative_time(s: &str) -> ApiResult<i64> {
    let now = Utc::now().timestamp_millis();

    if s == "now" {
        return Ok(now);
    }

    if let Some(caps) = RELATIVE_TIME.captures(s) {
        let amount: i64 = caps[1]
            .parse()
            .map_err(|_| ApiError::Validation("Invalid number in time expression".to_string()))?;

        let ms = match &caps[2] {
            "s" => amount * 1000,
            "m" => amount * 60 * 1000,
            "h" => amount * 3600 * 1000,
            "d" => amount * 24 * 3600 * 1000,
            _ => amount * 7 * 24 * 3600 * 1000,
        };

        return Ok(now - ms);
    }

    Err(ApiError::Validation(format!(
        "Cannot parse relative time: {}",
        s
    )))
}
