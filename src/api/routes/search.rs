//! Search Routes
//!
//! - POST /search - List targets, or run a template variable query

use axum::{extract::State, Json};
use serde_json::Value;
use std::sync::Arc;

use crate::api::dto::SearchRequest;
use crate::api::error::ApiResult;
use crate::api::state::AppState;

/// POST /search
///
/// The body is optional. `{"target": "<name>"}` naming a configured template
/// variable returns that variable's query rows; anything else lists every
/// target in the catalog.
pub async fn search(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SearchRequest>>,
) -> ApiResult<Json<Vec<Value>>> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let target = req.target.as_deref().map(str::trim).filter(|t| !t.is_empty());

    let rows = state.runner.search(target).await?;
    Ok(Json(rows))
}
