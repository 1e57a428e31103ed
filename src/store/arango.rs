//! ArangoDB Store
//!
//! Runs compiled plans through ArangoDB's HTTP cursor API.
//!
//! ```text
//! POST /_db/{db}/_api/cursor          {query, bindVars, batchSize}
//! PUT  /_db/{db}/_api/cursor/{id}     while hasMore
//! GET  /_db/{db}/_api/collection/{n}  existence check
//! GET  /_db/{db}/_api/version         ping
//! ```

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::error::{StoreError, StoreResult};
use super::DocumentStore;
use crate::query::{AqlQuery, QueryPlan};

/// ArangoDB error number for a missing collection
const ERROR_COLLECTION_NOT_FOUND: i64 = 1203;

/// Connection settings for ArangoDB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArangoConfig {
    /// Server endpoint (e.g., "http://localhost:8529")
    pub url: String,
    /// Database name
    pub database: String,
    /// Basic auth user
    pub username: String,
    /// Basic auth password
    pub password: Option<String>,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Rows per cursor batch
    pub batch_size: u32,
}

impl Default for ArangoConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8529".to_string(),
            database: "_system".to_string(),
            username: "root".to_string(),
            password: None,
            request_timeout_ms: 10_000,
            batch_size: 1000,
        }
    }
}

impl ArangoConfig {
    /// Base URL of the configured database
    pub fn database_url(&self) -> String {
        format!(
            "{}/_db/{}",
            self.url.trim_end_matches('/'),
            urlencoding::encode(&self.database)
        )
    }
}

#[derive(Debug, Serialize)]
struct CursorRequest<'a> {
    #[serde(flatten)]
    query: &'a AqlQuery,
    #[serde(rename = "batchSize")]
    batch_size: u32,
}

#[derive(Debug, Deserialize)]
struct CursorResponse {
    #[serde(default)]
    result: Vec<Value>,
    #[serde(default, rename = "hasMore")]
    has_more: bool,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default, rename = "errorNum")]
    error_num: i64,
    #[serde(default, rename = "errorMessage")]
    error_message: String,
}

/// Document store talking to ArangoDB over HTTP
pub struct ArangoStore {
    client: Client,
    config: ArangoConfig,
}

impl ArangoStore {
    /// Create a store client with the given configuration
    pub fn new(config: ArangoConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self { client, config })
    }

    /// Get the current configuration
    pub fn config(&self) -> &ArangoConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.database_url(), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.config.username, self.config.password.as_deref())
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout
            } else if e.is_connect() {
                StoreError::Unavailable(e.to_string())
            } else {
                StoreError::Request(e)
            }
        })
    }

    /// Turn a non-success response into an API error
    async fn check(response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let (error_num, message) = match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(err) => (err.error_num, err.error_message),
            Err(_) => (0, text),
        };

        Err(StoreError::Api {
            status: status.as_u16(),
            error_num,
            message,
        })
    }

    /// Run a query and drain its cursor
    pub async fn run(&self, query: &AqlQuery) -> StoreResult<Vec<Value>> {
        let body = CursorRequest {
            query,
            batch_size: self.config.batch_size,
        };

        let response = self
            .send(self.client.post(self.url("/_api/cursor")).json(&body))
            .await?;
        let mut batch: CursorResponse = Self::check(response).await?.json().await?;
        let mut rows = std::mem::take(&mut batch.result);

        while batch.has_more {
            let id = batch.id.take().ok_or_else(|| {
                StoreError::Decode("cursor has more results but no id".to_string())
            })?;
            let path = format!("/_api/cursor/{}", urlencoding::encode(&id));

            let response = self.send(self.client.put(self.url(&path))).await?;
            batch = Self::check(response).await?.json().await?;
            rows.append(&mut batch.result);
        }

        Ok(rows)
    }
}

#[async_trait]
impl DocumentStore for ArangoStore {
    fn name(&self) -> &str {
        "arangodb"
    }

    async fn ping(&self) -> StoreResult<()> {
        let response = self.send(self.client.get(self.url("/_api/version"))).await?;
        Self::check(response).await.map(|_| ())
    }

    async fn collection_exists(&self, collection: &str) -> StoreResult<bool> {
        let path = format!("/_api/collection/{}", urlencoding::encode(collection));
        let response = self.send(self.client.get(self.url(&path))).await?;

        match Self::check(response).await {
            Ok(_) => Ok(true),
            Err(StoreError::Api { status, error_num, .. })
                if status == StatusCode::NOT_FOUND.as_u16()
                    || error_num == ERROR_COLLECTION_NOT_FOUND =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn execute(&self, plan: &QueryPlan) -> StoreResult<Vec<Value>> {
        let query = plan.to_aql();
        let rows = self.run(&query).await?;
        debug!(collection = %plan.collection, rows = rows.len(), "Cursor drained");
        Ok(rows)
    }

    async fn query_raw(&self, query: &str) -> StoreResult<Vec<Value>> {
        self.run(&AqlQuery {
            query: query.to_string(),
            bind_vars: serde_json::Map::new(),
        })
        .await
    }
}
