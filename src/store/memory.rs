//! In-Memory Store
//!
//! Collections of JSON documents held in process. Plans are evaluated
//! structurally instead of being sent anywhere as AQL: the date, value and
//! filter snippets are parsed with [`parse_expression`] and evaluated per
//! document, with `doc` bound to the document.
//!
//! Used by the test suite and for running the bridge without a database
//! (`[store] backend = "memory"`, optionally seeded from a fixtures file).
//!
//! # Fixtures
//!
//! ```json
//! {
//!   "requests": [
//!     {"time": 1700000000000, "value": 12, "host": "web-1"}
//!   ]
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::RwLock;

use super::error::{StoreError, StoreResult};
use super::expr::{parse_expression, truthy};
use super::DocumentStore;
use crate::catalog::number_value;
use crate::query::{OutputShape, QueryPlan};
use crate::template::Bindings;

/// Document store backed by in-process collections
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    queries: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load collections from a JSON fixtures file
    pub fn from_fixtures(path: impl AsRef<Path>) -> StoreResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(serde_json::from_str(&content)?)
    }

    /// Load collections from a `{collection: [documents]}` object
    pub fn from_json(fixtures: Value) -> StoreResult<Self> {
        let Value::Object(map) = fixtures else {
            return Err(StoreError::Decode(
                "fixtures must be an object of collections".to_string(),
            ));
        };

        let mut collections = HashMap::new();
        for (name, docs) in map {
            match docs {
                Value::Array(docs) => {
                    collections.insert(name, docs);
                }
                _ => {
                    return Err(StoreError::Decode(format!(
                        "fixture collection '{}' must be an array",
                        name
                    )))
                }
            }
        }

        tracing::info!("Loaded {} fixture collections", collections.len());

        Ok(Self {
            collections: RwLock::new(collections),
            queries: RwLock::new(HashMap::new()),
        })
    }

    /// Create a collection if it does not exist yet
    pub async fn create_collection(&self, name: &str) {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();
    }

    /// Insert one document
    pub async fn insert(&self, collection: &str, doc: Value) -> StoreResult<()> {
        self.insert_many(collection, vec![doc]).await.map(|_| ())
    }

    /// Insert documents, returning how many were added
    pub async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> StoreResult<usize> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::UnknownCollection(collection.to_string()))?;

        let count = docs.len();
        target.extend(docs);
        Ok(count)
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> Option<usize> {
        self.collections.read().await.get(collection).map(Vec::len)
    }

    /// Answer a literal query string with canned rows
    pub async fn register_query(&self, query: impl Into<String>, rows: Vec<Value>) {
        self.queries.write().await.insert(query.into(), rows);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> StoreResult<bool> {
        Ok(self.collections.read().await.contains_key(collection))
    }

    async fn execute(&self, plan: &QueryPlan) -> StoreResult<Vec<Value>> {
        let date = parse_expression(&plan.date.expression())?;
        let value = parse_expression(&plan.value.expression())?;
        let filter = plan.filter.as_deref().map(parse_expression).transpose()?;

        let collections = self.collections.read().await;
        let docs = collections
            .get(&plan.collection)
            .ok_or_else(|| StoreError::UnknownCollection(plan.collection.clone()))?;

        let mut matched: Vec<(f64, Value, Value)> = Vec::new();

        for doc in docs {
            let mut scope = Bindings::new();
            scope.insert("doc".to_string(), doc.clone());

            let d = date.eval(&scope);
            let Some(ts) = d.as_f64() else {
                continue;
            };
            // Bounds are whole milliseconds, so flooring keeps [start, end)
            if !plan.range.contains(ts.floor() as i64) {
                continue;
            }
            if let Some(filter) = &filter {
                if !truthy(&filter.eval(&scope)) {
                    continue;
                }
            }

            matched.push((ts, d, value.eval(&scope)));
        }

        if plan.is_grouped() {
            let interval = plan.interval_ms as f64;
            let mut buckets: BTreeMap<i64, Vec<Value>> = BTreeMap::new();
            for (ts, _, v) in matched {
                let bucket = (ts / interval).floor() * interval;
                buckets.entry(bucket as i64).or_default().push(v);
            }

            return Ok(buckets
                .into_iter()
                .map(|(bucket, values)| {
                    Value::Array(vec![
                        plan.aggregation.apply(&values),
                        number_value(bucket as f64),
                    ])
                })
                .collect());
        }

        matched.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        Ok(matched
            .into_iter()
            .map(|(_, d, v)| match plan.shape {
                OutputShape::Table => Value::Array(vec![d, v]),
                OutputShape::Timeserie => Value::Array(vec![v, d]),
            })
            .collect())
    }

    async fn query_raw(&self, query: &str) -> StoreResult<Vec<Value>> {
        self.queries
            .read()
            .await
            .get(query.trim())
            .cloned()
            .ok_or_else(|| StoreError::Unsupported(format!("no canned result for '{}'", query)))
    }
}
