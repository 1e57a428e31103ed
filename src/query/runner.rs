//! Query Runner
//!
//! Executes a SimpleJSON query request against the catalog and the store.
//!
//! # Pipeline
//!
//! ```text
//! scopedVars ──expand──→ single + combinations
//!                               │
//! for target in request order   │
//!   for combination  ←──────────┘
//!     layer bindings → compile → execute → shape
//! ```
//!
//! Response order follows the request: all combinations of the first target,
//! then all combinations of the second, and so on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{TargetCatalog, TargetDefinition};
use crate::config::DatasourceConfig;
use crate::query::error::{QueryError, QueryResult};
use crate::query::plan::{compile, layer_bindings, AqlQuery, OutputShape, QueryPlan, TimeRange};
use crate::query::scoped::{ScopedExpansion, ScopedVariableExpander, ScopedVars};
use crate::store::DocumentStore;
use crate::template::{self, Bindings};

/// Request-time behaviour taken from the datasource configuration
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Scoped variables that fan a request out
    pub multi_value_keys: Vec<String>,
    /// Drop responses without rows
    pub hide_empty: bool,
    /// Log compiled queries at info instead of debug
    pub log_query: bool,
    /// Search target → literal store query
    pub template_variables: HashMap<String, String>,
}

impl RunnerOptions {
    /// Extract runner options from the datasource configuration
    pub fn from_config(cfg: &DatasourceConfig) -> Self {
        Self {
            multi_value_keys: ScopedVariableExpander::from_config(
                cfg.multi_value_template_variables.as_deref(),
            )
            .multi_keys()
            .to_vec(),
            hide_empty: cfg.hide_empty,
            log_query: cfg.log_query,
            template_variables: cfg.template_variables.clone(),
        }
    }
}

/// One requested target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetQuery {
    /// Target name from the catalog
    pub target: String,
    /// Response shape
    #[serde(rename = "type", default)]
    pub shape: OutputShape,
    /// Per-request bindings, e.g. `{"alias": "..."}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Bindings>,
}

/// Everything a query needs besides the catalog
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParams {
    pub range: TimeRange,
    pub interval_ms: i64,
    pub targets: Vec<TargetQuery>,
    pub scoped_vars: ScopedVars,
}

/// A column heading in table responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub text: String,
}

/// Target definition echoed back when query logging is on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryDefinition {
    /// Configured alias template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Static per-target binding view
    pub view: Bindings,
    /// Layered bindings the plan was compiled with
    pub vars: Bindings,
}

/// One entry of the query response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetResponse {
    /// `[value, timestamp]` pairs
    Timeserie {
        target: String,
        datapoints: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        query: Option<AqlQuery>,
        #[serde(skip_serializing_if = "Option::is_none")]
        definition: Option<QueryDefinition>,
    },
    /// Two columns and `[date, value]` rows
    Table {
        target: String,
        columns: Vec<Column>,
        rows: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        query: Option<AqlQuery>,
        #[serde(skip_serializing_if = "Option::is_none")]
        definition: Option<QueryDefinition>,
    },
}

impl TargetResponse {
    /// Shape store rows for the client
    pub fn from_rows(name: String, plan: &QueryPlan, rows: Vec<Value>) -> Self {
        match plan.shape {
            OutputShape::Timeserie => Self::Timeserie {
                target: name,
                datapoints: rows,
                query: None,
                definition: None,
            },
            OutputShape::Table => Self::Table {
                target: name,
                columns: plan
                    .columns
                    .iter()
                    .map(|text| Column { text: text.clone() })
                    .collect(),
                rows,
                query: None,
                definition: None,
            },
        }
    }

    /// Attach the executed query and its definition
    pub fn with_log(mut self, aql: AqlQuery, def: QueryDefinition) -> Self {
        match &mut self {
            Self::Timeserie {
                query, definition, ..
            }
            | Self::Table {
                query, definition, ..
            } => {
                *query = Some(aql);
                *definition = Some(def);
            }
        }
        self
    }

    /// Display name of the entry
    pub fn target(&self) -> &str {
        match self {
            Self::Timeserie { target, .. } | Self::Table { target, .. } => target,
        }
    }

    /// Number of datapoints or rows
    pub fn len(&self) -> usize {
        match self {
            Self::Timeserie { datapoints, .. } => datapoints.len(),
            Self::Table { rows, .. } => rows.len(),
        }
    }

    /// Check if the store returned no rows
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A compiled target with the name shown to the client
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTarget {
    pub display: String,
    pub plan: QueryPlan,
    pub definition: QueryDefinition,
}

/// Runs query and search requests
pub struct QueryRunner {
    catalog: Arc<TargetCatalog>,
    store: Arc<dyn DocumentStore>,
    expander: ScopedVariableExpander,
    options: RunnerOptions,
}

impl QueryRunner {
    /// Create a runner over a built catalog
    pub fn new(
        catalog: Arc<TargetCatalog>,
        store: Arc<dyn DocumentStore>,
        options: RunnerOptions,
    ) -> Self {
        Self {
            catalog,
            store,
            expander: ScopedVariableExpander::new(options.multi_value_keys.clone()),
            options,
        }
    }

    /// The catalog queries resolve against
    pub fn catalog(&self) -> &TargetCatalog {
        &self.catalog
    }

    /// Compile every requested target without executing anything
    ///
    /// Unlike [`QueryRunner::query`], an unknown target is an error here.
    pub fn plan(&self, params: &QueryParams) -> QueryResult<Vec<PlannedTarget>> {
        let expansion = self.expander.expand(&params.scoped_vars);
        let mut planned = Vec::new();

        for request in &params.targets {
            planned.extend(self.plan_target(request, &expansion, params)?);
        }

        Ok(planned)
    }

    fn plan_target(
        &self,
        request: &TargetQuery,
        expansion: &ScopedExpansion,
        params: &QueryParams,
    ) -> QueryResult<Vec<PlannedTarget>> {
        let def = self
            .catalog
            .get(&request.target)
            .ok_or_else(|| QueryError::UnknownTarget(request.target.clone()))?;

        expansion
            .namespaces()
            .map(|grafana| {
                let vars = layer_bindings(def, request.data.as_ref(), grafana);
                let plan = compile(def, &vars, params.range, params.interval_ms, request.shape)?;
                let display = display_name(def, request.data.as_ref(), &plan, &vars)?;
                let definition = QueryDefinition {
                    alias: def.alias.as_ref().map(|alias| alias.source().to_string()),
                    view: def.view.clone(),
                    vars,
                };
                Ok(PlannedTarget {
                    display,
                    plan,
                    definition,
                })
            })
            .collect()
    }

    /// Run a query request
    ///
    /// Unknown targets are logged and left out of the response. The request
    /// fails only if none of its targets are known, or on any store error.
    pub async fn query(&self, params: &QueryParams) -> QueryResult<Vec<TargetResponse>> {
        let expansion = self.expander.expand(&params.scoped_vars);
        let mut responses = Vec::new();
        let mut unknown = Vec::new();

        for request in &params.targets {
            let planned = match self.plan_target(request, &expansion, params) {
                Ok(planned) => planned,
                Err(QueryError::UnknownTarget(name)) => {
                    warn!("Skipping unknown target '{}'", name);
                    unknown.push(name);
                    continue;
                }
                Err(e) => return Err(e),
            };

            for PlannedTarget {
                display: name,
                plan,
                definition,
            } in planned
            {
                let aql = plan.to_aql();
                self.log_plan(&name, &aql);

                let rows = self.store.execute(&plan).await?;
                debug!(name = %name, rows = rows.len(), "Executed plan");

                let mut response = TargetResponse::from_rows(name, &plan, rows);
                if self.options.hide_empty && response.is_empty() {
                    continue;
                }
                if self.options.log_query {
                    response = response.with_log(aql, definition);
                }
                responses.push(response);
            }
        }

        if !params.targets.is_empty() && unknown.len() == params.targets.len() {
            return Err(QueryError::UnknownTarget(unknown.join(", ")));
        }

        Ok(responses)
    }

    fn log_plan(&self, name: &str, aql: &AqlQuery) {
        let bind_vars = Value::Object(aql.bind_vars.clone());

        if self.options.log_query {
            info!(name = %name, bind_vars = %bind_vars, "Using query\n{}", aql.query);
        } else {
            debug!(name = %name, bind_vars = %bind_vars, "Using query\n{}", aql.query);
        }
    }

    /// Answer a search request
    ///
    /// A target naming a configured template variable runs that variable's
    /// query; anything else lists the catalog.
    pub async fn search(&self, target: Option<&str>) -> QueryResult<Vec<Value>> {
        if let Some(query) = target.and_then(|t| self.options.template_variables.get(t)) {
            if self.options.log_query {
                info!("Template variable query for '{}': {}", target.unwrap_or_default(), query);
            }
            return Ok(self.store.query_raw(query).await?);
        }

        Ok(self
            .catalog
            .names()
            .map(|name| Value::String(name.to_string()))
            .collect())
    }
}

/// Request alias, then static alias, then configured alias, then the name
fn display_name(
    def: &TargetDefinition,
    request_data: Option<&Bindings>,
    plan: &QueryPlan,
    vars: &Bindings,
) -> QueryResult<String> {
    let data_alias = [request_data, def.data.as_ref()]
        .into_iter()
        .flatten()
        .find_map(|data| data.get("alias").and_then(Value::as_str))
        .filter(|alias| !alias.is_empty());

    if let Some(alias) = data_alias {
        return Ok(template::render(alias, vars)?);
    }

    Ok(plan.alias.clone().unwrap_or_else(|| def.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn datasource() -> DatasourceConfig {
        DatasourceConfig {
            target: "{{x1}}.{{aggregation}}".to_string(),
            collection: "requests".to_string(),
            aggregation: Some("SUM,NONE".to_string()),
            x1_variable: Some("web,db".to_string()),
            filter_expression: Some("doc.host == '{{x1}}' AND doc.env == '{{grafana.env}}'".to_string()),
            multi_value_template_variables: Some("env".to_string()),
            ..Default::default()
        }
    }

    async fn runner(cfg: DatasourceConfig) -> QueryRunner {
        let store = MemoryStore::new();
        store.create_collection("requests").await;
        store
            .insert_many(
                "requests",
                vec![
                    json!({"time": 1000, "value": 1, "host": "web", "env": "prod"}),
                    json!({"time": 1500, "value": 2, "host": "web", "env": "prod"}),
                    json!({"time": 2500, "value": 5, "host": "web", "env": "dev"}),
                    json!({"time": 2600, "value": 7, "host": "db", "env": "prod"}),
                ],
            )
            .await
            .unwrap();
        store.register_query("FOR h IN hosts RETURN h", vec![json!("web"), json!("db")]).await;

        let catalog = TargetCatalog::build(&cfg, &store).await.unwrap();
        QueryRunner::new(Arc::new(catalog), Arc::new(store), RunnerOptions::from_config(&cfg))
    }

    fn params(targets: &[(&str, OutputShape)], scoped: Value) -> QueryParams {
        QueryParams {
            range: TimeRange::try_new(0, 10_000).unwrap(),
            interval_ms: 1000,
            targets: targets
                .iter()
                .map(|(t, shape)| TargetQuery {
                    target: t.to_string(),
                    shape: *shape,
                    data: None,
                })
                .collect(),
            scoped_vars: serde_json::from_value(scoped).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_query_grouped_per_combination() {
        let runner = runner(datasource()).await;
        let params = params(
            &[("web.SUM", OutputShape::Timeserie)],
            json!({"env": {"value": ["prod", "dev"]}}),
        );

        let responses = runner.query(&params).await.unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0],
            TargetResponse::Timeserie {
                target: "web.SUM".to_string(),
                datapoints: vec![json!([3, 1000])],
                query: None,
                definition: None,
            }
        );
        assert_eq!(
            responses[1],
            TargetResponse::Timeserie {
                target: "web.SUM".to_string(),
                datapoints: vec![json!([5, 2000])],
                query: None,
                definition: None,
            }
        );
    }

    #[tokio::test]
    async fn test_query_table_and_raw() {
        let runner = runner(datasource()).await;
        let params = params(
            &[("web.SUM", OutputShape::Table), ("web.NONE", OutputShape::Timeserie)],
            json!({"env": {"value": "prod"}}),
        );

        let responses = runner.query(&params).await.unwrap();
        assert_eq!(responses.len(), 2);

        assert_eq!(
            serde_json::to_value(&responses[0]).unwrap(),
            json!({
                "type": "table",
                "target": "web.SUM",
                "columns": [{"text": "time"}, {"text": "value"}],
                "rows": [[1000, 1], [1500, 2]]
            })
        );
        assert_eq!(
            serde_json::to_value(&responses[1]).unwrap(),
            json!({
                "type": "timeserie",
                "target": "web.NONE",
                "datapoints": [[1, 1000], [2, 1500]]
            })
        );
    }

    #[tokio::test]
    async fn test_hide_empty_keeps_order() {
        let mut cfg = datasource();
        cfg.hide_empty = true;
        let runner = runner(cfg).await;

        let params = params(
            &[
                ("db.SUM", OutputShape::Timeserie),
                ("web.SUM", OutputShape::Timeserie),
                ("db.NONE", OutputShape::Timeserie),
            ],
            json!({"env": {"value": ["dev", "prod"]}}),
        );

        let responses = runner.query(&params).await.unwrap();
        let summary: Vec<(&str, usize)> = responses.iter().map(|r| (r.target(), r.len())).collect();

        assert_eq!(
            summary,
            vec![("db.SUM", 1), ("web.SUM", 1), ("web.SUM", 1), ("db.NONE", 1)]
        );
    }

    #[tokio::test]
    async fn test_unknown_targets() {
        let runner = runner(datasource()).await;

        let mixed = params(
            &[("nope", OutputShape::Timeserie), ("web.SUM", OutputShape::Timeserie)],
            json!({"env": {"value": "prod"}}),
        );
        let responses = runner.query(&mixed).await.unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].target(), "web.SUM");

        let all_unknown = params(&[("nope", OutputShape::Timeserie)], json!({}));
        assert!(matches!(
            runner.query(&all_unknown).await,
            Err(QueryError::UnknownTarget(name)) if name == "nope"
        ));
        assert!(matches!(
            runner.plan(&mixed),
            Err(QueryError::UnknownTarget(_))
        ));

        let none = params(&[], json!({}));
        assert!(runner.query(&none).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alias_precedence() {
        let mut cfg = datasource();
        cfg.alias = Some("{{x1}} in {{grafana.env}}".to_string());
        let mut static_data = Bindings::new();
        static_data.insert("alias".to_string(), json!("static {{aggregation}}"));
        cfg.target_data.insert("db.SUM".to_string(), static_data);
        let runner = runner(cfg).await;

        let mut params = params(
            &[("web.SUM", OutputShape::Timeserie), ("db.SUM", OutputShape::Timeserie)],
            json!({"env": {"value": "prod"}}),
        );

        let planned = runner.plan(&params).unwrap();
        assert_eq!(planned[0].display, "web in prod");
        assert_eq!(planned[1].display, "static SUM");

        let mut request_data = Bindings::new();
        request_data.insert("alias".to_string(), json!("{{target}}!"));
        params.targets[1].data = Some(request_data);

        let planned = runner.plan(&params).unwrap();
        assert_eq!(planned[1].display, "db.SUM!");
    }

    #[tokio::test]
    async fn test_log_query_attaches_definition() {
        let mut cfg = datasource();
        cfg.log_query = true;
        let runner = runner(cfg).await;
        let params = params(
            &[("web.SUM", OutputShape::Timeserie)],
            json!({"env": {"value": "prod"}}),
        );

        let responses = runner.query(&params).await.unwrap();
        let entry = serde_json::to_value(&responses[0]).unwrap();

        assert_eq!(entry["datapoints"], json!([[3, 1000]]));
        assert!(entry["query"]["query"].as_str().unwrap().contains("COLLECT date"));
        assert_eq!(entry["query"]["bindVars"]["@collection"], json!("requests"));
        assert_eq!(entry["query"]["bindVars"]["interval"], json!(1000));
        assert_eq!(entry["definition"]["view"]["x1"], json!("web"));
        assert_eq!(entry["definition"]["vars"]["grafana"]["env"], json!("prod"));
        assert!(entry["definition"].get("alias").is_none());

        let quiet = self::runner(datasource()).await.query(&params).await.unwrap();
        let entry = serde_json::to_value(&quiet[0]).unwrap();
        assert!(entry.get("query").is_none());
        assert!(entry.get("definition").is_none());
    }

    #[tokio::test]
    async fn test_buckets_for_unaligned_range() {
        let cfg = DatasourceConfig {
            target: "load.{{aggregation}}".to_string(),
            collection: "load".to_string(),
            aggregation: Some("SUM".to_string()),
            ..Default::default()
        };
        let store = MemoryStore::new();
        store.create_collection("load").await;
        let docs = (0..30)
            .map(|i| json!({"time": 3_000_000 + i * 200_000, "value": i}))
            .collect();
        store.insert_many("load", docs).await.unwrap();
        let catalog = TargetCatalog::build(&cfg, &store).await.unwrap();
        let runner =
            QueryRunner::new(Arc::new(catalog), Arc::new(store), RunnerOptions::from_config(&cfg));

        let t0 = 3_700_000;
        let interval = 600_000;
        let mut params = params(&[("load.SUM", OutputShape::Timeserie)], json!({}));
        params.range = TimeRange::try_new(t0, 7_200_000).unwrap();
        params.interval_ms = interval;

        let responses = runner.query(&params).await.unwrap();
        let TargetResponse::Timeserie { datapoints, .. } = &responses[0] else {
            panic!("expected a timeserie");
        };

        for point in datapoints {
            let bucket = point[1].as_i64().unwrap();
            assert_eq!(bucket % interval, 0);
            assert!(bucket >= t0.div_euclid(interval) * interval);
        }
        // The first bucket starts before t0 but only holds documents from t0 on:
        // 3_800_000 (i = 4) and 4_000_000 (i = 5)
        assert_eq!(
            datapoints,
            &vec![
                json!([9, 3_600_000]),
                json!([21, 4_200_000]),
                json!([30, 4_800_000]),
                json!([39, 5_400_000]),
                json!([48, 6_000_000]),
                json!([57, 6_600_000]),
            ]
        );
    }

    #[tokio::test]
    async fn test_search() {
        let mut cfg = datasource();
        cfg.template_variables
            .insert("hosts".to_string(), "FOR h IN hosts RETURN h".to_string());
        let runner = runner(cfg).await;

        let names = runner.search(None).await.unwrap();
        assert_eq!(names, vec![json!("web.SUM"), json!("web.NONE"), json!("db.SUM"), json!("db.NONE")]);

        let hosts = runner.search(Some("hosts")).await.unwrap();
        assert_eq!(hosts, vec![json!("web"), json!("db")]);

        assert_eq!(runner.search(Some("other")).await.unwrap().len(), 4);
    }
}
