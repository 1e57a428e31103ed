//! Query Plans
//!
//! A [`QueryPlan`] is the compiled, store-ready form of one target for one
//! request. Compilation renders the target's templates against the request
//! bindings and never touches a store.
//!
//! # Generated AQL
//!
//! ```text
//! FOR doc IN @@collection
//!   LET d = doc["time"]
//!   FILTER d >= @start AND d < @end
//!   FILTER doc.host == "web-1"
//!   LET v = doc["value"]
//!   COLLECT date = FLOOR(d / @interval) * @interval
//!   AGGREGATE value = AVERAGE(v)
//!   SORT date
//!   RETURN [value, date]
//! ```
//!
//! Table requests and the `NONE` aggregation skip the grouping and return
//! every matching document sorted by date.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{Aggregation, FieldSource, TargetDefinition};
use crate::query::error::{QueryError, QueryResult};
use crate::template::Bindings;

/// A time interval for queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive), in milliseconds
    pub start: i64,
    /// End timestamp (exclusive), in milliseconds
    pub end: i64,
}

impl TimeRange {
    /// Create a time range, returning None if invalid
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Create a range, failing with a query error if start >= end
    pub fn checked(start: i64, end: i64) -> QueryResult<Self> {
        Self::try_new(start, end).ok_or_else(|| {
            QueryError::InvalidTimeRange(format!(
                "start {} must be before end {}",
                format_ms(start),
                format_ms(end)
            ))
        })
    }

    /// Create a range for the last N hours from now
    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now().timestamp_millis();
        let start = end - (hours * 3600 * 1000);
        Self { start, end }
    }

    /// Duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }
}

fn format_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Response shape requested by the client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputShape {
    /// `[value, timestamp]` datapoints
    #[default]
    Timeserie,
    /// `columns` plus `[date, value]` rows
    Table,
}

/// Rendered date or value source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    /// Document attribute name
    Field(String),
    /// Expression over `doc`
    Expression(String),
}

impl PlanSource {
    fn render(source: &FieldSource, vars: &Bindings) -> Self {
        match source {
            FieldSource::Field(t) => Self::Field(t.render(vars).trim().to_string()),
            FieldSource::Expression(t) => Self::Expression(t.render(vars).trim().to_string()),
        }
    }

    /// The source as an expression over `doc`
    pub fn expression(&self) -> String {
        match self {
            Self::Field(field) => format!("doc[{}]", quote(field)),
            Self::Expression(expr) => expr.clone(),
        }
    }

    /// `LET <var> = <expression>`
    pub fn snippet(&self, var: &str) -> String {
        format!("LET {} = {}", var, self.expression())
    }
}

/// Double-quoted AQL string literal
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// A compiled target query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Target name the plan was compiled from
    pub target: String,
    /// Collection to scan
    pub collection: String,
    /// Rendered filter predicate, if any
    pub filter: Option<String>,
    /// Date source
    pub date: PlanSource,
    /// Value source
    pub value: PlanSource,
    /// Bucket aggregation
    pub aggregation: Aggregation,
    /// Bucket width in milliseconds
    pub interval_ms: i64,
    /// Requested range
    pub range: TimeRange,
    /// Requested response shape
    pub shape: OutputShape,
    /// Rendered `[date, value]` column headings
    pub columns: [String; 2],
    /// Rendered configured alias, if any
    pub alias: Option<String>,
}

/// Query text plus bind variables, ready for the cursor API
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AqlQuery {
    pub query: String,
    #[serde(rename = "bindVars")]
    pub bind_vars: serde_json::Map<String, Value>,
}

impl QueryPlan {
    /// Whether rows are grouped into time buckets
    pub fn is_grouped(&self) -> bool {
        self.shape == OutputShape::Timeserie && self.aggregation.is_grouping()
    }

    /// `LET d = ...`
    pub fn date_snippet(&self) -> String {
        self.date.snippet("d")
    }

    /// `LET v = ...`
    pub fn value_snippet(&self) -> String {
        self.value.snippet("v")
    }

    /// `FILTER ...`, empty without a filter
    pub fn filter_snippet(&self) -> String {
        match &self.filter {
            Some(filter) => format!("FILTER {}", filter),
            None => String::new(),
        }
    }

    /// Range predicate applied before the filter and grouping
    pub fn range_snippet(&self) -> &'static str {
        "FILTER d >= @start AND d < @end"
    }

    /// Render the plan as AQL
    pub fn to_aql(&self) -> AqlQuery {
        let mut lines = vec![
            "FOR doc IN @@collection".to_string(),
            format!("  {}", self.date_snippet()),
            format!("  {}", self.range_snippet()),
        ];

        if self.filter.is_some() {
            lines.push(format!("  {}", self.filter_snippet()));
        }
        lines.push(format!("  {}", self.value_snippet()));

        let mut bind_vars = serde_json::Map::new();
        bind_vars.insert("@collection".to_string(), Value::from(self.collection.as_str()));
        bind_vars.insert("start".to_string(), Value::from(self.range.start));
        bind_vars.insert("end".to_string(), Value::from(self.range.end));

        match self.aggregation.aql_function() {
            Some(function) if self.is_grouped() => {
                lines.push("  COLLECT date = FLOOR(d / @interval) * @interval".to_string());
                lines.push(format!("  AGGREGATE value = {}(v)", function));
                lines.push("  SORT date".to_string());
                lines.push("  RETURN [value, date]".to_string());
                bind_vars.insert("interval".to_string(), Value::from(self.interval_ms));
            }
            _ => {
                lines.push("  SORT d".to_string());
                lines.push(match self.shape {
                    OutputShape::Table => "  RETURN [d, v]".to_string(),
                    OutputShape::Timeserie => "  RETURN [v, d]".to_string(),
                });
            }
        }

        AqlQuery {
            query: lines.join("\n"),
            bind_vars,
        }
    }
}

/// Layer request bindings over a definition
///
/// The definition view comes first, then the definition's static data, then
/// the request's target data. The scoped dashboard variables go under
/// `grafana`.
pub fn layer_bindings(
    def: &TargetDefinition,
    request_data: Option<&Bindings>,
    grafana: Bindings,
) -> Bindings {
    let mut vars = def.view.clone();

    for data in def.data.iter().chain(request_data) {
        for (key, value) in data {
            vars.insert(key.clone(), value.clone());
        }
    }

    vars.insert("grafana".to_string(), Value::Object(grafana));
    vars
}

/// Compile one target for one request
pub fn compile(
    def: &TargetDefinition,
    vars: &Bindings,
    range: TimeRange,
    interval_ms: i64,
    shape: OutputShape,
) -> QueryResult<QueryPlan> {
    if interval_ms <= 0 {
        return Err(QueryError::InvalidInterval(format!(
            "{}ms is not a positive bucket width",
            interval_ms
        )));
    }
    let range = TimeRange::checked(range.start, range.end)?;

    let filter = def
        .filter
        .as_ref()
        .map(|t| t.render(vars).trim().to_string())
        .filter(|f| !f.is_empty());

    Ok(QueryPlan {
        target: def.name.clone(),
        collection: def.collection.clone(),
        filter,
        date: PlanSource::render(&def.date, vars),
        value: PlanSource::render(&def.value, vars),
        aggregation: def.aggregation,
        interval_ms,
        range,
        shape,
        columns: [def.date_name.render(vars), def.value_name.render(vars)],
        alias: def.alias.as_ref().map(|t| t.render(vars)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TargetCatalog;
    use crate::config::DatasourceConfig;
    use serde_json::json;

    fn catalog(aggregation: &str) -> TargetCatalog {
        TargetCatalog::expand(&DatasourceConfig {
            target: "{{x1}}.{{aggregation}}".to_string(),
            collection: "metrics_{{x1}}".to_string(),
            aggregation: Some(aggregation.to_string()),
            x1_variable: Some("web".to_string()),
            filter_expression: Some("doc.host == '{{grafana.host}}'".to_string()),
            value_field: Some("{{field}}".to_string()),
            alias: Some("{{x1}} on {{grafana.host}}".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    fn vars(def: &TargetDefinition) -> Bindings {
        let mut data = Bindings::new();
        data.insert("field".to_string(), json!("latency"));
        let mut grafana = Bindings::new();
        grafana.insert("host".to_string(), json!("web-1"));
        layer_bindings(def, Some(&data), grafana)
    }

    #[test]
    fn test_compile_grouped() {
        let catalog = catalog("AVG");
        let def = catalog.get("web.AVERAGE").unwrap();
        let range = TimeRange::try_new(0, 3_600_000).unwrap();

        let plan = compile(def, &vars(def), range, 600_000, OutputShape::Timeserie).unwrap();

        assert_eq!(plan.collection, "metrics_web");
        assert_eq!(plan.filter.as_deref(), Some("doc.host == 'web-1'"));
        assert_eq!(plan.value, PlanSource::Field("latency".to_string()));
        assert_eq!(plan.alias.as_deref(), Some("web on web-1"));
        assert_eq!(plan.columns, ["time".to_string(), "latency".to_string()]);
        assert!(plan.is_grouped());

        let aql = plan.to_aql();
        assert_eq!(
            aql.query,
            [
                "FOR doc IN @@collection",
                "  LET d = doc[\"time\"]",
                "  FILTER d >= @start AND d < @end",
                "  FILTER doc.host == 'web-1'",
                "  LET v = doc[\"latency\"]",
                "  COLLECT date = FLOOR(d / @interval) * @interval",
                "  AGGREGATE value = AVERAGE(v)",
                "  SORT date",
                "  RETURN [value, date]",
            ]
            .join("\n")
        );
        assert_eq!(aql.bind_vars["@collection"], json!("metrics_web"));
        assert_eq!(aql.bind_vars["interval"], json!(600_000));
    }

    #[test]
    fn test_table_and_timeserie_share_snippets() {
        let catalog = catalog("SUM");
        let def = catalog.get("web.SUM").unwrap();
        let vars = vars(def);
        let range = TimeRange::try_new(0, 1000).unwrap();

        let series = compile(def, &vars, range, 100, OutputShape::Timeserie).unwrap();
        let table = compile(def, &vars, range, 100, OutputShape::Table).unwrap();

        assert_eq!(series.date_snippet(), table.date_snippet());
        assert_eq!(series.value_snippet(), table.value_snippet());
        assert_eq!(series.filter_snippet(), table.filter_snippet());

        let aql = table.to_aql();
        assert!(!table.is_grouped());
        assert!(aql.query.ends_with("  SORT d\n  RETURN [d, v]"));
        assert!(!aql.bind_vars.contains_key("interval"));
    }

    #[test]
    fn test_none_returns_raw_value_first() {
        let catalog = catalog("NONE");
        let def = catalog.get("web.NONE").unwrap();
        let range = TimeRange::try_new(0, 1000).unwrap();

        let plan = compile(def, &vars(def), range, 100, OutputShape::Timeserie).unwrap();
        assert!(!plan.is_grouped());
        assert!(plan.to_aql().query.ends_with("  RETURN [v, d]"));
    }

    #[test]
    fn test_empty_filter_omitted() {
        let mut cfg = DatasourceConfig {
            target: "t".to_string(),
            collection: "c".to_string(),
            aggregation: Some("COUNT".to_string()),
            filter_expression: Some("{{grafana.missing}}".to_string()),
            date_expression: Some("DATE_TIMESTAMP(doc.ts)".to_string()),
            ..Default::default()
        };
        cfg.value_field = Some("we\"ird".to_string());
        let catalog = TargetCatalog::expand(&cfg).unwrap();
        let def = catalog.get("t").unwrap();

        let plan = compile(
            def,
            &layer_bindings(def, None, Bindings::new()),
            TimeRange::try_new(0, 10).unwrap(),
            1,
            OutputShape::Timeserie,
        )
        .unwrap();

        assert_eq!(plan.filter, None);
        assert_eq!(plan.filter_snippet(), "");
        assert_eq!(plan.date_snippet(), "LET d = DATE_TIMESTAMP(doc.ts)");
        assert_eq!(plan.value_snippet(), "LET v = doc[\"we\\\"ird\"]");
        assert!(!plan.to_aql().query.contains("FILTER doc"));
    }

    #[test]
    fn test_range_is_half_open() {
        let range = TimeRange::try_new(3_700_000, 7_200_000).unwrap();

        assert!(range.contains(3_700_000));
        assert!(range.contains(7_199_999));
        assert!(!range.contains(3_699_999));
        assert!(!range.contains(7_200_000));
        assert_eq!(range.duration_ms(), 3_500_000);
    }

    #[test]
    fn test_invalid_inputs() {
        let catalog = catalog("MAX");
        let def = catalog.get("web.MAX").unwrap();
        let vars = vars(def);
        let range = TimeRange::try_new(0, 10).unwrap();

        assert!(matches!(
            compile(def, &vars, range, 0, OutputShape::Timeserie),
            Err(QueryError::InvalidInterval(_))
        ));
        assert!(matches!(
            compile(def, &vars, TimeRange { start: 10, end: 10 }, 1, OutputShape::Table),
            Err(QueryError::InvalidTimeRange(_))
        ));
    }

    #[test]
    fn test_layering_precedence() {
        let mut cfg = DatasourceConfig {
            target: "{{x1}}".to_string(),
            collection: "c".to_string(),
            x1_variable: Some("a".to_string()),
            aggregation: Some("SUM".to_string()),
            ..Default::default()
        };
        let mut static_data = Bindings::new();
        static_data.insert("x1".to_string(), json!("from-data"));
        static_data.insert("unit".to_string(), json!("ms"));
        cfg.target_data.insert("a".to_string(), static_data);
        let catalog = TargetCatalog::expand(&cfg).unwrap();
        let def = catalog.get("a").unwrap();

        let mut request = Bindings::new();
        request.insert("unit".to_string(), json!("s"));
        let vars = layer_bindings(def, Some(&request), Bindings::new());

        assert_eq!(vars["x1"], json!("from-data"));
        assert_eq!(vars["unit"], json!("s"));
        assert_eq!(vars["target"], json!("a"));
        assert_eq!(vars["grafana"], json!({}));
    }

    #[test]
    fn test_output_shape_serde() {
        assert_eq!(serde_json::to_value(OutputShape::Timeserie).unwrap(), json!("timeserie"));
        let shape: OutputShape = serde_json::from_value(json!("table")).unwrap();
        assert_eq!(shape, OutputShape::Table);
    }
}
