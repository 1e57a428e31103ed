//! Aggregation Functions
//!
//! The closed set of grouping functions a target can aggregate with, the
//! alias table accepted in configuration, and the resolver that turns a
//! configured `aggregation` string into the list of functions to expand over.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::fmt;

use crate::catalog::error::ConfigurationError;

/// Canonical aggregation functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregation {
    Average,
    Count,
    CountDistinct,
    Max,
    Min,
    SortedUnique,
    StddevPopulation,
    StddevSample,
    Sum,
    Unique,
    VariancePopulation,
    VarianceSample,
    /// Raw, unaggregated datapoints
    None,
}

/// Functions a wildcard (`*`) or empty configuration expands to, in
/// enumeration order. `NONE` is only reachable by naming it.
pub const CANONICAL: [Aggregation; 12] = [
    Aggregation::Average,
    Aggregation::Count,
    Aggregation::CountDistinct,
    Aggregation::Max,
    Aggregation::Min,
    Aggregation::SortedUnique,
    Aggregation::StddevPopulation,
    Aggregation::StddevSample,
    Aggregation::Sum,
    Aggregation::Unique,
    Aggregation::VariancePopulation,
    Aggregation::VarianceSample,
];

/// Accepted aliases and the canonical function they stand for
pub const ALIASES: [(&str, Aggregation); 5] = [
    ("AVG", Aggregation::Average),
    ("COUNT_UNIQUE", Aggregation::CountDistinct),
    ("LENGTH", Aggregation::Count),
    ("STDDEV", Aggregation::StddevPopulation),
    ("VARIANCE", Aggregation::VariancePopulation),
];

impl Aggregation {
    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Count => "COUNT",
            Self::CountDistinct => "COUNT_DISTINCT",
            Self::Max => "MAX",
            Self::Min => "MIN",
            Self::SortedUnique => "SORTED_UNIQUE",
            Self::StddevPopulation => "STDDEV_POPULATION",
            Self::StddevSample => "STDDEV_SAMPLE",
            Self::Sum => "SUM",
            Self::Unique => "UNIQUE",
            Self::VariancePopulation => "VARIANCE_POPULATION",
            Self::VarianceSample => "VARIANCE_SAMPLE",
            Self::None => "NONE",
        }
    }

    /// Parse a canonical name or alias (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        let upper = name.trim().to_uppercase();

        if let Some((_, agg)) = ALIASES.iter().find(|(alias, _)| *alias == upper) {
            return Some(*agg);
        }

        CANONICAL
            .iter()
            .chain(std::iter::once(&Self::None))
            .find(|agg| agg.as_str() == upper)
            .copied()
    }

    /// The AQL `AGGREGATE` function, or `None` for raw datapoints
    pub fn aql_function(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            other => Some(other.as_str()),
        }
    }

    /// Check if this aggregation groups datapoints into buckets
    pub fn is_grouping(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Evaluate the function over the values of one bucket
    ///
    /// Follows the store's semantics: numeric functions ignore nulls and
    /// non-numeric values, `COUNT` counts everything, `UNIQUE` keeps first
    /// occurrence order.
    pub fn apply(&self, values: &[Value]) -> Value {
        match self {
            Self::Count => Value::from(values.len() as u64),
            Self::CountDistinct => Value::from(unique(values).len() as u64),
            Self::Unique => Value::Array(unique(values)),
            Self::SortedUnique => {
                let mut items = unique(values);
                items.sort_by(compare_values);
                Value::Array(items)
            }
            Self::None => Value::Array(values.to_vec()),
            numeric => {
                let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
                to_value(numeric.apply_numeric(&numbers))
            }
        }
    }

    fn apply_numeric(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return match self {
                Self::Sum => Some(0.0),
                _ => None,
            };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let squares = || values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();

        match self {
            Self::Average => Some(mean),
            Self::Sum => Some(values.iter().sum()),
            Self::Min => values.iter().cloned().reduce(f64::min),
            Self::Max => values.iter().cloned().reduce(f64::max),
            Self::VariancePopulation => Some(squares() / n),
            Self::StddevPopulation => Some((squares() / n).sqrt()),
            Self::VarianceSample if values.len() > 1 => Some(squares() / (n - 1.0)),
            Self::StddevSample if values.len() > 1 => Some((squares() / (n - 1.0)).sqrt()),
            _ => None,
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the configured `aggregation` value into the functions to expand
///
/// `None`, an empty string or `*` expand to every canonical function.
/// Otherwise the value is a comma-separated list of names or aliases.
pub fn resolve(configured: Option<&str>) -> Result<Vec<Aggregation>, ConfigurationError> {
    let configured = configured.map(str::trim).unwrap_or_default();

    if configured.is_empty() || configured == "*" {
        return Ok(CANONICAL.to_vec());
    }

    configured
        .split(',')
        .map(str::trim)
        .map(|name| {
            Aggregation::parse(name)
                .ok_or_else(|| ConfigurationError::UnknownAggregation(name.to_string()))
        })
        .collect()
}

fn unique(values: &[Value]) -> Vec<Value> {
    let mut seen: Vec<Value> = Vec::new();
    for value in values {
        if !seen.contains(value) {
            seen.push(value.clone());
        }
    }
    seen
}

fn to_value(result: Option<f64>) -> Value {
    result.map(number_value).unwrap_or(Value::Null)
}

/// Numeric JSON value, integral when exactly representable
pub(crate) fn number_value(f: f64) -> Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;

    if f.fract() == 0.0 && f.abs() < MAX_SAFE {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Ordering used for sorted results: null < bool < number < string < array < object
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_alias() {
        assert_eq!(resolve(Some("avg")).unwrap(), vec![Aggregation::Average]);
        assert_eq!(
            resolve(Some(" stddev , Length,COUNT_UNIQUE")).unwrap(),
            vec![
                Aggregation::StddevPopulation,
                Aggregation::Count,
                Aggregation::CountDistinct
            ]
        );
    }

    #[test]
    fn test_resolve_wildcard() {
        let all = resolve(Some("*")).unwrap();
        assert_eq!(all.len(), 12);
        assert_eq!(all[0], Aggregation::Average);
        assert_eq!(all[11], Aggregation::VarianceSample);
        assert!(!all.contains(&Aggregation::None));

        assert_eq!(resolve(None).unwrap(), all);
        assert_eq!(resolve(Some("")).unwrap(), all);
    }

    #[test]
    fn test_resolve_unknown() {
        assert!(matches!(
            resolve(Some("bogus")),
            Err(ConfigurationError::UnknownAggregation(name)) if name == "bogus"
        ));
        assert!(resolve(Some("SUM,median")).is_err());
    }

    #[test]
    fn test_none_is_explicit() {
        assert_eq!(resolve(Some("none")).unwrap(), vec![Aggregation::None]);
        assert_eq!(Aggregation::None.aql_function(), None);
        assert_eq!(Aggregation::Sum.aql_function(), Some("SUM"));
    }

    #[test]
    fn test_apply_numeric() {
        let values = vec![json!(1), json!(2), json!(3), json!(4), Value::Null];

        assert_eq!(Aggregation::Average.apply(&values), json!(2.5));
        assert_eq!(Aggregation::Sum.apply(&values), json!(10));
        assert_eq!(Aggregation::Min.apply(&values), json!(1));
        assert_eq!(Aggregation::Max.apply(&values), json!(4));
        assert_eq!(Aggregation::Count.apply(&values), json!(5));
        assert_eq!(Aggregation::VariancePopulation.apply(&values), json!(1.25));
        assert_eq!(Aggregation::StddevSample.apply(&[json!(7)]), Value::Null);
    }

    #[test]
    fn test_apply_collections() {
        let values = vec![json!("b"), json!("a"), json!("b"), json!(1)];

        assert_eq!(Aggregation::CountDistinct.apply(&values), json!(3));
        assert_eq!(Aggregation::Unique.apply(&values), json!(["b", "a", 1]));
        assert_eq!(Aggregation::SortedUnique.apply(&values), json!([1, "a", "b"]));
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&Aggregation::CountDistinct).unwrap(),
            "\"COUNT_DISTINCT\""
        );
        for agg in CANONICAL {
            assert_eq!(Aggregation::parse(agg.as_str()), Some(agg));
        }
    }
}
