//! Scoped Variables
//!
//! Dashboard variables arrive with every query request as `scopedVars`.
//! Single-valued variables are bound once under `grafana.<key>`; variables
//! declared as multi-valued fan the request out, one combination per element
//! of their cartesian product.
//!
//! ```text
//! scopedVars: {env: ["prod", "dev"], region: "eu"}   multi = [env]
//!   single:       {region: "eu"}
//!   combinations: [{env: "prod"}, {env: "dev"}]
//! ```
//!
//! Keys starting with `_` (`__interval`, `__from`, ...) are internal to the
//! dashboard and ignored. Values are HTML-entity decoded before use.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::cartesian::Cartesian;
use crate::template::Bindings;

lazy_static! {
    static ref ENTITY: Regex =
        Regex::new(r"&(amp|gt|lt|quot|#39);|&#([0-9]{1,5});|&#x([0-9a-fA-F]{1,4});")
            .expect("entity pattern is valid");
}

/// One dashboard variable as sent by the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopedVariable {
    /// Display text, unused by compilation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,
    /// Selected value: a string, number, boolean or array of those
    #[serde(default)]
    pub value: Value,
}

/// Request variables keyed by name
pub type ScopedVars = BTreeMap<String, ScopedVariable>;

/// Result of expanding a request's scoped variables
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedExpansion {
    /// Flat single-valued bindings
    pub single: Bindings,
    /// One binding set per multi-value combination, never empty
    pub combinations: Vec<Bindings>,
}

impl ScopedExpansion {
    /// The `grafana` namespace for each combination
    ///
    /// Single-value bindings are laid over the combination and win on a
    /// shared key.
    pub fn namespaces(&self) -> impl Iterator<Item = Bindings> + '_ {
        self.combinations.iter().map(move |combination| {
            let mut grafana = combination.clone();
            for (key, value) in &self.single {
                grafana.insert(key.clone(), value.clone());
            }
            grafana
        })
    }
}

/// Splits scoped variables into single bindings and multi-value combinations
#[derive(Debug, Clone, Default)]
pub struct ScopedVariableExpander {
    multi_keys: Vec<String>,
}

impl ScopedVariableExpander {
    /// Create an expander for the given multi-value keys, in axis order
    pub fn new(multi_keys: Vec<String>) -> Self {
        Self { multi_keys }
    }

    /// Parse the comma-separated `multiValueTemplateVariables` setting
    pub fn from_config(keys: Option<&str>) -> Self {
        Self::new(
            keys.unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    /// Declared multi-value keys
    pub fn multi_keys(&self) -> &[String] {
        &self.multi_keys
    }

    /// Expand a request's variables
    pub fn expand(&self, vars: &ScopedVars) -> ScopedExpansion {
        let single: Bindings = vars
            .iter()
            .filter(|(key, _)| !key.starts_with('_') && !self.multi_keys.contains(key))
            .map(|(key, var)| (key.clone(), decode_value(&var.value)))
            .collect();

        let present: Vec<(&String, Vec<Value>)> = self
            .multi_keys
            .iter()
            .filter(|key| !key.starts_with('_'))
            .filter_map(|key| vars.get(key).map(|var| (key, multi_values(&var.value))))
            .collect();

        let product = Cartesian::new(present.iter().map(|(_, values)| values.clone()).collect());
        let combinations: Vec<Bindings> = product
            .iter()
            .map(|values| {
                present
                    .iter()
                    .map(|(key, _)| (*key).clone())
                    .zip(values)
                    .collect()
            })
            .collect();

        tracing::debug!(
            single = single.len(),
            multi_keys = present.len(),
            combinations = combinations.len(),
            "Expanded scoped variables"
        );

        ScopedExpansion {
            single,
            combinations,
        }
    }
}

/// Coerce a multi-value variable to its decoded elements, at least one
fn multi_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) if items.is_empty() => vec![Value::String(String::new())],
        Value::Array(items) => items.iter().map(decode_value).collect(),
        other => vec![decode_value(other)],
    }
}

fn decode_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(html_decode(s)),
        Value::Array(items) => Value::Array(items.iter().map(decode_value).collect()),
        Value::Null => Value::String(String::new()),
        other => other.clone(),
    }
}

/// Decode the HTML entities dashboards escape variable values with
///
/// Handles `&amp; &gt; &lt; &quot; &#39;` plus decimal (`&#NNN;`) and hex
/// (`&#xHHHH;`) character references. Anything else is left untouched.
pub fn html_decode(input: &str) -> String {
    ENTITY
        .replace_all(input, |caps: &Captures| {
            let decoded = if let Some(name) = caps.get(1) {
                match name.as_str() {
                    "amp" => Some('&'),
                    "gt" => Some('>'),
                    "lt" => Some('<'),
                    "quot" => Some('"'),
                    _ => Some('\''),
                }
            } else if let Some(dec) = caps.get(2) {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32)
            } else {
                caps.get(3)
                    .and_then(|hex| u32::from_str_radix(hex.as_str(), 16).ok())
                    .and_then(char::from_u32)
            };

            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
