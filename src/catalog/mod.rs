//! Target Catalog
//!
//! Built once at startup from the `[datasource]` configuration and shared
//! read-only by every request afterwards.
//!
//! # Expansion
//!
//! ```text
//! target templates × x-axis × y-axis × z-axis × aggregations
//!     → render target name → TargetDefinition
//! ```
//!
//! Each definition keeps the *unrendered* filter/date/value/alias templates
//! together with the binding view used to render its name, so the compiler
//! can render them again per request once dashboard variables are known.
//!
//! # Failure
//!
//! Unknown aggregations, unknown collections, bad template syntax and
//! duplicate rendered target names are all fatal [`ConfigurationError`]s.

mod aggregation;
mod axis;
mod error;

pub use aggregation::{resolve as resolve_aggregations, Aggregation, ALIASES, CANONICAL};
pub(crate) use aggregation::{compare_values, number_value};
pub use axis::{parse_variable, AxisCombination, AxisExpander, AxisVariableSet, AXES, SLOTS};
pub use error::{ConfigurationError, ConfigurationResult};

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use crate::config::DatasourceConfig;
use crate::store::DocumentStore;
use crate::template::{Bindings, Template};

/// Date field used when neither a field nor an expression is configured
pub const DEFAULT_DATE_FIELD: &str = "time";

/// Value field used when neither a field nor an expression is configured
pub const DEFAULT_VALUE_FIELD: &str = "value";

/// Where a datapoint's date or value comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// A document attribute, e.g. `time`
    Field(Template),
    /// An arbitrary expression over `doc`, e.g. `DATE_TIMESTAMP(doc.ts)`
    Expression(Template),
}

impl FieldSource {
    fn from_config(
        field: Option<&str>,
        expression: Option<&str>,
        default_field: &str,
        field_name: &'static str,
        expression_name: &'static str,
    ) -> ConfigurationResult<Self> {
        match (non_empty(expression), non_empty(field)) {
            (Some(expr), _) => Ok(Self::Expression(parse_template(expression_name, expr)?)),
            (None, Some(field)) => Ok(Self::Field(parse_template(field_name, field)?)),
            (None, None) => Ok(Self::Field(parse_template(field_name, default_field)?)),
        }
    }
}

/// One queryable target
///
/// Immutable once the catalog is built. Request-time compilation renders the
/// templates against a fresh binding context and never mutates the definition.
#[derive(Debug, Clone)]
pub struct TargetDefinition {
    /// Rendered target name, the key clients request
    pub name: String,
    /// Rendered collection the target reads from
    pub collection: String,
    /// Aggregation applied per time bucket
    pub aggregation: Aggregation,
    /// Optional filter predicate template
    pub filter: Option<Template>,
    /// Date source
    pub date: FieldSource,
    /// Value source
    pub value: FieldSource,
    /// Column heading for dates in table responses
    pub date_name: Template,
    /// Column heading for values in table responses
    pub value_name: Template,
    /// Optional display-name template
    pub alias: Option<Template>,
    /// Bindings the name was rendered with (`x1..z3`, `aggregation`,
    /// `target`, `rawTarget`)
    pub view: Bindings,
    /// Optional static bindings configured for this target
    pub data: Option<Bindings>,
}

/// Immutable mapping from target name to definition, in enumeration order
#[derive(Debug, Clone, Default)]
pub struct TargetCatalog {
    targets: Vec<TargetDefinition>,
    index: HashMap<String, usize>,
}

/// Configured templates, parsed once per build
struct CatalogTemplates {
    targets: Vec<Template>,
    collection: Template,
    filter: Option<Template>,
    date: FieldSource,
    value: FieldSource,
    date_name: Template,
    value_name: Template,
    alias: Option<Template>,
}

impl CatalogTemplates {
    fn parse(cfg: &DatasourceConfig) -> ConfigurationResult<Self> {
        let targets = cfg
            .target
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| parse_template("target", t))
            .collect::<ConfigurationResult<Vec<_>>>()?;

        if targets.is_empty() {
            return Err(ConfigurationError::NoTargets);
        }

        let collection = non_empty(Some(cfg.collection.as_str()))
            .ok_or(ConfigurationError::NoCollection)
            .and_then(|c| parse_template("collection", c))?;

        let date = FieldSource::from_config(
            cfg.date_field.as_deref(),
            cfg.date_expression.as_deref(),
            DEFAULT_DATE_FIELD,
            "dateField",
            "dateExpression",
        )?;
        let value = FieldSource::from_config(
            cfg.value_field.as_deref(),
            cfg.value_expression.as_deref(),
            DEFAULT_VALUE_FIELD,
            "valueField",
            "valueExpression",
        )?;

        let date_name = column_name(cfg.date_name.as_deref(), &date, "date", "dateName")?;
        let value_name = column_name(cfg.value_name.as_deref(), &value, "value", "valueName")?;

        Ok(Self {
            targets,
            collection,
            filter: optional_template("filterExpression", cfg.filter_expression.as_deref())?,
            date,
            value,
            date_name,
            value_name,
            alias: optional_template("alias", cfg.alias.as_deref())?,
        })
    }
}

impl TargetCatalog {
    /// Expand the configuration into a catalog without consulting the store
    pub fn expand(cfg: &DatasourceConfig) -> ConfigurationResult<Self> {
        let templates = CatalogTemplates::parse(cfg)?;
        let aggregations = resolve_aggregations(cfg.aggregation.as_deref())?;
        let expander = AxisExpander::new(AXES.map(|axis| {
            AxisVariableSet::from_config(cfg.axis_variables(axis))
        }));

        tracing::debug!(
            targets = templates.targets.len(),
            axis_combinations = expander.len(),
            aggregations = aggregations.len(),
            "Expanding target catalog"
        );

        let mut catalog = TargetCatalog::default();

        for target in &templates.targets {
            for combination in expander.expand() {
                for aggregation in &aggregations {
                    let mut view = Bindings::new();
                    combination.bind(&mut view);
                    view.insert(
                        "aggregation".to_string(),
                        Value::String(aggregation.as_str().to_string()),
                    );

                    let name = target.render(&view);
                    view.insert("target".to_string(), Value::String(name.clone()));
                    view.insert(
                        "rawTarget".to_string(),
                        Value::String(target.source().to_string()),
                    );

                    let collection = templates.collection.render(&view);

                    catalog.insert(TargetDefinition {
                        data: cfg.target_data.get(&name).cloned(),
                        name,
                        collection,
                        aggregation: *aggregation,
                        filter: templates.filter.clone(),
                        date: templates.date.clone(),
                        value: templates.value.clone(),
                        date_name: templates.date_name.clone(),
                        value_name: templates.value_name.clone(),
                        alias: templates.alias.clone(),
                        view,
                    })?;
                }
            }
        }

        Ok(catalog)
    }

    /// Expand the configuration and verify every collection exists in the store
    pub async fn build(
        cfg: &DatasourceConfig,
        store: &dyn DocumentStore,
    ) -> ConfigurationResult<Self> {
        let catalog = Self::expand(cfg)?;

        for collection in catalog.collections() {
            if !store.collection_exists(collection).await? {
                return Err(ConfigurationError::UnknownCollection(collection.to_string()));
            }
        }

        tracing::info!(
            "Built target catalog: {} targets over {} collections ({} store)",
            catalog.len(),
            catalog.collections().len(),
            store.name()
        );

        Ok(catalog)
    }

    fn insert(&mut self, definition: TargetDefinition) -> ConfigurationResult<()> {
        if self.index.contains_key(&definition.name) {
            return Err(ConfigurationError::DuplicateTarget {
                name: definition.name,
            });
        }

        self.index.insert(definition.name.clone(), self.targets.len());
        self.targets.push(definition);
        Ok(())
    }

    /// Look up a target by its rendered name
    pub fn get(&self, name: &str) -> Option<&TargetDefinition> {
        self.index.get(name).map(|&i| &self.targets[i])
    }

    /// Check if a target exists
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Target names in enumeration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.name.as_str())
    }

    /// All definitions in enumeration order
    pub fn iter(&self) -> impl Iterator<Item = &TargetDefinition> {
        self.targets.iter()
    }

    /// Distinct collections referenced by the catalog
    pub fn collections(&self) -> BTreeSet<&str> {
        self.targets.iter().map(|t| t.collection.as_str()).collect()
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if the catalog has no targets
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_template(field: &'static str, source: &str) -> ConfigurationResult<Template> {
    Template::parse(source).map_err(|source| ConfigurationError::Template { field, source })
}

fn optional_template(
    field: &'static str,
    source: Option<&str>,
) -> ConfigurationResult<Option<Template>> {
    non_empty(source).map(|s| parse_template(field, s)).transpose()
}

fn column_name(
    configured: Option<&str>,
    source: &FieldSource,
    fallback: &str,
    field: &'static str,
) -> ConfigurationResult<Template> {
    match (non_empty(configured), source) {
        (Some(name), _) => parse_template(field, name),
        (None, FieldSource::Field(template)) => Ok(template.clone()),
        (None, FieldSource::Expression(_)) => parse_template(field, fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::template::TemplateError;
    use serde_json::json;

    fn config() -> DatasourceConfig {
        DatasourceConfig {
            target: "{{x1}}.{{x2}}.{{aggregation}}".to_string(),
            collection: "{{x1}}".to_string(),
            aggregation: Some("AVG,MAX".to_string()),
            x1_variable: Some("a,b".to_string()),
            x2_variable: Some("c".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_expand_counts_and_order() {
        let catalog = TargetCatalog::expand(&config()).unwrap();

        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(
            names,
            vec!["a.c.AVERAGE", "a.c.MAX", "b..AVERAGE", "b..MAX"]
        );
        assert_eq!(catalog.len(), 4);
    }

    #[test]
    fn test_definition_keeps_templates_and_view() {
        let mut cfg = config();
        cfg.filter_expression = Some("doc.host == '{{grafana.host}}'".to_string());
        cfg.alias = Some("{{x1}} ({{grafana.env}})".to_string());

        let catalog = TargetCatalog::expand(&cfg).unwrap();
        let def = catalog.get("b..MAX").unwrap();

        assert_eq!(def.collection, "b");
        assert_eq!(def.aggregation, Aggregation::Max);
        assert_eq!(
            def.filter.as_ref().map(Template::source),
            Some("doc.host == '{{grafana.host}}'")
        );
        assert_eq!(def.view["x1"], json!("b"));
        assert_eq!(def.view["x2"], json!(""));
        assert_eq!(def.view["aggregation"], json!("MAX"));
        assert_eq!(def.view["target"], json!("b..MAX"));
        assert_eq!(def.view["rawTarget"], json!("{{x1}}.{{x2}}.{{aggregation}}"));
        assert!(def.alias.is_some());
    }

    #[test]
    fn test_default_fields() {
        let catalog = TargetCatalog::expand(&config()).unwrap();
        let def = catalog.get("a.c.AVERAGE").unwrap();

        assert!(matches!(&def.date, FieldSource::Field(t) if t.source() == "time"));
        assert!(matches!(&def.value, FieldSource::Field(t) if t.source() == "value"));
        assert_eq!(def.date_name.source(), "time");
        assert_eq!(def.value_name.source(), "value");
    }

    #[test]
    fn test_expression_wins_over_field() {
        let mut cfg = config();
        cfg.value_field = Some("latency".to_string());
        cfg.value_expression = Some("doc.latency / 1000".to_string());

        let catalog = TargetCatalog::expand(&cfg).unwrap();
        let def = catalog.get("a.c.MAX").unwrap();

        assert!(matches!(&def.value, FieldSource::Expression(t) if t.source() == "doc.latency / 1000"));
        assert_eq!(def.value_name.source(), "value");
    }

    #[test]
    fn test_multiple_target_templates() {
        let mut cfg = config();
        cfg.target = "{{x1}}.{{aggregation}}, raw.{{x1}}".to_string();
        cfg.aggregation = Some("sum".to_string());
        cfg.x2_variable = None;

        let catalog = TargetCatalog::expand(&cfg).unwrap();
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["a.SUM", "b.SUM", "raw.a", "raw.b"]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut cfg = config();
        cfg.target = "{{x1}}".to_string();

        let err = TargetCatalog::expand(&cfg).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateTarget { name } if name == "a"));
    }

    #[test]
    fn test_unknown_aggregation_rejected() {
        let mut cfg = config();
        cfg.aggregation = Some("AVG,bogus".to_string());

        assert!(matches!(
            TargetCatalog::expand(&cfg),
            Err(ConfigurationError::UnknownAggregation(name)) if name == "bogus"
        ));
    }

    #[test]
    fn test_bad_template_rejected() {
        let mut cfg = config();
        cfg.filter_expression = Some("doc.x == {{oops".to_string());

        assert!(matches!(
            TargetCatalog::expand(&cfg),
            Err(ConfigurationError::Template { field: "filterExpression", .. })
        ));

        let mut cfg = config();
        cfg.target = "{{{x1}}}.{{aggregation}}".to_string();
        assert!(matches!(
            TargetCatalog::expand(&cfg),
            Err(ConfigurationError::Template {
                field: "target",
                source: TemplateError::InvalidPlaceholder { .. },
            })
        ));
    }

    #[test]
    fn test_missing_target_and_collection() {
        let mut cfg = config();
        cfg.target = " , ".to_string();
        assert!(matches!(
            TargetCatalog::expand(&cfg),
            Err(ConfigurationError::NoTargets)
        ));

        let mut cfg = config();
        cfg.collection = String::new();
        assert!(matches!(
            TargetCatalog::expand(&cfg),
            Err(ConfigurationError::NoCollection)
        ));
    }

    #[test]
    fn test_target_data_attached() {
        let mut cfg = config();
        let mut data = Bindings::new();
        data.insert("unit".to_string(), json!("ms"));
        cfg.target_data.insert("a.c.MAX".to_string(), data);

        let catalog = TargetCatalog::expand(&cfg).unwrap();
        assert_eq!(
            catalog.get("a.c.MAX").unwrap().data.as_ref().unwrap()["unit"],
            json!("ms")
        );
        assert!(catalog.get("a.c.AVERAGE").unwrap().data.is_none());
    }

    #[tokio::test]
    async fn test_build_checks_collections() {
        let store = MemoryStore::new();
        store.create_collection("a").await;

        let err = TargetCatalog::build(&config(), &store).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownCollection(name) if name == "b"));

        store.create_collection("b").await;
        let catalog = TargetCatalog::build(&config(), &store).await.unwrap();
        assert_eq!(catalog.collections().len(), 2);
    }
}
