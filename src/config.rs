//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.
//!
//! The `[datasource]` section carries the metric definitions the target
//! catalog is expanded from. Its keys keep the camelCase names dashboards
//! and existing deployments use (`filterExpression`, `x1_variable`, ...).

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::store::ArangoConfig;
use crate::template::Bindings;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub datasource: DatasourceConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which document store backs the bridge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Arango,
    Memory,
}

/// Document store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_store_url")]
    pub url: String,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_username")]
    pub username: String,

    pub password: Option<String>,

    #[serde(default = "default_store_timeout")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// JSON fixtures for the memory backend
    pub fixtures: Option<PathBuf>,
}

fn default_store_url() -> String {
    "http://localhost:8529".to_string()
}

fn default_database() -> String {
    "_system".to_string()
}

fn default_username() -> String {
    "root".to_string()
}

fn default_store_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_batch_size() -> u32 {
    1000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            database: default_database(),
            username: default_username(),
            password: None,
            request_timeout_ms: default_store_timeout(),
            batch_size: default_batch_size(),
            fixtures: None,
        }
    }
}

impl StoreConfig {
    /// Connection settings for the ArangoDB backend
    pub fn arango(&self) -> ArangoConfig {
        ArangoConfig {
            url: self.url.clone(),
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            request_timeout_ms: self.request_timeout_ms,
            batch_size: self.batch_size,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metric definitions the target catalog is built from
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatasourceConfig {
    /// Comma-separated target name templates
    pub target: String,
    /// Collection name template
    pub collection: String,
    /// Aggregation name, alias, comma-separated list or `*`
    pub aggregation: Option<String>,

    #[serde(rename = "x1_variable")]
    pub x1_variable: Option<String>,
    #[serde(rename = "x2_variable")]
    pub x2_variable: Option<String>,
    #[serde(rename = "x3_variable")]
    pub x3_variable: Option<String>,
    #[serde(rename = "y1_variable")]
    pub y1_variable: Option<String>,
    #[serde(rename = "y2_variable")]
    pub y2_variable: Option<String>,
    #[serde(rename = "y3_variable")]
    pub y3_variable: Option<String>,
    #[serde(rename = "z1_variable")]
    pub z1_variable: Option<String>,
    #[serde(rename = "z2_variable")]
    pub z2_variable: Option<String>,
    #[serde(rename = "z3_variable")]
    pub z3_variable: Option<String>,

    pub filter_expression: Option<String>,
    pub date_field: Option<String>,
    pub date_expression: Option<String>,
    pub date_name: Option<String>,
    pub value_field: Option<String>,
    pub value_expression: Option<String>,
    pub value_name: Option<String>,
    /// Display name template
    pub alias: Option<String>,

    /// Comma-separated scoped variable keys that fan requests out
    pub multi_value_template_variables: Option<String>,
    pub hide_empty: bool,
    pub log_query: bool,
    /// Search target → literal query
    pub template_variables: HashMap<String, String>,
    /// Target name → static bindings
    pub target_data: HashMap<String, Bindings>,
}

impl DatasourceConfig {
    /// The three sub-variables of an axis (`'x'`, `'y'` or `'z'`)
    pub fn axis_variables(&self, axis: char) -> [Option<&str>; 3] {
        let slots = match axis {
            'x' => [&self.x1_variable, &self.x2_variable, &self.x3_variable],
            'y' => [&self.y1_variable, &self.y2_variable, &self.y3_variable],
            'z' => [&self.z1_variable, &self.z2_variable, &self.z3_variable],
            _ => return [None; 3],
        };
        slots.map(|v| v.as_deref())
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("chronicle-bridge").join("config.toml")),
            Some(PathBuf::from("/etc/chronicle-bridge/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(host) = var("BRIDGE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("BRIDGE_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        // Store overrides
        if let Some(url) = var("BRIDGE_STORE_URL") {
            self.store.url = url;
        }
        if let Some(database) = var("BRIDGE_STORE_DATABASE") {
            self.store.database = database;
        }
        if let Some(username) = var("BRIDGE_STORE_USERNAME") {
            self.store.username = username;
        }
        if let Some(password) = var("BRIDGE_STORE_PASSWORD") {
            self.store.password = Some(password);
        }

        // Logging overrides
        if let Some(level) = var("BRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("BRIDGE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Chronicle Bridge Configuration
#
# Environment variables override these settings:
# - BRIDGE_HOST
# - BRIDGE_PORT
# - BRIDGE_STORE_URL
# - BRIDGE_STORE_DATABASE
# - BRIDGE_STORE_USERNAME
# - BRIDGE_STORE_PASSWORD
# - BRIDGE_LOG_LEVEL
# - BRIDGE_LOG_FORMAT

[server]
# Address the SimpleJSON endpoints listen on
host = "0.0.0.0"
port = 8082

[store]
# Backend: arango or memory
backend = "arango"

# ArangoDB endpoint and database
url = "http://localhost:8529"
database = "_system"

# Basic auth credentials
username = "root"
# password = ""

# Per-request timeout (ms) and cursor batch size
request_timeout_ms = 10000
batch_size = 1000

# JSON fixtures loaded by the memory backend
# fixtures = "./fixtures.json"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

[datasource]
# Target name templates, comma-separated. Placeholders: x1..z3,
# aggregation
target = "{{x1}}.{{aggregation}}"

# Collection each target reads from
collection = "{{x1}}"

# Aggregations to expand: a name, an alias (AVG, STDDEV, ...), a
# comma-separated list, or * for all of them. NONE returns raw values.
aggregation = "AVG,MAX"

# Axis variables, comma-separated. Sub-variables of one axis are zipped,
# the x, y and z axes are multiplied.
x1_variable = "requests"
# y1_variable = ""

# Date and value sources: a document attribute or an AQL expression over doc
dateField = "time"
valueField = "value"
# dateExpression = "DATE_TIMESTAMP(doc.created)"
# valueExpression = "doc.bytes / 1024"

# Optional filter, may use dashboard variables as {{grafana.name}}
# filterExpression = "doc.host == '{{grafana.host}}'"

# Display name template
# alias = "{{x1}} ({{aggregation}})"

# Dashboard variables that fan a query out, one series per value
# multiValueTemplateVariables = "host"

# Drop series without datapoints
hideEmpty = false

# Log every compiled query at info level
logQuery = false

# Search targets answered by a literal query
[datasource.templateVariables]
# hosts = "FOR doc IN requests COLLECT host = doc.host RETURN host"

# Static bindings per target name
[datasource.targetData]
# "requests.AVERAGE" = { alias = "Average requests" }
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TargetCatalog;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8082);
        assert_eq!(config.store.backend, StoreBackend::Arango);
        assert_eq!(config.store.arango().url, "http://localhost:8529");
        assert_eq!(config.logging.level, "info");
        assert!(config.datasource.target.is_empty());
    }

    #[test]
    fn test_generated_config_loads() {
        let file = write_config(&generate_default_config());
        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.datasource.target, "{{x1}}.{{aggregation}}");
        assert_eq!(config.datasource.x1_variable.as_deref(), Some("requests"));

        let catalog = TargetCatalog::expand(&config.datasource).unwrap();
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["requests.AVERAGE", "requests.MAX"]);
    }

    #[test]
    fn test_datasource_keys() {
        let file = write_config(
            r#"
[store]
backend = "memory"
fixtures = "data.json"

[datasource]
target = "{{x1}}-{{y1}}"
collection = "c"
x1_variable = "a,b"
y1_variable = "1"
filterExpression = "doc.ok"
multiValueTemplateVariables = "host, env"
hideEmpty = true

[datasource.templateVariables]
hosts = "RETURN 1"

[datasource.targetData."a-1"]
alias = "first"
unit = 3
"#,
        );
        let config = Config::load(file.path()).unwrap();
        let ds = &config.datasource;

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.fixtures, Some(PathBuf::from("data.json")));
        assert_eq!(ds.axis_variables('x'), [Some("a,b"), None, None]);
        assert_eq!(ds.axis_variables('y'), [Some("1"), None, None]);
        assert_eq!(ds.axis_variables('w'), [None, None, None]);
        assert_eq!(ds.filter_expression.as_deref(), Some("doc.ok"));
        assert!(ds.hide_empty);
        assert!(!ds.log_query);
        assert_eq!(ds.template_variables["hosts"], "RETURN 1");
        assert_eq!(ds.target_data["a-1"]["alias"], serde_json::json!("first"));
        assert_eq!(ds.target_data["a-1"]["unit"], serde_json::json!(3));
    }

    #[test]
    fn test_load_errors() {
        let missing = Config::load(Path::new("/nonexistent/bridge.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let file = write_config("[server]\nport = \"not a number\"\n");
        assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        let env: HashMap<&str, &str> = [
            ("BRIDGE_PORT", "9000"),
            ("BRIDGE_STORE_URL", "http://arango:8529"),
            ("BRIDGE_STORE_PASSWORD", "secret"),
            ("BRIDGE_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.store.url, "http://arango:8529");
        assert_eq!(config.store.password.as_deref(), Some("secret"));
        assert_eq!(config.logging.format, "json");

        config.apply_overrides(|key| (key == "BRIDGE_PORT").then(|| "bad".to_string()));
        assert_eq!(config.server.port, 9000);
    }
}
