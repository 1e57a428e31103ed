//! Chronicle Bridge
//!
//! Command-line entry point:
//! - Serve the SimpleJSON API
//! - List the expanded target catalog
//! - Compile a target to AQL without running it
//! - Generate a default config file

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chronicle_bridge::api::{serve, ApiConfig, AppState};
use chronicle_bridge::catalog::TargetCatalog;
use chronicle_bridge::config::{generate_default_config, Config, LoggingConfig, StoreBackend};
use chronicle_bridge::query::{
    OutputShape, QueryParams, QueryRunner, RunnerOptions, ScopedVariable, ScopedVars, TargetQuery,
    TimeRange,
};
use chronicle_bridge::store::{ArangoStore, DocumentStore, MemoryStore};

#[derive(Parser)]
#[command(name = "chronicle-bridge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Grafana SimpleJSON datasource for ArangoDB")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve,

    /// List every target the configuration expands to
    Targets,

    /// Print the AQL a target compiles to
    Compile {
        /// Target name from the catalog
        target: String,
        /// Range start: epoch ms or RFC 3339 (default: 6 hours ago)
        #[arg(long)]
        from: Option<String>,
        /// Range end: epoch ms or RFC 3339 (default: now)
        #[arg(long)]
        to: Option<String>,
        /// Bucket width in milliseconds
        #[arg(long, default_value = "60000")]
        interval_ms: i64,
        /// Compile for a table response
        #[arg(long)]
        table: bool,
        /// Dashboard variable in key=value format, repeat a key for multi-value
        #[arg(short = 'V', long = "var")]
        vars: Vec<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        return write_default_config(output.as_deref());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve => run_server(config).await,
        Commands::Targets => {
            let catalog = TargetCatalog::expand(&config.datasource)?;
            for def in catalog.iter() {
                println!("{}\t{}\t{}", def.name, def.collection, def.aggregation);
            }
            Ok(())
        }
        Commands::Compile {
            target,
            from,
            to,
            interval_ms,
            table,
            vars,
        } => {
            let range = compile_range(from.as_deref(), to.as_deref())?;
            let shape = if table {
                OutputShape::Table
            } else {
                OutputShape::Timeserie
            };
            compile_target(&config, target, range, interval_ms, shape, &vars)
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("chronicle_bridge={},tower_http=info", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting Chronicle bridge v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&config).await?;

    match store.ping().await {
        Ok(()) => tracing::info!("Connected to {} store", store.name()),
        Err(e) => tracing::warn!("{} store not reachable yet: {}", store.name(), e),
    }

    // The catalog must be complete before the listener accepts requests
    let catalog = TargetCatalog::build(&config.datasource, store.as_ref())
        .await
        .context("failed to build target catalog")?;

    let runner = QueryRunner::new(
        Arc::new(catalog),
        Arc::clone(&store),
        RunnerOptions::from_config(&config.datasource),
    );

    let api_config = ApiConfig::from_server(&config.server);
    serve(AppState::new(Arc::new(runner), store, api_config.clone()), &api_config).await?;

    tracing::info!("Chronicle bridge stopped");
    Ok(())
}

async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.store.backend {
        StoreBackend::Arango => {
            let arango = config.store.arango();
            tracing::info!("ArangoDB store: {} (database {})", arango.url, arango.database);
            Ok(Arc::new(ArangoStore::new(arango)?))
        }
        StoreBackend::Memory => {
            let store = match &config.store.fixtures {
                Some(path) => MemoryStore::from_fixtures(path)
                    .with_context(|| format!("failed to load fixtures from {:?}", path))?,
                None => MemoryStore::new(),
            };
            tracing::info!("In-memory store, fixtures: {:?}", config.store.fixtures);
            Ok(Arc::new(store))
        }
    }
}

fn compile_target(
    config: &Config,
    target: String,
    range: TimeRange,
    interval_ms: i64,
    shape: OutputShape,
    vars: &[String],
) -> anyhow::Result<()> {
    let catalog = Arc::new(TargetCatalog::expand(&config.datasource)?);
    let runner = QueryRunner::new(
        catalog,
        Arc::new(MemoryStore::new()),
        RunnerOptions::from_config(&config.datasource),
    );

    let params = QueryParams {
        range,
        interval_ms,
        targets: vec![TargetQuery {
            target,
            shape,
            data: None,
        }],
        scoped_vars: parse_vars(vars)?,
    };

    for planned in runner.plan(&params)? {
        println!("-- {}", planned.display);
        println!("{}", serde_json::to_string_pretty(&planned.plan.to_aql())?);
    }

    Ok(())
}

fn compile_range(from: Option<&str>, to: Option<&str>) -> anyhow::Result<TimeRange> {
    let end = match to {
        Some(s) => parse_time(s)?,
        None => Utc::now().timestamp_millis(),
    };
    let start = match from {
        Some(s) => parse_time(s)?,
        None => end - 6 * 3_600_000,
    };

    Ok(TimeRange::checked(start, end)?)
}

fn parse_time(s: &str) -> anyhow::Result<i64> {
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    let dt = DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp: {}", s))?;
    Ok(dt.with_timezone(&Utc).timestamp_millis())
}

/// Collect `key=value` pairs; a key given more than once becomes an array
fn parse_vars(vars: &[String]) -> anyhow::Result<ScopedVars> {
    let mut scoped = ScopedVars::new();

    for pair in vars {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid variable (expected key=value): {}", pair);
        };
        let value = Value::String(value.to_string());

        let entry = scoped.entry(key.trim().to_string()).or_insert_with(ScopedVariable::default);
        entry.value = match std::mem::take(&mut entry.value) {
            Value::Null => value,
            Value::Array(mut values) => {
                values.push(value);
                Value::Array(values)
            }
            previous => Value::Array(vec![previous, value]),
        };
    }

    Ok(scoped)
}

fn write_default_config(output: Option<&Path>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("failed to write {:?}", path))?;
            println!("Config written to {:?}", path);
        }
        None => print!("{}", content),
    }
    Ok(())
}
