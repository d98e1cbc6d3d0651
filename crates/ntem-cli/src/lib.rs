//! Command surface for building an NTEM database and running query configs against it.
//!
//! - `ntem build --config build.yml` reconciles zones and loads every scenario.
//! - `ntem query --config query.yml` writes one CSV per configured query.
//!
//! Both commands print a JSON report on stdout; diagnostics go to stderr and to
//! an `ntem.log` file next to the database (build) or in the output directory (query).

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ntem_core::{BuildConfig, NtemError, QueryConfig, RunOptions, YearGrid};
use ntem_store_sqlite::{build_database, SqliteNtemStore};
use serde::Serialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable overriding `--log-level` with a full filter directive.
pub const LOG_ENV: &str = "NTEM_LOG";

/// Per-run log file appended to by every command.
pub const LOG_FILE_NAME: &str = "ntem.log";

#[derive(Debug, Parser)]
#[command(name = "ntem")]
#[command(about = "NTEM database builder and trip-end query runner")]
pub struct Cli {
    /// Default tracing level when NTEM_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print the full error chain on failure.
    #[arg(long, global = true)]
    verbose_errors: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build (or extend) a database from a build config.
    Build {
        #[arg(long)]
        config: PathBuf,
    },
    /// Run every query of a query config and write CSV outputs.
    Query {
        #[arg(long)]
        config: PathBuf,
    },
}

impl Cli {
    #[must_use]
    pub fn options(&self) -> RunOptions {
        RunOptions {
            log_level: self.log_level.clone(),
            verbose_errors: self.verbose_errors,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueryOutput {
    pub name: String,
    pub path: PathBuf,
    pub rows: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct QueryReport {
    pub database: PathBuf,
    pub outputs: Vec<QueryOutput>,
}

/// Installs the stderr subscriber and, when `log_file` is given, a plain-text copy
/// appended to that file. A second call in one process is a no-op.
///
/// # Errors
/// Returns an error when the log file cannot be opened.
pub fn init_logging(options: &RunOptions, log_file: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&options.log_level));
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
    Ok(())
}

/// Log file of a build: beside the database it writes.
#[must_use]
pub fn build_log_path(config: &BuildConfig) -> PathBuf {
    match config.output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(LOG_FILE_NAME),
        _ => PathBuf::from(LOG_FILE_NAME),
    }
}

/// Log file of a query run: inside its output directory.
#[must_use]
pub fn query_log_path(config: &QueryConfig) -> PathBuf {
    config.output_path.join(LOG_FILE_NAME)
}

/// Executes the parsed command.
///
/// Logging starts once the config is parsed, since the log file lives beside
/// the command's outputs.
///
/// # Errors
/// Returns an error when the config is invalid, the sources or database cannot
/// be read, or a query fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let options = cli.options();
    match cli.command {
        Command::Build { config } => {
            let config = BuildConfig::from_path(&config)?;
            let log_path = build_log_path(&config);
            if let Some(parent) =
                log_path.parent().filter(|parent| !parent.as_os_str().is_empty())
            {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
            init_logging(&options, Some(&log_path))?;
            tracing::info!(
                output = %config.output_path.display(),
                scenarios = config.sources.len(),
                "building database"
            );
            let report = build_database(&config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Query { config } => {
            let config = QueryConfig::from_path(&config)?;
            create_output_dir(&config.output_path)?;
            init_logging(&options, Some(&query_log_path(&config)))?;
            let report = run_queries(&config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn create_output_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create output directory {}", path.display()))
}

/// Runs every query of `config` against its database and writes `<output_path>/<name>.csv`.
///
/// # Errors
/// Returns the first query or output failure; earlier outputs stay on disk.
pub fn run_queries(config: &QueryConfig) -> Result<QueryReport> {
    if !config.db_path.is_file() {
        return Err(NtemError::Configuration(format!(
            "database {} does not exist; run `ntem build` first",
            config.db_path.display()
        ))
        .into());
    }
    let store = SqliteNtemStore::open(&config.db_path)?;
    create_output_dir(&config.output_path)?;

    let grid = YearGrid::default();
    let mut outputs = Vec::new();
    for query in config.queries()? {
        let name = query.name();
        let table = store
            .run_query(&query, &grid)
            .with_context(|| format!("query {name} failed"))?;
        let path = output_file(&config.output_path, &name);
        table.write_csv(&path)?;
        tracing::info!(query = %name, path = %path.display(), "wrote output");
        outputs.push(QueryOutput {
            name,
            path,
            rows: table.len(),
            columns: table.columns.iter().map(ToString::to_string).collect(),
        });
    }

    Ok(QueryReport {
        database: config.db_path.clone(),
        outputs,
    })
}

fn output_file(directory: &Path, name: &str) -> PathBuf {
    directory.join(format!("{name}.csv"))
}

/// Renders an error for stderr according to `verbose_errors`.
#[must_use]
pub fn render_error(err: &anyhow::Error, options: &RunOptions) -> String {
    if options.verbose_errors {
        format!("error: {err:#}")
    } else {
        format!("error: {err}")
    }
}
