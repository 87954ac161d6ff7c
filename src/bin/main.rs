//! Tributary CLI - parse SQL into lineage, ingest it, and query the graph
//!
//! Usage:
//!   tributary parse-sql <file|-> [--dialect <dialect>]
//!   tributary parse-procedure <file|-> [--dialect <dialect>] [--name <name>]
//!   tributary ingest <request.json|->
//!   tributary ingest-sql <file|-> --process <urn> [--procedure]
//!   tributary upstream <urn> [--depth <n>] [--as-of <timestamp>]
//!   tributary downstream <urn> [--depth <n>] [--as-of <timestamp>]
//!   tributary audit <urn>
//!   tributary retire <process-urn> [--at <timestamp>]
//!
//! Examples:
//!   tributary parse-sql load_orders.sql --dialect postgres
//!   tributary parse-procedure usp_load.sql --dialect tsql
//!   tributary ingest-sql load_orders.sql --process urn:process:airflow:load_orders --source-type postgres
//!   tributary downstream urn:dataset:postgres:public.orders --depth 3
//!
//! All output is JSON on stdout. Logging goes to stderr and is controlled by
//! `RUST_LOG` (default `warn`).

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tributary::config::{Settings, SettingsError};
use tributary::ingest::{IngestError, IngestRequest, IngestionEngine, ProcessDescriptor};
use tributary::model::Direction;
use tributary::procedure::ProcedureLineageParser;
use tributary::sql::lineage::SqlLineageParser;
use tributary::sql::Dialect;
use tributary::store::{SqliteStore, StoreError};
use tributary::traversal::{TraversalEngine, TraversalError, TraversalRequest};

#[derive(Parser)]
#[command(name = "tributary")]
#[command(about = "Tributary - column-level data lineage from SQL and stored procedures")]
#[command(version)]
struct Cli {
    /// Config file (defaults to TRIBUTARY_CONFIG, ./tributary.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Lineage database path (overrides [store].path)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract lineage from a SQL statement
    ParseSql {
        /// SQL file, or - for stdin
        file: PathBuf,

        /// SQL dialect (defaults to [parser].dialect)
        #[arg(short, long)]
        dialect: Option<Dialect>,

        /// Use only the regex fallback
        #[arg(long)]
        heuristic: bool,
    },

    /// Extract lineage from a stored procedure body
    ParseProcedure {
        /// Procedure file, or - for stdin
        file: PathBuf,

        /// Procedure language (plsql, tsql, plpgsql, ...)
        #[arg(short, long)]
        dialect: Option<Dialect>,

        /// Procedure name (inferred from the CREATE header if omitted)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Ingest a JSON ingestion request
    Ingest {
        /// Request file, or - for stdin
        file: PathBuf,
    },

    /// Parse SQL or a procedure and ingest the result
    IngestSql {
        /// SQL file, or - for stdin
        file: PathBuf,

        /// Process URN the lineage is attributed to
        #[arg(short, long)]
        process: String,

        /// Source type used in dataset URNs (defaults to the dialect name)
        #[arg(long)]
        source_type: Option<String>,

        /// SQL dialect (defaults to [parser].dialect)
        #[arg(short, long)]
        dialect: Option<Dialect>,

        /// Treat the input as a stored procedure body
        #[arg(long)]
        procedure: bool,

        /// Explicit ingestion id
        #[arg(long)]
        ingestion_id: Option<String>,

        /// Audit actor
        #[arg(long)]
        actor: Option<String>,
    },

    /// Walk lineage towards sources
    Upstream(TraverseArgs),

    /// Walk lineage towards consumers
    Downstream(TraverseArgs),

    /// Show the audit history of a dataset, process or edge key
    Audit {
        urn: String,
    },

    /// Close every active edge of a process
    Retire {
        process: String,

        /// Closing timestamp (RFC 3339, defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Audit actor
        #[arg(long)]
        actor: Option<String>,
    },
}

#[derive(clap::Args)]
struct TraverseArgs {
    /// Dataset URN to start from
    urn: String,

    /// Maximum hops (capped at 5)
    #[arg(short, long, default_value_t = 1)]
    depth: u32,

    /// Point-in-time query (RFC 3339)
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Settings(#[from] SettingsError),

    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid ingestion request: {0}")]
    Request(serde_json::Error),

    #[error("failed to write output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Ingest(#[from] IngestError),

    #[error("{0}")]
    Traversal(#[from] TraversalError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::load()?,
    };

    match cli.command {
        Commands::ParseSql {
            file,
            dialect,
            heuristic,
        } => {
            let sql = read_input(&file)?;
            let dialect = resolve_dialect(dialect, &settings)?;
            let parser = if heuristic {
                SqlLineageParser::heuristic_only()
            } else {
                SqlLineageParser::from_settings(&settings.parser)
            };
            print_json(&parser.parse(&sql, dialect))
        }
        Commands::ParseProcedure {
            file,
            dialect,
            name,
        } => {
            let code = read_input(&file)?;
            let dialect = resolve_dialect(dialect, &settings)?;
            let parser = ProcedureLineageParser::from_settings(&settings.parser);
            print_json(&parser.parse(&code, dialect, name.as_deref()))
        }
        Commands::Ingest { file } => {
            let request: IngestRequest =
                serde_json::from_str(&read_input(&file)?).map_err(CliError::Request)?;
            let store = open_store(&cli.store, &settings)?;
            let engine = IngestionEngine::from_settings(store, &settings);
            print_json(&engine.ingest(request).await?)
        }
        Commands::IngestSql {
            file,
            process,
            source_type,
            dialect,
            procedure,
            ingestion_id,
            actor,
        } => {
            let text = read_input(&file)?;
            let dialect = resolve_dialect(dialect, &settings)?;
            let source_type = source_type.unwrap_or_else(|| dialect.to_string());
            let descriptor = ProcessDescriptor::new(process).with_process_type(if procedure {
                "stored_procedure"
            } else {
                "sql"
            });

            let mut request = if procedure {
                let fact = ProcedureLineageParser::from_settings(&settings.parser)
                    .parse(&text, dialect, None);
                let descriptor = match &fact.procedure_name {
                    Some(name) => descriptor.with_name(name.clone()),
                    None => descriptor,
                };
                IngestRequest::from_procedure_fact(descriptor, &fact, &source_type)
            } else {
                let fact = SqlLineageParser::from_settings(&settings.parser).parse(&text, dialect);
                IngestRequest::from_lineage_fact(descriptor, &fact, &source_type)
            };
            request.process.definition = Some(serde_json::json!({ "sql": text }));
            request.ingestion_id = ingestion_id;
            request.actor = actor;

            let store = open_store(&cli.store, &settings)?;
            let engine = IngestionEngine::from_settings(store, &settings);
            print_json(&engine.ingest(request).await?)
        }
        Commands::Upstream(args) => {
            traverse(&cli.store, &settings, Direction::Upstream, args).await
        }
        Commands::Downstream(args) => {
            traverse(&cli.store, &settings, Direction::Downstream, args).await
        }
        Commands::Audit { urn } => {
            let store = open_store(&cli.store, &settings)?;
            let engine = TraversalEngine::from_settings(store, &settings);
            print_json(&engine.audit_trail(&urn).await?)
        }
        Commands::Retire { process, at, actor } => {
            let store = open_store(&cli.store, &settings)?;
            let engine = IngestionEngine::from_settings(store, &settings);
            print_json(&engine.retire_edges(&process, at, actor.as_deref()).await?)
        }
    }
}

async fn traverse(
    store: &Option<PathBuf>,
    settings: &Settings,
    direction: Direction,
    args: TraverseArgs,
) -> Result<(), CliError> {
    let engine = TraversalEngine::from_settings(open_store(store, settings)?, settings);
    let request = TraversalRequest::new(args.urn, direction, args.depth).as_of(args.as_of);
    print_json(&engine.traverse(request).await?)
}

fn resolve_dialect(arg: Option<Dialect>, settings: &Settings) -> Result<Dialect, CliError> {
    match arg {
        Some(d) => Ok(d),
        None => Ok(settings.parser.dialect()?),
    }
}

fn open_store(arg: &Option<PathBuf>, settings: &Settings) -> Result<Arc<SqliteStore>, CliError> {
    let store = match arg {
        Some(path) => SqliteStore::open(path)?,
        None => match settings.store.resolved_path()? {
            Some(path) => SqliteStore::open(path)?,
            None => SqliteStore::open_default()?,
        },
    };
    Ok(Arc::new(store))
}

/// Read a file, or stdin for `-`.
fn read_input(path: &Path) -> Result<String, CliError> {
    let result = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).map(|_| buf)
    } else {
        fs::read_to_string(path)
    };
    result.map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
