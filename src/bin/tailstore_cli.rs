use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use tailstore::query::guard::{apply_limit, parse_limit, validate_sql, QueryErrorBody};
use tailstore::{CompactionOutcome, HourBucket, PartitionLayout, Shape, Store, StoreConfig};

#[derive(Parser)]
#[command(name = "tailstore-cli", version, about = "Inspect and maintain a tailstore directory")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Store root (hot-store file and partition trees)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// JSON store config; overrides --base-dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hot-store file (default <base-dir>/tailstore.duckdb)
    #[arg(long)]
    db_path: Option<PathBuf>,
}

impl StoreArgs {
    fn to_config(&self) -> Result<StoreConfig> {
        let mut config = match (&self.config, &self.base_dir) {
            (Some(path), _) => StoreConfig::from_json_file(path)
                .with_context(|| format!("load config {}", path.display()))?,
            (None, Some(base_dir)) => StoreConfig::new(base_dir),
            (None, None) => bail!("either --base-dir or --config is required"),
        };
        if let Some(db_path) = &self.db_path {
            config.db_path = Some(db_path.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a read-only query over hot rows and compacted hours
    Query {
        #[command(flatten)]
        store: StoreArgs,

        #[arg(long)]
        sql: String,

        /// Row limit appended when the query has none (0 = unlimited)
        #[arg(long, default_value = "")]
        limit: String,

        #[arg(long, default_value_t = 5_000)]
        timeout_ms: u64,
    },
    /// Compact one hour from the hot store into its partition file
    Compact {
        #[command(flatten)]
        store: StoreArgs,

        /// runtime | status
        #[arg(long)]
        shape: Shape,

        /// Hour as YYYY-MM-DDTHH (UTC)
        #[arg(long)]
        hour: String,
    },
    /// List compacted partition files
    Partitions {
        #[command(flatten)]
        store: StoreArgs,

        #[arg(long)]
        shape: Option<Shape>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Query {
            store,
            sql,
            limit,
            timeout_ms,
        } => cmd_query(&store, &sql, &limit, Duration::from_millis(timeout_ms)).await,
        Commands::Compact { store, shape, hour } => cmd_compact(&store, shape, &hour),
        Commands::Partitions { store, shape } => cmd_partitions(&store, shape),
    }
}

async fn cmd_query(args: &StoreArgs, sql: &str, limit: &str, deadline: Duration) -> Result<ExitCode> {
    let checked = parse_limit(limit).and_then(|limit| {
        let sql = validate_sql(sql)?;
        Ok(apply_limit(sql, limit))
    });
    let sql = match checked {
        Ok(sql) => sql,
        Err(err) => return print_query_error(&err.to_string(), sql),
    };

    let store = Store::open(args.to_config()?)?;
    let result = store.query_with_timeout(&sql, deadline).await;
    store.close()?;
    match result {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => print_query_error(&format!("query failed: {err}"), &sql),
    }
}

fn print_query_error(message: &str, sql: &str) -> Result<ExitCode> {
    let body = QueryErrorBody::new(message, sql);
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(ExitCode::FAILURE)
}

fn cmd_compact(args: &StoreArgs, shape: Shape, hour: &str) -> Result<ExitCode> {
    let bucket = HourBucket::parse(hour).with_context(|| format!("parse hour {hour}"))?;
    let store = Store::open(args.to_config()?)?;
    let outcome = store.compact_hour(shape, bucket);
    store.close()?;
    match outcome? {
        CompactionOutcome::Skipped => {
            info!("no hot rows for {shape} hour {bucket}");
            println!("{shape} {bucket}: nothing to compact");
        }
        CompactionOutcome::Compacted { rows, path, deleted } => {
            println!(
                "{shape} {bucket}: {rows} rows -> {} ({deleted} removed from hot store)",
                path.display()
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_partitions(args: &StoreArgs, shape: Option<Shape>) -> Result<ExitCode> {
    let config = args.to_config()?;
    let layout = PartitionLayout::new(&config.base_dir);
    let shapes = match shape {
        Some(shape) => vec![shape],
        None => Shape::ALL.to_vec(),
    };
    for shape in shapes {
        for (bucket, path) in layout.list_files(shape)? {
            let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            println!("{shape}\t{bucket}\t{bytes}\t{}", path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
