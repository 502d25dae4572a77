use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use flatbridge::config::LogFormat;
use flatbridge::executor::ExecutorMode;
use flatbridge::progress::ProgressEvent;
use flatbridge::{
    connect, read_header, BatchIngestor, ColumnMatching, ColumnProjector,
    ColumnSelection, Config, ExportOptions, IngestOptions, JoinOutcome, JoinPlanner, JoinSpec,
    MalformedRowPolicy,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    Duckdb,
    Clickhouse,
}

impl From<Backend> for ExecutorMode {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Duckdb => ExecutorMode::DuckDb,
            Backend::Clickhouse => ExecutorMode::ClickHouse,
        }
    }
}

#[derive(Parser)]
#[command(name = "flatbridge")]
#[command(about = "Move tables between ClickHouse or DuckDB and delimited files")]
struct Args {
    #[arg(long, global = true, help = "Path to configuration file (TOML)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, help = "Overrides connection.backend")]
    backend: Option<Backend>,

    #[arg(long, global = true, help = "DuckDB database file; overrides connection.path")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List tables in the configured database
    Tables,
    /// Print the column names of a table
    Schema {
        #[arg(long)]
        table: String,
    },
    /// Print the header fields of a delimited file
    FileSchema {
        #[arg(long)]
        file: PathBuf,
    },
    /// Load a delimited file into an existing table
    Ingest {
        #[arg(long)]
        table: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long, help = "Skip rows with the wrong field count instead of failing")]
        skip_malformed: bool,
        #[arg(long, help = "Match file columns to table columns by header name")]
        by_name: bool,
        #[arg(long, help = "Report progress on stderr")]
        progress: bool,
    },
    /// Write selected columns of a table to a delimited file
    Export {
        #[arg(long)]
        table: String,
        #[arg(long, default_value = "", help = "Comma-separated columns; all when empty")]
        columns: String,
        #[arg(long, help = "Output file; stdout when omitted")]
        output: Option<PathBuf>,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Show the first rows of a table as JSON
    Preview {
        #[arg(long)]
        table: String,
        #[arg(long, default_value = "")]
        columns: String,
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Join two tables into a new table or a delimited file
    Join {
        #[arg(long)]
        left: String,
        #[arg(long)]
        right: String,
        #[arg(long = "on", help = "Join condition, passed to the database as written")]
        condition: String,
        #[arg(long)]
        columns: String,
        #[arg(long, conflicts_with = "output")]
        target: Option<String>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.connection.backend = backend.into();
    }
    if let Some(db) = args.db {
        config.connection.path = Some(db);
    }

    init_tracing(&config);

    let delimiter = config.transfer.delimiter;

    if let Command::FileSchema { file } = &args.command {
        for field in read_header(file, delimiter)? {
            println!("{}", field);
        }
        return Ok(());
    }

    let backend = connect(&config.connection).await?;

    match args.command {
        // Printed above, without a connection.
        Command::FileSchema { .. } => {}
        Command::Tables => {
            for table in backend.list_tables().await? {
                println!("{}", table);
            }
        }
        Command::Schema { table } => {
            let schema = flatbridge::SchemaIntrospector::new(backend.as_ref())
                .schema(&table)
                .await?;
            for column in schema.columns {
                println!("{}", column);
            }
        }
        Command::Ingest {
            table,
            file,
            batch_size,
            skip_malformed,
            by_name,
            progress,
        } => {
            let mut options = IngestOptions::from(&config.transfer);
            if let Some(size) = batch_size {
                anyhow::ensure!(size > 0, "--batch-size must be at least 1");
                options.batch_size = size;
            }
            if skip_malformed {
                options.malformed_rows = MalformedRowPolicy::Skip;
            }
            if by_name {
                options.column_matching = ColumnMatching::ByName;
            }

            let token = CancellationToken::new();
            let ctrl_c = token.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    info!("Interrupted, stopping after the current batch");
                    ctrl_c.cancel();
                }
            });

            let ingestor = BatchIngestor::new(backend.as_ref(), options).with_cancellation(token);

            let result = if progress {
                let (mut tx, mut rx) = mpsc::channel::<ProgressEvent>(64);
                let printer = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        eprintln!(
                            "{:>3}% ({}/{} rows)",
                            event.percent, event.completed, event.total
                        );
                    }
                });
                let result = ingestor
                    .ingest_file_with_progress(&table, &file, &mut tx)
                    .await;
                drop(tx);
                let _ = printer.await;
                result?
            } else {
                ingestor.ingest_file(&table, &file).await?
            };

            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Export {
            table,
            columns,
            output,
            limit,
        } => {
            let projector = ColumnProjector::new(backend.as_ref());
            let selection = ColumnSelection::parse(&columns);
            let options = ExportOptions { delimiter, limit };
            let result = match output {
                Some(path) => {
                    projector
                        .export_to_path(&table, &selection, &path, &options)
                        .await?
                }
                None => {
                    projector
                        .export(&table, &selection, BufWriter::new(io::stdout()), &options)
                        .await?
                }
            };
            info!(table = %table, rows = result.rows_written, "Exported");
        }
        Command::Preview {
            table,
            columns,
            limit,
        } => {
            let limit = limit.unwrap_or(config.transfer.preview_limit);
            let result = ColumnProjector::new(backend.as_ref())
                .preview(&table, &ColumnSelection::parse(&columns), Some(limit))
                .await?;
            println!("{}", serde_json::to_string_pretty(&result.to_records())?);
        }
        Command::Join {
            left,
            right,
            condition,
            columns,
            target,
            output,
        } => {
            let mut spec = JoinSpec::new(left, right, condition, ColumnSelection::parse(&columns));
            if let Some(target) = target {
                spec = spec.with_target(target);
            }
            let sink: Box<dyn Write + Send> = match output {
                Some(path) => Box::new(BufWriter::new(std::fs::File::create(&path)?)),
                None => Box::new(BufWriter::new(io::stdout())),
            };

            match JoinPlanner::new(backend.as_ref())
                .run(&spec, sink, delimiter)
                .await?
            {
                JoinOutcome::Materialized { table, rows } => {
                    println!("Created table {} ({} rows)", table, rows);
                }
                JoinOutcome::Exported(result) => {
                    info!(rows = result.rows_written, "Exported join");
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .init();
        }
    }
}
