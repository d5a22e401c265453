use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use veclite::{ConnectionConfig, Database, RecordInsert, RecordJson};

/// A tiny file-backed vector database
#[derive(Parser, Debug)]
#[command(name = "veclite")]
#[command(about = "A tiny file-backed vector database", long_about = None)]
struct Args {
    /// Path to the database file
    #[arg(short, long)]
    db: PathBuf,

    /// Vector dimensionality (read from the file when omitted)
    #[arg(long)]
    dimensions: Option<u32>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print index statistics
    Stats,
    /// Insert records from JSON lines ({"vector": [...], "metadata": {...}})
    Insert {
        /// Input file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Query the k nearest records
    Query {
        /// Query vector, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        vector: Vec<f32>,

        #[arg(long, default_value_t = 10)]
        k: usize,

        /// JSON metadata filter
        #[arg(long)]
        filter: Option<String>,
    },
    /// Delete records by id or by metadata filter
    Delete {
        /// Record ids, comma separated
        #[arg(long, value_delimiter = ',', conflicts_with = "filter")]
        ids: Vec<i32>,

        /// JSON metadata filter
        #[arg(long)]
        filter: Option<String>,
    },
    /// Rewrite the file, dropping tombstoned records
    Compact,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Command::Stats = args.command {
        let stats = Database::stats(&args.db)?;
        println!(
            "{}",
            serde_json::json!({
                "dimensions": stats.dimensions,
                "live_count": stats.live_count,
                "tombstone_count": stats.tombstone_count,
                "file_size": stats.file_size,
            })
        );
        return Ok(());
    }

    let dimensions = match args.dimensions {
        Some(d) => d,
        None => {
            Database::stats(&args.db)
                .context("database does not exist yet; pass --dimensions to create it")?
                .dimensions
        }
    };
    let db = Database::connect(&args.db, ConnectionConfig::new(dimensions))?;

    match args.command {
        Command::Stats => unreachable!("handled above"),
        Command::Insert { file } => {
            let reader: Box<dyn BufRead> = match file {
                Some(path) => Box::new(BufReader::new(
                    std::fs::File::open(&path)
                        .with_context(|| format!("opening {}", path.display()))?,
                )),
                None => Box::new(BufReader::new(std::io::stdin())),
            };

            let mut batch: Vec<RecordInsert> = Vec::new();
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let row: RecordJson = serde_json::from_str(&line)
                    .with_context(|| format!("parsing line {}", lineno + 1))?;
                batch.push(row.into());
            }

            let inserted = db.insert_many(&batch)?;
            info!(inserted, "insert complete");
            println!("{inserted}");
        }
        Command::Query { vector, k, filter } => {
            let hits = match filter {
                Some(f) => db.top_k_with_filter(&vector, k, &f)?,
                None => db.top_k(&vector, k)?,
            };
            for hit in hits {
                let metadata = hit
                    .metadata_json()
                    .unwrap_or(serde_json::Value::Null);
                println!(
                    "{}",
                    serde_json::json!({
                        "id": hit.id,
                        "score": hit.score,
                        "metadata": metadata,
                    })
                );
            }
        }
        Command::Delete { ids, filter } => {
            let deleted = match filter {
                Some(f) => db.delete_by_filter(&f)?,
                None => db.delete_by_ids(&ids)?,
            };
            info!(deleted, "delete complete");
            println!("{deleted}");
        }
        Command::Compact => {
            db.compact()?;
            let stats = Database::stats(&args.db)?;
            info!(
                live = stats.live_count,
                file_size = stats.file_size,
                "compaction complete"
            );
        }
    }

    Ok(())
}
