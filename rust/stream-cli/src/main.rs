//! Shard Stream command-line driver.
//!
//! Streams the records of a dataset and reports how far it got, so a run
//! can be resumed from the printed cursor.
//!
//! # Usage
//!
//! ```bash
//! # Count every record of a parquet dataset under ./data
//! shard-stream --dataset wikipedia-embeddings
//!
//! # Resume after record 31364096 and print the next 1000 records as JSON lines
//! shard-stream --dataset wikipedia-embeddings --start-offset 31364096 --limit 1000 --print
//!
//! # Start with configuration file
//! shard-stream --config stream.toml
//! ```

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_core::{JsonLinesFormat, RecordStream, StreamOptions, Streamer, StreamerConfig};

/// Resumable shard record streamer
#[derive(Parser, Debug)]
#[command(name = "shard-stream")]
#[command(about = "Stream the records of a sharded dataset from a global offset")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset to stream (overrides stream.dataset)
    #[arg(short, long)]
    dataset: Option<String>,

    /// Root directory of the datasets (overrides storage.base_path)
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// Directory for local shard copies (overrides cache.cache_dir)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Number of records already consumed
    #[arg(short, long)]
    start_offset: Option<u64>,

    /// Last global cursor to yield
    #[arg(short, long)]
    end_offset: Option<u64>,

    /// Stop after this many records
    #[arg(long)]
    limit: Option<usize>,

    /// Shard file format
    #[arg(short, long, value_enum, default_value = "parquet")]
    format: ShardFormat,

    /// Read every shard synchronously
    #[arg(long)]
    no_prefetch: bool,

    /// Print records to stdout as JSON lines
    #[arg(long)]
    print: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ShardFormat {
    Parquet,
    Jsonl,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so that --print output stays clean.
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let config = load_config(&args)?;
    if config.stream.dataset.is_empty() {
        return Err("no dataset given; pass --dataset or set stream.dataset".into());
    }

    let options = StreamOptions {
        dataset: config.stream.dataset.clone(),
        start_offset: config.stream.start_offset,
        end_offset: config.stream.end_offset,
    };

    match args.format {
        ShardFormat::Parquet => {
            let streamer = Streamer::from_config(config)?;
            drain(streamer.open_with(options)?, &args, |row| row.to_json_value())
        }
        ShardFormat::Jsonl => {
            let streamer = Streamer::with_format(config, JsonLinesFormat::new())?;
            drain(streamer.open_with(options)?, &args, Value::clone)
        }
    }
}

fn load_config(args: &Args) -> Result<StreamerConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => StreamerConfig::from_file(path)?,
        None => StreamerConfig::default(),
    }
    .with_env_overrides();

    if let Some(dataset) = &args.dataset {
        config.stream.dataset = dataset.clone();
    }
    if let Some(base_path) = &args.base_path {
        config.storage.base_path = base_path.clone();
    }
    if let Some(cache_dir) = &args.cache_dir {
        config.cache.cache_dir = cache_dir.clone();
    }
    if let Some(start) = args.start_offset {
        config.stream.start_offset = start;
    }
    if args.end_offset.is_some() {
        config.stream.end_offset = args.end_offset;
    }
    if args.format == ShardFormat::Jsonl && config.catalog.extension.as_deref() == Some("parquet") {
        config.catalog.extension = Some("jsonl".to_string());
    }
    if args.no_prefetch {
        config.prefetch.enabled = false;
    }

    Ok(config)
}

fn drain<R>(
    mut stream: RecordStream<R>,
    args: &Args,
    to_json: impl Fn(&R) -> Value,
) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let mut out = BufWriter::new(io::stdout().lock());
    let mut yielded: u64 = 0;

    for (cursor, record) in stream.by_ref().take(args.limit.unwrap_or(usize::MAX)) {
        if args.print {
            let line = json!({ "cursor": cursor, "record": to_json(&record) });
            writeln!(out, "{line}")?;
        }
        yielded += 1;
    }
    out.flush()?;

    let elapsed = started.elapsed();
    let stats = stream.stats();
    let rate = if elapsed.as_secs_f64() > 0.0 {
        yielded as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    for gap in stream.gap_skips() {
        tracing::warn!(%gap, "shard missing from stream");
    }

    tracing::info!(
        dataset = stream.dataset(),
        records = yielded,
        resume_from = stream.cursor(),
        shards = stats.shards_total,
        shards_completed = stats.shards_completed,
        shards_skipped = stats.shards_skipped,
        records_suppressed = stats.records_suppressed,
        prefetch_hits = stats.prefetch_hits,
        prefetch_misses = stats.prefetch_misses,
        fetch_retries = stats.fetch_retries,
        prefetch_wait_ms = stats.prefetch_wait.as_millis() as u64,
        elapsed_ms = elapsed.as_millis() as u64,
        records_per_sec = rate,
        "stream finished"
    );

    Ok(())
}
