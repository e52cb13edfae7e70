// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event hub relay CLI
//!
//! Command-line tool for relaying partition records to a streaming API.
//!
//! # Usage
//!
//! ```bash
//! # One partition per input file
//! hubrelay --input p0.jsonl --input p1.jsonl \
//!     --endpoint https://cell-1.example.com --stream-id ocid1.stream.oc1..abc
//!
//! # Dry run from stdin, stop once the input goes quiet
//! tail -f events.jsonl | hubrelay --dry-run --drain
//!
//! # Using configuration file
//! hubrelay --config relay.toml
//! ```

use clap::{Parser, Subcommand};
use hubrelay::config::mask;
use hubrelay::{
    DispatchStatsSnapshot, EnvOverrides, LineSource, Relay, RelayConfig, RelayError,
    StartPosition,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// Event hub to streaming relay
#[derive(Parser, Debug)]
#[command(name = "hubrelay")]
#[command(about = "Batch partition records into a streaming ingestion API")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input file, one record per line (repeat for more partitions; default stdin)
    #[arg(short, long)]
    input: Vec<PathBuf>,

    /// Destination messages endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Destination stream identifier
    #[arg(long)]
    stream_id: Option<String>,

    /// Maximum records per batch
    #[arg(long)]
    max_batch_size: Option<usize>,

    /// Maximum encoded bytes per batch
    #[arg(long)]
    max_batch_bytes: Option<usize>,

    /// Inactivity flush window (ms)
    #[arg(long)]
    inactivity_timeout_ms: Option<u64>,

    /// Start position (earliest, latest, seq:<n> or RFC 3339)
    #[arg(long)]
    start_position: Option<StartPosition>,

    /// Stop a partition after one inactivity window with nothing buffered
    #[arg(long)]
    drain: bool,

    /// Log batches instead of publishing them
    #[arg(long)]
    dry_run: bool,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "relay.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Handle subcommands
    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;
    let stats_interval = config.stats_interval_secs;

    println!("Event Hub Relay v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!(
        "Source:      {} (consumer group {}, start {})",
        config.source.name, config.source.consumer_group, config.source.start_position
    );
    if config.dry_run {
        println!("Destination: dry run (log only)");
    } else {
        println!(
            "Destination: {} / {}",
            config.destination.endpoint,
            mask(&config.destination.stream_id, 24)
        );
    }
    println!(
        "Batching:    {} records, {} bytes, {} ms inactivity",
        config.batch.max_batch_size,
        config.batch.max_batch_bytes,
        config.batch.inactivity_timeout_ms
    );
    println!();

    let start = config.source.start_position;
    let mut relay = Relay::from_config(config)?;

    if args.input.is_empty() {
        println!("Reading partition 0 from stdin");
        relay.spawn_partition(LineSource::new("0", BufReader::new(tokio::io::stdin()), start));
    } else {
        for (i, path) in args.input.iter().enumerate() {
            let file = tokio::fs::File::open(path).await?;
            println!("Reading partition {} from {}", i, path.display());
            relay.spawn_partition(LineSource::new(i.to_string(), BufReader::new(file), start));
        }
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    let handle = relay.handle();

    // Stats reporting task
    if stats_interval > 0 {
        let stats_handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                if !stats_handle.is_running() {
                    break;
                }
                print_stats(&stats_handle.stats());
            }
        });
    }

    let join = relay.join();
    tokio::pin!(join);
    let summary = tokio::select! {
        summary = &mut join => summary,
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
            handle.stop();
            join.await
        }
    };

    println!("\nFinal Statistics:");
    let reports: Vec<DispatchStatsSnapshot> =
        summary.reports.iter().map(|r| r.stats.clone()).collect();
    print_stats(&reports);
    let total = summary.total();
    println!(
        "Total: {} processed, {} sent, {} failed, {} batches",
        total.records_received, total.records_sent, total.records_failed, total.batches
    );

    if !summary.is_success() {
        for err in &summary.errors {
            eprintln!("Error: {}", err);
        }
        return Err(format!("{} partition(s) failed", summary.errors.len()).into());
    }
    Ok(())
}

/// File, then environment, then command line.
fn build_config(args: &Args) -> Result<RelayConfig, RelayError> {
    let mut config = match args.config {
        Some(ref path) => RelayConfig::from_file_unvalidated(path)?,
        None => RelayConfig::default(),
    };

    let overrides = EnvOverrides::from_env();
    if !overrides.is_empty() {
        tracing::debug!("applying environment overrides");
    }
    overrides.apply(&mut config);

    if let Some(ref endpoint) = args.endpoint {
        config.destination.endpoint = endpoint.clone();
    }
    if let Some(ref stream_id) = args.stream_id {
        config.destination.stream_id = stream_id.clone();
    }
    if let Some(v) = args.max_batch_size {
        config.batch.max_batch_size = v;
    }
    if let Some(v) = args.max_batch_bytes {
        config.batch.max_batch_bytes = v;
    }
    if let Some(v) = args.inactivity_timeout_ms {
        config.batch.inactivity_timeout_ms = v;
    }
    if let Some(v) = args.start_position {
        config.source.start_position = v;
    }
    if args.drain {
        config.batch.stop_on_idle = true;
    }
    if args.dry_run {
        config.dry_run = true;
    }
    if let Some(v) = args.stats_interval {
        config.stats_interval_secs = v;
    }
    if let Some(ref v) = args.log_level {
        config.log_level = v.clone();
    }

    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = RelayConfig::example().to_toml_string()?;

    // Add comments
    let content = format!(
        r#"# Event Hub Relay Configuration
# Generated by hubrelay gen-config
#
# Environment variables (MaxBatchSize, MaxBatchBytes, InactivityTimeoutMs,
# MessageEndpoint, StreamOcid, EventHubName, EventHubConsumerGroup, ...)
# override these values; command-line flags override both.

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match RelayConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Relay:       {}", config.name);
            println!(
                "Source:      {} ({})",
                config.source.name, config.source.consumer_group
            );
            if config.dry_run {
                println!("Destination: dry run");
            } else {
                println!(
                    "Destination: {} / {}",
                    config.destination.endpoint,
                    mask(&config.destination.stream_id, 24)
                );
            }
            println!(
                "Batching:    {} records, {} bytes, {} ms",
                config.batch.max_batch_size,
                config.batch.max_batch_bytes,
                config.batch.inactivity_timeout_ms
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(stats: &[DispatchStatsSnapshot]) {
    println!("--- Partition Statistics ---");
    for stat in stats {
        println!(
            "  Partition {}: {} received, {} sent ({:.1} rec/s), {}, {} batches, {} failed, {} retries",
            stat.partition,
            stat.records_received,
            stat.records_sent,
            stat.records_per_second(),
            format_bytes(stat.bytes_sent),
            stat.batches,
            stat.records_failed,
            stat.retries
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
