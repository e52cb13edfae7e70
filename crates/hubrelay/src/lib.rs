// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Event hub to streaming relay
//!
//! Reads records from source partitions, batches and base64-encodes them,
//! and publishes each batch to a streaming ingestion API.
//!
//! # Features
//!
//! - **Bounded Batches**: flush on record count, encoded bytes or inactivity
//! - **Retry**: exponential backoff for transport failures
//! - **Partial Failures**: per-record refusals are logged and counted
//! - **Drain on Shutdown**: buffered records are flushed within a grace period
//! - **Dry Run**: log batches instead of publishing them
//!
//! # Quick Start
//!
//! ```bash
//! # Relay a file, one record per line
//! hubrelay --input events.jsonl --endpoint https://cell-1.example.com --stream-id ocid1.stream...
//!
//! # Dry run from stdin
//! cat events.jsonl | hubrelay --dry-run
//!
//! # Using config file
//! hubrelay --config relay.toml
//! ```
//!
//! # Library Use
//!
//! ```no_run
//! use hubrelay::{channel_source, Relay, RelayConfig, StartPosition};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelayConfig::from_file("relay.toml")?;
//! let mut relay = Relay::from_config(config)?;
//!
//! let (sender, source) = channel_source("0", 1024, StartPosition::Latest);
//! relay.spawn_partition(source);
//!
//! sender.send(r#"{"level":"info"}"#).await?;
//! drop(sender);
//!
//! let summary = relay.join().await;
//! println!("sent {} records", summary.total().records_sent);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod dispatcher;
pub mod encoder;
pub mod env_config;
pub mod oci;
pub mod publisher;
pub mod relay;
pub mod retry;
pub mod source;
pub mod stats;
pub mod trigger;

pub use batch::{Accumulator, AppendOutcome, Batch, EncodedRecord, Record};
pub use config::{ConfigError, OversizePolicy, RelayConfig};
pub use dispatcher::{
    shutdown_channel, CloseReason, DispatchError, DispatchReport, Dispatcher, DispatcherState,
    ShutdownSignal, ShutdownTrigger,
};
pub use encoder::EncodedPayload;
pub use env_config::EnvOverrides;
pub use oci::OciPublisher;
pub use publisher::{
    Destination, LogPublisher, PublishError, PublishResult, Publisher, RecordFailure,
};
pub use relay::{Relay, RelayError, RelayHandle, RelaySummary};
pub use retry::RetryPolicy;
pub use source::{
    channel_source, ChannelSource, LineSource, RecordSender, RecordSource, SourceError,
    StartPosition, VecSource,
};
pub use stats::{DispatchStats, DispatchStatsSnapshot};
pub use trigger::{BatchLimits, FlushDecision};
