// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Destination publisher contract.
//!
//! A publisher makes exactly one destination call per batch. It never
//! splits or re-batches; the dispatcher hands it a batch that already
//! satisfies the limits.

use crate::batch::Batch;
use crate::encoder;
use crate::oci::OciPublisher;
use std::future::Future;
use thiserror::Error;

/// Batch-level publish failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    /// Network, authentication, throttling or timeout failure. Retriable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The destination refused the batch. Not retriable.
    #[error("destination rejected batch (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

impl PublishError {
    /// True for failures worth retrying with the same batch.
    pub fn is_retriable(&self) -> bool {
        matches!(self, PublishError::Transport(_))
    }
}

/// A single record the destination refused inside an accepted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Source sequence of the refused record.
    pub sequence: u64,
    /// Destination-provided reason.
    pub reason: String,
}

/// Outcome of one publish call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishResult {
    /// Records sent in the call.
    pub attempted: usize,
    /// Records the destination accepted.
    pub accepted: usize,
    /// Records the destination refused, with reasons.
    pub failures: Vec<RecordFailure>,
}

impl PublishResult {
    /// Every record of `batch` accepted.
    pub fn all_accepted(batch: &Batch) -> Self {
        Self {
            attempted: batch.len(),
            accepted: batch.len(),
            failures: Vec::new(),
        }
    }

    /// Number of refused records.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// True when no record was refused.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.accepted == self.attempted
    }
}

/// Destination ingestion call.
pub trait Publisher: Send + Sync {
    /// Publish one batch.
    ///
    /// The batch is borrowed so the caller can retry it unchanged.
    fn publish(
        &self,
        batch: &Batch,
    ) -> impl Future<Output = Result<PublishResult, PublishError>> + Send;

    /// Short name used in log lines.
    fn name(&self) -> &str;
}

/// Publisher that only logs batches. Used for dry runs.
#[derive(Debug, Default, Clone)]
pub struct LogPublisher;

const PREVIEW_LEN: usize = 100;

impl LogPublisher {
    /// Create a logging publisher.
    pub fn new() -> Self {
        Self
    }
}

impl Publisher for LogPublisher {
    async fn publish(&self, batch: &Batch) -> Result<PublishResult, PublishError> {
        tracing::info!(
            records = batch.len(),
            bytes = batch.bytes(),
            "dry run: would publish batch"
        );
        if let Some(first) = batch.records().first() {
            if let Ok(raw) = encoder::decode(first.payload.as_str()) {
                let text = String::from_utf8_lossy(&raw);
                let preview: String = text
                    .chars()
                    .take(PREVIEW_LEN)
                    .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
                    .collect();
                tracing::debug!(sequence = first.sequence, "preview: {}", preview);
            }
        }
        Ok(PublishResult::all_accepted(batch))
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Publisher selected at runtime from configuration.
#[derive(Debug, Clone)]
pub enum Destination {
    /// Streaming ingestion API.
    Stream(OciPublisher),
    /// Dry run.
    Log(LogPublisher),
}

impl Publisher for Destination {
    async fn publish(&self, batch: &Batch) -> Result<PublishResult, PublishError> {
        match self {
            Destination::Stream(p) => p.publish(batch).await,
            Destination::Log(p) => p.publish(batch).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Destination::Stream(p) => p.name(),
            Destination::Log(p) => p.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{Accumulator, EncodedRecord, Record};

    fn batch_of(n: u64) -> Batch {
        let mut acc = Accumulator::new(100, 10_000);
        for seq in 0..n {
            acc.try_append(EncodedRecord::encode(Record::new(seq, "line\nnext"), 0));
        }
        acc.drain()
    }

    #[test]
    fn test_error_retriability() {
        assert!(PublishError::Transport("reset".into()).is_retriable());
        assert!(!PublishError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_result_counts() {
        let batch = batch_of(3);
        let ok = PublishResult::all_accepted(&batch);
        assert_eq!(ok.attempted, 3);
        assert!(ok.is_complete());

        let partial = PublishResult {
            attempted: 3,
            accepted: 2,
            failures: vec![RecordFailure {
                sequence: 1,
                reason: "too large".into(),
            }],
        };
        assert_eq!(partial.failed(), 1);
        assert!(!partial.is_complete());
    }

    #[tokio::test]
    async fn test_log_publisher_accepts_everything() {
        let publisher = Destination::Log(LogPublisher::new());
        let result = publisher.publish(&batch_of(4)).await.expect("publish");
        assert_eq!(result.accepted, 4);
        assert_eq!(publisher.name(), "log");
    }
}
