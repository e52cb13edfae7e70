// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Source collaborator interface.
//!
//! A source yields the records of one partition in arrival order. Whether
//! records are pushed (a channel fed by an event callback) or pulled (a
//! reader polled by the dispatcher) is a wiring concern; the dispatcher only
//! sees [`RecordSource`].
//!
//! # Provided sources
//!
//! - [`ChannelSource`] - push delivery through a bounded tokio channel
//! - [`LineSource`] - newline-delimited payloads from any async reader
//! - [`VecSource`] - one pre-delivered batch of events

use crate::batch::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

/// Failure reading from a source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("source read failed: {message}")]
pub struct SourceError {
    /// Description of the failure.
    pub message: String,
    /// The source expects the next read to succeed.
    pub transient: bool,
}

impl SourceError {
    /// A failure that ends the partition.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }

    /// A failure the next read may recover from.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut => SourceError::transient(e.to_string()),
            _ => SourceError::fatal(e.to_string()),
        }
    }
}

/// Where a partition starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StartPosition {
    /// Oldest retained record.
    Earliest,
    /// Only records arriving from now on.
    #[default]
    Latest,
    /// First record at or after this sequence (resume from checkpoint).
    Sequence(u64),
    /// First record enqueued at or after this instant.
    Timestamp(DateTime<Utc>),
}

impl StartPosition {
    /// True if `record` lies at or after this position.
    ///
    /// `Earliest` and `Latest` admit everything the source delivers; the
    /// source itself decides what "latest" means for its transport.
    pub fn admits(&self, record: &Record) -> bool {
        match self {
            StartPosition::Earliest | StartPosition::Latest => true,
            StartPosition::Sequence(seq) => record.sequence >= *seq,
            StartPosition::Timestamp(ts) => record.enqueued_at.map_or(true, |at| at >= *ts),
        }
    }
}

impl FromStr for StartPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "earliest" | "-1" => return Ok(StartPosition::Earliest),
            "latest" | "@latest" => return Ok(StartPosition::Latest),
            _ => {}
        }
        if let Some(seq) = s.strip_prefix("seq:") {
            return seq
                .parse::<u64>()
                .map(StartPosition::Sequence)
                .map_err(|_| format!("invalid sequence start position: {}", s));
        }
        DateTime::parse_from_rfc3339(s)
            .map(|ts| StartPosition::Timestamp(ts.with_timezone(&Utc)))
            .map_err(|_| {
                format!(
                    "invalid start position '{}' (expected earliest, latest, seq:<n> or RFC 3339)",
                    s
                )
            })
    }
}

impl TryFrom<String> for StartPosition {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<StartPosition> for String {
    fn from(p: StartPosition) -> Self {
        p.to_string()
    }
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPosition::Earliest => f.write_str("earliest"),
            StartPosition::Latest => f.write_str("latest"),
            StartPosition::Sequence(seq) => write!(f, "seq:{}", seq),
            StartPosition::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
        }
    }
}

/// Ordered record stream for one partition.
pub trait RecordSource: Send {
    /// Partition label used in logs and stats.
    fn partition(&self) -> &str;

    /// Next record, `Ok(None)` at end of stream.
    ///
    /// Must be cancel safe: the dispatcher races this future against the
    /// inactivity deadline and the shutdown signal, and a cancelled call
    /// must not lose a record.
    fn next_record(
        &mut self,
    ) -> impl Future<Output = Result<Option<Record>, SourceError>> + Send;

    /// Called after each flush with the last sequence of the flushed batch.
    fn checkpoint(&mut self, _sequence: u64) {}
}

/// Push side of a [`ChannelSource`]. Clones share the sequence counter.
#[derive(Debug, Clone)]
pub struct RecordSender {
    tx: mpsc::Sender<Record>,
    partition: String,
    next_sequence: Arc<AtomicU64>,
}

impl RecordSender {
    /// Deliver a payload, assigning the next sequence number.
    pub async fn send(&self, payload: impl Into<Vec<u8>>) -> Result<u64, SourceError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let record = Record::new(sequence, payload)
            .with_partition(self.partition.clone())
            .with_enqueued_at(Utc::now());
        self.send_record(record).await?;
        Ok(sequence)
    }

    /// Deliver a fully formed record.
    pub async fn send_record(&self, record: Record) -> Result<(), SourceError> {
        self.tx
            .send(record)
            .await
            .map_err(|_| SourceError::fatal("partition receiver closed"))
    }
}

/// Push-delivered source backed by a bounded channel.
///
/// The stream ends once every [`RecordSender`] is dropped.
#[derive(Debug)]
pub struct ChannelSource {
    partition: String,
    rx: mpsc::Receiver<Record>,
    start: StartPosition,
    last_checkpoint: Option<u64>,
}

/// Create a connected sender / source pair for one partition.
pub fn channel_source(
    partition: impl Into<String>,
    capacity: usize,
    start: StartPosition,
) -> (RecordSender, ChannelSource) {
    let partition = partition.into();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let start_sequence = match start {
        StartPosition::Sequence(seq) => seq,
        _ => 0,
    };
    (
        RecordSender {
            tx,
            partition: partition.clone(),
            next_sequence: Arc::new(AtomicU64::new(start_sequence)),
        },
        ChannelSource {
            partition,
            rx,
            start,
            last_checkpoint: None,
        },
    )
}

impl ChannelSource {
    /// Last checkpointed sequence.
    pub fn last_checkpoint(&self) -> Option<u64> {
        self.last_checkpoint
    }
}

impl RecordSource for ChannelSource {
    fn partition(&self) -> &str {
        &self.partition
    }

    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        while let Some(record) = self.rx.recv().await {
            if self.start.admits(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn checkpoint(&mut self, sequence: u64) {
        self.last_checkpoint = Some(sequence);
    }
}

/// Pull source reading one payload per line.
///
/// Sequence numbers are zero-based line indices; the enqueue time is the
/// read time. Trailing `\n` / `\r\n` is stripped.
#[derive(Debug)]
pub struct LineSource<R> {
    partition: String,
    reader: R,
    pending: Vec<u8>,
    next_sequence: u64,
    start: StartPosition,
    last_checkpoint: Option<u64>,
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Wrap a buffered reader.
    pub fn new(partition: impl Into<String>, reader: R, start: StartPosition) -> Self {
        Self {
            partition: partition.into(),
            reader,
            pending: Vec::new(),
            next_sequence: 0,
            start,
            last_checkpoint: None,
        }
    }

    /// Last checkpointed sequence.
    pub fn last_checkpoint(&self) -> Option<u64> {
        self.last_checkpoint
    }
}

impl<R> RecordSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn partition(&self) -> &str {
        &self.partition
    }

    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        loop {
            // Partial reads stay in `pending`, which keeps this cancel safe.
            let n = self.reader.read_until(b'\n', &mut self.pending).await?;
            if n == 0 && self.pending.is_empty() {
                return Ok(None);
            }

            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\n') {
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
            }

            let sequence = self.next_sequence;
            self.next_sequence += 1;

            let record = Record::new(sequence, line)
                .with_partition(self.partition.clone())
                .with_enqueued_at(Utc::now());
            if self.start.admits(&record) {
                return Ok(Some(record));
            }
        }
    }

    fn checkpoint(&mut self, sequence: u64) {
        self.last_checkpoint = Some(sequence);
    }
}

/// A fixed set of already-delivered records.
#[derive(Debug, Default)]
pub struct VecSource {
    partition: String,
    records: VecDeque<Record>,
    start: StartPosition,
    last_checkpoint: Option<u64>,
}

impl VecSource {
    /// Build from payloads; sequences are assigned from zero.
    pub fn from_payloads<I, P>(partition: impl Into<String>, payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        let partition = partition.into();
        let records = payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| Record::new(i as u64, p).with_partition(partition.clone()))
            .collect();
        Self {
            partition,
            records,
            start: StartPosition::Earliest,
            last_checkpoint: None,
        }
    }

    /// Build from records as delivered.
    pub fn from_records(partition: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            partition: partition.into(),
            records: records.into(),
            start: StartPosition::Earliest,
            last_checkpoint: None,
        }
    }

    /// Skip records before `start`.
    pub fn with_start(mut self, start: StartPosition) -> Self {
        self.start = start;
        self
    }

    /// Records not yet read.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }

    /// Last checkpointed sequence.
    pub fn last_checkpoint(&self) -> Option<u64> {
        self.last_checkpoint
    }
}

impl RecordSource for VecSource {
    fn partition(&self) -> &str {
        &self.partition
    }

    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        while let Some(record) = self.records.pop_front() {
            if self.start.admits(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn checkpoint(&mut self, sequence: u64) {
        self.last_checkpoint = Some(sequence);
    }
}
