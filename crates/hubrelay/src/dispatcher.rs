// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-partition dispatcher.
//!
//! Owns one accumulator, reads one [`RecordSource`] and hands completed
//! batches to a [`Publisher`]. Processing is sequential: a batch is fully
//! published (or given up on) before the next one starts accumulating, which
//! preserves per-partition order.
//!
//! ```text
//! Idle --record--> Accumulating --limit / inactivity--> Flushing --> Idle
//!   any state --shutdown / end / fatal error--> Flushing (if non-empty) --> Closed
//! ```

use crate::batch::{Accumulator, AppendOutcome, Batch, EncodedRecord, Record};
use crate::config::{OversizePolicy, RelayConfig};
use crate::publisher::{PublishError, PublishResult, Publisher};
use crate::retry::RetryPolicy;
use crate::source::{RecordSource, SourceError};
use crate::stats::{DispatchStats, DispatchStatsSnapshot};
use crate::trigger::{self, BatchLimits, FlushDecision};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Received records between progress log lines.
const PROGRESS_INTERVAL: u64 = 100;

/// Errors that close a partition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("record {sequence} is {size} bytes encoded, over the {limit} byte batch limit")]
    OversizedRecord {
        sequence: u64,
        size: usize,
        limit: usize,
    },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Dispatcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Nothing buffered.
    Idle,
    /// At least one record buffered.
    Accumulating,
    /// Publishing a batch.
    Flushing,
    /// Stopped; no further records are read.
    Closed,
}

/// Why a dispatcher stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Shutdown was requested.
    Shutdown,
    /// The source reported end of stream.
    EndOfStream,
    /// Drain mode saw a full inactivity window with nothing buffered.
    Idle,
    /// A fatal error.
    Failed,
}

impl CloseReason {
    /// Short label used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Shutdown => "shutdown",
            CloseReason::EndOfStream => "end_of_stream",
            CloseReason::Idle => "idle",
            CloseReason::Failed => "failed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one [`Dispatcher::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep stepping.
    Continue,
    /// Stop reading and close.
    Stop(CloseReason),
}

/// Final account of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    /// Partition label.
    pub partition: String,
    /// Why the partition stopped.
    pub reason: CloseReason,
    /// Counters at close.
    pub stats: DispatchStatsSnapshot,
}

/// Sending half of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Ask every listening dispatcher to stop.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// True once triggered.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving half of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// True once triggered.
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until triggered. Cancel safe.
    ///
    /// Pends forever if the trigger is dropped without firing.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected shutdown trigger / signal pair.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

enum Event {
    Record(Record),
    End,
    Idle,
    Failed(SourceError),
    Shutdown,
}

/// Batching dispatcher for one partition.
pub struct Dispatcher<S, P> {
    partition: String,
    source: S,
    publisher: Arc<P>,
    accumulator: Accumulator,
    limits: BatchLimits,
    retry: RetryPolicy,
    overhead: usize,
    oversize_policy: OversizePolicy,
    skip_blank: bool,
    stop_on_idle: bool,
    grace_period: Duration,
    stats: Arc<DispatchStats>,
    state: DispatcherState,
    close_reason: Option<CloseReason>,
    grace_deadline: Option<Instant>,
    last_append: Instant,
    last_activity: Instant,
}

impl<S, P> Dispatcher<S, P>
where
    S: RecordSource,
    P: Publisher,
{
    /// Create a dispatcher for `source` with settings from `config`.
    pub fn new(source: S, publisher: Arc<P>, config: &RelayConfig) -> Self {
        let partition = source.partition().to_string();
        let limits = config.batch.limits();
        let now = Instant::now();
        Self {
            stats: Arc::new(DispatchStats::new(partition.clone())),
            partition,
            source,
            publisher,
            accumulator: Accumulator::new(limits.max_records, limits.max_bytes),
            limits,
            retry: config.retry,
            overhead: config.batch.record_overhead_bytes,
            oversize_policy: config.batch.oversize_policy,
            skip_blank: config.batch.skip_blank,
            stop_on_idle: config.batch.stop_on_idle,
            grace_period: config.shutdown.grace_period(),
            state: DispatcherState::Idle,
            close_reason: None,
            grace_deadline: None,
            last_append: now,
            last_activity: now,
        }
    }

    /// Use shared stats instead of private ones.
    pub fn with_stats(mut self, stats: Arc<DispatchStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Partition label.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Shared stats.
    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Records currently buffered.
    pub fn buffered(&self) -> usize {
        self.accumulator.len()
    }

    /// Run until shutdown, end of stream, drain-mode idle or a fatal error,
    /// then flush what is buffered and close.
    pub async fn run(
        &mut self,
        mut shutdown: ShutdownSignal,
    ) -> Result<DispatchReport, DispatchError> {
        tracing::info!(
            partition = %self.partition,
            publisher = self.publisher.name(),
            max_records = self.limits.max_records,
            max_bytes = self.limits.max_bytes,
            inactivity_ms = self.limits.inactivity.as_millis() as u64,
            "dispatcher started"
        );

        loop {
            match self.step(&mut shutdown).await {
                Ok(Step::Continue) => {}
                Ok(Step::Stop(reason)) => return Ok(self.close(reason).await),
                Err(err) => {
                    tracing::error!(partition = %self.partition, "closing partition: {}", err);
                    self.close(CloseReason::Failed).await;
                    return Err(err);
                }
            }
        }
    }

    /// Wait for one event (record, inactivity deadline, source error or
    /// shutdown) and act on it.
    pub async fn step(&mut self, shutdown: &mut ShutdownSignal) -> Result<Step, DispatchError> {
        if let Some(reason) = self.close_reason {
            return Ok(Step::Stop(reason));
        }

        let deadline = if !self.accumulator.is_empty() {
            Some(self.last_append + self.limits.inactivity)
        } else if self.stop_on_idle {
            Some(self.last_activity + self.limits.inactivity)
        } else {
            None
        };

        let event = tokio::select! {
            biased;
            _ = shutdown.wait() => Event::Shutdown,
            event = next_event(&mut self.source, deadline) => event,
        };

        match event {
            Event::Record(record) => {
                self.last_activity = Instant::now();
                self.absorb(record, shutdown).await?;
                Ok(Step::Continue)
            }
            Event::Idle => {
                if self.accumulator.is_empty() {
                    tracing::info!(
                        partition = %self.partition,
                        "no records within inactivity window, stopping"
                    );
                    return Ok(Step::Stop(CloseReason::Idle));
                }
                let decision = trigger::evaluate(
                    self.accumulator.len(),
                    self.accumulator.bytes(),
                    self.last_append.elapsed(),
                    &self.limits,
                );
                if decision.should_flush() {
                    self.flush(decision.as_str(), Some(shutdown)).await;
                }
                Ok(Step::Continue)
            }
            Event::End => {
                tracing::info!(partition = %self.partition, "source exhausted");
                Ok(Step::Stop(CloseReason::EndOfStream))
            }
            Event::Shutdown => {
                tracing::info!(partition = %self.partition, "shutdown requested");
                Ok(Step::Stop(CloseReason::Shutdown))
            }
            Event::Failed(err) if err.transient => {
                let delay = self.retry.delay_for(1);
                tracing::warn!(
                    partition = %self.partition,
                    delay_ms = delay.as_millis() as u64,
                    "transient source error, retrying read: {}",
                    err.message
                );
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => Ok(Step::Stop(CloseReason::Shutdown)),
                    _ = tokio::time::sleep(delay) => Ok(Step::Continue),
                }
            }
            Event::Failed(err) => Err(DispatchError::Source(err)),
        }
    }

    /// Flush what is buffered, bounded by the grace period, and close.
    ///
    /// If shutdown already started the grace period during an earlier flush,
    /// the same deadline applies here.
    pub async fn close(&mut self, reason: CloseReason) -> DispatchReport {
        if self.close_reason.is_none() && !self.accumulator.is_empty() {
            if self.grace_deadline.is_none() {
                self.grace_deadline = Some(Instant::now() + self.grace_period);
            }
            self.flush(reason.as_str(), None).await;
        }
        self.state = DispatcherState::Closed;
        self.close_reason = Some(reason);

        let stats = self.stats.snapshot();
        tracing::info!(
            partition = %self.partition,
            reason = reason.as_str(),
            processed = stats.records_received,
            sent = stats.records_sent,
            failed = stats.records_failed,
            skipped = stats.records_skipped,
            batches = stats.batches,
            "partition closed"
        );

        DispatchReport {
            partition: self.partition.clone(),
            reason,
            stats,
        }
    }

    async fn absorb(
        &mut self,
        record: Record,
        shutdown: &mut ShutdownSignal,
    ) -> Result<(), DispatchError> {
        let received = self.stats.record_received();
        if received % PROGRESS_INTERVAL == 0 {
            tracing::debug!(partition = %self.partition, received, "progress");
        }

        if self.skip_blank && record.is_blank() {
            tracing::warn!(
                partition = %self.partition,
                sequence = record.sequence,
                "skipping blank record"
            );
            self.stats.record_skipped();
            return Ok(());
        }

        let encoded = EncodedRecord::encode(record, self.overhead);
        if !self.accumulator.admits_alone(encoded.size()) {
            self.stats.record_oversized();
            let err = DispatchError::OversizedRecord {
                sequence: encoded.sequence,
                size: encoded.size(),
                limit: self.limits.max_bytes,
            };
            return match self.oversize_policy {
                OversizePolicy::Skip => {
                    tracing::warn!(partition = %self.partition, "dropping record: {}", err);
                    Ok(())
                }
                OversizePolicy::Fail => Err(err),
            };
        }

        // A rejected record goes back in after the current batch is flushed.
        // It fits an empty accumulator, so this terminates.
        let mut pending = encoded;
        loop {
            let decision = match self.accumulator.try_append(pending) {
                AppendOutcome::Appended => break,
                AppendOutcome::WouldExceedBytes(record) => {
                    pending = record;
                    FlushDecision::FlushByBytes
                }
                AppendOutcome::WouldExceedCount(record) => {
                    pending = record;
                    FlushDecision::FlushByCount
                }
            };
            self.flush(decision.as_str(), Some(&mut *shutdown)).await;
        }
        self.last_append = Instant::now();
        self.state = DispatcherState::Accumulating;

        let decision = trigger::evaluate(
            self.accumulator.len(),
            self.accumulator.bytes(),
            Duration::ZERO,
            &self.limits,
        );
        if decision.should_flush() {
            self.flush(decision.as_str(), Some(shutdown)).await;
        }
        Ok(())
    }

    /// Publish the buffered batch.
    ///
    /// Unbounded until `shutdown` fires; from then on the publish and every
    /// backoff sleep race the grace deadline.
    async fn flush(&mut self, reason: &'static str, shutdown: Option<&mut ShutdownSignal>) {
        if self.accumulator.is_empty() {
            return;
        }
        self.state = DispatcherState::Flushing;
        let batch = self.accumulator.drain();

        let mut bound = GraceBound {
            shutdown,
            deadline: self.grace_deadline,
            grace: self.grace_period,
        };
        let (outcome, attempts) = publish_with_retry(
            self.publisher.as_ref(),
            &self.retry,
            &self.stats,
            &self.partition,
            &batch,
            &mut bound,
        )
        .await;
        self.grace_deadline = bound.deadline;

        match outcome {
            None => {
                self.stats.record_batch_failed(batch.len() as u64);
                tracing::warn!(
                    partition = %self.partition,
                    reason,
                    records = batch.len(),
                    attempts,
                    grace_ms = self.grace_period.as_millis() as u64,
                    "flush did not finish within the grace period, batch abandoned"
                );
            }
            Some(Ok(result)) => {
                for failure in &result.failures {
                    tracing::warn!(
                        partition = %self.partition,
                        sequence = failure.sequence,
                        "record refused by destination: {}",
                        failure.reason
                    );
                }
                let accepted = result.accepted.min(batch.len());
                let failed = batch.len() - accepted;
                self.stats
                    .record_batch(accepted as u64, failed as u64, batch.bytes() as u64);
                tracing::info!(
                    partition = %self.partition,
                    reason,
                    records = batch.len(),
                    bytes = batch.bytes(),
                    accepted,
                    failed,
                    attempts,
                    "batch flushed"
                );
            }
            Some(Err(err)) => {
                self.stats.record_batch_failed(batch.len() as u64);
                tracing::error!(
                    partition = %self.partition,
                    reason,
                    records = batch.len(),
                    bytes = batch.bytes(),
                    accepted = 0,
                    failed = batch.len(),
                    attempts,
                    "batch dropped: {}",
                    err
                );
            }
        }

        if let Some(sequence) = batch.last_sequence() {
            self.source.checkpoint(sequence);
        }
        self.state = DispatcherState::Idle;
    }
}

async fn next_event<S: RecordSource>(source: &mut S, deadline: Option<Instant>) -> Event {
    let read = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, source.next_record()).await {
            Ok(read) => read,
            Err(_) => return Event::Idle,
        },
        None => source.next_record().await,
    };
    match read {
        Ok(Some(record)) => Event::Record(record),
        Ok(None) => Event::End,
        Err(err) => Event::Failed(err),
    }
}

/// Shutdown-aware bound on one flush.
struct GraceBound<'a> {
    shutdown: Option<&'a mut ShutdownSignal>,
    /// Set once shutdown is seen; never cleared.
    deadline: Option<Instant>,
    grace: Duration,
}

impl GraceBound<'_> {
    /// Drive `fut` to completion, or `None` if the grace deadline passes
    /// first.
    async fn run<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::pin!(fut);
        if self.deadline.is_none() {
            let Some(shutdown) = self.shutdown.as_deref_mut() else {
                return Some(fut.await);
            };
            tokio::select! {
                biased;
                out = &mut fut => return Some(out),
                _ = shutdown.wait() => {
                    self.deadline = Some(Instant::now() + self.grace);
                }
            }
        }
        let deadline = self.deadline?;
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::timeout_at(deadline, fut).await.ok()
    }
}

/// Publish `batch`, retrying transport failures with backoff.
///
/// Returns the final outcome, or `None` if the grace deadline cut it short,
/// and the number of attempts made.
async fn publish_with_retry<P: Publisher>(
    publisher: &P,
    retry: &RetryPolicy,
    stats: &DispatchStats,
    partition: &str,
    batch: &Batch,
    bound: &mut GraceBound<'_>,
) -> (Option<Result<PublishResult, PublishError>>, u32) {
    let mut attempt = 1;
    loop {
        let Some(outcome) = bound.run(publisher.publish(batch)).await else {
            return (None, attempt);
        };
        match outcome {
            Ok(result) => return (Some(Ok(result)), attempt),
            Err(err) if err.is_retriable() && retry.allows_retry(attempt) => {
                let delay = retry.delay_for(attempt);
                tracing::warn!(
                    partition,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "publish failed, retrying"
                );
                stats.record_retry();
                if bound.run(tokio::time::sleep(delay)).await.is_none() {
                    return (None, attempt);
                }
                attempt += 1;
            }
            Err(err) => return (Some(Err(err)), attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::LogPublisher;
    use crate::source::{channel_source, StartPosition, VecSource};

    fn config(max_records: usize, max_bytes: usize) -> RelayConfig {
        let mut config = RelayConfig::default();
        config.dry_run = true;
        config.batch.max_batch_size = max_records;
        config.batch.max_batch_bytes = max_bytes;
        config.batch.inactivity_timeout_ms = 1_000;
        config
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let (trigger, mut signal) = shutdown_channel();
        assert!(!signal.is_triggered());
        trigger.trigger();
        assert!(trigger.is_triggered());
        signal.wait().await;
        assert!(signal.is_triggered());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_signal_pends() {
        let mut signal = ShutdownSignal::never();
        let waited = tokio::time::timeout(Duration::from_secs(60), signal.wait()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_transitions() {
        let (tx, source) = channel_source("0", 8, StartPosition::Latest);
        let mut dispatcher =
            Dispatcher::new(source, Arc::new(LogPublisher::new()), &config(10, 10_000));
        let mut signal = ShutdownSignal::never();
        assert_eq!(dispatcher.state(), DispatcherState::Idle);

        tx.send("hello").await.expect("send");
        assert_eq!(dispatcher.step(&mut signal).await, Ok(Step::Continue));
        assert_eq!(dispatcher.state(), DispatcherState::Accumulating);
        assert_eq!(dispatcher.buffered(), 1);

        // Nothing else arrives: the inactivity deadline fires.
        assert_eq!(dispatcher.step(&mut signal).await, Ok(Step::Continue));
        assert_eq!(dispatcher.state(), DispatcherState::Idle);
        assert_eq!(dispatcher.buffered(), 0);
        assert_eq!(dispatcher.source().last_checkpoint(), Some(0));

        drop(tx);
        assert_eq!(
            dispatcher.step(&mut signal).await,
            Ok(Step::Stop(CloseReason::EndOfStream))
        );
        let report = dispatcher.close(CloseReason::EndOfStream).await;
        assert_eq!(dispatcher.state(), DispatcherState::Closed);
        assert_eq!(report.stats.records_sent, 1);
        assert_eq!(report.stats.batches, 1);
    }

    #[tokio::test]
    async fn test_blank_records_forwarded_by_default() {
        let source = VecSource::from_payloads("0", ["a", "", "   ", "\n"]);
        let mut dispatcher =
            Dispatcher::new(source, Arc::new(LogPublisher::new()), &config(10, 10_000));
        let report = dispatcher.run(ShutdownSignal::never()).await.expect("run");
        assert_eq!(report.stats.records_received, 4);
        assert_eq!(report.stats.records_skipped, 0);
        assert_eq!(report.stats.records_sent, 4);
    }

    #[tokio::test]
    async fn test_blank_records_skipped_when_enabled() {
        let mut cfg = config(10, 10_000);
        cfg.batch.skip_blank = true;
        let source = VecSource::from_payloads("0", ["a", "   ", "", "b"]);
        let mut dispatcher = Dispatcher::new(source, Arc::new(LogPublisher::new()), &cfg);
        let report = dispatcher.run(ShutdownSignal::never()).await.expect("run");
        assert_eq!(report.reason, CloseReason::EndOfStream);
        assert_eq!(report.stats.records_received, 4);
        assert_eq!(report.stats.records_skipped, 2);
        assert_eq!(report.stats.records_sent, 2);
    }

    #[tokio::test]
    async fn test_oversized_record_fail_policy() {
        let mut cfg = config(10, 8);
        cfg.batch.oversize_policy = OversizePolicy::Fail;
        // "abcdefg" encodes to 12 bytes.
        let source = VecSource::from_payloads("0", ["ab", "abcdefg"]);
        let mut dispatcher = Dispatcher::new(source, Arc::new(LogPublisher::new()), &cfg);

        let err = dispatcher.run(ShutdownSignal::never()).await.expect_err("oversized");
        assert_eq!(
            err,
            DispatchError::OversizedRecord {
                sequence: 1,
                size: 12,
                limit: 8
            }
        );
        // The record before it was still flushed on close.
        let stats = dispatcher.stats().snapshot();
        assert_eq!(stats.records_sent, 1);
        assert_eq!(stats.records_oversized, 1);
        assert_eq!(dispatcher.state(), DispatcherState::Closed);
    }

    #[tokio::test]
    async fn test_overhead_counts_against_bytes() {
        let mut cfg = config(10, 100);
        cfg.batch.record_overhead_bytes = 46;
        // Each record: 4 encoded bytes + 46 overhead = 50; two fill the batch.
        let source = VecSource::from_payloads("0", ["abc", "def", "ghi"]);
        let mut dispatcher = Dispatcher::new(source, Arc::new(LogPublisher::new()), &cfg);
        let report = dispatcher.run(ShutdownSignal::never()).await.expect("run");
        assert_eq!(report.stats.batches, 2);
        assert_eq!(report.stats.bytes_sent, 150);
    }

    #[tokio::test]
    async fn test_step_after_close_keeps_reason() {
        let source = VecSource::from_payloads("0", ["a"]);
        let mut dispatcher =
            Dispatcher::new(source, Arc::new(LogPublisher::new()), &config(10, 10_000));
        let report = dispatcher.run(ShutdownSignal::never()).await.expect("run");
        assert_eq!(report.reason, CloseReason::EndOfStream);

        let mut signal = ShutdownSignal::never();
        assert_eq!(
            dispatcher.step(&mut signal).await,
            Ok(Step::Stop(CloseReason::EndOfStream))
        );
    }

    #[test]
    fn test_close_reason_labels() {
        assert_eq!(CloseReason::EndOfStream.to_string(), "end_of_stream");
        assert_eq!(CloseReason::Idle.as_str(), "idle");
    }
}
