// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-partition dispatch statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for one partition's dispatcher.
///
/// Updated by the dispatcher task, read concurrently by the stats reporter.
#[derive(Debug)]
pub struct DispatchStats {
    /// Partition label.
    pub partition: String,

    /// Records read from the source.
    pub records_received: AtomicU64,

    /// Blank records dropped before encoding.
    pub records_skipped: AtomicU64,

    /// Records too large for any batch.
    pub records_oversized: AtomicU64,

    /// Records the destination accepted.
    pub records_sent: AtomicU64,

    /// Records that were not delivered (refused, oversized or in a failed batch).
    pub records_failed: AtomicU64,

    /// Encoded bytes of accepted batches.
    pub bytes_sent: AtomicU64,

    /// Publish calls that completed (fully or partially accepted).
    pub batches: AtomicU64,

    /// Batches lost after retries or rejection.
    pub batches_failed: AtomicU64,

    /// Publish retries after transient failures.
    pub retries: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl DispatchStats {
    /// Create zeroed stats for a partition.
    pub fn new(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            records_received: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            records_oversized: AtomicU64::new(0),
            records_sent: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Record a record read from the source. Returns the new total.
    pub fn record_received(&self) -> u64 {
        self.records_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a skipped blank record.
    pub fn record_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an oversized record. It also counts as failed.
    pub fn record_oversized(&self) {
        self.records_oversized.fetch_add(1, Ordering::Relaxed);
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed publish call.
    pub fn record_batch(&self, accepted: u64, failed: u64, bytes: u64) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.records_sent.fetch_add(accepted, Ordering::Relaxed);
        self.records_failed.fetch_add(failed, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a batch that was not delivered.
    pub fn record_batch_failed(&self, records: u64) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.records_failed.fetch_add(records, Ordering::Relaxed);
    }

    /// Record a publish retry.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            partition: self.partition.clone(),
            records_received: self.records_received.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            records_oversized: self.records_oversized.load(Ordering::Relaxed),
            records_sent: self.records_sent.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of dispatch statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchStatsSnapshot {
    pub partition: String,
    pub records_received: u64,
    pub records_skipped: u64,
    pub records_oversized: u64,
    pub records_sent: u64,
    pub records_failed: u64,
    pub bytes_sent: u64,
    pub batches: u64,
    pub batches_failed: u64,
    pub retries: u64,
    pub uptime_secs: u64,
}

impl DispatchStatsSnapshot {
    /// Calculate accepted records per second.
    pub fn records_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.records_sent as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Add another partition's counters into this one.
    pub fn merge(&mut self, other: &DispatchStatsSnapshot) {
        self.records_received += other.records_received;
        self.records_skipped += other.records_skipped;
        self.records_oversized += other.records_oversized;
        self.records_sent += other.records_sent;
        self.records_failed += other.records_failed;
        self.bytes_sent += other.bytes_sent;
        self.batches += other.batches;
        self.batches_failed += other.batches_failed;
        self.retries += other.retries;
        self.uptime_secs = self.uptime_secs.max(other.uptime_secs);
    }
}
