// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Records, batches and the bounded batch accumulator.
//!
//! The accumulator holds encoded records in arrival order together with a
//! running byte total. It never admits a record that would push the batch
//! past either limit; the caller flushes and retries instead.
//!
//! Mutation goes through `&mut self`, so `drain` and `try_append` can never
//! interleave on one accumulator.

use crate::encoder::{self, EncodedPayload};
use chrono::{DateTime, Utc};

/// One source event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Arrival position, monotonic within a partition.
    pub sequence: u64,
    /// Source partition, if the source exposes one.
    pub partition: Option<String>,
    /// Time the source enqueued the event.
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl Record {
    /// Create a record with no partition or enqueue time.
    pub fn new(sequence: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            sequence,
            partition: None,
            enqueued_at: None,
        }
    }

    /// Set the source partition.
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Set the enqueue timestamp.
    pub fn with_enqueued_at(mut self, at: DateTime<Utc>) -> Self {
        self.enqueued_at = Some(at);
        self
    }

    /// Empty or whitespace-only payload.
    pub fn is_blank(&self) -> bool {
        self.payload.iter().all(u8::is_ascii_whitespace)
    }
}

/// A record after encoding, sized for the batch limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord {
    /// Source sequence of the original record.
    pub sequence: u64,
    /// Source partition of the original record.
    pub partition: Option<String>,
    /// Wire representation of the payload.
    pub payload: EncodedPayload,
    size: usize,
}

impl EncodedRecord {
    /// Encode a record. `overhead` is added to the encoded length to form
    /// the size charged against the byte limit.
    pub fn encode(record: Record, overhead: usize) -> Self {
        let payload = encoder::encode(&record.payload);
        let size = payload.len() + overhead;
        Self {
            sequence: record.sequence,
            partition: record.partition,
            payload,
            size,
        }
    }

    /// Bytes this record counts against the batch byte limit.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// An ordered group of records published together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    records: Vec<EncodedRecord>,
    bytes: usize,
}

impl Batch {
    /// Records in arrival order.
    pub fn records(&self) -> &[EncodedRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total encoded size of all records.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Sequence of the first record.
    pub fn first_sequence(&self) -> Option<u64> {
        self.records.first().map(|r| r.sequence)
    }

    /// Sequence of the last record.
    pub fn last_sequence(&self) -> Option<u64> {
        self.records.last().map(|r| r.sequence)
    }

    /// Iterate over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, EncodedRecord> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a EncodedRecord;
    type IntoIter = std::slice::Iter<'a, EncodedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Result of offering a record to the accumulator.
///
/// Rejections hand the record back untouched so the caller can flush and
/// offer it again.
#[derive(Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record is now part of the current batch.
    Appended,
    /// Admitting the record would exceed the record count limit.
    WouldExceedCount(EncodedRecord),
    /// Admitting the record would exceed the byte limit.
    WouldExceedBytes(EncodedRecord),
}

/// Bounded accumulator of encoded records.
#[derive(Debug)]
pub struct Accumulator {
    records: Vec<EncodedRecord>,
    bytes: usize,
    max_records: usize,
    max_bytes: usize,
}

impl Accumulator {
    /// Create an empty accumulator.
    ///
    /// # Arguments
    /// - `max_records` - Maximum number of records per batch
    /// - `max_bytes` - Maximum total encoded size per batch
    pub fn new(max_records: usize, max_bytes: usize) -> Self {
        Self {
            records: Vec::with_capacity(max_records.min(1024)),
            bytes: 0,
            max_records,
            max_bytes,
        }
    }

    /// Offer a record. State is only mutated on `Appended`.
    pub fn try_append(&mut self, record: EncodedRecord) -> AppendOutcome {
        if self.bytes + record.size() > self.max_bytes {
            return AppendOutcome::WouldExceedBytes(record);
        }
        if self.records.len() + 1 > self.max_records {
            return AppendOutcome::WouldExceedCount(record);
        }
        self.bytes += record.size();
        self.records.push(record);
        AppendOutcome::Appended
    }

    /// True if `size` could be admitted into an empty accumulator.
    pub fn admits_alone(&self, size: usize) -> bool {
        size <= self.max_bytes && self.max_records >= 1
    }

    /// Take the current batch and reset to empty.
    pub fn drain(&mut self) -> Batch {
        let bytes = std::mem::take(&mut self.bytes);
        Batch {
            records: std::mem::take(&mut self.records),
            bytes,
        }
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Running encoded byte total.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
