// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flush decision.
//!
//! Three independent thresholds, checked in priority order:
//! byte limit, record count limit, inactivity.

use std::fmt;
use std::time::Duration;

/// Default maximum records per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default maximum encoded bytes per batch (1 MiB).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 1024 * 1024;

/// Default inactivity window in milliseconds.
pub const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 10_000;

/// Thresholds that bound a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// Maximum records per batch.
    pub max_records: usize,
    /// Maximum encoded bytes per batch.
    pub max_bytes: usize,
    /// Idle time after the last append that forces a flush.
    pub inactivity: Duration,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_BATCH_SIZE,
            max_bytes: DEFAULT_MAX_BATCH_BYTES,
            inactivity: Duration::from_millis(DEFAULT_INACTIVITY_TIMEOUT_MS),
        }
    }
}

impl BatchLimits {
    /// Create limits from raw values.
    pub fn new(max_records: usize, max_bytes: usize, inactivity: Duration) -> Self {
        Self {
            max_records,
            max_bytes,
            inactivity,
        }
    }
}

/// Outcome of one evaluation. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushDecision {
    /// Keep accumulating.
    NoFlush,
    /// The record count limit is reached.
    FlushByCount,
    /// The byte limit is reached.
    FlushByBytes,
    /// No record arrived within the inactivity window.
    FlushByInactivity,
}

impl FlushDecision {
    /// True for every variant except `NoFlush`.
    pub fn should_flush(self) -> bool {
        !matches!(self, FlushDecision::NoFlush)
    }

    /// Short label used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            FlushDecision::NoFlush => "none",
            FlushDecision::FlushByCount => "count",
            FlushDecision::FlushByBytes => "bytes",
            FlushDecision::FlushByInactivity => "inactivity",
        }
    }
}

impl fmt::Display for FlushDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide whether the current batch must be flushed.
///
/// `idle` is the time since the last successful append. An empty batch
/// never flushes.
pub fn evaluate(count: usize, bytes: usize, idle: Duration, limits: &BatchLimits) -> FlushDecision {
    if count == 0 {
        return FlushDecision::NoFlush;
    }
    if bytes >= limits.max_bytes {
        return FlushDecision::FlushByBytes;
    }
    if count >= limits.max_records {
        return FlushDecision::FlushByCount;
    }
    if idle >= limits.inactivity {
        return FlushDecision::FlushByInactivity;
    }
    FlushDecision::NoFlush
}
