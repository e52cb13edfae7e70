// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-partition relay.
//!
//! Runs one [`Dispatcher`] task per partition. Partitions share nothing but
//! the publisher, whose connection pool makes concurrent calls safe.

use crate::config::{ConfigError, RelayConfig};
use crate::dispatcher::{
    shutdown_channel, DispatchError, DispatchReport, Dispatcher, ShutdownSignal, ShutdownTrigger,
};
use crate::oci::OciPublisher;
use crate::publisher::{Destination, LogPublisher, Publisher};
use crate::source::RecordSource;
use crate::stats::{DispatchStats, DispatchStatsSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Partition {partition}: {source}")]
    Dispatch {
        partition: String,
        #[source]
        source: DispatchError,
    },

    #[error("Partition {partition} task failed: {message}")]
    Task { partition: String, message: String },
}

type StatsRegistry = Arc<RwLock<Vec<Arc<DispatchStats>>>>;

/// Handle to control a running relay.
#[derive(Clone)]
pub struct RelayHandle {
    running: Arc<AtomicBool>,
    shutdown: ShutdownTrigger,
    stats: StatsRegistry,
}

impl RelayHandle {
    /// Check if the relay is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Ask every partition to flush and stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.shutdown.trigger();
    }

    /// Per-partition statistics.
    pub fn stats(&self) -> Vec<DispatchStatsSnapshot> {
        let registry = match self.stats.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registry.iter().map(|s| s.snapshot()).collect()
    }

    /// Statistics summed over all partitions.
    pub fn total(&self) -> DispatchStatsSnapshot {
        let mut total = DispatchStatsSnapshot {
            partition: "*".into(),
            ..Default::default()
        };
        for snapshot in self.stats() {
            total.merge(&snapshot);
        }
        total
    }
}

/// Outcome of [`Relay::join`].
#[derive(Debug, Default)]
pub struct RelaySummary {
    /// Reports of partitions that closed cleanly.
    pub reports: Vec<DispatchReport>,
    /// Partitions that closed with an error.
    pub errors: Vec<RelayError>,
}

impl RelaySummary {
    /// True when no partition failed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Counters summed over cleanly closed partitions.
    pub fn total(&self) -> DispatchStatsSnapshot {
        let mut total = DispatchStatsSnapshot {
            partition: "*".into(),
            ..Default::default()
        };
        for report in &self.reports {
            total.merge(&report.stats);
        }
        total
    }
}

/// Relay from source partitions to one destination.
pub struct Relay<P> {
    config: RelayConfig,
    publisher: Arc<P>,
    running: Arc<AtomicBool>,
    shutdown: ShutdownTrigger,
    signal: ShutdownSignal,
    stats: StatsRegistry,
    tasks: Vec<(String, JoinHandle<Result<DispatchReport, DispatchError>>)>,
}

impl Relay<Destination> {
    /// Create a relay publishing to the configured destination, or logging
    /// batches when `dry_run` is set.
    pub fn from_config(config: RelayConfig) -> Result<Self, RelayError> {
        let destination = if config.dry_run {
            tracing::info!("dry run: batches are logged, not published");
            Destination::Log(LogPublisher::new())
        } else {
            Destination::Stream(OciPublisher::new(&config.destination)?)
        };
        Self::new(config, destination)
    }
}

impl<P> Relay<P>
where
    P: Publisher + 'static,
{
    /// Create a relay. The configuration is validated here.
    pub fn new(config: RelayConfig, publisher: P) -> Result<Self, RelayError> {
        config.validate()?;
        let (shutdown, signal) = shutdown_channel();
        Ok(Self {
            config,
            publisher: Arc::new(publisher),
            running: Arc::new(AtomicBool::new(true)),
            shutdown,
            signal,
            stats: Arc::new(RwLock::new(Vec::new())),
            tasks: Vec::new(),
        })
    }

    /// Relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Number of spawned partitions.
    pub fn partitions(&self) -> usize {
        self.tasks.len()
    }

    /// Start a dispatcher task for `source`.
    pub fn spawn_partition<S>(&mut self, source: S)
    where
        S: RecordSource + 'static,
    {
        let partition = source.partition().to_string();
        let stats = Arc::new(DispatchStats::new(partition.clone()));
        match self.stats.write() {
            Ok(mut guard) => guard.push(stats.clone()),
            Err(poisoned) => poisoned.into_inner().push(stats.clone()),
        }

        let mut dispatcher =
            Dispatcher::new(source, self.publisher.clone(), &self.config).with_stats(stats);
        let signal = self.signal.clone();
        tracing::debug!(partition = %partition, "spawning partition");
        let task = tokio::spawn(async move { dispatcher.run(signal).await });
        self.tasks.push((partition, task));
    }

    /// Get a handle for stopping and monitoring.
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            running: self.running.clone(),
            shutdown: self.shutdown.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Wait for every partition to close.
    pub async fn join(self) -> RelaySummary {
        let mut summary = RelaySummary::default();
        for (partition, task) in self.tasks {
            match task.await {
                Ok(Ok(report)) => summary.reports.push(report),
                Ok(Err(source)) => summary.errors.push(RelayError::Dispatch { partition, source }),
                Err(e) => summary.errors.push(RelayError::Task {
                    partition,
                    message: e.to_string(),
                }),
            }
        }
        self.running.store(false, Ordering::Relaxed);
        summary
    }
}
