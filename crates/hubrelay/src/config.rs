// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay configuration.
//!
//! Loaded from a TOML file, then overlaid with environment variables
//! (see [`crate::env_config`]) and command-line flags. The resulting value is
//! passed explicitly to [`crate::Relay`]; nothing reads configuration from
//! global state.

use crate::retry::RetryPolicy;
use crate::source::StartPosition;
use crate::trigger::{
    BatchLimits, DEFAULT_INACTIVITY_TIMEOUT_MS, DEFAULT_MAX_BATCH_BYTES, DEFAULT_MAX_BATCH_SIZE,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay name (for identification).
    #[serde(default = "default_relay_name")]
    pub name: String,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Statistics reporting interval (seconds, 0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Log batches instead of publishing them.
    #[serde(default)]
    pub dry_run: bool,

    /// Batching thresholds.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Publish retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Shutdown behaviour.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Destination stream.
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Source hub.
    #[serde(default)]
    pub source: SourceConfig,
}

fn default_relay_name() -> String {
    "hubrelay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    10
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            name: default_relay_name(),
            log_level: default_log_level(),
            stats_interval_secs: default_stats_interval(),
            dry_run: false,
            batch: BatchConfig::default(),
            retry: RetryPolicy::default(),
            shutdown: ShutdownConfig::default(),
            destination: DestinationConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML file without validating it.
    ///
    /// Used when environment or command-line layers still have to fill in
    /// required settings; call [`RelayConfig::validate`] afterwards.
    pub fn from_file_unvalidated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse configuration from TOML text and validate it.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Example configuration written by `gen-config`.
    pub fn example() -> Self {
        Self {
            name: "example-relay".into(),
            destination: DestinationConfig {
                endpoint: "https://cell-1.streaming.eu-frankfurt-1.oci.oraclecloud.com".into(),
                stream_id: "ocid1.stream.oc1.eu-frankfurt-1.example".into(),
                ..Default::default()
            },
            source: SourceConfig {
                name: "app-events".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let batch = &self.batch;
        if batch.max_batch_size == 0 {
            return Err(ConfigError::Invalid("batch.max_batch_size must be >= 1".into()));
        }
        if batch.max_batch_bytes == 0 {
            return Err(ConfigError::Invalid("batch.max_batch_bytes must be >= 1".into()));
        }
        if batch.inactivity_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "batch.inactivity_timeout_ms must be >= 1".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        if !self.dry_run {
            self.destination.validate()?;
        }

        Ok(())
    }
}

/// What to do with a record too large for any batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizePolicy {
    /// Log, count as failed and continue.
    #[default]
    Skip,
    /// Close the partition with an error.
    Fail,
}

/// Batching configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum records per batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum encoded bytes per batch.
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,

    /// Idle time after the last append that forces a flush (ms).
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,

    /// Extra bytes charged per record on top of its encoded length.
    #[serde(default)]
    pub record_overhead_bytes: usize,

    /// Handling of records that can never fit a batch.
    #[serde(default)]
    pub oversize_policy: OversizePolicy,

    /// Drop empty or whitespace-only payloads. Off by default: payloads are
    /// opaque and forwarded as read.
    #[serde(default)]
    pub skip_blank: bool,

    /// Close a partition after one idle window with nothing buffered.
    #[serde(default)]
    pub stop_on_idle: bool,
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_max_batch_bytes() -> usize {
    DEFAULT_MAX_BATCH_BYTES
}

fn default_inactivity_timeout_ms() -> u64 {
    DEFAULT_INACTIVITY_TIMEOUT_MS
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            inactivity_timeout_ms: DEFAULT_INACTIVITY_TIMEOUT_MS,
            record_overhead_bytes: 0,
            oversize_policy: OversizePolicy::Skip,
            skip_blank: false,
            stop_on_idle: false,
        }
    }
}

impl BatchConfig {
    /// Thresholds for the flush evaluator.
    pub fn limits(&self) -> BatchLimits {
        BatchLimits::new(
            self.max_batch_size,
            self.max_batch_bytes,
            Duration::from_millis(self.inactivity_timeout_ms),
        )
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Time allowed for the final drain-flush (ms).
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_grace_period_ms() -> u64 {
    30_000
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl ShutdownConfig {
    /// Grace period as a duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Destination stream configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Messages endpoint base URL.
    #[serde(default)]
    pub endpoint: String,

    /// Target stream identifier.
    #[serde(default)]
    pub stream_id: String,

    /// Bearer token sent with each request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Per-request timeout (ms).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Use the source partition as the message key.
    #[serde(default)]
    pub key_by_partition: bool,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            stream_id: String::new(),
            auth_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            key_by_partition: false,
        }
    }
}

impl DestinationConfig {
    /// Validate endpoint and stream identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::Invalid("destination.endpoint is required".into()));
        }
        let url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
            ConfigError::Invalid(format!("destination.endpoint is not a valid URL: {}", e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Invalid(format!(
                "destination.endpoint must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.stream_id.is_empty() {
            return Err(ConfigError::Invalid("destination.stream_id is required".into()));
        }
        if self.stream_id.contains("streampool") {
            return Err(ConfigError::Invalid(format!(
                "destination.stream_id is a stream pool identifier ({}), expected a stream",
                mask(&self.stream_id, 20)
            )));
        }

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "destination.request_timeout_ms must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Source hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Event hub name.
    #[serde(default = "default_source_name")]
    pub name: String,

    /// Consumer group.
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Where partitions start reading.
    #[serde(default)]
    pub start_position: StartPosition,
}

fn default_source_name() -> String {
    "events".to_string()
}

fn default_consumer_group() -> String {
    "$Default".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: default_source_name(),
            consumer_group: default_consumer_group(),
            start_position: StartPosition::Latest,
        }
    }
}

/// Mask a secret for logging: keep the first `keep` characters.
pub fn mask(value: &str, keep: usize) -> String {
    if value.is_empty() {
        return String::new();
    }
    if value.chars().count() <= keep {
        return "***".to_string();
    }
    let head: String = value.chars().take(keep).collect();
    format!("{}...***", head)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name = "test"

[batch]
max_batch_size = 3
inactivity_timeout_ms = 500

[destination]
endpoint = "https://cell-1.example.com"
stream_id = "ocid1.stream.oc1..abc"
"#;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.batch.max_batch_size, 100);
        assert_eq!(config.batch.max_batch_bytes, 1_048_576);
        assert_eq!(config.batch.inactivity_timeout_ms, 10_000);
        assert!(!config.batch.skip_blank);
        assert_eq!(config.source.consumer_group, "$Default");
        assert_eq!(config.source.start_position, StartPosition::Latest);
        assert_eq!(config.shutdown.grace_period(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_partial_file() {
        let config = RelayConfig::from_toml_str(VALID).expect("valid");
        assert_eq!(config.name, "test");
        assert_eq!(config.batch.max_batch_size, 3);
        assert_eq!(config.batch.max_batch_bytes, 1_048_576);
        assert_eq!(
            config.batch.limits().inactivity,
            Duration::from_millis(500)
        );
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.batch.oversize_policy, OversizePolicy::Skip);
    }

    #[test]
    fn test_parse_policies_and_start_position() {
        let text = format!(
            "{}\n[source]\nstart_position = \"seq:17\"\n",
            VALID.replace("max_batch_size = 3", "oversize_policy = \"fail\"")
        );
        let config = RelayConfig::from_toml_str(&text).expect("valid");
        assert_eq!(config.batch.oversize_policy, OversizePolicy::Fail);
        assert_eq!(config.source.start_position, StartPosition::Sequence(17));
    }

    #[test]
    fn test_bad_start_position() {
        let text = format!("{}\n[source]\nstart_position = \"tomorrow\"\n", VALID);
        assert!(matches!(
            RelayConfig::from_toml_str(&text),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_validate_limits() {
        let mut config = RelayConfig::from_toml_str(VALID).expect("valid");
        config.batch.max_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::from_toml_str(VALID).expect("valid");
        config.retry.base_delay_ms = 20_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_destination() {
        let mut config = RelayConfig::default();
        assert!(config.validate().is_err());

        config.dry_run = true;
        assert!(config.validate().is_ok());

        config.dry_run = false;
        config.destination.endpoint = "ftp://example.com".into();
        config.destination.stream_id = "ocid1.stream.oc1..abc".into();
        assert!(config.validate().is_err());

        config.destination.endpoint = "https://example.com".into();
        assert!(config.validate().is_ok());

        config.destination.stream_id = "ocid1.streampool.oc1..abc".into();
        let err = config.validate().expect_err("stream pool");
        assert!(err.to_string().contains("stream pool"));
    }

    #[test]
    fn test_example_round_trip() {
        let example = RelayConfig::example();
        example.validate().expect("example is valid");
        let text = example.to_toml_string().expect("serialize");
        assert_eq!(RelayConfig::from_toml_str(&text).expect("parse"), example);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("relay.toml");
        std::fs::write(&path, VALID).expect("write");
        let config = RelayConfig::from_file(&path).expect("load");
        assert_eq!(config.name, "test");

        assert!(matches!(
            RelayConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_from_file_unvalidated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[batch]\nmax_batch_size = 5\n").expect("write");

        assert!(RelayConfig::from_file(&path).is_err());
        let config = RelayConfig::from_file_unvalidated(&path).expect("load");
        assert_eq!(config.batch.max_batch_size, 5);
        assert!(config.destination.endpoint.is_empty());
    }

    #[test]
    fn test_mask() {
        assert_eq!(mask("", 6), "");
        assert_eq!(mask("abc", 6), "***");
        assert_eq!(mask("abcdef", 6), "***");
        assert_eq!(mask("abcdefgh", 6), "abcdef...***");
    }
}
