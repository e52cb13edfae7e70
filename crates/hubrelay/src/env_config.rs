// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Environment variable overlay.
//!
//! Reads application settings from environment variables and applies them
//! on top of a file-loaded [`RelayConfig`]:
//!
//! ## Batching
//! - `MaxBatchSize`: records per batch (default: 100)
//! - `MaxBatchBytes`: encoded bytes per batch (default: 1048576)
//! - `InactivityTimeoutMs`: idle flush window in milliseconds (default: 10000)
//! - `InactivityTimeout`: same window in seconds, used when the ms form is unset
//!
//! ## Destination
//! - `MessageEndpoint` or `OCI_MESSAGE_ENDPOINT`: messages endpoint URL
//! - `StreamOcid` or `OCI_STREAM_OCID`: target stream identifier
//! - `HUBRELAY_AUTH_TOKEN`: bearer token
//!
//! ## Source
//! - `EventHubName` or `EVENTHUB_NAME`: source hub name
//! - `EventHubConsumerGroup` or `EVENTHUB_CONSUMER_GROUP`: consumer group
//! - `HUBRELAY_START_POSITION`: earliest, latest, seq:<n> or RFC 3339
//!
//! Unparseable values are ignored with a warning.
//!
//! # Example
//!
//! ```bash
//! export MaxBatchSize=50
//! export MessageEndpoint=https://cell-1.streaming.eu-frankfurt-1.oci.oraclecloud.com
//! export StreamOcid=ocid1.stream.oc1.eu-frankfurt-1.example
//! export HUBRELAY_START_POSITION=earliest
//! ```

use crate::config::RelayConfig;
use crate::source::StartPosition;
use std::env;
use std::str::FromStr;

/// Environment variable names
pub const ENV_MAX_BATCH_SIZE: &str = "MaxBatchSize";
pub const ENV_MAX_BATCH_BYTES: &str = "MaxBatchBytes";
pub const ENV_INACTIVITY_TIMEOUT_MS: &str = "InactivityTimeoutMs";
pub const ENV_INACTIVITY_TIMEOUT_SECS: &str = "InactivityTimeout";
pub const ENV_MESSAGE_ENDPOINT: &str = "MessageEndpoint";
pub const ENV_OCI_MESSAGE_ENDPOINT: &str = "OCI_MESSAGE_ENDPOINT";
pub const ENV_STREAM_OCID: &str = "StreamOcid";
pub const ENV_OCI_STREAM_OCID: &str = "OCI_STREAM_OCID";
pub const ENV_EVENTHUB_NAME: &str = "EventHubName";
pub const ENV_EVENTHUB_NAME_UPPER: &str = "EVENTHUB_NAME";
pub const ENV_CONSUMER_GROUP: &str = "EventHubConsumerGroup";
pub const ENV_CONSUMER_GROUP_UPPER: &str = "EVENTHUB_CONSUMER_GROUP";
pub const ENV_START_POSITION: &str = "HUBRELAY_START_POSITION";
pub const ENV_AUTH_TOKEN: &str = "HUBRELAY_AUTH_TOKEN";

/// Overrides read from the environment. `None` leaves the config value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub max_batch_size: Option<usize>,
    pub max_batch_bytes: Option<usize>,
    pub inactivity_timeout_ms: Option<u64>,
    pub endpoint: Option<String>,
    pub stream_id: Option<String>,
    pub auth_token: Option<String>,
    pub source_name: Option<String>,
    pub consumer_group: Option<String>,
    pub start_position: Option<StartPosition>,
}

impl EnvOverrides {
    /// Read overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read overrides through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let first = |names: &[&str]| names.iter().find_map(|name| get(*name));

        // The millisecond form wins over the legacy seconds form.
        let inactivity_timeout_ms =
            parse_var::<u64>(ENV_INACTIVITY_TIMEOUT_MS, get(ENV_INACTIVITY_TIMEOUT_MS)).or_else(
                || {
                    parse_var::<u64>(ENV_INACTIVITY_TIMEOUT_SECS, get(ENV_INACTIVITY_TIMEOUT_SECS))
                        .map(|secs| secs.saturating_mul(1000))
                },
            );

        Self {
            max_batch_size: parse_var(ENV_MAX_BATCH_SIZE, get(ENV_MAX_BATCH_SIZE)),
            max_batch_bytes: parse_var(ENV_MAX_BATCH_BYTES, get(ENV_MAX_BATCH_BYTES)),
            inactivity_timeout_ms,
            endpoint: first(&[ENV_MESSAGE_ENDPOINT, ENV_OCI_MESSAGE_ENDPOINT]),
            stream_id: first(&[ENV_STREAM_OCID, ENV_OCI_STREAM_OCID]),
            auth_token: get(ENV_AUTH_TOKEN),
            source_name: first(&[ENV_EVENTHUB_NAME, ENV_EVENTHUB_NAME_UPPER]),
            consumer_group: first(&[ENV_CONSUMER_GROUP, ENV_CONSUMER_GROUP_UPPER]),
            start_position: parse_var(ENV_START_POSITION, get(ENV_START_POSITION)),
        }
    }

    /// True if no variable was set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the overrides to `config`.
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(v) = self.max_batch_size {
            config.batch.max_batch_size = v;
        }
        if let Some(v) = self.max_batch_bytes {
            config.batch.max_batch_bytes = v;
        }
        if let Some(v) = self.inactivity_timeout_ms {
            config.batch.inactivity_timeout_ms = v;
        }
        if let Some(ref v) = self.endpoint {
            config.destination.endpoint = v.clone();
        }
        if let Some(ref v) = self.stream_id {
            config.destination.stream_id = v.clone();
        }
        if let Some(ref v) = self.auth_token {
            config.destination.auth_token = Some(v.clone());
        }
        if let Some(ref v) = self.source_name {
            config.source.name = v.clone();
        }
        if let Some(ref v) = self.consumer_group {
            config.source.consumer_group = v.clone();
        }
        if let Some(v) = self.start_position {
            config.source.start_position = v;
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring {}={:?}: not a valid value", name, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_empty_environment() {
        let overrides = EnvOverrides::from_lookup(lookup(&[]));
        assert!(overrides.is_empty());

        let mut config = RelayConfig::default();
        overrides.apply(&mut config);
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_batching_variables() {
        let overrides = EnvOverrides::from_lookup(lookup(&[
            ("MaxBatchSize", "50"),
            ("MaxBatchBytes", " 2048 "),
            ("InactivityTimeout", "5"),
        ]));
        assert_eq!(overrides.max_batch_size, Some(50));
        assert_eq!(overrides.max_batch_bytes, Some(2048));
        assert_eq!(overrides.inactivity_timeout_ms, Some(5_000));

        let ms_wins = EnvOverrides::from_lookup(lookup(&[
            ("InactivityTimeout", "5"),
            ("InactivityTimeoutMs", "750"),
        ]));
        assert_eq!(ms_wins.inactivity_timeout_ms, Some(750));
    }

    #[test]
    fn test_invalid_numbers_ignored() {
        let overrides = EnvOverrides::from_lookup(lookup(&[
            ("MaxBatchSize", "lots"),
            ("HUBRELAY_START_POSITION", "whenever"),
        ]));
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_aliases() {
        let overrides = EnvOverrides::from_lookup(lookup(&[
            ("OCI_MESSAGE_ENDPOINT", "https://upper.example.com"),
            ("OCI_STREAM_OCID", "ocid1.stream.oc1..upper"),
            ("EVENTHUB_NAME", "telemetry"),
            ("EventHubConsumerGroup", "relay"),
            ("EVENTHUB_CONSUMER_GROUP", "ignored"),
        ]));
        assert_eq!(overrides.endpoint.as_deref(), Some("https://upper.example.com"));
        assert_eq!(overrides.stream_id.as_deref(), Some("ocid1.stream.oc1..upper"));
        assert_eq!(overrides.source_name.as_deref(), Some("telemetry"));
        assert_eq!(overrides.consumer_group.as_deref(), Some("relay"));

        let preferred = EnvOverrides::from_lookup(lookup(&[
            ("MessageEndpoint", "https://app.example.com"),
            ("OCI_MESSAGE_ENDPOINT", "https://upper.example.com"),
        ]));
        assert_eq!(preferred.endpoint.as_deref(), Some("https://app.example.com"));
    }

    #[test]
    fn test_apply() {
        let overrides = EnvOverrides::from_lookup(lookup(&[
            ("MaxBatchSize", "7"),
            ("StreamOcid", "ocid1.stream.oc1..env"),
            ("HUBRELAY_AUTH_TOKEN", "token-value"),
            ("HUBRELAY_START_POSITION", "-1"),
        ]));
        let mut config = RelayConfig::default();
        overrides.apply(&mut config);

        assert_eq!(config.batch.max_batch_size, 7);
        assert_eq!(config.batch.max_batch_bytes, 1_048_576);
        assert_eq!(config.destination.stream_id, "ocid1.stream.oc1..env");
        assert_eq!(config.destination.auth_token.as_deref(), Some("token-value"));
        assert_eq!(config.source.start_position, StartPosition::Earliest);
    }
}
