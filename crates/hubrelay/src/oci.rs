// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Streaming ingestion API publisher.
//!
//! Sends one `PutMessages` request per batch:
//!
//! ```text
//! POST {endpoint}/20180418/streams/{stream_id}/messages
//! {"messages": [{"key": "<base64>", "value": "<base64>"}, ...]}
//! ```
//!
//! The response lists one entry per message, in request order. Entries
//! carrying an `error` are per-record failures; the rest were appended.

use crate::batch::Batch;
use crate::config::{mask, ConfigError, DestinationConfig};
use crate::encoder;
use crate::publisher::{PublishError, PublishResult, Publisher, RecordFailure};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// API version path segment.
const API_VERSION: &str = "20180418";

/// Longest response body excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Serialize)]
struct PutMessagesDetails<'a> {
    messages: Vec<PutMessagesEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct PutMessagesEntry<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutMessagesResult {
    #[serde(default)]
    entries: Vec<PutMessagesResultEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutMessagesResultEntry {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl<'a> PutMessagesDetails<'a> {
    fn from_batch(batch: &'a Batch, key_by_partition: bool) -> Self {
        let messages = batch
            .iter()
            .map(|record| PutMessagesEntry {
                key: if key_by_partition {
                    record
                        .partition
                        .as_deref()
                        .map(|p| encoder::encode(p.as_bytes()).into_string())
                } else {
                    None
                },
                value: record.payload.as_str(),
            })
            .collect();
        Self { messages }
    }
}

/// HTTP publisher for a single destination stream.
///
/// Cloning is cheap and clones share the connection pool, so one
/// instance can serve every partition.
#[derive(Debug, Clone)]
pub struct OciPublisher {
    client: Client,
    url: String,
    auth_token: Option<String>,
    key_by_partition: bool,
}

impl OciPublisher {
    /// Build a publisher from destination settings.
    pub fn new(config: &DestinationConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        let url = messages_url(&config.endpoint, &config.stream_id);
        tracing::info!(
            endpoint = %mask(&config.endpoint, 24),
            stream = %mask(&config.stream_id, 6),
            "stream publisher ready"
        );

        Ok(Self {
            client,
            url,
            auth_token: config.auth_token.clone(),
            key_by_partition: config.key_by_partition,
        })
    }

    /// Full request URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Publisher for OciPublisher {
    async fn publish(&self, batch: &Batch) -> Result<PublishResult, PublishError> {
        let details = PutMessagesDetails::from_batch(batch, self.key_by_partition);

        let mut request = self.client.post(&self.url).json(&details);
        if let Some(ref token) = self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        interpret_response(status, &body, batch)
    }

    fn name(&self) -> &str {
        "stream"
    }
}

/// Build the put-messages URL for a stream.
pub fn messages_url(endpoint: &str, stream_id: &str) -> String {
    format!(
        "{}/{}/streams/{}/messages",
        endpoint.trim_end_matches('/'),
        API_VERSION,
        stream_id
    )
}

/// Statuses worth retrying with the same batch.
fn is_transient_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 408 | 429) || (500..=599).contains(&status)
}

/// Map an HTTP response onto a publish outcome.
pub fn interpret_response(
    status: u16,
    body: &str,
    batch: &Batch,
) -> Result<PublishResult, PublishError> {
    if (200..300).contains(&status) {
        let parsed: PutMessagesResult = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!("unparseable put-messages response, assuming accepted: {}", err);
                return Ok(PublishResult::all_accepted(batch));
            }
        };

        let failures: Vec<RecordFailure> = parsed
            .entries
            .iter()
            .zip(batch.records())
            .filter_map(|(entry, record)| {
                entry.error.as_ref().map(|code| RecordFailure {
                    sequence: record.sequence,
                    reason: match entry.error_message {
                        Some(ref msg) => format!("{}: {}", code, msg),
                        None => code.clone(),
                    },
                })
            })
            .collect();

        return Ok(PublishResult {
            attempted: batch.len(),
            accepted: batch.len() - failures.len(),
            failures,
        });
    }

    let message = error_message(body);
    if is_transient_status(status) {
        Err(PublishError::Transport(format!("status {}: {}", status, message)))
    } else {
        Err(PublishError::Rejected { status, message })
    }
}

fn error_message(body: &str) -> String {
    if let Ok(err) = serde_json::from_str::<ApiError>(body) {
        match (err.code, err.message) {
            (Some(code), Some(msg)) => return format!("{}: {}", code, msg),
            (None, Some(msg)) => return msg,
            (Some(code), None) => return code,
            (None, None) => {}
        }
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}
