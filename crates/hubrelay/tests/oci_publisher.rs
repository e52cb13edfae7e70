// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic

//! Stream publisher integration tests
//!
//! Runs the HTTP publisher against a local axum server that mimics the
//! put-messages endpoint.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use hubrelay::config::DestinationConfig;
use hubrelay::{
    encoder, Accumulator, Batch, Dispatcher, EncodedRecord, OciPublisher, PublishError,
    Publisher, Record, RelayConfig, ShutdownSignal, VecSource,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const STREAM_ID: &str = "ocid1.stream.oc1..test";

#[derive(Debug, Clone)]
struct Captured {
    stream_id: String,
    authorization: Option<String>,
    body: Value,
}

#[derive(Default)]
struct FakeStream {
    requests: Mutex<Vec<Captured>>,
    replies: Mutex<VecDeque<(StatusCode, Value)>>,
}

impl FakeStream {
    fn reply(&self, status: StatusCode, body: Value) {
        self.replies.lock().unwrap().push_back((status, body));
    }

    fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

async fn put_messages(
    State(stream): State<Arc<FakeStream>>,
    Path(stream_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let count = body["messages"].as_array().map_or(0, Vec::len);
    stream.requests.lock().unwrap().push(Captured {
        stream_id,
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body,
    });

    let scripted = stream.replies.lock().unwrap().pop_front();
    match scripted {
        Some((status, reply)) => (status, Json(reply)),
        None => {
            let entries: Vec<Value> = (0..count)
                .map(|i| json!({"partition": "0", "offset": i}))
                .collect();
            (StatusCode::OK, Json(json!({"failures": 0, "entries": entries})))
        }
    }
}

/// Start the fake endpoint and return its base URL.
async fn serve(stream: Arc<FakeStream>) -> String {
    let app = Router::new()
        .route("/20180418/streams/:stream_id/messages", post(put_messages))
        .with_state(stream);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn destination(endpoint: &str) -> DestinationConfig {
    DestinationConfig {
        endpoint: endpoint.to_string(),
        stream_id: STREAM_ID.to_string(),
        auth_token: Some("secret-token".into()),
        request_timeout_ms: 5_000,
        key_by_partition: true,
    }
}

fn batch(payloads: &[&str]) -> Batch {
    let mut acc = Accumulator::new(100, 1_000_000);
    for (i, p) in payloads.iter().enumerate() {
        acc.try_append(EncodedRecord::encode(
            Record::new(i as u64, *p).with_partition("2"),
            0,
        ));
    }
    acc.drain()
}

#[tokio::test]
async fn test_publish_accepted() {
    let stream = Arc::new(FakeStream::default());
    let base = serve(stream.clone()).await;
    let publisher = OciPublisher::new(&destination(&base)).expect("publisher");

    let result = publisher
        .publish(&batch(&["{\"a\":1}", "plain text"]))
        .await
        .expect("publish");
    assert_eq!(result.attempted, 2);
    assert_eq!(result.accepted, 2);
    assert!(result.is_complete());

    let requests = stream.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.stream_id, STREAM_ID);
    assert_eq!(request.authorization.as_deref(), Some("Bearer secret-token"));

    let messages = request.body["messages"].as_array().expect("messages");
    let values: Vec<Vec<u8>> = messages
        .iter()
        .map(|m| encoder::decode(m["value"].as_str().expect("value")).expect("base64"))
        .collect();
    assert_eq!(values, vec![b"{\"a\":1}".to_vec(), b"plain text".to_vec()]);
    assert_eq!(
        encoder::decode(messages[0]["key"].as_str().expect("key")).expect("base64"),
        b"2"
    );
}

#[tokio::test]
async fn test_publish_partial_failure() {
    let stream = Arc::new(FakeStream::default());
    stream.reply(
        StatusCode::OK,
        json!({"failures": 1, "entries": [
            {"partition": "0", "offset": 7},
            {"error": "MessageTooLarge", "errorMessage": "limit is 1 MB"},
            {"partition": "0", "offset": 8}
        ]}),
    );
    let base = serve(stream.clone()).await;
    let publisher = OciPublisher::new(&destination(&base)).expect("publisher");

    let result = publisher
        .publish(&batch(&["a", "b", "c"]))
        .await
        .expect("publish");
    assert_eq!(result.accepted, 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].sequence, 1);
    assert_eq!(result.failures[0].reason, "MessageTooLarge: limit is 1 MB");
}

#[tokio::test]
async fn test_server_error_is_transport() {
    let stream = Arc::new(FakeStream::default());
    stream.reply(
        StatusCode::SERVICE_UNAVAILABLE,
        json!({"code": "ServiceUnavailable", "message": "try later"}),
    );
    let base = serve(stream.clone()).await;
    let publisher = OciPublisher::new(&destination(&base)).expect("publisher");

    let err = publisher.publish(&batch(&["a"])).await.expect_err("error");
    assert!(err.is_retriable());
    assert!(err.to_string().contains("503"), "{}", err);
}

#[tokio::test]
async fn test_bad_request_is_rejected() {
    let stream = Arc::new(FakeStream::default());
    stream.reply(
        StatusCode::BAD_REQUEST,
        json!({"code": "InvalidParameter", "message": "bad key"}),
    );
    let base = serve(stream.clone()).await;
    let publisher = OciPublisher::new(&destination(&base)).expect("publisher");

    match publisher.publish(&batch(&["a"])).await {
        Err(PublishError::Rejected { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "InvalidParameter: bad key");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let publisher =
        OciPublisher::new(&destination(&format!("http://{}", addr))).expect("publisher");
    let err = publisher.publish(&batch(&["a"])).await.expect_err("error");
    assert!(matches!(err, PublishError::Transport(_)));
}

#[tokio::test]
async fn test_dispatcher_retries_against_server() {
    let stream = Arc::new(FakeStream::default());
    stream.reply(StatusCode::TOO_MANY_REQUESTS, json!({"message": "slow down"}));
    let base = serve(stream.clone()).await;

    let mut config = RelayConfig::default();
    config.destination = destination(&base);
    config.retry.base_delay_ms = 10;
    config.retry.max_delay_ms = 50;
    config.validate().expect("valid config");

    let publisher = Arc::new(OciPublisher::new(&config.destination).expect("publisher"));
    let source = VecSource::from_payloads("0", ["one", "two", "three"]);
    let mut dispatcher = Dispatcher::new(source, publisher, &config);
    let report = dispatcher.run(ShutdownSignal::never()).await.expect("run");

    assert_eq!(stream.requests().len(), 2);
    assert_eq!(report.stats.retries, 1);
    assert_eq!(report.stats.records_sent, 3);
}
