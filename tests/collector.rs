//! End-to-end tests against a mock collector.
//!
//! The mock is a small axum app on an ephemeral port that records every
//! request it receives.

use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::post;
use axum::{Json, Router};
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use analytics_forwarder::buffer::{forward, BufferConfig, EventBuffer};
use analytics_forwarder::client::AnalyticsClient;
use analytics_forwarder::event::Event;
use analytics_forwarder::submission::SubmissionState;

const WRITE_KEY: &str = "test-write-key";

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    headers: HeaderMap,
    body: Value,
}

#[derive(Clone, Default)]
struct Collector {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Collector {
    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn record(
    State(collector): State<Collector>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    collector.requests.lock().unwrap().push(Recorded {
        path: uri.path().to_string(),
        headers,
        body,
    });
    Json(json!({"success": true}))
}

async fn reject(State(collector): State<Collector>, uri: Uri, headers: HeaderMap) -> StatusCode {
    collector.requests.lock().unwrap().push(Recorded {
        path: uri.path().to_string(),
        headers,
        body: Value::Null,
    });
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Start a mock collector and return a client pointed at it.
async fn start_collector(failing: bool) -> (Collector, AnalyticsClient) {
    let collector = Collector::default();
    let routes = if failing {
        Router::new()
            .route("/v1/track", post(reject))
            .route("/v1/batch", post(reject))
    } else {
        Router::new()
            .route("/v1/track", post(record))
            .route("/v1/batch", post(record))
    };
    let app = routes.with_state(collector.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    let client = AnalyticsClient::new(session(), format!("http://{}/v1", addr), WRITE_KEY);
    (collector, client)
}

fn session() -> reqwest::Client {
    // Keep proxy settings from the environment away from loopback traffic
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<(Level, String)>>>);

impl Captured {
    fn entries(&self) -> Vec<(Level, String)> {
        self.0.lock().unwrap().clone()
    }
}

struct FieldText(String);

impl Visit for FieldText {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S: Subscriber> Layer<S> for Captured {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if !event.metadata().target().starts_with("analytics_forwarder") {
            return;
        }
        // Per-request debug lines are not part of the outcome contract
        if *event.metadata().level() > Level::INFO {
            return;
        }
        let mut text = FieldText(String::new());
        event.record(&mut text);
        self.0
            .lock()
            .unwrap()
            .push((*event.metadata().level(), text.0));
    }
}

fn capture_logs() -> (Captured, tracing::subscriber::DefaultGuard) {
    let captured = Captured::default();
    let guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(captured.clone()));
    (captured, guard)
}

#[tokio::test]
async fn test_track_heartbeat_sends_one_request() {
    let (logs, _guard) = capture_logs();
    let (collector, client) = start_collector(false).await;

    let submission = client.track(&Event::new("Heartbeat"));
    let state = submission.wait().await;
    assert!(matches!(state, SubmissionState::Delivered(StatusCode::OK)));

    let requests = collector.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/v1/track");
    assert_eq!(requests[0].body, json!({"type": "Heartbeat"}));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(logs.entries().is_empty());
}

#[tokio::test]
async fn test_requests_carry_auth_and_connection_close() {
    let (collector, client) = start_collector(false).await;

    client.track(&Event::new("Heartbeat")).wait().await;
    client.batch(&[Event::new("A")]).wait().await;

    let expected_auth = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{}:", WRITE_KEY))
    );

    let requests = collector.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(
            request.headers.get("connection").and_then(|v| v.to_str().ok()),
            Some("close")
        );
        assert_eq!(
            request.headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some(expected_auth.as_str())
        );
        assert!(!request.body.to_string().contains(WRITE_KEY));
    }
}

#[tokio::test]
async fn test_batch_preserves_order() {
    let (collector, client) = start_collector(false).await;

    let events = vec![Event::new("A"), Event::new("B")];
    let state = client.batch(&events).wait().await;
    assert!(matches!(state, SubmissionState::Delivered(_)));

    let requests = collector.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/v1/batch");

    let batch = requests[0].body["batch"].as_array().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0], json!({"type": "A"}));
    assert_eq!(batch[1], json!({"type": "B"}));
}

#[tokio::test]
async fn test_batch_sent_at_is_non_decreasing() {
    let (collector, client) = start_collector(false).await;

    client.batch(&[Event::new("First")]).wait().await;
    client.batch(&[Event::new("Second")]).wait().await;

    let requests = collector.requests();
    let sent_at: Vec<_> = requests
        .iter()
        .map(|r| {
            let raw = r.body["sentAt"].as_str().expect("sentAt should be a string");
            chrono::DateTime::parse_from_rfc3339(raw).expect("sentAt should be RFC 3339")
        })
        .collect();

    assert_eq!(sent_at.len(), 2);
    assert!(sent_at[0] <= sent_at[1]);
}

#[tokio::test]
async fn test_server_error_is_not_a_failure() {
    let (logs, _guard) = capture_logs();
    let (collector, client) = start_collector(true).await;

    let state = client.track(&Event::new("Heartbeat")).wait().await;
    assert!(matches!(
        state,
        SubmissionState::Delivered(StatusCode::INTERNAL_SERVER_ERROR)
    ));
    assert_eq!(collector.requests().len(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(logs.entries().is_empty());
}

#[tokio::test]
async fn test_connection_refused_logs_one_warning() {
    let (logs, _guard) = capture_logs();

    // Grab a free port, then close it again
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = AnalyticsClient::new(session(), format!("http://{}", addr), WRITE_KEY);

    match client.track(&Event::new("Heartbeat")).wait().await {
        SubmissionState::Failed(e) => assert_eq!(e.kind(), "Connect"),
        other => panic!("unexpected state: {:?}", other),
    }

    // Logged before `wait` returns
    let entries = logs.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Level::WARN);
    assert!(entries[0].1.contains("Connect"));
    assert!(!entries[0].1.contains(WRITE_KEY));
}

#[tokio::test]
async fn test_cancelled_track_logs_one_warning() {
    let (logs, _guard) = capture_logs();
    let (collector, client) = start_collector(false).await;

    // Nothing has yielded to the runtime yet, so the request has not started
    let submission = client.track(&Event::new("Heartbeat"));
    submission.cancel();

    assert!(matches!(submission.wait().await, SubmissionState::Cancelled));
    assert!(collector.requests().is_empty());

    // Logged before `wait` returns
    let entries = logs.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Level::WARN);
    assert!(entries[0].1.contains("unexpectedly cancelled"));
    assert!(entries.iter().all(|(level, _)| *level != Level::ERROR));
}

#[tokio::test]
async fn test_buffer_forwards_groups_as_batches() {
    let (collector, client) = start_collector(false).await;

    let (sender, buffer) = EventBuffer::new(BufferConfig::new(2, Duration::from_secs(60)));
    for name in ["A", "B", "C"] {
        sender.send(Event::new(name)).await.unwrap();
    }
    drop(sender);

    let in_flight = forward(buffer, &client).await;
    for submission in &in_flight {
        submission.wait().await;
    }
    // The first group may have finished before forwarding returned
    for _ in 0..100 {
        if collector.requests().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let requests = collector.requests();
    assert_eq!(requests.len(), 2);

    let mut sizes: Vec<_> = requests
        .iter()
        .map(|r| r.body["batch"].as_array().map(Vec::len).unwrap_or(0))
        .collect();
    sizes.sort();
    assert_eq!(sizes, vec![1, 2]);
}
