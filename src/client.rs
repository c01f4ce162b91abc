//! HTTP client for submitting events to the analytics collector.
//!
//! The client owns one `reqwest::Client` for its whole lifetime and fires one
//! request per call without waiting for it. Outcomes are only visible on the
//! returned [`Submission`] and in the warning log; nothing is retried.

use std::fmt;
use std::time::Duration;

use reqwest::header::CONNECTION;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use tracing::debug;

use crate::completion::log_completion;
use crate::config::Config;
use crate::event::{BatchEnvelope, Event};
use crate::submission::Submission;

/// Path of the single-event endpoint.
pub const TRACK_PATH: &str = "/track";

/// Path of the multi-event endpoint.
pub const BATCH_PATH: &str = "/batch";

/// Errors that can occur while building the client or sending a request.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Could not connect to the collector
    Connect(reqwest::Error),

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),

    /// The write key could not be recovered from the configured token
    Token(String),

    /// The request task panicked
    Panicked,
}

impl ClientError {
    /// Short name of the error variant, used as the logged error type.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Request(_) => "Request",
            ClientError::Connect(_) => "Connect",
            ClientError::Timeout => "Timeout",
            ClientError::Config(_) => "Config",
            ClientError::Token(_) => "Token",
            ClientError::Panicked => "Panicked",
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Connect(e) => write!(f, "Failed to connect to collector: {}", e),
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
            ClientError::Token(e) => write!(f, "Invalid analytics token: {}", e),
            ClientError::Panicked => write!(f, "Request task panicked"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) | ClientError::Connect(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() {
            ClientError::Connect(err)
        } else {
            ClientError::Request(err)
        }
    }
}

/// Client for the collector's `/track` and `/batch` endpoints.
///
/// Requests carry `Connection: close`. A pooled connection that sits idle for
/// just under the server's keep-alive timeout can be reused at the moment the
/// server closes it, losing the request; closing every connection avoids that
/// race.
///
/// `track` and `batch` must be called from within a Tokio runtime.
///
/// # Example
///
/// ```no_run
/// use analytics_forwarder::client::AnalyticsClient;
/// use analytics_forwarder::event::Event;
///
/// #[tokio::main]
/// async fn main() {
///     let client = AnalyticsClient::new(
///         reqwest::Client::new(),
///         "https://api.segment.io/v1",
///         "write-key",
///     );
///
///     let submission = client.track(&Event::new("Heartbeat"));
///     submission.wait().await;
/// }
/// ```
#[derive(Clone)]
pub struct AnalyticsClient {
    /// The shared HTTP session
    session: Client,

    /// Collector base URL, without a trailing slash
    base_url: String,

    /// Used as the basic-auth username, never logged
    write_key: String,
}

impl AnalyticsClient {
    /// Create a client around an existing HTTP session.
    pub fn new(session: Client, base_url: impl Into<String>, write_key: impl Into<String>) -> Self {
        Self {
            session,
            base_url: base_url.into(),
            write_key: write_key.into(),
        }
    }

    /// Build a client from configuration.
    ///
    /// The configured token is turned into the write key by `deobfuscate`.
    /// When `session` is `None` a new HTTP client is built with the configured
    /// request timeout, restricted to HTTP/1.1. A supplied session should be
    /// HTTP/1.1 too: HTTP/2 has no `Connection` header, so the per-request
    /// close would be dropped.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Token` if the token cannot be deobfuscated and
    /// `ClientError::Config` if the HTTP client cannot be built.
    pub fn new_instance<D, E>(
        config: &Config,
        deobfuscate: D,
        session: Option<Client>,
    ) -> Result<Self, ClientError>
    where
        D: FnOnce(&str) -> Result<String, E>,
        E: fmt::Display,
    {
        let write_key = deobfuscate(&config.token).map_err(|e| ClientError::Token(e.to_string()))?;

        let session = match session {
            Some(session) => session,
            None => default_session(config.request_timeout)?,
        };

        Ok(Self::new(session, config.endpoint.clone(), write_key))
    }

    /// Send a single event to the `/track` endpoint.
    ///
    /// The event is sent as the request body unchanged.
    pub fn track(&self, event: &Event) -> Submission {
        debug!(event_type = ?event.event_type(), "Sending track event");
        log_completion(self.post(TRACK_PATH, event))
    }

    /// Send several events in one request to the `/batch` endpoint.
    ///
    /// Each event should have its type specified. The envelope's `sentAt` is
    /// taken now.
    pub fn batch(&self, events: &[Event]) -> Submission {
        let envelope = BatchEnvelope::now(events);
        debug!(
            event_count = events.len(),
            sent_at = %envelope.sent_at,
            "Sending event batch"
        );
        log_completion(self.post(BATCH_PATH, &envelope))
    }

    /// POST `data` as JSON to `endpoint`, relative to the base URL.
    ///
    /// # Panics
    ///
    /// Panics if `endpoint` does not start with `/`. This is checked before
    /// anything is sent.
    pub(crate) fn post<T>(&self, endpoint: &str, data: &T) -> Submission
    where
        T: Serialize + ?Sized,
    {
        assert!(
            endpoint.starts_with('/'),
            "endpoint must start with '/': {:?}",
            endpoint
        );

        let url = format!("{}{}", self.base_url, endpoint);
        let (username, password) = self.auth();
        let request = self
            .session
            .post(&url)
            .basic_auth(username, password)
            .header(CONNECTION, "close")
            .json(data);

        Submission::spawn(async move {
            let response = request.send().await?;
            Ok(response.status())
        })
    }

    /// Basic-auth credentials: the write key with an empty password.
    pub fn auth(&self) -> (&str, Option<&str>) {
        (&self.write_key, Some(""))
    }

    /// Get the configured collector base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the shared HTTP session.
    pub fn session(&self) -> &Client {
        &self.session
    }
}

impl fmt::Debug for AnalyticsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyticsClient")
            .field("base_url", &self.base_url)
            .field("write_key", &"<redacted>")
            .finish()
    }
}

fn default_session(timeout: Duration) -> Result<Client, ClientError> {
    session_builder(timeout)
        .build()
        .map_err(|e| ClientError::Config(e.to_string()))
}

// HTTP/1.1 only, otherwise TLS could negotiate h2 and `Connection: close` is stripped
fn session_builder(timeout: Duration) -> ClientBuilder {
    Client::builder().timeout(timeout).http1_only()
}
