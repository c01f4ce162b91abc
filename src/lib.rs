//! Analytics Forwarder Library
//!
//! This library provides a best-effort client for sending analytics events to
//! a Segment-style HTTP collector:
//!
//! - **client**: HTTP client exposing `track` and `batch`
//! - **submission**: handles for in-flight requests
//! - **completion**: warning-level logging of failed or cancelled requests
//! - **event**: event and batch envelope types
//! - **buffer**: groups single events into batches
//! - **config**: environment-based configuration
//! - **token**: write-key token deobfuscation
//!
//! # Example
//!
//! ```no_run
//! use analytics_forwarder::client::AnalyticsClient;
//! use analytics_forwarder::config::Config;
//! use analytics_forwarder::event::Event;
//! use analytics_forwarder::token;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let client = AnalyticsClient::new_instance(&config, token::deobfuscate, None)
//!         .expect("Failed to create client");
//!
//!     // Returns immediately; failures are logged, never retried
//!     let submission = client.track(&Event::new("Heartbeat"));
//!
//!     client.batch(&[Event::new("Server Startup"), Event::new("Heartbeat")]);
//!
//!     submission.wait().await;
//! }
//! ```

pub mod buffer;
pub mod client;
pub mod completion;
pub mod config;
pub mod event;
pub mod submission;
pub mod token;

// Re-export commonly used types at crate root for convenience
pub use buffer::{BufferConfig, BufferError, BufferSender, BufferStats, EventBuffer};
pub use client::{AnalyticsClient, ClientError};
pub use completion::{log_completion, logged};
pub use config::{Config, ConfigError};
pub use event::{BatchEnvelope, Event};
pub use submission::{Submission, SubmissionState};
pub use token::TokenError;
