//! Analytics Forwarder - forwards analytics events to an HTTP collector
//!
//! Reads newline-delimited JSON events from stdin, groups them and sends each
//! group to the collector's `/batch` endpoint. Optionally sends a heartbeat
//! event to `/track` on a fixed interval.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! - `ANALYTICS_ENDPOINT`: Collector base URL (default: https://api.segment.io/v1)
//! - `ANALYTICS_TOKEN`: Obfuscated write key (required)
//! - `ANALYTICS_BATCH_SIZE`: Events per batch (default: 100)
//! - `ANALYTICS_FLUSH_INTERVAL_SECS`: Seconds between flushes (default: 5)
//! - `ANALYTICS_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 30)
//! - `ANALYTICS_HEARTBEAT_INTERVAL_SECS`: Heartbeat interval, 0 disables (default: 0)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use analytics_forwarder::buffer::{forward, BufferConfig, BufferSender, EventBuffer};
use analytics_forwarder::client::AnalyticsClient;
use analytics_forwarder::config::Config;
use analytics_forwarder::event::Event;
use analytics_forwarder::submission::Submission;
use analytics_forwarder::token;

/// How long to wait for in-flight requests on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting analytics forwarder...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                endpoint = %config.endpoint,
                batch_size = config.batch_size,
                flush_interval_secs = config.flush_interval.as_secs(),
                heartbeat_interval_secs = config.heartbeat_interval.map(|d| d.as_secs()),
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let client = match AnalyticsClient::new_instance(&config, token::deobfuscate, None) {
        Ok(client) => {
            info!(base_url = %client.base_url(), "Analytics client initialized");
            client
        }
        Err(e) => {
            error!(error = %e, "Failed to create analytics client");
            std::process::exit(1);
        }
    };

    let (sender, buffer) = EventBuffer::new(BufferConfig::new(
        config.batch_size,
        config.flush_interval,
    ));

    let forward_client = client.clone();
    let forward_handle = tokio::spawn(async move { forward(buffer, &forward_client).await });

    let heartbeats: Arc<Mutex<Vec<Submission>>> = Arc::default();
    let heartbeat_handle = config.heartbeat_interval.map(|period| {
        let client = client.clone();
        let heartbeats = heartbeats.clone();
        tokio::spawn(async move { run_heartbeat(client, period, heartbeats).await })
    });

    let mut reader_handle = tokio::spawn(read_events(sender));

    tokio::select! {
        _ = &mut reader_handle => {
            info!("Input closed, stopping...");
        }
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received, stopping..."),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
            // Dropping the reader drops the buffer sender, which lets the
            // buffer flush what it holds
            reader_handle.abort();
        }
    }

    if let Some(handle) = heartbeat_handle {
        handle.abort();
    }

    let mut in_flight = match tokio::time::timeout(SHUTDOWN_TIMEOUT, forward_handle).await {
        Ok(Ok(in_flight)) => in_flight,
        Ok(Err(e)) => {
            warn!(error = %e, "Forwarding task panicked during shutdown");
            Vec::new()
        }
        Err(_) => {
            warn!("Forwarding task shutdown timed out after {:?}", SHUTDOWN_TIMEOUT);
            Vec::new()
        }
    };

    in_flight.append(&mut lock_submissions(&heartbeats));

    // Completion warnings are logged before `wait` returns, so nothing is lost
    // by exiting right after
    wait_for_in_flight(in_flight).await;

    info!("Analytics forwarder stopped");

    // A pending stdin read holds a blocking thread the runtime would wait on
    std::process::exit(0);
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Read one JSON event per line from stdin into the buffer until EOF.
///
/// Lines that are blank or not JSON objects are skipped with a warning.
async fn read_events(sender: BufferSender) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number: u64 = 0;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read from stdin");
                break;
            }
        };
        line_number += 1;

        if line.trim().is_empty() {
            continue;
        }

        let event: Event = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_number, error = %e, "Skipping invalid event");
                continue;
            }
        };

        if sender.send(event).await.is_err() {
            // Buffer closed, stop reading
            break;
        }
    }
}

/// Send a heartbeat event every `period` until aborted.
///
/// Unfinished heartbeat submissions are kept in `in_flight` so shutdown can
/// wait for them.
async fn run_heartbeat(
    client: AnalyticsClient,
    period: Duration,
    in_flight: Arc<Mutex<Vec<Submission>>>,
) {
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;
        let submission = client.track(&Event::new("Heartbeat"));

        let mut in_flight = lock_submissions(&in_flight);
        in_flight.retain(|s| !s.is_done());
        in_flight.push(submission);
    }
}

fn lock_submissions(submissions: &Mutex<Vec<Submission>>) -> MutexGuard<'_, Vec<Submission>> {
    submissions.lock().unwrap_or_else(|e| e.into_inner())
}

/// Give in-flight submissions a bounded amount of time to finish.
async fn wait_for_in_flight(in_flight: Vec<Submission>) {
    if in_flight.is_empty() {
        return;
    }

    let pending = in_flight.len();
    let all = async {
        for submission in &in_flight {
            submission.wait().await;
        }
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, all).await.is_err() {
        warn!(pending = pending, "Gave up waiting for in-flight requests");
    }
}
