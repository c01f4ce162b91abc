//! Buffer module for grouping events into batches.
//!
//! Events arrive one at a time over a tokio mpsc channel and leave in groups,
//! either when enough have accumulated or when the flush interval elapses.
//! Grouping is all this does: there is no overflow handling and no retry.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info};

use crate::client::AnalyticsClient;
use crate::event::Event;
use crate::submission::Submission;

/// Default channel capacity for the mpsc sender/receiver.
const DEFAULT_CHANNEL_CAPACITY: usize = 1_000;

/// Shortest flush interval the buffer will use; the ticker rejects zero.
const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for the event buffer.
///
/// Out-of-range values are raised to the nearest usable one when the buffer
/// is created: a `batch_size` of 0 acts as 1 (every event is its own batch),
/// a zero `flush_interval` acts as 1 ms and a zero `channel_capacity` as 1.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Number of events to accumulate before triggering a flush
    pub batch_size: usize,

    /// Duration to wait before flushing, even if batch size not reached
    pub flush_interval: Duration,

    /// Capacity of the mpsc channel
    pub channel_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl BufferConfig {
    /// Create a new buffer config with the specified batch size and flush interval.
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            batch_size,
            flush_interval,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    fn normalized(self) -> Self {
        Self {
            batch_size: self.batch_size.max(1),
            flush_interval: self.flush_interval.max(MIN_FLUSH_INTERVAL),
            channel_capacity: self.channel_capacity.max(1),
        }
    }
}

/// Statistics about buffer operations.
#[derive(Debug, Clone, Default)]
pub struct BufferStats {
    /// Total number of events received
    pub events_received: u64,

    /// Total number of events handed out in batches
    pub events_flushed: u64,

    /// Number of flush operations triggered by size threshold
    pub size_flushes: u64,

    /// Number of flush operations triggered by time interval
    pub time_flushes: u64,
}

/// A sender handle for submitting events to the buffer.
///
/// This can be cloned and shared across multiple producer tasks.
#[derive(Clone)]
pub struct BufferSender {
    tx: mpsc::Sender<Event>,
}

impl BufferSender {
    /// Send an event to the buffer, waiting if the channel is full.
    pub async fn send(&self, event: Event) -> Result<(), BufferError> {
        self.tx.send(event).await.map_err(|_| BufferError::Closed)
    }

    /// Try to send an event without waiting.
    pub fn try_send(&self, event: Event) -> Result<(), BufferError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BufferError::Full,
            mpsc::error::TrySendError::Closed(_) => BufferError::Closed,
        })
    }
}

/// Errors that can occur during buffer operations.
#[derive(Debug)]
pub enum BufferError {
    /// The buffer channel is full (for non-blocking sends)
    Full,

    /// The buffer has been closed and is no longer accepting events
    Closed,
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::Full => write!(f, "Buffer channel is full"),
            BufferError::Closed => write!(f, "Buffer has been closed"),
        }
    }
}

impl std::error::Error for BufferError {}

/// Async event buffer with size and time-based flushing.
///
/// The buffer produces a batch when either:
/// - The batch size threshold is reached (size-based flush)
/// - The flush interval elapses (time-based flush)
///
/// # Example
///
/// ```no_run
/// use analytics_forwarder::buffer::{BufferConfig, EventBuffer};
/// use analytics_forwarder::event::Event;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let config = BufferConfig::new(100, Duration::from_secs(5));
///     let (sender, mut buffer) = EventBuffer::new(config);
///
///     sender.send(Event::new("Heartbeat")).await.ok();
///     drop(sender);
///
///     while let Some(events) = buffer.next_batch().await {
///         println!("{} events ready", events.len());
///     }
/// }
/// ```
pub struct EventBuffer {
    /// Receiver for incoming events
    rx: mpsc::Receiver<Event>,

    /// Events waiting for the next flush
    buffer: Vec<Event>,

    config: BufferConfig,

    stats: BufferStats,
}

impl EventBuffer {
    /// Create a new event buffer with the given configuration.
    ///
    /// Returns a tuple of (BufferSender, EventBuffer). See [`BufferConfig`]
    /// for how out-of-range settings are adjusted.
    pub fn new(config: BufferConfig) -> (BufferSender, Self) {
        let config = config.normalized();
        let (tx, rx) = mpsc::channel(config.channel_capacity);

        let buffer = Self {
            rx,
            buffer: Vec::with_capacity(config.batch_size),
            config,
            stats: BufferStats::default(),
        };

        (BufferSender { tx }, buffer)
    }

    /// Create a new event buffer with default configuration.
    pub fn with_defaults() -> (BufferSender, Self) {
        Self::new(BufferConfig::default())
    }

    /// Wait for the next batch of events to be ready.
    ///
    /// Returns `None` once the channel is closed and the buffer is empty.
    pub async fn next_batch(&mut self) -> Option<Vec<Event>> {
        let mut ticker = interval(self.config.flush_interval);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            self.stats.events_received += 1;
                            self.buffer.push(event);

                            if self.buffer.len() >= self.config.batch_size {
                                self.stats.size_flushes += 1;
                                debug!(
                                    batch_size = self.buffer.len(),
                                    "Flushing buffer: batch size threshold reached"
                                );
                                return Some(self.take_batch());
                            }
                        }
                        None => {
                            if !self.buffer.is_empty() {
                                info!(
                                    remaining = self.buffer.len(),
                                    "Channel closed, flushing remaining events"
                                );
                                return Some(self.take_batch());
                            }
                            return None;
                        }
                    }
                }

                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        self.stats.time_flushes += 1;
                        debug!(
                            batch_size = self.buffer.len(),
                            interval_secs = self.config.flush_interval.as_secs(),
                            "Flushing buffer: time interval elapsed"
                        );
                        return Some(self.take_batch());
                    }
                }
            }
        }
    }

    fn take_batch(&mut self) -> Vec<Event> {
        let events = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.config.batch_size));
        self.stats.events_flushed += events.len() as u64;
        events
    }

    /// Get the current number of buffered events.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer currently holds no events.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get buffer statistics.
    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    /// Get the effective buffer configuration.
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Manually flush the buffer regardless of thresholds.
    ///
    /// Returns the events if there were any, or None if the buffer was empty.
    pub fn flush(&mut self) -> Option<Vec<Event>> {
        if self.buffer.is_empty() {
            None
        } else {
            debug!(batch_size = self.buffer.len(), "Manual buffer flush");
            Some(self.take_batch())
        }
    }
}

/// Send every batch the buffer produces through `client.batch`.
///
/// Runs until the buffer's channel is closed and drained. Returns the
/// submissions that were still in flight at that point so the caller can
/// decide how long to wait for them.
pub async fn forward(mut buffer: EventBuffer, client: &AnalyticsClient) -> Vec<Submission> {
    let mut in_flight: Vec<Submission> = Vec::new();

    while let Some(events) = buffer.next_batch().await {
        in_flight.retain(|submission| !submission.is_done());
        in_flight.push(client.batch(&events));
    }

    in_flight.retain(|submission| !submission.is_done());

    let stats = buffer.stats();
    info!(
        events_forwarded = stats.events_flushed,
        size_flushes = stats.size_flushes,
        time_flushes = stats.time_flushes,
        in_flight = in_flight.len(),
        "Event buffer drained"
    );

    in_flight
}
