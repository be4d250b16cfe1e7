//! Event bus for gateway events

use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::GatewayError;
use crate::model::DeviceTree;

/// Buffered events per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 100;

/// Pushed to every subscriber
///
/// Serializes as `{"type": "update" | "subscribed" | "error", "result": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "result", rename_all = "lowercase")]
pub enum GatewayEvent {
    /// Devices touched by an incremental update, already merged into the snapshot
    Update(DeviceTree),
    /// The access point accepted our subscription
    Subscribed {
        /// Address the session is bound to
        jid: String,
    },
    /// Something went wrong while processing a message
    Error {
        /// Human readable description
        message: String,
        /// True if the connection was torn down
        fatal: bool,
    },
}

impl GatewayEvent {
    /// Error event describing `err`
    #[must_use]
    pub fn from_error(err: &GatewayError) -> Self {
        Self::Error {
            message: err.to_string(),
            fatal: err.is_fatal(),
        }
    }
}

/// Event bus for distributing events
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    /// Create a new event bus
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: GatewayEvent) {
        // Nobody listening is fine
        let _ = self.tx.send(event);
    }

    /// Get subscriber count
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapt a receiver into a stream that skips over lag and ends when the bus is dropped
pub fn event_stream(rx: broadcast::Receiver<GatewayEvent>) -> impl Stream<Item = GatewayEvent> {
    futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}
