//! Driver events.
//!
//! Every frame that crosses the transport, every decoded tag and every
//! state change is published on a `tokio::sync::broadcast` channel. Slow
//! subscribers lag and lose the oldest events; the driver never blocks on
//! them.

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::protocol::{Notification, TagRead};
use crate::session::SessionState;

/// Something observable happened on the connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DriverEvent {
    /// A frame was written to the transport.
    FrameSent { raw: Bytes },
    /// A verified frame was cut from the receive stream.
    FrameReceived { raw: Bytes },
    /// A frame failed its checksum or CRC and was discarded.
    FrameRejected {
        raw: Bytes,
        expected: u16,
        received: u16,
    },
    TagRead(TagRead),
    Notification(Notification),
    SessionChanged(SessionState),
    /// Reading or writing the transport failed.
    TransportError { message: String },
    /// The read side reached end of stream or failed; the driver is dead.
    Disconnected,
}

/// Sending half of the event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<DriverEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: DriverEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.tx.subscribe()
    }
}
