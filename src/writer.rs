//! Dedicated writer task for outbound frames.
//!
//! The transport's write half is owned by one task fed through an mpsc
//! channel, so the inventory poller, command callers and shutdown path never
//! contend for a lock around the port.
//!
//! # Architecture
//!
//! ```text
//! Inventory poller ─┐
//! Command caller   ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Transport
//! Shutdown         ─┘
//! ```
//!
//! Every frame carries a completion channel. [`WriterHandle::send`] resolves
//! only once the frame has been written and flushed, so a transport failure
//! reaches the caller of the send that hit it.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Result, RfidError};
use crate::event::{DriverEvent, EventSink};

/// Maximum frames to batch before a flush.
const MAX_BATCH_SIZE: usize = 16;

/// A frame queued for the writer task.
#[derive(Debug)]
pub struct OutboundFrame {
    pub bytes: Bytes,
    done: oneshot::Sender<io::Result<()>>,
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
}

impl WriterHandle {
    /// Queue a frame and wait until it has been written and flushed.
    pub async fn send(&self, bytes: Bytes) -> Result<()> {
        let (done, written) = oneshot::channel();
        self.tx
            .send(OutboundFrame { bytes, done })
            .await
            .map_err(|_| RfidError::ConnectionClosed)?;

        match written.await {
            Ok(result) => result.map_err(RfidError::Io),
            Err(_) => Err(RfidError::ConnectionClosed),
        }
    }

    /// Queue a frame without waiting for it to be written.
    pub fn try_send(&self, bytes: Bytes) -> Result<()> {
        let (done, _) = oneshot::channel();
        self.tx
            .try_send(OutboundFrame { bytes, done })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    RfidError::Io(io::Error::new(io::ErrorKind::WouldBlock, "writer queue is full"))
                }
                mpsc::error::TrySendError::Closed(_) => RfidError::ConnectionClosed,
            })
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly when every handle is dropped, or with an error on
/// the first failed write.
pub fn spawn_writer_task<W>(writer: W, channel_capacity: usize) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, writer));
    (WriterHandle { tx }, task)
}

/// Main writer loop - receives frames and writes them in FIFO order.
async fn writer_loop<W>(mut rx: mpsc::Receiver<OutboundFrame>, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            // Channel closed, clean shutdown
            None => return Ok(()),
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        match write_batch(&mut writer, &batch).await {
            Ok(()) => {
                for frame in batch {
                    let _ = frame.done.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::error!("Transport write failed: {}", e);
                for frame in batch {
                    let _ = frame.done.send(Err(io::Error::new(e.kind(), e.to_string())));
                }
                return Err(RfidError::Io(e));
            }
        }
    }
}

async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for frame in batch {
        writer.write_all(&frame.bytes).await?;
    }
    writer.flush().await
}

/// Outbound path shared by the driver and the session controller: logs and
/// publishes every frame before handing it to the writer task.
#[derive(Debug, Clone)]
pub struct Transmitter {
    writer: WriterHandle,
    events: EventSink,
}

impl Transmitter {
    pub fn new(writer: WriterHandle, events: EventSink) -> Self {
        Self { writer, events }
    }

    /// Write one frame. Failures are also published as
    /// [`DriverEvent::TransportError`].
    pub async fn transmit(&self, frame: impl Into<Bytes>) -> Result<()> {
        let raw: Bytes = frame.into();
        tracing::trace!(frame = %hex::encode(&raw), "TX");
        self.events.emit(DriverEvent::FrameSent { raw: raw.clone() });

        if let Err(e) = self.writer.send(raw).await {
            self.events.emit(DriverEvent::TransportError {
                message: e.to_string(),
            });
            return Err(e);
        }
        Ok(())
    }

    /// Queue a frame from a context that cannot wait for the write.
    pub fn try_transmit(&self, frame: impl Into<Bytes>) -> Result<()> {
        let raw: Bytes = frame.into();
        tracing::trace!(frame = %hex::encode(&raw), "TX (queued)");
        self.writer.try_send(raw.clone())?;
        self.events.emit(DriverEvent::FrameSent { raw });
        Ok(())
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }
}
