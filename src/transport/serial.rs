//! Serial port transport.
//!
//! `serialport` is blocking, so [`SerialStream`] wraps it for tokio:
//! - a blocking task reads the port and forwards chunks into an in-memory
//!   pipe that backs `AsyncRead`
//! - each write runs on the blocking pool; the following write, flush or
//!   shutdown waits for it and returns its error
//!
//! The driver's writer task flushes after every batch, so a failed port
//! write reaches the caller of the send that queued it.
//!
//! Dropping the stream stops the reader within one read timeout.

use std::future::Future;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, StopBits};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Blocking read timeout; bounds how long closing the stream takes.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Capacity of the in-memory pipe between the port and the driver.
const BRIDGE_BUFFER: usize = 8 * 1024;

const CHUNK_SIZE: usize = 1024;

/// Open `path` at `baud_rate`, 8N1 without flow control.
///
/// Must be called from within a tokio runtime.
pub fn open_serial(path: &str, baud_rate: u32) -> Result<SerialStream> {
    let port = serialport::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()?;
    let reader_port = port.try_clone()?;

    tracing::debug!(port = path, baud_rate, "Opened serial port");

    let (inbound, remote) = tokio::io::duplex(BRIDGE_BUFFER);
    let closed = Arc::new(AtomicBool::new(false));
    spawn_port_reader(reader_port, remote, closed.clone(), path.to_string());

    Ok(SerialStream {
        inbound,
        outbound: BlockingWriter::new(port),
        closed,
    })
}

/// Serial ports present on this machine.
pub fn available_ports() -> Result<Vec<SerialPortInfo>> {
    Ok(serialport::available_ports()?)
}

/// Forward everything the port reads into `remote`. A read error ends the
/// stream.
fn spawn_port_reader(
    mut port: Box<dyn SerialPort>,
    mut remote: DuplexStream,
    closed: Arc<AtomicBool>,
    name: String,
) {
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(64);

    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; CHUNK_SIZE];
        while !closed.load(Ordering::Acquire) {
            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    if chunk_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    tracing::error!(port = %name, "Serial read failed: {}", e);
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            if remote.write_all(&chunk).await.is_err() {
                break;
            }
        }
        let _ = remote.shutdown().await;
    });
}

/// An open serial port as a tokio byte stream.
pub struct SerialStream {
    inbound: DuplexStream,
    outbound: BlockingWriter<Box<dyn SerialPort>>,
    closed: Arc<AtomicBool>,
}

impl AsyncRead for SerialStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inbound).poll_read(cx, buf)
    }
}

impl AsyncWrite for SerialStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.outbound).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.outbound).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.outbound).poll_shutdown(cx)
    }
}

impl Drop for SerialStream {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// `AsyncWrite` over a blocking writer. At most one write is in flight;
/// its outcome is reported by the next call.
struct BlockingWriter<W> {
    port: Option<W>,
    pending: Option<JoinHandle<(W, io::Result<()>)>>,
}

impl<W> BlockingWriter<W>
where
    W: Write + Send + Unpin + 'static,
{
    fn new(port: W) -> Self {
        Self {
            port: Some(port),
            pending: None,
        }
    }

    /// Wait for the in-flight write and take back the port.
    fn poll_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let Some(task) = self.pending.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let joined = ready!(Pin::new(task).poll(cx));
        self.pending = None;

        match joined {
            Ok((port, result)) => {
                self.port = Some(port);
                if let Err(e) = &result {
                    tracing::error!("Serial write failed: {}", e);
                }
                Poll::Ready(result)
            }
            // The port went down with the blocking task.
            Err(e) => Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, e))),
        }
    }
}

impl<W> AsyncWrite for BlockingWriter<W>
where
    W: Write + Send + Unpin + 'static,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = ready!(this.poll_pending(cx)) {
            return Poll::Ready(Err(e));
        }
        let Some(mut port) = this.port.take() else {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "serial port is closed")));
        };

        let chunk = buf.to_vec();
        this.pending = Some(tokio::task::spawn_blocking(move || {
            let result = port.write_all(&chunk).and_then(|()| port.flush());
            (port, result)
        }));
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_pending(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_pending(cx)
    }
}
