//! Transport module - byte streams a reader can be attached to.
//!
//! The driver only needs an async bidirectional byte stream. Anything that
//! implements tokio's `AsyncRead + AsyncWrite` qualifies: a serial port
//! stream (feature `serial`), a TCP socket to a network-attached reader, or
//! an in-memory `tokio::io::duplex` pair in tests.

use tokio::io::{AsyncRead, AsyncWrite};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::{available_ports, open_serial, SerialStream};

/// A bidirectional byte stream to a reader.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
