//! # rfidwire
//!
//! Async serial protocol engine for UHF RFID readers speaking the VMR64 or
//! NATION wire protocols.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): frame builders, checksum and CRC, tag and
//!   notification decoders, and the stream [`Reassembler`](protocol::Reassembler),
//!   all behind one [`ProtocolDescriptor`](protocol::ProtocolDescriptor) per
//!   reader family
//! - **Runtime**: a writer task, a read loop that routes every frame to
//!   exactly one consumer, a single-flight command correlator, and the
//!   inventory session state machine
//! - **Transport** ([`transport`]): any tokio byte stream, or a serial port
//!   with the `serial` feature
//!
//! ## Example
//!
//! ```no_run
//! use rfidwire::{DriverEvent, InventoryMode, ReaderDriver, ReaderModel};
//!
//! # async fn run(port: tokio::io::DuplexStream) -> rfidwire::Result<()> {
//! let driver = ReaderDriver::builder()
//!     .model(ReaderModel::Nation)
//!     .connect_stream(port)
//!     .await?;
//!
//! let mut events = driver.subscribe();
//! driver.start_inventory(InventoryMode::FastSwitch).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let DriverEvent::TagRead(tag) = event {
//!         println!("{} on antenna {} at {} dBm", tag.epc, tag.antenna, tag.rssi);
//!     }
//! }
//!
//! driver.shutdown().await
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;

mod correlator;
mod driver;
mod session;
mod writer;

pub use config::{DriverConfig, InventorySettings};
pub use driver::{DriverBuilder, ReaderDriver};
pub use error::{Result, RfidError};
pub use event::DriverEvent;
pub use protocol::{BeeperMode, InventoryMode, ReaderModel, TagRead};
pub use session::SessionState;
