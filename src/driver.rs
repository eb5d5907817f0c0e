//! Driver builder and runtime loop.
//!
//! The [`DriverBuilder`] collects configuration and connects to a reader
//! over any tokio byte stream. The [`ReaderDriver`] manages the lifecycle:
//! 1. Spawn the writer task
//! 2. Spawn the read loop (transport → reassembler → dispatcher)
//! 3. Send the model's init sequence
//! 4. Serve commands, correlating each with its reply
//!
//! # Example
//!
//! ```no_run
//! use rfidwire::{InventoryMode, ReaderDriver, ReaderModel};
//!
//! # async fn run(port: tokio::io::DuplexStream) -> rfidwire::Result<()> {
//! let driver = ReaderDriver::builder()
//!     .model(ReaderModel::Vmr64)
//!     .connect_stream(port)
//!     .await?;
//!
//! let mut events = driver.subscribe();
//! driver.start_inventory(InventoryMode::FastSwitch).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::{DriverConfig, InventorySettings, ANTENNA_PORTS};
use crate::correlator::Correlator;
use crate::error::{Result, RfidError};
use crate::event::{DriverEvent, EventSink};
use crate::protocol::{
    BeeperMode, CommandReply, Extracted, Frame, FrameClass, InventoryMode, Notification,
    ProtocolDescriptor, ReaderModel, Reassembler, RfProfile, RfidAbility,
};
use crate::session::{SessionController, SessionState};
use crate::transport::Transport;
use crate::writer::{spawn_writer_task, Transmitter};

/// Size of a single transport read.
const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Builder for configuring and connecting a [`ReaderDriver`].
#[derive(Debug, Clone, Default)]
pub struct DriverBuilder {
    config: DriverConfig,
}

impl DriverBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: DriverConfig) -> Self {
        Self { config }
    }

    /// Set the reader model.
    ///
    /// Default: VMR64
    pub fn model(mut self, model: ReaderModel) -> Self {
        self.config.model = model;
        self
    }

    /// Set how long a command waits for its reply.
    ///
    /// Default: 2 seconds
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the VMR64 inventory polling interval.
    ///
    /// Default: 95 ms
    pub fn inventory_interval(mut self, interval: Duration) -> Self {
        self.config.inventory_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the event channel capacity.
    ///
    /// Default: 1024
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 64
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set antenna and inventory parameters.
    pub fn inventory(mut self, settings: InventorySettings) -> Self {
        self.config.inventory = settings;
        self
    }

    /// Set the serial port used by `connect_serial`.
    pub fn serial_port(mut self, path: impl Into<String>, baud_rate: u32) -> Self {
        self.config.serial = Some(crate::config::SerialSettings {
            path: path.into(),
            baud_rate,
        });
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Connect over a split transport.
    pub async fn connect<R, W>(self, reader: R, writer: W) -> Result<ReaderDriver>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        ReaderDriver::start(self.config, reader, writer).await
    }

    /// Connect over a single bidirectional stream.
    pub async fn connect_stream<T: Transport>(self, stream: T) -> Result<ReaderDriver> {
        let (reader, writer) = tokio::io::split(stream);
        self.connect(reader, writer).await
    }

    /// Open the configured serial port and connect over it.
    #[cfg(feature = "serial")]
    pub async fn connect_serial(self) -> Result<ReaderDriver> {
        let serial = self
            .config
            .serial
            .clone()
            .ok_or_else(|| RfidError::InvalidParameter("no serial port configured".into()))?;
        let stream = crate::transport::open_serial(&serial.path, serial.baud_rate)?;
        self.connect_stream(stream).await
    }
}

/// State shared by the driver handle and its read loop.
struct Shared {
    config: DriverConfig,
    descriptor: watch::Sender<Arc<dyn ProtocolDescriptor>>,
    transmitter: Transmitter,
    correlator: Correlator,
    session: SessionController,
    events: EventSink,
    connected: AtomicBool,
}

/// A connected reader.
///
/// Use `subscribe()` for tag reads and other events, and the command
/// methods to configure the reader. Dropping the driver during an inventory
/// queues the stop command without waiting for it; prefer
/// [`ReaderDriver::shutdown`], which reports whether the stop was written.
pub struct ReaderDriver {
    shared: Arc<Shared>,
    read_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<()>>,
}

impl ReaderDriver {
    /// Create a new driver builder.
    pub fn builder() -> DriverBuilder {
        DriverBuilder::new()
    }

    async fn start<R, W>(config: DriverConfig, reader: R, writer: W) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let events = EventSink::new(config.event_capacity);
        let (writer, writer_task) = spawn_writer_task(writer, config.channel_capacity);
        let transmitter = Transmitter::new(writer, events.clone());

        let descriptor = config.model.descriptor();
        let (descriptor_tx, descriptor_rx) = watch::channel(descriptor.clone());

        let shared = Arc::new(Shared {
            session: SessionController::new(transmitter.clone(), config.inventory_interval()),
            config,
            descriptor: descriptor_tx,
            transmitter,
            correlator: Correlator::new(),
            events,
            connected: AtomicBool::new(true),
        });

        let loop_shared = shared.clone();
        let read_task = tokio::spawn(async move {
            match read_loop(&loop_shared, reader, descriptor_rx).await {
                Ok(()) => tracing::debug!("Reader closed the connection"),
                Err(e) => {
                    tracing::error!("Read loop error: {}", e);
                    loop_shared.events.emit(DriverEvent::TransportError {
                        message: e.to_string(),
                    });
                }
            }
            loop_shared.connected.store(false, Ordering::Release);
            loop_shared.correlator.cancel_all().await;
            loop_shared.session.force_idle().await;
            loop_shared.events.emit(DriverEvent::Disconnected);
        });

        let driver = ReaderDriver {
            shared,
            read_task,
            writer_task,
        };

        tracing::debug!(model = %descriptor.model(), "Connected");
        driver.send_init_sequence(&descriptor).await?;
        Ok(driver)
    }

    async fn send_init_sequence(&self, descriptor: &Arc<dyn ProtocolDescriptor>) -> Result<()> {
        for frame in descriptor.init_sequence()? {
            self.shared.transmitter.transmit(frame).await?;
        }
        Ok(())
    }

    /// Subscribe to driver events.
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.shared.events.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.shared.session.state()
    }

    /// Watch inventory session transitions.
    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.shared.session.subscribe()
    }

    /// Active reader model.
    pub fn model(&self) -> ReaderModel {
        self.descriptor().model()
    }

    pub fn descriptor(&self) -> Arc<dyn ProtocolDescriptor> {
        self.shared.descriptor.borrow().clone()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    /// Whether the read side is still alive.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(RfidError::ConnectionClosed)
        }
    }

    /// Write a raw frame without waiting for a reply.
    pub async fn send(&self, frame: Vec<u8>) -> Result<()> {
        self.ensure_connected()?;
        self.shared.transmitter.transmit(frame).await
    }

    /// Write a raw frame and wait up to `timeout` for the matching reply.
    pub async fn send_and_wait(&self, frame: Vec<u8>, timeout: Duration) -> Result<Frame> {
        self.ensure_connected()?;
        let key = self
            .descriptor()
            .response_key(&frame)
            .ok_or_else(|| RfidError::Protocol("command frame carries no command code".into()))?;

        self.shared
            .correlator
            .exchange(key, self.shared.transmitter.transmit(frame), timeout)
            .await
    }

    /// [`send_and_wait`](Self::send_and_wait) with the configured timeout.
    pub async fn command(&self, frame: Vec<u8>) -> Result<Frame> {
        self.send_and_wait(frame, self.shared.config.command_timeout())
            .await
    }

    /// Send a command and require a success status in the reply.
    async fn command_ok(&self, frame: Vec<u8>) -> Result<CommandReply> {
        let descriptor = self.descriptor();
        let reply = self.command(frame).await?;
        descriptor
            .interpret_reply(&reply)
            .ok_or_else(|| RfidError::Protocol(format!("malformed reply {}", reply.to_hex())))?
            .into_result()
    }

    /// Start an inventory with the configured antenna settings.
    ///
    /// Returns `Ok(false)` when an inventory is already running.
    pub async fn start_inventory(&self, mode: InventoryMode) -> Result<bool> {
        self.ensure_connected()?;
        let descriptor = self.descriptor();
        self.shared
            .session
            .start(&descriptor, mode, &self.shared.config.inventory)
            .await
    }

    /// Stop the running inventory.
    ///
    /// Returns `Ok(false)` when no inventory was running.
    pub async fn stop_inventory(&self) -> Result<bool> {
        let descriptor = self.descriptor();
        self.shared.session.stop(&descriptor).await
    }

    pub async fn reset(&self) -> Result<CommandReply> {
        let frame = self.descriptor().reset_command()?;
        self.command_ok(frame).await
    }

    pub async fn set_beeper(&self, mode: BeeperMode) -> Result<CommandReply> {
        let frame = self.descriptor().beeper_command(mode)?;
        self.command_ok(frame).await
    }

    /// Set per-antenna output power in dBm.
    pub async fn set_power(&self, powers: [u8; ANTENNA_PORTS]) -> Result<CommandReply> {
        let descriptor = self.descriptor();
        let max = descriptor.max_power_dbm();
        if let Some(power) = powers.iter().find(|p| **p > max) {
            return Err(RfidError::InvalidParameter(format!(
                "power {power} dBm exceeds the {} maximum of {max} dBm",
                descriptor.model()
            )));
        }

        let reply = self.command(descriptor.set_power_command(&powers)?).await?;
        descriptor.confirm_set_power(&reply)
    }

    /// Read per-antenna output power in dBm.
    pub async fn get_power(&self) -> Result<[u8; ANTENNA_PORTS]> {
        let descriptor = self.descriptor();
        let reply = self.command(descriptor.get_power_command()?).await?;
        descriptor.parse_power(&reply)
    }

    pub async fn get_rf_profile(&self) -> Result<RfProfile> {
        let descriptor = self.descriptor();
        let reply = self.command(descriptor.get_rf_profile_command()?).await?;
        descriptor.parse_rf_profile(&reply)
    }

    /// Switch to the profile at `index` in the model's profile table.
    pub async fn set_rf_profile(&self, index: usize) -> Result<RfProfile> {
        let descriptor = self.descriptor();
        let profile = *descriptor.rf_profiles().get(index).ok_or_else(|| {
            RfidError::InvalidParameter(format!(
                "no RF profile {index} on {} readers",
                descriptor.model()
            ))
        })?;

        self.command_ok(descriptor.set_rf_profile_command(&profile)?)
            .await?;
        Ok(profile)
    }

    pub async fn query_rfid_ability(&self) -> Result<RfidAbility> {
        let descriptor = self.descriptor();
        let reply = self.command(descriptor.ability_command()?).await?;
        descriptor.parse_ability(&reply)
    }

    /// Change the wire protocol of this connection.
    ///
    /// Refused with [`RfidError::SessionActive`] while an inventory runs.
    pub async fn switch_protocol(&self, model: ReaderModel) -> Result<()> {
        if !self.session_state().is_idle() {
            return Err(RfidError::SessionActive);
        }
        if self.model() == model {
            return Ok(());
        }

        let descriptor = model.descriptor();
        self.shared.descriptor.send_replace(descriptor.clone());
        tracing::debug!(%model, "Switched protocol");
        self.send_init_sequence(&descriptor).await
    }

    /// Stop any running inventory, then close the connection.
    pub async fn shutdown(self) -> Result<()> {
        let result = if self.is_connected() {
            self.stop_inventory().await.map(|_| ())
        } else {
            Ok(())
        };
        self.read_task.abort();
        self.writer_task.abort();
        result
    }
}

impl Drop for ReaderDriver {
    fn drop(&mut self) {
        self.read_task.abort();
        if !self.is_connected() || self.session_state().is_idle() {
            self.writer_task.abort();
            return;
        }

        // Leave the writer task running; it drains the stop frame and exits
        // once the last handle is gone.
        self.shared.session.halt_poller();
        let queued = self
            .descriptor()
            .stop_command()
            .and_then(|stop| self.shared.transmitter.try_transmit(stop));
        match queued {
            Ok(()) => tracing::debug!("Queued inventory stop on drop"),
            Err(e) => {
                tracing::warn!("Could not stop inventory on drop: {}", e);
                self.writer_task.abort();
            }
        }
    }
}

/// Main read loop - reads chunks, cuts frames and dispatches them.
async fn read_loop<R>(
    shared: &Shared,
    mut reader: R,
    mut descriptor_rx: watch::Receiver<Arc<dyn ProtocolDescriptor>>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reassembler = Reassembler::new(descriptor_rx.borrow_and_update().clone());
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()), // Connection closed
            Ok(n) => n,
            Err(e) => return Err(RfidError::Io(e)),
        };

        if descriptor_rx.has_changed().unwrap_or(false) {
            reassembler = Reassembler::new(descriptor_rx.borrow_and_update().clone());
        }

        let descriptor = reassembler.descriptor().clone();
        for item in reassembler.push(&buf[..n]) {
            match item {
                Extracted::Frame(frame) => dispatch_frame(shared, &descriptor, frame).await,
                Extracted::Corrupt(corrupt) => shared.events.emit(DriverEvent::FrameRejected {
                    raw: corrupt.raw,
                    expected: corrupt.expected,
                    received: corrupt.received,
                }),
            }
        }
    }
}

/// Route one verified frame to exactly one consumer.
async fn dispatch_frame(shared: &Shared, descriptor: &Arc<dyn ProtocolDescriptor>, frame: Frame) {
    tracing::trace!(frame = %frame.to_hex(), "RX");
    shared.events.emit(DriverEvent::FrameReceived { raw: frame.raw() });

    match descriptor.classify(frame.as_bytes()) {
        FrameClass::TagRead(tag) => {
            tracing::trace!(epc = %tag.epc, antenna = tag.antenna, rssi = tag.rssi, "Tag read");
            shared.events.emit(DriverEvent::TagRead(tag));
        }
        FrameClass::Notification(notice) => publish_notification(shared, notice).await,
        FrameClass::Response => {
            let key = descriptor.response_key(frame.as_bytes());
            if let Some(frame) = shared.correlator.offer(key, frame).await {
                match descriptor.parse_unsolicited(frame.as_bytes()) {
                    Some(notice) => publish_notification(shared, notice).await,
                    None => tracing::debug!(frame = %frame.to_hex(), "Unsolicited frame"),
                }
            }
        }
    }
}

async fn publish_notification(shared: &Shared, notice: Notification) {
    match &notice {
        Notification::InventoryEnded { reason } => {
            tracing::debug!(reason, "Reader ended inventory");
            shared.session.force_idle().await;
        }
        Notification::ReaderError { code, message } => {
            tracing::warn!(code, "Reader error: {}", message);
        }
    }
    shared.events.emit(DriverEvent::Notification(notice));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_EVENT_CAPACITY};
    use crate::protocol::nation;

    #[test]
    fn test_builder_default() {
        let builder = DriverBuilder::default();
        assert_eq!(builder.config(), &DriverConfig::default());
        assert_eq!(builder.config().command_timeout(), DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(builder.config().event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_builder_configuration() {
        let builder = ReaderDriver::builder()
            .model(ReaderModel::Nation)
            .command_timeout(Duration::from_millis(500))
            .inventory_interval(Duration::from_millis(50))
            .event_capacity(16)
            .channel_capacity(8)
            .serial_port("/dev/ttyUSB0", 57_600);

        let config = builder.config();
        assert_eq!(config.model, ReaderModel::Nation);
        assert_eq!(config.command_timeout_ms, 500);
        assert_eq!(config.inventory_interval_ms, 50);
        assert_eq!(config.event_capacity, 16);
        assert_eq!(config.channel_capacity, 8);
        assert_eq!(config.serial.as_ref().map(|s| s.baud_rate), Some(57_600));
    }

    #[test]
    fn test_builder_from_config() {
        let config = DriverConfig::from_json_str(r#"{"model": "nation"}"#).unwrap();
        let builder = DriverBuilder::from_config(config);
        assert_eq!(builder.config().model, ReaderModel::Nation);
    }

    #[tokio::test]
    async fn test_connect_sends_nation_init_sequence() {
        let (client, mut server) = tokio::io::duplex(4096);
        let driver = ReaderDriver::builder()
            .model(ReaderModel::Nation)
            .connect_stream(client)
            .await
            .unwrap();

        let expected: Vec<u8> = driver
            .descriptor()
            .init_sequence()
            .unwrap()
            .concat();
        let mut buf = vec![0u8; expected.len()];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
        assert_eq!(driver.model(), ReaderModel::Nation);
    }

    #[tokio::test]
    async fn test_set_power_above_maximum_is_rejected() {
        let (client, _server) = tokio::io::duplex(4096);
        let driver = ReaderDriver::builder().connect_stream(client).await.unwrap();

        let result = driver.set_power([30, 30, 34, 30]).await;
        assert!(matches!(result, Err(RfidError::InvalidParameter(_))));
    }

    async fn nation_driver() -> (ReaderDriver, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        let driver = ReaderDriver::builder()
            .model(ReaderModel::Nation)
            .command_timeout(Duration::from_secs(1))
            .connect_stream(client)
            .await
            .unwrap();
        (driver, server)
    }

    #[tokio::test]
    async fn test_ability_reply_reaches_correlator() {
        let (driver, _server) = nation_driver().await;
        let descriptor = driver.descriptor();
        let key = descriptor
            .response_key(&descriptor.ability_command().unwrap())
            .unwrap();

        let shared = driver.shared.clone();
        let pending = tokio::spawn(async move {
            shared
                .correlator
                .exchange(key, async { Ok(()) }, Duration::from_secs(1))
                .await
        });
        while !driver.shared.correlator.is_pending().await {
            tokio::task::yield_now().await;
        }

        let reply = nation::build_command(nation::mid::QUERY_RFID_ABILITY, &[0, 33, 4]).unwrap();
        dispatch_frame(&driver.shared, &descriptor, Frame::from_slice(ReaderModel::Nation, &reply)).await;

        let frame = pending.await.unwrap().unwrap();
        assert_eq!(descriptor.parse_ability(&frame).unwrap().max_power_dbm, 33);
    }

    #[tokio::test]
    async fn test_unclaimed_error_frame_is_published() {
        let (driver, _server) = nation_driver().await;
        let descriptor = driver.descriptor();
        let mut events = driver.subscribe();

        let control = nation::ControlWord::command(0x0000).with_notify();
        let raw = nation::build_frame(control, 0, &[0x04]).unwrap();
        dispatch_frame(&driver.shared, &descriptor, Frame::from_slice(ReaderModel::Nation, &raw)).await;

        assert!(matches!(events.recv().await.unwrap(), DriverEvent::FrameReceived { .. }));
        assert_eq!(
            events.recv().await.unwrap(),
            DriverEvent::Notification(Notification::ReaderError {
                code: 4,
                message: "Reader busy"
            })
        );
    }

    #[tokio::test]
    async fn test_drop_during_inventory_sends_stop() {
        let (driver, mut server) = nation_driver().await;
        assert!(driver.start_inventory(InventoryMode::FastSwitch).await.unwrap());
        let stop = driver.descriptor().stop_command().unwrap();

        drop(driver);

        let mut written = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), server.read_to_end(&mut written))
            .await
            .unwrap()
            .unwrap();
        assert!(written.ends_with(&stop));
    }

    #[tokio::test]
    async fn test_set_rf_profile_index_out_of_range() {
        let (client, _server) = tokio::io::duplex(4096);
        let driver = ReaderDriver::builder().connect_stream(client).await.unwrap();

        assert!(matches!(
            driver.set_rf_profile(4).await,
            Err(RfidError::InvalidParameter(_))
        ));
    }
}
