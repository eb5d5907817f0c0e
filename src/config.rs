//! Driver configuration.
//!
//! Every field has a default, so a JSON file only needs to name what it
//! changes:
//!
//! ```
//! use rfidwire::{DriverConfig, ReaderModel};
//!
//! let config = DriverConfig::from_json_str(r#"{ "model": "nation", "command_timeout_ms": 500 }"#).unwrap();
//! assert_eq!(config.model, ReaderModel::Nation);
//! assert_eq!(config.command_timeout().as_millis(), 500);
//! assert_eq!(config.inventory_interval_ms, 95);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::ReaderModel;

/// Default deadline for a correlated command reply.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default VMR64 inventory polling period.
pub const DEFAULT_INVENTORY_INTERVAL: Duration = Duration::from_millis(95);

/// Default capacity of the driver event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Default capacity of the outbound frame queue.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Default serial baud rate for both reader families.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Number of antenna ports addressed by the command set.
pub const ANTENNA_PORTS: usize = 4;

/// One antenna port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntennaPort {
    pub enabled: bool,
    /// Transmit power in dBm.
    pub power_dbm: u8,
}

impl Default for AntennaPort {
    fn default() -> Self {
        Self {
            enabled: true,
            power_dbm: 30,
        }
    }
}

/// Fast-switch antenna inventory parameters (VMR64 `0x8A`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastSwitchSettings {
    /// Dwell per antenna, in reader rounds.
    pub stay_time: u8,
    pub interval: u8,
    pub repeat: u8,
}

impl Default for FastSwitchSettings {
    fn default() -> Self {
        Self {
            stay_time: 0x01,
            interval: 0x01,
            repeat: 0x01,
        }
    }
}

/// Customized session/target inventory parameters (VMR64 `0x8B`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTargetSettings {
    /// Gen2 session, 0..=3.
    pub session: u8,
    /// Inventoried flag target, 0 = A, 1 = B.
    pub target: u8,
    pub repeat: u8,
}

impl Default for SessionTargetSettings {
    fn default() -> Self {
        Self {
            session: 0x00,
            target: 0x00,
            repeat: 0x01,
        }
    }
}

/// Everything the inventory command builders need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySettings {
    pub antennas: [AntennaPort; ANTENNA_PORTS],
    pub fast_switch: FastSwitchSettings,
    pub session_target: SessionTargetSettings,
}

impl InventorySettings {
    /// 1-based numbers of the enabled antennas.
    pub fn enabled_antennas(&self) -> Vec<u8> {
        self.antennas
            .iter()
            .enumerate()
            .filter(|(_, port)| port.enabled)
            .map(|(idx, _)| idx as u8 + 1)
            .collect()
    }

    /// Configured power for each port.
    pub fn powers(&self) -> [u8; ANTENNA_PORTS] {
        self.antennas.map(|port| port.power_dbm)
    }
}

/// Physical serial port settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub path: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

/// Complete driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Wire protocol spoken by the attached reader.
    pub model: ReaderModel,
    pub command_timeout_ms: u64,
    pub inventory_interval_ms: u64,
    pub event_capacity: usize,
    pub channel_capacity: usize,
    pub inventory: InventorySettings,
    pub serial: Option<SerialSettings>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            model: ReaderModel::Vmr64,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT.as_millis() as u64,
            inventory_interval_ms: DEFAULT_INVENTORY_INTERVAL.as_millis() as u64,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            inventory: InventorySettings::default(),
            serial: None,
        }
    }
}

impl DriverConfig {
    /// Parse a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    #[inline]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    #[inline]
    pub fn inventory_interval(&self) -> Duration {
        Duration::from_millis(self.inventory_interval_ms)
    }
}
