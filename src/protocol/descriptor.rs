//! Pluggable per-model protocol definitions.
//!
//! A [`ProtocolDescriptor`] bundles everything the runtime needs to talk to
//! one reader family: how to find and measure frames in a byte stream, how
//! to classify an inbound frame, and how to encode each high-level command.
//! The driver holds exactly one active descriptor and hands it to the
//! reassembler, dispatcher and session controller.
//!
//! # Example
//!
//! ```
//! use rfidwire::protocol::{FrameLength, ReaderModel};
//!
//! let descriptor = ReaderModel::Vmr64.descriptor();
//! let reset = descriptor.reset_command().unwrap();
//!
//! assert_eq!(descriptor.start_marker(), 0xA0);
//! assert_eq!(descriptor.frame_len(&reset), FrameLength::Complete(reset.len()));
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::frame::{CommandReply, Frame, Notification, TagRead};
use super::nation::{self, RfidAbility};
use super::vmr64;
use crate::config::{InventorySettings, ANTENNA_PORTS};
use crate::error::{Result, RfidError};

/// Supported reader families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderModel {
    #[default]
    Vmr64,
    Nation,
}

impl ReaderModel {
    /// Descriptor implementing this model's wire protocol.
    pub fn descriptor(self) -> Arc<dyn ProtocolDescriptor> {
        match self {
            ReaderModel::Vmr64 => Arc::new(Vmr64Descriptor),
            ReaderModel::Nation => Arc::new(NationDescriptor),
        }
    }
}

impl fmt::Display for ReaderModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderModel::Vmr64 => f.write_str("VMR64"),
            ReaderModel::Nation => f.write_str("NATION"),
        }
    }
}

/// Result of measuring the frame at the front of a buffer that starts
/// with a start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// Not enough bytes to read the length fields yet.
    NeedMore,
    /// The frame occupies this many bytes.
    Complete(usize),
    /// The length fields cannot describe a frame.
    Invalid,
}

/// Expected and received integrity values of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegrityCheck {
    pub expected: u16,
    pub received: u16,
}

impl IntegrityCheck {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.expected == self.received
    }
}

/// What an inbound frame is.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameClass {
    TagRead(TagRead),
    Notification(Notification),
    /// Anything else: a command reply, or an unsolicited status frame.
    Response,
}

/// How a model keeps an inventory running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryStrategy {
    /// Resend the inventory command every polling interval.
    Polling,
    /// Send once; the reader streams until told to stop.
    Continuous,
}

/// Inventory flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryMode {
    FastSwitch,
    SessionTarget,
}

/// Buzzer behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BeeperMode {
    Quiet = 0x00,
    BeepAfterInventory = 0x01,
    BeepAfterTag = 0x02,
}

/// An RF link profile the reader can be switched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RfProfile {
    /// Value sent on the wire.
    pub id: u8,
    pub name: &'static str,
    pub description: &'static str,
}

const VMR64_PROFILES: [RfProfile; 4] = [
    RfProfile {
        id: 0xD0,
        name: "Profile 0",
        description: "Tari 25uS, FM0 40KHz",
    },
    RfProfile {
        id: 0xD1,
        name: "Profile 1",
        description: "Tari 25uS, Miller 4 250KHz (Default)",
    },
    RfProfile {
        id: 0xD2,
        name: "Profile 2",
        description: "Tari 25uS, Miller 4 300KHz",
    },
    RfProfile {
        id: 0xD3,
        name: "Profile 3",
        description: "Tari 6.25uS, FM0 400KHz",
    },
];

const NATION_PROFILES: [RfProfile; 3] = [
    RfProfile {
        id: 0,
        name: "Profile 0",
        description: "Default baseband profile",
    },
    RfProfile {
        id: 1,
        name: "Profile 1",
        description: "High performance profile",
    },
    RfProfile {
        id: 2,
        name: "Profile 2",
        description: "Dense tag profile",
    },
];

/// Wire protocol of one reader family.
pub trait ProtocolDescriptor: Send + Sync + fmt::Debug {
    fn model(&self) -> ReaderModel;

    /// First byte of every frame.
    fn start_marker(&self) -> u8;

    /// Measure the frame at the start of `buf`. `buf[0]` is the marker.
    fn frame_len(&self, buf: &[u8]) -> FrameLength;

    /// Checksum or CRC of a complete frame.
    fn integrity(&self, frame: &[u8]) -> IntegrityCheck;

    fn parse_inventory(&self, frame: &[u8]) -> Option<TagRead>;

    fn parse_notification(&self, frame: &[u8]) -> Option<Notification> {
        let _ = frame;
        None
    }

    /// Event for a response frame that no pending request claimed.
    fn parse_unsolicited(&self, frame: &[u8]) -> Option<Notification> {
        let _ = frame;
        None
    }

    /// Route a frame to exactly one consumer. Tag reads win over
    /// everything else.
    fn classify(&self, frame: &[u8]) -> FrameClass {
        if let Some(tag) = self.parse_inventory(frame) {
            return FrameClass::TagRead(tag);
        }
        if let Some(notice) = self.parse_notification(frame) {
            return FrameClass::Notification(notice);
        }
        FrameClass::Response
    }

    /// Key shared by a command and its reply. Works on both directions.
    fn response_key(&self, frame: &[u8]) -> Option<u16>;

    fn interpret_reply(&self, frame: &Frame) -> Option<CommandReply>;

    fn inventory_strategy(&self) -> InventoryStrategy;

    fn inventory_command(&self, mode: InventoryMode, settings: &InventorySettings) -> Result<Vec<u8>>;

    fn stop_command(&self) -> Result<Vec<u8>>;

    /// Frames sent right after connecting.
    fn init_sequence(&self) -> Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    fn reset_command(&self) -> Result<Vec<u8>>;

    fn beeper_command(&self, mode: BeeperMode) -> Result<Vec<u8>>;

    fn max_power_dbm(&self) -> u8;

    fn set_power_command(&self, powers: &[u8; ANTENNA_PORTS]) -> Result<Vec<u8>>;

    fn get_power_command(&self) -> Result<Vec<u8>>;

    fn parse_power(&self, frame: &Frame) -> Result<[u8; ANTENNA_PORTS]>;

    /// Check the reply to a set-power command.
    fn confirm_set_power(&self, frame: &Frame) -> Result<CommandReply> {
        self.interpret_reply(frame)
            .ok_or_else(|| RfidError::Protocol("malformed power reply".into()))?
            .into_result()
    }

    fn rf_profiles(&self) -> &'static [RfProfile];

    fn set_rf_profile_command(&self, profile: &RfProfile) -> Result<Vec<u8>>;

    fn get_rf_profile_command(&self) -> Result<Vec<u8>>;

    /// Profile reported by a get-profile reply.
    ///
    /// A VMR64 profile reply has the shape of a status reply, so the id is
    /// matched against the profile table before the status is consulted.
    fn parse_rf_profile(&self, frame: &Frame) -> Result<RfProfile> {
        let reply = self
            .interpret_reply(frame)
            .ok_or_else(|| RfidError::Protocol("malformed RF profile reply".into()))?;
        let id = *reply
            .data
            .first()
            .ok_or_else(|| RfidError::Protocol("empty RF profile reply".into()))?;
        if let Some(profile) = self.rf_profiles().iter().find(|profile| profile.id == id) {
            return Ok(*profile);
        }
        reply.into_result()?;
        Err(RfidError::Protocol(format!("unknown RF profile id 0x{id:02X}")))
    }

    fn ability_command(&self) -> Result<Vec<u8>> {
        Err(self.unsupported("RFID ability query"))
    }

    fn parse_ability(&self, frame: &Frame) -> Result<RfidAbility> {
        let _ = frame;
        Err(self.unsupported("RFID ability query"))
    }

    fn unsupported(&self, operation: &'static str) -> RfidError {
        RfidError::Unsupported {
            protocol: match self.model() {
                ReaderModel::Vmr64 => "VMR64",
                ReaderModel::Nation => "NATION",
            },
            operation,
        }
    }
}

/// VMR64 readers: polled inventory, one-byte checksum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vmr64Descriptor;

impl Vmr64Descriptor {
    fn command(&self, command: u8, payload: &[u8]) -> Result<Vec<u8>> {
        vmr64::build_command(vmr64::address_for(command), command, payload)
    }
}

impl ProtocolDescriptor for Vmr64Descriptor {
    fn model(&self) -> ReaderModel {
        ReaderModel::Vmr64
    }

    fn start_marker(&self) -> u8 {
        vmr64::FRAME_HEADER
    }

    fn frame_len(&self, buf: &[u8]) -> FrameLength {
        match vmr64::frame_len(buf) {
            None => FrameLength::NeedMore,
            Some(len) if len < vmr64::MIN_FRAME_LEN => FrameLength::Invalid,
            Some(len) => FrameLength::Complete(len),
        }
    }

    fn integrity(&self, frame: &[u8]) -> IntegrityCheck {
        let (expected, received) = vmr64::checksum_pair(frame).unwrap_or((0, 1));
        IntegrityCheck {
            expected: expected as u16,
            received: received as u16,
        }
    }

    fn parse_inventory(&self, frame: &[u8]) -> Option<TagRead> {
        vmr64::parse_inventory(frame)
    }

    fn response_key(&self, frame: &[u8]) -> Option<u16> {
        frame.get(3).map(|cmd| *cmd as u16)
    }

    fn interpret_reply(&self, frame: &Frame) -> Option<CommandReply> {
        vmr64::interpret_reply(frame.as_bytes())
    }

    fn inventory_strategy(&self) -> InventoryStrategy {
        InventoryStrategy::Polling
    }

    fn inventory_command(&self, mode: InventoryMode, settings: &InventorySettings) -> Result<Vec<u8>> {
        match mode {
            InventoryMode::FastSwitch => self.command(
                vmr64::cmd::FAST_SWITCH_ANT_INVENTORY,
                &vmr64::fast_switch_payload(settings),
            ),
            InventoryMode::SessionTarget => self.command(
                vmr64::cmd::CUSTOMIZED_SESSION_TARGET_INVENTORY,
                &vmr64::session_target_payload(settings),
            ),
        }
    }

    fn stop_command(&self) -> Result<Vec<u8>> {
        self.command(vmr64::cmd::INV_OFF, &[])
    }

    fn reset_command(&self) -> Result<Vec<u8>> {
        self.command(vmr64::cmd::RESET, &[])
    }

    fn beeper_command(&self, mode: BeeperMode) -> Result<Vec<u8>> {
        self.command(vmr64::cmd::BEEPER, &[mode as u8])
    }

    fn max_power_dbm(&self) -> u8 {
        vmr64::MAX_POWER_DBM
    }

    fn set_power_command(&self, powers: &[u8; ANTENNA_PORTS]) -> Result<Vec<u8>> {
        self.command(vmr64::cmd::PWR, powers)
    }

    fn get_power_command(&self) -> Result<Vec<u8>> {
        self.command(vmr64::cmd::PWR_GET, &[])
    }

    fn parse_power(&self, frame: &Frame) -> Result<[u8; ANTENNA_PORTS]> {
        vmr64::parse_power(frame.as_bytes())
    }

    fn rf_profiles(&self) -> &'static [RfProfile] {
        &VMR64_PROFILES
    }

    fn set_rf_profile_command(&self, profile: &RfProfile) -> Result<Vec<u8>> {
        self.command(vmr64::cmd::SET_RF_PROFILE, &[profile.id])
    }

    fn get_rf_profile_command(&self) -> Result<Vec<u8>> {
        self.command(vmr64::cmd::GET_RF_PROFILE, &[])
    }
}

/// NATION readers: continuous inventory, CRC-16 framing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NationDescriptor;

impl ProtocolDescriptor for NationDescriptor {
    fn model(&self) -> ReaderModel {
        ReaderModel::Nation
    }

    fn start_marker(&self) -> u8 {
        nation::FRAME_HEADER
    }

    fn frame_len(&self, buf: &[u8]) -> FrameLength {
        match nation::frame_len(buf) {
            None => FrameLength::NeedMore,
            Some(len) => FrameLength::Complete(len),
        }
    }

    fn integrity(&self, frame: &[u8]) -> IntegrityCheck {
        let (expected, received) = nation::crc_pair(frame).unwrap_or((0, 1));
        IntegrityCheck { expected, received }
    }

    fn parse_inventory(&self, frame: &[u8]) -> Option<TagRead> {
        nation::parse_inventory(frame)
    }

    fn parse_notification(&self, frame: &[u8]) -> Option<Notification> {
        nation::parse_notification(frame)
    }

    fn parse_unsolicited(&self, frame: &[u8]) -> Option<Notification> {
        nation::parse_unsolicited(frame)
    }

    fn response_key(&self, frame: &[u8]) -> Option<u16> {
        let word = frame.get(1..5)?;
        let control = nation::ControlWord::unpack(u32::from_be_bytes([word[0], word[1], word[2], word[3]]));
        Some(control.code())
    }

    fn interpret_reply(&self, frame: &Frame) -> Option<CommandReply> {
        nation::interpret_reply(frame.as_bytes())
    }

    fn inventory_strategy(&self) -> InventoryStrategy {
        InventoryStrategy::Continuous
    }

    fn inventory_command(&self, mode: InventoryMode, settings: &InventorySettings) -> Result<Vec<u8>> {
        match mode {
            InventoryMode::FastSwitch => {
                nation::build_command(nation::mid::READ_EPC_TAG, &nation::inventory_payload(settings))
            }
            InventoryMode::SessionTarget => Err(self.unsupported("session/target inventory")),
        }
    }

    fn stop_command(&self) -> Result<Vec<u8>> {
        nation::build_command(nation::mid::STOP_INVENTORY, &[])
    }

    fn init_sequence(&self) -> Result<Vec<Vec<u8>>> {
        Ok(vec![
            self.stop_command()?,
            nation::build_command(nation::mid::QUERY_INFO, &[])?,
        ])
    }

    fn reset_command(&self) -> Result<Vec<u8>> {
        nation::build_command(nation::mid::STOP_OPERATION, &[])
    }

    fn beeper_command(&self, mode: BeeperMode) -> Result<Vec<u8>> {
        nation::build_command(nation::mid::BUZZER_SWITCH, &[mode as u8])
    }

    fn max_power_dbm(&self) -> u8 {
        nation::MAX_POWER_DBM
    }

    fn set_power_command(&self, powers: &[u8; ANTENNA_PORTS]) -> Result<Vec<u8>> {
        nation::build_command(nation::mid::CONFIGURE_READER_POWER, &nation::power_payload(powers))
    }

    fn get_power_command(&self) -> Result<Vec<u8>> {
        nation::build_command(nation::mid::QUERY_READER_POWER, &[])
    }

    fn parse_power(&self, frame: &Frame) -> Result<[u8; ANTENNA_PORTS]> {
        let reply = self
            .interpret_reply(frame)
            .ok_or_else(|| RfidError::Protocol("malformed power reply".into()))?
            .into_result()?;
        if reply.data.len() < 2 {
            return Err(RfidError::Protocol("power reply carries no values".into()));
        }
        Ok(nation::parse_power_pairs(&reply.data))
    }

    fn confirm_set_power(&self, frame: &Frame) -> Result<CommandReply> {
        let reply = self
            .interpret_reply(frame)
            .ok_or_else(|| RfidError::Protocol("malformed power reply".into()))?
            .into_result()?;
        match reply.data.first() {
            None | Some(0) => Ok(reply),
            Some(&code) => {
                tracing::warn!(code, "Power configuration failed: {}", nation::power_result_message(code));
                Err(RfidError::Rejected {
                    command: reply.command,
                    code,
                })
            }
        }
    }

    fn rf_profiles(&self) -> &'static [RfProfile] {
        &NATION_PROFILES
    }

    fn set_rf_profile_command(&self, profile: &RfProfile) -> Result<Vec<u8>> {
        nation::build_command(nation::mid::CONFIG_BASEBAND, &[profile.id])
    }

    fn get_rf_profile_command(&self) -> Result<Vec<u8>> {
        nation::build_command(nation::mid::QUERY_BASEBAND, &[])
    }

    fn ability_command(&self) -> Result<Vec<u8>> {
        nation::build_command(nation::mid::QUERY_RFID_ABILITY, &[])
    }

    fn parse_ability(&self, frame: &Frame) -> Result<RfidAbility> {
        let parsed = nation::parse_frame(frame.as_bytes())
            .ok_or_else(|| RfidError::Protocol("malformed ability reply".into()))?;
        nation::parse_ability(parsed.payload)
    }
}
