//! VMR64 wire format.
//!
//! ```text
//! +------+-----+---------+-----+-----------------+----------+
//! | 0xA0 | len | address | cmd | payload (len-3) | checksum |
//! +------+-----+---------+-----+-----------------+----------+
//! ```
//!
//! `len` counts address, command, payload and checksum, so a whole frame is
//! `len + 2` bytes. The checksum is the two's complement of the byte sum of
//! everything before it.
//!
//! Inventory replies (`0x8A` / `0x8B`) carry one tag each:
//!
//! ```text
//! A0 len addr cmd freqAnt pcLow pcHigh? EPC... rssi checksum
//! ```
//!
//! The reader has to be polled: one inventory command yields one round.

use bytes::Bytes;

use super::frame::{CommandReply, ReplyStatus, TagRead};
use super::tables::{frequency_mhz, rssi_dbm};
use crate::config::{InventorySettings, ANTENNA_PORTS};
use crate::error::{Result, RfidError};

/// Start-of-frame marker.
pub const FRAME_HEADER: u8 = 0xA0;

/// Marker, length, address, command and checksum.
pub const MIN_FRAME_LEN: usize = 5;

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - 3;

/// Address used for most commands.
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Address used by the info and power commands.
pub const READER_ADDRESS: u8 = 0x01;

/// Reads at or below this level are treated as noise.
pub const RSSI_FLOOR_DBM: i16 = -99;

/// RSSI used when the raw code is outside the table.
pub const FALLBACK_RSSI_DBM: i16 = -100;

/// Frequency used when the channel code is outside the table.
pub const FALLBACK_FREQUENCY_MHZ: f64 = 865.0;

/// Highest power setting the reader accepts.
pub const MAX_POWER_DBM: u8 = 33;

/// Offset of the EPC within an inventory frame.
const EPC_OFFSET: usize = 7;

/// Command codes.
pub mod cmd {
    pub const INFO: u8 = 0x01;
    pub const SET_RF_PROFILE: u8 = 0x69;
    pub const GET_RF_PROFILE: u8 = 0x6A;
    pub const RESET: u8 = 0x70;
    pub const FIRMWARE: u8 = 0x72;
    pub const PWR: u8 = 0x76;
    pub const PWR_GET: u8 = 0x77;
    pub const BEEPER: u8 = 0x7A;
    pub const INV_OFF: u8 = 0x88;
    pub const INV_ON: u8 = 0x8A;
    pub const FAST_SWITCH_ANT_INVENTORY: u8 = 0x8A;
    pub const CUSTOMIZED_SESSION_TARGET_INVENTORY: u8 = 0x8B;
}

/// Status codes that mark a short reply as successful.
const SUCCESS_CODES: [u8; 3] = [0x10, 0x11, 0x00];

/// Address a command is sent to.
pub fn address_for(command: u8) -> u8 {
    match command {
        cmd::INFO | cmd::PWR | cmd::PWR_GET => READER_ADDRESS,
        _ => BROADCAST_ADDRESS,
    }
}

/// Two's complement of the byte sum.
#[inline]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |sum, b| sum.wrapping_add(*b))
        .wrapping_neg()
}

/// Encode a command frame.
pub fn build_command(address: u8, command: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(RfidError::InvalidParameter(format!(
            "VMR64 payload of {} bytes exceeds {}",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + payload.len());
    frame.push(FRAME_HEADER);
    frame.push((payload.len() + 3) as u8);
    frame.push(address);
    frame.push(command);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    Ok(frame)
}

/// Full length of the frame at the start of `buf`, once the length byte
/// is available.
#[inline]
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    buf.get(1).map(|len| *len as usize + 2)
}

/// Checksum carried by `frame` and the one computed over it.
pub fn checksum_pair(frame: &[u8]) -> Option<(u8, u8)> {
    let (last, body) = frame.split_last()?;
    Some((checksum(body), *last))
}

/// Whether `frame` carries a valid checksum.
pub fn verify(frame: &[u8]) -> bool {
    frame.len() >= MIN_FRAME_LEN
        && checksum_pair(frame).is_some_and(|(expected, received)| expected == received)
}

/// Borrowed view of a decoded VMR64 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vmr64Frame<'a> {
    pub address: u8,
    pub command: u8,
    pub payload: &'a [u8],
}

/// Split a complete frame into its fields, checking marker, length and
/// checksum.
pub fn parse_frame(frame: &[u8]) -> Option<Vmr64Frame<'_>> {
    if frame.len() < MIN_FRAME_LEN || frame[0] != FRAME_HEADER {
        return None;
    }
    if frame_len(frame)? != frame.len() || !verify(frame) {
        return None;
    }
    Some(Vmr64Frame {
        address: frame[2],
        command: frame[3],
        payload: &frame[4..frame.len() - 1],
    })
}

/// Decode an inventory reply into a tag read.
///
/// Returns `None` for anything that is not a tag: other commands, the
/// round summary the reader sends at the end of an inventory, reads with
/// no EPC bytes, and reads at or below [`RSSI_FLOOR_DBM`].
pub fn parse_inventory(data: &[u8]) -> Option<TagRead> {
    if data.len() < MIN_FRAME_LEN {
        return None;
    }
    if data[3] != cmd::FAST_SWITCH_ANT_INVENTORY
        && data[3] != cmd::CUSTOMIZED_SESSION_TARGET_INVENTORY
    {
        return None;
    }

    let freq_ant = data[4];
    let antenna = (freq_ant & 0x03) + 1;
    let channel = freq_ant >> 2;

    let pc_low = data.get(5).copied().unwrap_or(0);
    let epc_len = ((pc_low >> 3) & 0x1F) as usize * 2;
    let epc_end = (EPC_OFFSET + epc_len).min(data.len() - 2);
    if epc_end <= EPC_OFFSET {
        return None;
    }
    let epc = hex::encode_upper(&data[EPC_OFFSET..epc_end]);

    let rssi = rssi_dbm(data[data.len() - 2]).unwrap_or(FALLBACK_RSSI_DBM);
    if rssi <= RSSI_FLOOR_DBM {
        return None;
    }

    Some(TagRead {
        epc,
        antenna,
        rssi,
        frequency: frequency_mhz(channel).unwrap_or(FALLBACK_FREQUENCY_MHZ),
        tid: None,
    })
}

/// Fast-switch payload: `[slot, stay]` for each of four slots, then
/// `interval` and `repeat`. A disabled slot gets a zero stay time. With no
/// antenna enabled, slot 0 is used anyway.
pub fn fast_switch_payload(settings: &InventorySettings) -> Vec<u8> {
    let any_enabled = settings.antennas.iter().any(|port| port.enabled);
    let stay = settings.fast_switch.stay_time;

    let mut payload = Vec::with_capacity(ANTENNA_PORTS * 2 + 2);
    for (slot, port) in settings.antennas.iter().enumerate() {
        let enabled = port.enabled || (!any_enabled && slot == 0);
        payload.push(slot as u8);
        payload.push(if enabled { stay } else { 0 });
    }
    payload.push(settings.fast_switch.interval);
    payload.push(settings.fast_switch.repeat);
    payload
}

/// Session/target payload: `[session, target, repeat]`.
pub fn session_target_payload(settings: &InventorySettings) -> Vec<u8> {
    let st = &settings.session_target;
    vec![st.session, st.target, st.repeat]
}

/// Interpret a command reply.
///
/// A six-byte `A0 04 addr cmd code cs` frame is a status reply; anything
/// longer is a data reply and counts as success.
pub fn interpret_reply(frame: &[u8]) -> Option<CommandReply> {
    let parsed = parse_frame(frame)?;
    let status = if frame.len() == 6 && frame[1] == 0x04 {
        let code = frame[4];
        if SUCCESS_CODES.contains(&code) {
            ReplyStatus::Success
        } else {
            ReplyStatus::Failed(code)
        }
    } else {
        ReplyStatus::Success
    };

    Some(CommandReply {
        command: parsed.command as u16,
        status,
        data: Bytes::copy_from_slice(parsed.payload),
    })
}

/// Per-port output power from a `PWR_GET` reply.
pub fn parse_power(frame: &[u8]) -> Result<[u8; ANTENNA_PORTS]> {
    let parsed = parse_frame(frame)
        .ok_or_else(|| RfidError::Protocol("malformed power reply".into()))?;
    if parsed.command != cmd::PWR_GET {
        return Err(RfidError::Protocol(format!(
            "power reply has command 0x{:02X}",
            parsed.command
        )));
    }

    match (frame[1], parsed.payload) {
        (0x04, [all]) => Ok([*all; ANTENNA_PORTS]),
        (0x07, [p1, p2, p3, p4]) => Ok([*p1, *p2, *p3, *p4]),
        (len, _) => Err(RfidError::Protocol(format!(
            "unexpected power reply length 0x{len:02X}"
        ))),
    }
}
