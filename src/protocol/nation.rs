//! NATION wire format.
//!
//! ```text
//! +------+-------------------+-----------+------------+---------+-----------+
//! | 0x5A | control word (BE) | address?  | length BE  | payload | CRC16 BE  |
//! |  1   |        4          | 1 if 485  |     2      |   len   |     2     |
//! +------+-------------------+-----------+------------+---------+-----------+
//! ```
//!
//! The control word packs `type << 24 | version << 16 | rs485 << 13 |
//! notify << 12 | category << 8 | mid`. The two flag bits sit inside the
//! category byte, so [`ControlWord`] keeps that byte as it appears on the
//! wire and derives the flags from it. Tag reports are documented with
//! category `0x02` but arrive as `0x12`; both are accepted. Category `0x10`
//! is a real category (`QUERY_RFID_ABILITY`), not `0x00` with the notify
//! bit.
//!
//! The CRC is CRC-16/CCITT (poly `0x1021`, init `0x0000`) over everything
//! between the marker and the CRC itself.

use bytes::Bytes;

use super::frame::{CommandReply, Notification, ReplyStatus, TagRead};
use crate::config::{InventorySettings, ANTENNA_PORTS};
use crate::error::{Result, RfidError};

/// Start-of-frame marker.
pub const FRAME_HEADER: u8 = 0x5A;

pub const PROTOCOL_TYPE: u8 = 0x00;
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Smallest possible frame: marker, control word, length, CRC.
pub const MIN_FRAME_LEN: usize = 9;

/// Frequency reported when a tag report carries none.
pub const DEFAULT_FREQUENCY_MHZ: f64 = 920.0;

/// RSSI reported when a tag report carries none.
pub const DEFAULT_RSSI_DBM: i16 = -70;

/// Highest power setting the reader accepts.
pub const MAX_POWER_DBM: u8 = 22;

/// Continuous-read flag appended to the inventory command.
pub const CONTINUOUS: u8 = 0x01;

/// Bit 13 of the control word.
const RS485_FLAG: u8 = 0x20;
/// Bit 12 of the control word.
const NOTIFY_FLAG: u8 = 0x10;

/// Message codes, `category << 8 | mid`.
pub mod mid {
    pub const STOP_OPERATION: u16 = 0x00FF;
    pub const CONFIRM_CONNECTION: u16 = 0x0012;
    pub const QUERY_INFO: u16 = 0x0100;
    pub const READER_POWER_CALIBRATION: u16 = 0x0103;
    pub const QUERY_POWER_CALIBRATION: u16 = 0x0104;
    pub const BUZZER_SWITCH: u16 = 0x011E;
    pub const CONFIGURE_READER_POWER: u16 = 0x0201;
    pub const QUERY_READER_POWER: u16 = 0x0202;
    pub const SET_RF_BAND: u16 = 0x0203;
    pub const QUERY_RF_BAND: u16 = 0x0204;
    pub const SET_WORKING_FREQUENCY: u16 = 0x0205;
    pub const QUERY_WORKING_FREQUENCY: u16 = 0x0206;
    pub const SET_FILTER_SETTINGS: u16 = 0x0209;
    pub const QUERY_FILTER_SETTINGS: u16 = 0x020A;
    pub const CONFIG_BASEBAND: u16 = 0x020B;
    pub const QUERY_BASEBAND: u16 = 0x020C;
    pub const READ_EPC_TAG: u16 = 0x0210;
    pub const WRITE_EPC_TAG: u16 = 0x0211;
    pub const STOP_INVENTORY: u16 = 0x02FF;
    pub const QUERY_RFID_ABILITY: u16 = 0x1000;
}

/// Documented and observed tag report categories.
const TAG_CATEGORIES: [u8; 2] = [0x02, 0x12];
const TAG_MID: u8 = 0x00;

const READ_END_CATEGORY: u8 = 0x12;
const READ_END_MIDS: [u8; 3] = [0x01, 0x21, 0x31];

const ERROR_CATEGORY: u8 = 0x00;
const ERROR_MID: u8 = 0x00;

/// Optional parameter ids following the antenna byte of a tag report.
mod pid {
    pub const RSSI: u8 = 0x01;
    pub const READ_RESULT: u8 = 0x02;
    pub const TID: u8 = 0x03;
    pub const USER_DATA: u8 = 0x04;
    pub const RESERVED_DATA: u8 = 0x05;
    pub const SUB_ANTENNA: u8 = 0x06;
    pub const UTC: u8 = 0x07;
    pub const FREQUENCY: u8 = 0x08;
    pub const PHASE: u8 = 0x09;
}

/// Power configuration PIDs: one per port, then persistence.
const POWER_PERSIST_PID: u8 = 0xFF;

/// Decoded 32-bit protocol control word.
///
/// `category` is the raw byte, flag bits included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord {
    pub protocol_type: u8,
    pub protocol_version: u8,
    pub category: u8,
    pub mid: u8,
}

impl ControlWord {
    /// Control word for an outbound command.
    pub fn command(code: u16) -> Self {
        Self {
            protocol_type: PROTOCOL_TYPE,
            protocol_version: PROTOCOL_VERSION,
            category: (code >> 8) as u8,
            mid: code as u8,
        }
    }

    /// Set the notify flag.
    pub fn with_notify(mut self) -> Self {
        self.category |= NOTIFY_FLAG;
        self
    }

    /// Set the RS485 flag; frames then carry an address byte.
    pub fn with_rs485(mut self) -> Self {
        self.category |= RS485_FLAG;
        self
    }

    #[inline]
    pub fn notify(&self) -> bool {
        self.category & NOTIFY_FLAG != 0
    }

    #[inline]
    pub fn rs485(&self) -> bool {
        self.category & RS485_FLAG != 0
    }

    pub fn pack(&self) -> u32 {
        u32::from_be_bytes([self.protocol_type, self.protocol_version, self.category, self.mid])
    }

    pub fn unpack(word: u32) -> Self {
        let [protocol_type, protocol_version, category, mid] = word.to_be_bytes();
        Self {
            protocol_type,
            protocol_version,
            category,
            mid,
        }
    }

    /// `category << 8 | mid`.
    #[inline]
    pub fn code(&self) -> u16 {
        (self.category as u16) << 8 | self.mid as u16
    }
}

/// CRC-16/CCITT, poly 0x1021, init 0.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in bytes {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Encode a frame with an explicit control word and optional RS485
/// address. The address byte is written when the RS485 flag is set.
pub fn build_frame(control: ControlWord, address: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        RfidError::InvalidParameter(format!(
            "NATION payload of {} bytes exceeds {}",
            payload.len(),
            u16::MAX
        ))
    })?;

    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + 1 + payload.len());
    frame.push(FRAME_HEADER);
    frame.extend_from_slice(&control.pack().to_be_bytes());
    if control.rs485() {
        frame.push(address);
    }
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    let crc = crc16_ccitt(&frame[1..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Encode a point-to-point command frame.
pub fn build_command(code: u16, payload: &[u8]) -> Result<Vec<u8>> {
    build_frame(ControlWord::command(code), 0, payload)
}

/// Full length of the frame at the start of `buf`, once the header is
/// available.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < MIN_FRAME_LEN {
        return None;
    }
    let control = ControlWord::unpack(u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]));
    let len_at = if control.rs485() { 6 } else { 5 };
    let len = u16::from_be_bytes([*buf.get(len_at)?, *buf.get(len_at + 1)?]) as usize;
    Some(len_at + 2 + len + 2)
}

/// CRC computed over `frame` and the one it carries.
pub fn crc_pair(frame: &[u8]) -> Option<(u16, u16)> {
    if frame.len() < MIN_FRAME_LEN {
        return None;
    }
    let split = frame.len() - 2;
    let received = u16::from_be_bytes([frame[split], frame[split + 1]]);
    Some((crc16_ccitt(&frame[1..split]), received))
}

/// Whether `frame` carries a valid CRC.
pub fn verify(frame: &[u8]) -> bool {
    crc_pair(frame).is_some_and(|(expected, received)| expected == received)
}

/// Borrowed view of a decoded NATION frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NationFrame<'a> {
    pub control: ControlWord,
    pub address: Option<u8>,
    pub payload: &'a [u8],
}

/// Split a complete frame into its fields, checking marker, length and CRC.
pub fn parse_frame(frame: &[u8]) -> Option<NationFrame<'_>> {
    if frame.first() != Some(&FRAME_HEADER) || frame_len(frame)? != frame.len() {
        return None;
    }
    if !verify(frame) {
        return None;
    }

    let control = ControlWord::unpack(u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]));
    let (address, payload_at) = if control.rs485() {
        (Some(frame[5]), 8)
    } else {
        (None, 7)
    };

    Some(NationFrame {
        control,
        address,
        payload: &frame[payload_at..frame.len() - 2],
    })
}

/// Decode a tag report notification.
pub fn parse_inventory(frame: &[u8]) -> Option<TagRead> {
    let parsed = parse_frame(frame)?;
    let control = parsed.control;
    if control.mid != TAG_MID || !TAG_CATEGORIES.contains(&control.category) {
        return None;
    }
    parse_tag_payload(parsed.payload)
}

/// Decode the payload of a tag report:
/// `[epc len u16][epc][pc u16][antenna][pid value]...`.
pub fn parse_tag_payload(payload: &[u8]) -> Option<TagRead> {
    if payload.len() < 5 {
        return None;
    }
    let epc_len = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let antenna_at = 2 + epc_len + 2;
    if epc_len == 0 || payload.len() <= antenna_at {
        return None;
    }

    let mut tag = TagRead {
        epc: hex::encode_upper(&payload[2..2 + epc_len]),
        antenna: payload[antenna_at],
        rssi: DEFAULT_RSSI_DBM,
        frequency: DEFAULT_FREQUENCY_MHZ,
        tid: None,
    };

    let mut idx = antenna_at + 1;
    while idx < payload.len() {
        let id = payload[idx];
        idx += 1;
        match id {
            pid::RSSI => {
                let Some(raw) = payload.get(idx) else { break };
                tag.rssi = rssi_from_raw(*raw);
                idx += 1;
            }
            pid::READ_RESULT | pid::SUB_ANTENNA => idx += 1,
            pid::TID => {
                let Some(block) = length_prefixed(payload, idx) else { break };
                tag.tid = Some(hex::encode_upper(block));
                idx += 2 + block.len();
            }
            pid::USER_DATA | pid::RESERVED_DATA => {
                let Some(block) = length_prefixed(payload, idx) else { break };
                idx += 2 + block.len();
            }
            pid::UTC => idx += 8,
            pid::FREQUENCY => {
                let Some(bytes) = payload.get(idx..idx + 4) else { break };
                let khz = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                tag.frequency = khz as f64 / 1000.0;
                idx += 4;
            }
            pid::PHASE => idx += 1,
            // Unknown parameter: its length is unknown, stop here.
            _ => break,
        }
    }

    Some(tag)
}

/// Map the 0..=255 signal scale onto -100..=-30 dBm.
#[inline]
pub fn rssi_from_raw(raw: u8) -> i16 {
    // Exact halves cannot occur since 255 is odd and 70 is even.
    -100 + ((raw as u32 * 70 + 127) / 255) as i16
}

fn length_prefixed(payload: &[u8], at: usize) -> Option<&[u8]> {
    let len = u16::from_be_bytes([*payload.get(at)?, *payload.get(at + 1)?]) as usize;
    payload.get(at + 2..at + 2 + len)
}

/// Decode an inventory-end or reader-error notification.
pub fn parse_notification(frame: &[u8]) -> Option<Notification> {
    let parsed = parse_frame(frame)?;
    let control = parsed.control;

    if control.category == READ_END_CATEGORY && READ_END_MIDS.contains(&control.mid) {
        return Some(Notification::InventoryEnded {
            reason: parsed.payload.first().copied().unwrap_or(0),
        });
    }

    if control.category == ERROR_CATEGORY && control.mid == ERROR_MID {
        return Some(reader_error(parsed.payload));
    }

    None
}

/// Reader error carried by a frame nobody asked for.
///
/// An error raised with the notify flag has the same control word as a
/// `QUERY_RFID_ABILITY` reply, so it can only be told apart once no ability
/// query claims it.
pub fn parse_unsolicited(frame: &[u8]) -> Option<Notification> {
    let parsed = parse_frame(frame)?;
    if parsed.control.code() != mid::QUERY_RFID_ABILITY {
        return None;
    }
    Some(reader_error(parsed.payload))
}

fn reader_error(payload: &[u8]) -> Notification {
    let code = payload.first().copied().unwrap_or(0);
    Notification::ReaderError {
        code,
        message: error_message(code),
    }
}

/// Description of a reader error code.
pub fn error_message(code: u8) -> &'static str {
    match code {
        1 => "Unsupported instruction",
        2 => "CRC or mode error",
        3 => "Parameter error",
        4 => "Reader busy",
        5 => "Invalid state",
        _ => "Unknown error",
    }
}

/// Description of a power configuration result byte.
pub fn power_result_message(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "Hardware does not support specified port parameter",
        2 => "Reader does not support specified power parameter",
        3 => "Save failed",
        _ => "Unknown error",
    }
}

/// Interpret a command reply. An empty payload is an acknowledgement;
/// otherwise the reply succeeds when its message id is non-zero.
pub fn interpret_reply(frame: &[u8]) -> Option<CommandReply> {
    let parsed = parse_frame(frame)?;
    let status = if parsed.payload.is_empty() || parsed.control.mid != 0 {
        ReplyStatus::Success
    } else {
        ReplyStatus::Failed(parsed.payload[0])
    };

    Some(CommandReply {
        command: parsed.control.code(),
        status,
        data: Bytes::copy_from_slice(parsed.payload),
    })
}

/// Inventory start payload: antenna bit mask (BE u32) and the continuous
/// flag. With no antenna enabled, antenna 1 is used.
pub fn inventory_payload(settings: &InventorySettings) -> Vec<u8> {
    let mask = settings
        .enabled_antennas()
        .iter()
        .fold(0u32, |mask, ant| mask | 1 << (ant - 1));
    let mask = if mask == 0 { 1 } else { mask };

    let mut payload = mask.to_be_bytes().to_vec();
    payload.push(CONTINUOUS);
    payload
}

/// Power configuration payload: `[port, dBm]` for each port, then the
/// persist flag.
pub fn power_payload(powers: &[u8; ANTENNA_PORTS]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(ANTENNA_PORTS * 2 + 2);
    for (idx, power) in powers.iter().enumerate() {
        payload.push(idx as u8 + 1);
        payload.push(*power);
    }
    payload.push(POWER_PERSIST_PID);
    payload.push(0x01);
    payload
}

/// Per-port power from a `[pid, value]...` query reply. Ports the reader
/// does not mention read as 0.
pub fn parse_power_pairs(data: &[u8]) -> [u8; ANTENNA_PORTS] {
    let mut powers = [0u8; ANTENNA_PORTS];
    for pair in data.chunks_exact(2) {
        if (1..=ANTENNA_PORTS as u8).contains(&pair[0]) {
            powers[pair[0] as usize - 1] = pair[1];
        }
    }
    powers
}

/// Reader capability summary from `QUERY_RFID_ABILITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RfidAbility {
    pub min_power_dbm: u8,
    pub max_power_dbm: u8,
    pub antenna_count: u8,
}

/// Decode `[power, power, antennas, ...]`. Firmware disagrees on whether
/// the minimum or the maximum comes first, so the larger value is the
/// maximum.
pub fn parse_ability(data: &[u8]) -> Result<RfidAbility> {
    match data {
        [first, second, antennas, ..] => Ok(RfidAbility {
            min_power_dbm: *first.min(second),
            max_power_dbm: *first.max(second),
            antenna_count: *antennas,
        }),
        _ => Err(RfidError::Protocol(format!(
            "ability reply too short ({} bytes)",
            data.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notify_frame(category: u8, mid: u8, payload: &[u8]) -> Vec<u8> {
        let control = ControlWord::command((category as u16) << 8 | mid as u16).with_notify();
        build_frame(control, 0, payload).unwrap()
    }

    fn tag_payload(epc: &[u8], extra: &[u8]) -> Vec<u8> {
        let mut payload = (epc.len() as u16).to_be_bytes().to_vec();
        payload.extend_from_slice(epc);
        payload.extend_from_slice(&[0x30, 0x00, 0x01]);
        payload.extend_from_slice(extra);
        payload
    }

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/XMODEM check value.
        assert_eq!(crc16_ccitt(b"123456789"), 0x31C3);
        assert_eq!(crc16_ccitt(&[]), 0);
    }

    #[test]
    fn test_build_stop_inventory() {
        let frame = build_command(mid::STOP_INVENTORY, &[]).unwrap();
        assert_eq!(&frame[..7], &[0x5A, 0x00, 0x01, 0x02, 0xFF, 0x00, 0x00]);
        assert_eq!(frame.len(), MIN_FRAME_LEN);
        assert!(verify(&frame));
    }

    #[test]
    fn test_build_and_parse() {
        let payload: Vec<u8> = (0..50u8).collect();
        for len in [0usize, 1, 17, 50] {
            let frame = build_command(mid::CONFIG_BASEBAND, &payload[..len]).unwrap();
            assert_eq!(frame_len(&frame), Some(frame.len()));

            let parsed = parse_frame(&frame).unwrap();
            assert_eq!(parsed.control.code(), mid::CONFIG_BASEBAND);
            assert_eq!(parsed.address, None);
            assert_eq!(parsed.payload, &payload[..len]);
        }
    }

    #[test]
    fn test_control_word_roundtrip() {
        for category in 0..=u8::MAX {
            for message in [0x00u8, 0x01, 0x5C, 0xFF] {
                let code = (category as u16) << 8 | message as u16;
                let word = ControlWord::command(code);
                let decoded = ControlWord::unpack(word.pack());
                assert_eq!(decoded, word);
                assert_eq!(decoded.code(), code);
                assert_eq!(decoded.notify(), category & 0x10 != 0);
                assert_eq!(decoded.rs485(), category & 0x20 != 0);

                let frame = build_command(code, &[0xA5; 3]).unwrap();
                let parsed = parse_frame(&frame).unwrap();
                assert_eq!(parsed.control.code(), code);
            }
        }
    }

    #[test]
    fn test_notify_flag_shares_category_bits() {
        let frame = notify_frame(0x02, 0x00, &[]);
        assert_eq!(frame[3], 0x12);

        let decoded = ControlWord::unpack(u32::from_be_bytes([0x00, 0x01, 0x12, 0x00]));
        assert!(decoded.notify());
        assert!(!decoded.rs485());
        assert_eq!(decoded.category, 0x12);
        assert_eq!(decoded.code(), 0x1200);
    }

    #[test]
    fn test_ability_category_keeps_its_code() {
        let frame = build_command(mid::QUERY_RFID_ABILITY, &[]).unwrap();
        let control = parse_frame(&frame).unwrap().control;
        assert_eq!(control.category, 0x10);
        assert_eq!(control.mid, 0x00);
        assert_eq!(control.code(), mid::QUERY_RFID_ABILITY);

        let reply = build_command(mid::QUERY_RFID_ABILITY, &[0, 33, 4]).unwrap();
        assert!(parse_inventory(&reply).is_none());
        assert!(parse_notification(&reply).is_none());
    }

    #[test]
    fn test_rs485_address_byte() {
        let control = ControlWord::command(mid::QUERY_INFO).with_rs485();
        let frame = build_frame(control, 0x07, &[0xAB]).unwrap();

        assert_eq!(frame.len(), MIN_FRAME_LEN + 2);
        assert_eq!(frame_len(&frame), Some(frame.len()));

        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.address, Some(0x07));
        assert_eq!(parsed.payload, &[0xAB]);
    }

    #[test]
    fn test_payload_bit_flip_breaks_crc() {
        let frame = build_command(mid::CONFIGURE_READER_POWER, &[1, 20, 2, 20, 0xFF, 1]).unwrap();
        for idx in 7..frame.len() - 2 {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[idx] ^= 1 << bit;
                assert!(!verify(&corrupted));
            }
        }
    }

    #[test]
    fn test_parse_inventory_observed_category() {
        let frame = notify_frame(0x02, 0x00, &tag_payload(&[0xE2, 0x00, 0x34, 0x12], &[0x01, 0xFF]));
        // The notify bit turns category 0x02 into 0x12 on the wire.
        assert_eq!(frame[3], 0x12);

        let tag = parse_inventory(&frame).unwrap();
        assert_eq!(tag.epc, "E2003412");
        assert_eq!(tag.antenna, 1);
        assert_eq!(tag.rssi, -30);
        assert_eq!(tag.frequency, DEFAULT_FREQUENCY_MHZ);
    }

    #[test]
    fn test_parse_inventory_documented_category() {
        let frame = build_command(0x0200, &tag_payload(&[0xE2, 0x00], &[])).unwrap();
        assert_eq!(parse_inventory(&frame).unwrap().epc, "E200");

        // Read EPC reply, not a tag report.
        let reply = build_command(mid::READ_EPC_TAG, &tag_payload(&[0xE2, 0x00], &[])).unwrap();
        assert!(parse_inventory(&reply).is_none());
    }

    #[test]
    fn test_parse_inventory_defaults() {
        let frame = notify_frame(0x02, 0x00, &tag_payload(&[0xAA, 0xBB], &[]));
        let tag = parse_inventory(&frame).unwrap();
        assert_eq!(tag.rssi, DEFAULT_RSSI_DBM);
        assert_eq!(tag.frequency, DEFAULT_FREQUENCY_MHZ);
        assert_eq!(tag.tid, None);
    }

    #[test]
    fn test_parse_inventory_optional_parameters() {
        let extra = [
            0x02, 0x00, // read result
            0x03, 0x00, 0x02, 0xE2, 0x80, // TID
            0x01, 0x80, // rssi
            0x08, 0x00, 0x0E, 0x0D, 0x1C, // 920.860 MHz
        ];
        let frame = notify_frame(0x02, 0x00, &tag_payload(&[0x01, 0x02, 0x03, 0x04], &extra));
        let tag = parse_inventory(&frame).unwrap();

        assert_eq!(tag.tid.as_deref(), Some("E280"));
        assert_eq!(tag.rssi, -65);
        assert_eq!(tag.frequency, 920.86);
    }

    #[test]
    fn test_parse_tag_payload_shortfall() {
        assert!(parse_tag_payload(&[0x00, 0x04, 0xE2]).is_none());
        assert!(parse_tag_payload(&[0x00, 0x04, 0xE2, 0x00, 0x00, 0x00, 0x30, 0x00]).is_none());
        assert!(parse_tag_payload(&[0x00, 0x00, 0x30, 0x00, 0x01]).is_none());
    }

    #[test]
    fn test_rssi_scale() {
        assert_eq!(rssi_from_raw(0), -100);
        assert_eq!(rssi_from_raw(255), -30);
        assert_eq!(rssi_from_raw(128), -65);
    }

    #[test]
    fn test_parse_notifications() {
        let ended = notify_frame(0x02, 0x01, &[0x01]);
        assert_eq!(
            parse_notification(&ended),
            Some(Notification::InventoryEnded { reason: 1 })
        );

        let ended_alt = notify_frame(0x12, 0x31, &[0x00]);
        assert_eq!(
            parse_notification(&ended_alt),
            Some(Notification::InventoryEnded { reason: 0 })
        );

        let error = build_command(0x0000, &[0x04]).unwrap();
        assert_eq!(
            parse_notification(&error),
            Some(Notification::ReaderError {
                code: 4,
                message: "Reader busy"
            })
        );

        let plain = build_command(mid::QUERY_INFO, &[]).unwrap();
        assert_eq!(parse_notification(&plain), None);

        // Same code as the power configuration reply, without the notify flag.
        let power = build_command(mid::CONFIGURE_READER_POWER, &[0x00]).unwrap();
        assert_eq!(parse_notification(&power), None);
    }

    #[test]
    fn test_parse_unsolicited_error() {
        let error = notify_frame(0x00, 0x00, &[0x05]);
        assert_eq!(
            parse_unsolicited(&error),
            Some(Notification::ReaderError {
                code: 5,
                message: "Invalid state"
            })
        );
        let info = build_command(mid::QUERY_INFO, &[0x05]).unwrap();
        assert_eq!(parse_unsolicited(&info), None);
    }

    #[test]
    fn test_interpret_reply() {
        let ack = build_command(mid::STOP_INVENTORY, &[]).unwrap();
        assert!(interpret_reply(&ack).unwrap().is_success());

        let power = build_command(mid::CONFIGURE_READER_POWER, &[0x00]).unwrap();
        let reply = interpret_reply(&power).unwrap();
        assert_eq!(reply.command, mid::CONFIGURE_READER_POWER);
        assert!(reply.is_success());

        let failed = build_command(mid::QUERY_INFO, &[0x03]).unwrap();
        assert_eq!(
            interpret_reply(&failed).unwrap().status,
            ReplyStatus::Failed(0x03)
        );
    }

    #[test]
    fn test_inventory_payload() {
        let mut settings = InventorySettings::default();
        settings.antennas[1].enabled = false;
        assert_eq!(inventory_payload(&settings), vec![0, 0, 0, 0b1101, CONTINUOUS]);

        for port in settings.antennas.iter_mut() {
            port.enabled = false;
        }
        assert_eq!(inventory_payload(&settings), vec![0, 0, 0, 1, CONTINUOUS]);
    }

    #[test]
    fn test_power_payload_and_reply() {
        assert_eq!(
            power_payload(&[20, 21, 22, 10]),
            vec![1, 20, 2, 21, 3, 22, 4, 10, 0xFF, 0x01]
        );
        assert_eq!(parse_power_pairs(&[1, 20, 3, 15, 9, 9]), [20, 0, 15, 0]);
    }

    #[test]
    fn test_parse_ability() {
        let ability = parse_ability(&[0, 33, 4]).unwrap();
        assert_eq!(ability.min_power_dbm, 0);
        assert_eq!(ability.max_power_dbm, 33);
        assert_eq!(ability.antenna_count, 4);

        // Maximum first.
        let swapped = parse_ability(&[33, 5, 4, 0x01]).unwrap();
        assert_eq!(swapped.min_power_dbm, 5);
        assert_eq!(swapped.max_power_dbm, 33);
        assert!(parse_ability(&[0, 33]).is_err());
    }
}
