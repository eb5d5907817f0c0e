//! Stream reassembler for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` as the rolling receive buffer and a descriptor
//! to find, measure and verify frames:
//! - bytes before the first start marker are dropped
//! - a frame is cut once the buffer holds its declared length
//! - a trailing partial frame is kept for the next push
//!
//! Dropping unmarked leading bytes is lossy on purpose. If a marker byte
//! itself was corrupted on the wire, the rest of that frame is discarded
//! with it, and decoding resumes at the next marker.
//!
//! # Example
//!
//! ```
//! use rfidwire::protocol::{vmr64, Extracted, ReaderModel, Reassembler};
//!
//! let mut reassembler = Reassembler::new(ReaderModel::Vmr64.descriptor());
//! let frame = vmr64::build_command(0xFF, vmr64::cmd::RESET, &[]).unwrap();
//!
//! assert!(reassembler.push(&frame[..2]).is_empty());
//! let out = reassembler.push(&frame[2..]);
//! assert!(matches!(&out[..], [Extracted::Frame(f)] if f.as_bytes() == &frame[..]));
//! ```

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use super::descriptor::{FrameLength, ProtocolDescriptor};
use super::Frame;

/// Initial receive buffer capacity.
const INITIAL_CAPACITY: usize = 4 * 1024;

/// A frame that was cut out of the stream but failed its integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptFrame {
    pub raw: Bytes,
    pub expected: u16,
    pub received: u16,
}

/// One item produced by [`Reassembler::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Frame(Frame),
    Corrupt(CorruptFrame),
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct Reassembler {
    descriptor: Arc<dyn ProtocolDescriptor>,
    /// Unconsumed bytes. Always empty or starting with a marker after a
    /// push returns.
    buffer: BytesMut,
    /// Bytes discarded while hunting for a marker.
    dropped: u64,
}

impl Reassembler {
    /// Create a reassembler for the given protocol.
    pub fn new(descriptor: Arc<dyn ProtocolDescriptor>) -> Self {
        Self {
            descriptor,
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            dropped: 0,
        }
    }

    /// Protocol this reassembler delimits.
    pub fn descriptor(&self) -> &Arc<dyn ProtocolDescriptor> {
        &self.descriptor
    }

    /// Push data into the buffer and extract all complete frames, in
    /// stream order.
    ///
    /// Frames that fail their checksum or CRC are returned as
    /// [`Extracted::Corrupt`]; extraction always moves past them.
    pub fn push(&mut self, data: &[u8]) -> Vec<Extracted> {
        self.buffer.extend_from_slice(data);

        let mut out = Vec::new();
        while let Some(item) = self.try_extract_one() {
            out.push(item);
        }
        out
    }

    /// Try to extract a single frame from the buffer.
    ///
    /// Returns `None` when more data is needed.
    fn try_extract_one(&mut self) -> Option<Extracted> {
        loop {
            if !self.skip_to_marker() {
                return None;
            }

            let len = match self.descriptor.frame_len(&self.buffer) {
                FrameLength::NeedMore => return None,
                FrameLength::Complete(len) => len,
                FrameLength::Invalid => {
                    // Not a real frame start; resume after this marker.
                    tracing::debug!(
                        protocol = %self.descriptor.model(),
                        "Dropping marker with invalid length field"
                    );
                    let _ = self.buffer.split_to(1);
                    self.dropped += 1;
                    continue;
                }
            };

            if self.buffer.len() < len {
                return None;
            }

            let raw = self.buffer.split_to(len).freeze();
            let check = self.descriptor.integrity(&raw);
            if check.is_valid() {
                return Some(Extracted::Frame(Frame::new(self.descriptor.model(), raw)));
            }

            tracing::warn!(
                protocol = %self.descriptor.model(),
                expected = check.expected,
                received = check.received,
                frame = %hex::encode(&raw),
                "Discarding frame with bad checksum"
            );
            return Some(Extracted::Corrupt(CorruptFrame {
                raw,
                expected: check.expected,
                received: check.received,
            }));
        }
    }

    /// Drop bytes before the next start marker. Returns whether a marker
    /// now heads the buffer.
    fn skip_to_marker(&mut self) -> bool {
        let marker = self.descriptor.start_marker();
        match self.buffer.iter().position(|b| *b == marker) {
            Some(0) => true,
            Some(idx) => {
                tracing::trace!(bytes = idx, "Skipping bytes before start marker");
                let _ = self.buffer.split_to(idx);
                self.dropped += idx as u64;
                true
            }
            None => {
                self.dropped += self.buffer.len() as u64;
                self.buffer.clear();
                false
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Total bytes discarded as noise since creation.
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{nation, vmr64, ReaderModel};

    fn vmr64_reassembler() -> Reassembler {
        Reassembler::new(ReaderModel::Vmr64.descriptor())
    }

    fn nation_reassembler() -> Reassembler {
        Reassembler::new(ReaderModel::Nation.descriptor())
    }

    fn frames(items: Vec<Extracted>) -> Vec<Frame> {
        items
            .into_iter()
            .map(|item| match item {
                Extracted::Frame(frame) => frame,
                Extracted::Corrupt(c) => panic!("unexpected corrupt frame {:?}", c),
            })
            .collect()
    }

    fn tag_frame() -> Vec<u8> {
        vmr64::build_command(
            0xFF,
            vmr64::cmd::FAST_SWITCH_ANT_INVENTORY,
            &[0x05, 0x30, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x50],
        )
        .unwrap()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut r = vmr64_reassembler();
        let bytes = tag_frame();

        let out = frames(r.push(&bytes));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_bytes(), &bytes[..]);
        assert_eq!(out[0].model(), ReaderModel::Vmr64);
        assert!(r.is_empty());
    }

    #[test]
    fn test_split_at_every_boundary() {
        let bytes = tag_frame();
        for split in 1..bytes.len() {
            let mut r = vmr64_reassembler();
            assert!(r.push(&bytes[..split]).is_empty());
            assert_eq!(r.len(), split);

            let out = frames(r.push(&bytes[split..]));
            assert_eq!(out.len(), 1, "split at {split}");
            assert_eq!(out[0].as_bytes(), &bytes[..]);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut r = nation_reassembler();
        let bytes = nation::build_command(nation::mid::QUERY_INFO, b"hi").unwrap();

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(frames(r.push(&[*byte])));
        }

        assert_eq!(all.len(), 1);
        assert_eq!(all[0].as_bytes(), &bytes[..]);
    }

    #[test]
    fn test_three_nation_frames_in_one_push() {
        let mut r = nation_reassembler();
        let f1 = nation::build_command(nation::mid::QUERY_INFO, &[]).unwrap();
        let f2 = nation::build_command(nation::mid::QUERY_READER_POWER, &[1, 20]).unwrap();
        let f3 = nation::build_command(nation::mid::STOP_INVENTORY, &[0xAB; 30]).unwrap();

        let mut combined = f1.clone();
        combined.extend_from_slice(&f2);
        combined.extend_from_slice(&f3);

        let out = frames(r.push(&combined));

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_bytes(), &f1[..]);
        assert_eq!(out[1].as_bytes(), &f2[..]);
        assert_eq!(out[2].as_bytes(), &f3[..]);
        assert!(r.is_empty());
    }

    #[test]
    fn test_leading_garbage_dropped() {
        let mut r = vmr64_reassembler();
        let bytes = tag_frame();
        let mut data = vec![0x00, 0x13, 0x37];
        data.extend_from_slice(&bytes);

        let out = frames(r.push(&data));
        assert_eq!(out.len(), 1);
        assert_eq!(r.dropped_bytes(), 3);
    }

    #[test]
    fn test_no_marker_clears_buffer() {
        let mut r = vmr64_reassembler();
        assert!(r.push(&[0x01, 0x02, 0x03]).is_empty());
        assert!(r.is_empty());
        assert_eq!(r.dropped_bytes(), 3);
    }

    #[test]
    fn test_corrupt_frame_is_reported_and_skipped() {
        let mut r = vmr64_reassembler();
        let mut bad = tag_frame();
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        let good = vmr64::build_command(0xFF, vmr64::cmd::RESET, &[]).unwrap();

        let mut data = bad.clone();
        data.extend_from_slice(&good);
        let out = r.push(&data);

        assert_eq!(out.len(), 2);
        match &out[0] {
            Extracted::Corrupt(c) => {
                assert_eq!(&c.raw[..], &bad[..]);
                assert_eq!(c.received, bad[last] as u16);
                assert_ne!(c.expected, c.received);
            }
            other => panic!("expected corrupt frame, got {:?}", other),
        }
        assert!(matches!(&out[1], Extracted::Frame(f) if f.as_bytes() == &good[..]));
    }

    #[test]
    fn test_nation_crc_failure_advances() {
        let mut r = nation_reassembler();
        let mut bad = nation::build_command(nation::mid::QUERY_INFO, &[1, 2, 3]).unwrap();
        bad[8] ^= 0x01;
        let good = nation::build_command(nation::mid::QUERY_INFO, &[4]).unwrap();

        let mut data = bad;
        data.extend_from_slice(&good);
        let out = r.push(&data);

        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Extracted::Corrupt(_)));
        assert!(matches!(&out[1], Extracted::Frame(f) if f.as_bytes() == &good[..]));
    }

    #[test]
    fn test_invalid_length_makes_progress() {
        let mut r = vmr64_reassembler();
        let good = vmr64::build_command(0xFF, vmr64::cmd::RESET, &[]).unwrap();
        let mut data = vec![0xA0, 0x01];
        data.extend_from_slice(&good);

        let out = frames(r.push(&data));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_bytes(), &good[..]);
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut r = vmr64_reassembler();
        let f1 = tag_frame();
        let f2 = vmr64::build_command(0xFF, vmr64::cmd::BEEPER, &[0x10]).unwrap();

        let mut data = f1.clone();
        data.extend_from_slice(&f2[..3]);

        let out = frames(r.push(&data));
        assert_eq!(out.len(), 1);
        assert_eq!(r.len(), 3);

        let out = frames(r.push(&f2[3..]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_bytes(), &f2[..]);
    }

    #[test]
    fn test_clear() {
        let mut r = nation_reassembler();
        let bytes = nation::build_command(nation::mid::QUERY_INFO, &[]).unwrap();
        r.push(&bytes[..4]);
        assert_eq!(r.len(), 4);

        r.clear();
        assert!(r.is_empty());
    }
}
