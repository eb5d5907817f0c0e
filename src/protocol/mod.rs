//! Protocol module - wire formats, framing, and frame types.
//!
//! This module implements the two reader wire protocols:
//! - VMR64: `0xA0` marker, one-byte length, additive checksum
//! - NATION: `0x5A` marker, 32-bit control word, CRC-16/CCITT
//!
//! plus the pieces shared by both: lookup tables, the stream
//! reassembler, and the [`ProtocolDescriptor`] abstraction that lets the
//! runtime treat either protocol the same way.

mod descriptor;
mod frame;
pub mod nation;
mod reassembler;
pub mod tables;
pub mod vmr64;

pub use descriptor::{
    BeeperMode, FrameClass, FrameLength, IntegrityCheck, InventoryMode, InventoryStrategy,
    NationDescriptor, ProtocolDescriptor, ReaderModel, RfProfile, Vmr64Descriptor,
};
pub use frame::{CommandReply, Frame, Notification, ReplyStatus, TagRead};
pub use nation::RfidAbility;
pub use reassembler::{CorruptFrame, Extracted, Reassembler};
