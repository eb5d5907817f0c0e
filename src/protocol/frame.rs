//! Frame and decoded-message types shared by both reader protocols.
//!
//! A [`Frame`] is one checksum-verified message cut out of the receive
//! stream. It owns its bytes through `bytes::Bytes`, so handing a frame to
//! the event stream and to a waiting request costs no copy.
//!
//! # Example
//!
//! ```
//! use rfidwire::protocol::{vmr64, Frame, ReaderModel};
//! use bytes::Bytes;
//!
//! let raw = vmr64::build_command(0xFF, vmr64::cmd::RESET, &[]).unwrap();
//! let frame = Frame::new(ReaderModel::Vmr64, Bytes::from(raw));
//!
//! assert_eq!(frame.len(), 5);
//! assert_eq!(frame.to_hex(), "a003ff70ee");
//! ```

use bytes::Bytes;
use serde::Serialize;

use super::descriptor::ReaderModel;

/// A complete, verified protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    model: ReaderModel,
    raw: Bytes,
}

impl Frame {
    /// Wrap raw frame bytes received from a reader of the given model.
    pub fn new(model: ReaderModel, raw: Bytes) -> Self {
        Self { model, raw }
    }

    /// Create a frame by copying a byte slice.
    pub fn from_slice(model: ReaderModel, raw: &[u8]) -> Self {
        Self::new(model, Bytes::copy_from_slice(raw))
    }

    /// Protocol this frame was delimited with.
    #[inline]
    pub fn model(&self) -> ReaderModel {
        self.model
    }

    /// The frame bytes, start marker through checksum.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Cheap clone of the underlying bytes.
    #[inline]
    pub fn raw(&self) -> Bytes {
        self.raw.clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Lowercase hex rendering, used for trace logs.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

/// One decoded tag observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagRead {
    /// EPC as uppercase hex, never empty.
    pub epc: String,
    /// 1-based antenna port.
    pub antenna: u8,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Carrier frequency in MHz.
    pub frequency: f64,
    /// Tag TID as uppercase hex, when the reader appended one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
}

/// An unsolicited, non-tag message pushed by the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// The reader finished or aborted a continuous inventory.
    InventoryEnded {
        /// Raw reason byte.
        reason: u8,
    },
    /// The reader reported an error condition.
    ReaderError {
        /// Raw error code.
        code: u8,
        /// Human-readable description of the code.
        message: &'static str,
    },
}

impl Notification {
    /// Whether an inventory-end notice says it was stopped by a command.
    pub fn stopped_by_command(&self) -> bool {
        matches!(self, Notification::InventoryEnded { reason: 1 })
    }
}

/// Outcome reported in a command reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "code", rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Failed(u8),
}

/// Interpreted reply to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    /// Command byte (VMR64) or `category << 8 | mid` (NATION).
    pub command: u16,
    pub status: ReplyStatus,
    /// Payload bytes after the command/control fields.
    pub data: Bytes,
}

impl CommandReply {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }

    /// Convert a failed status into [`RfidError::Rejected`](crate::RfidError::Rejected).
    pub fn into_result(self) -> crate::Result<Self> {
        match self.status {
            ReplyStatus::Success => Ok(self),
            ReplyStatus::Failed(code) => Err(crate::RfidError::Rejected {
                command: self.command,
                code,
            }),
        }
    }
}
