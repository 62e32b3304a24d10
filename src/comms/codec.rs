//! Fixed-layout binary framing for sender/operation messages.
//!
//! ```text
//! | sender_id: u32 LE | operation_code: u32 LE | payload: 1..=50 bytes |
//! ```
//!
//! There is no length prefix: the payload is whatever follows the 8-byte header,
//! so a frame is valid iff its total length lies in `9..=58`.
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::PipeError;

pub const HEADER_LEN: usize = 8;
pub const MIN_PAYLOAD: usize = 1;
pub const MAX_PAYLOAD: usize = 50;
pub const MIN_FRAME: usize = HEADER_LEN + MIN_PAYLOAD;
pub const MAX_FRAME: usize = HEADER_LEN + MAX_PAYLOAD;

/// On-wire header. Both fields hold little-endian bytes regardless of host order.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(C)]
struct FrameHeader {
    sender_id: u32,
    operation_code: u32,
}

unsafe impl Zeroable for FrameHeader {}
unsafe impl Pod for FrameHeader {}

impl FrameHeader {
    fn to_wire(sender_id: u32, operation_code: u32) -> Self {
        Self {
            sender_id: sender_id.to_le(),
            operation_code: operation_code.to_le(),
        }
    }

    fn from_wire(bytes: &[u8]) -> Self {
        let wire: FrameHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_LEN]);
        Self {
            sender_id: u32::from_le(wire.sender_id),
            operation_code: u32::from_le(wire.operation_code),
        }
    }
}

/// A decoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender_id: u32,
    pub operation_code: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn encode(&self) -> Result<Frame, PipeError> {
        encode(self.sender_id, self.operation_code, &self.payload)
    }
}

/// An encoded frame as it travels through a queue. Not necessarily well formed:
/// frames received from elsewhere are only validated by [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Wrap raw bytes without validation.
    pub fn from_raw(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn decode(&self) -> Result<Message, PipeError> {
        decode(&self.bytes)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Concatenate header and payload. Payloads outside `1..=50` bytes are refused
/// with `MalformedFrame` since they could never be decoded.
pub fn encode(sender_id: u32, operation_code: u32, payload: &[u8]) -> Result<Frame, PipeError> {
    if !(MIN_PAYLOAD..=MAX_PAYLOAD).contains(&payload.len()) {
        return Err(PipeError::MalformedFrame {
            len: HEADER_LEN + payload.len(),
        });
    }
    let header = FrameHeader::to_wire(sender_id, operation_code);
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(bytemuck::bytes_of(&header));
    bytes.extend_from_slice(payload);
    Ok(Frame { bytes })
}

pub fn decode(bytes: &[u8]) -> Result<Message, PipeError> {
    if !(MIN_FRAME..=MAX_FRAME).contains(&bytes.len()) {
        return Err(PipeError::MalformedFrame { len: bytes.len() });
    }
    let header = FrameHeader::from_wire(bytes);
    Ok(Message {
        sender_id: header.sender_id,
        operation_code: header.operation_code,
        payload: bytes[HEADER_LEN..].to_vec(),
    })
}
