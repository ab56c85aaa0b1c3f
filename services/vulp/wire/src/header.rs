//! Fixed and extended headers for the wire protocol.
//!
//! Every frame starts with an 8-byte fixed header. Frames whose type has the
//! control bit clear carry an additional 8-byte extended header with the
//! sequence id and the sender's acknowledgment cursor.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// Fixed header size in bytes
pub const FIXED_HEADER_SIZE: usize = 8;

/// Extended header size in bytes (reliable packets only)
pub const EXTENDED_HEADER_SIZE: usize = 8;

/// Type bit marking the control namespace
pub const CONTROL_FLAG: u16 = 0x8000;

/// 16-bit packet type.
///
/// The type space is open: anything the core does not handle itself is
/// passed through to the consumer untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketType(pub u16);

impl PacketType {
    /// Debug command (client to bouncer) / status text (bouncer to client)
    pub const DEBUG_COMMAND: PacketType = PacketType(0x0001);
    /// Status text from the bouncer, same code as [`PacketType::DEBUG_COMMAND`]
    pub const STATUS: PacketType = PacketType(0x0001);
    /// Window list announcement
    pub const WINDOW_ADD: PacketType = PacketType(0x0100);
    /// Text typed into a window (client to bouncer) / window message
    pub const WINDOW_INPUT: PacketType = PacketType(0x0102);
    /// Login request, sent before authentication
    pub const LOGIN: PacketType = PacketType(0x8001);
    /// Authentication accepted; payload is the new session key
    pub const AUTH_SUCCESS: PacketType = PacketType(0x8001);
    /// Authentication rejected
    pub const AUTH_FAILURE: PacketType = PacketType(0x8002);
    /// Session resumed; payload is the peer's acknowledged id
    pub const RESYNC: PacketType = PacketType(0x8003);

    /// Whether this type lives in the control namespace
    pub const fn is_control(self) -> bool {
        self.0 & CONTROL_FLAG != 0
    }

    /// Size of the headers that precede a payload of this type
    pub const fn header_len(self) -> usize {
        if self.is_control() {
            FIXED_HEADER_SIZE
        } else {
            FIXED_HEADER_SIZE + EXTENDED_HEADER_SIZE
        }
    }
}

impl From<u16> for PacketType {
    fn from(value: u16) -> Self {
        PacketType(value)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// Control codes the protocol core consumes itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// 0x8001 from the peer
    AuthSuccess,
    /// 0x8002 from the peer
    AuthFailure,
    /// 0x8003 from the peer
    Resync,
}

impl TryFrom<PacketType> for ControlCode {
    type Error = crate::WireError;

    fn try_from(value: PacketType) -> Result<Self, Self::Error> {
        match value {
            PacketType::AUTH_SUCCESS => Ok(ControlCode::AuthSuccess),
            PacketType::AUTH_FAILURE => Ok(ControlCode::AuthFailure),
            PacketType::RESYNC => Ok(ControlCode::Resync),
            other => Err(crate::WireError::Type(other.0)),
        }
    }
}

/// Header present on every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    /// Packet type
    pub packet_type: PacketType,
    /// Reserved, written as zero and ignored on read
    pub reserved: u16,
    /// Number of payload bytes after all headers
    pub payload_len: u32,
}

impl FixedHeader {
    /// Create a header for a payload of the given length
    pub fn new(packet_type: PacketType, payload_len: u32) -> Self {
        Self {
            packet_type,
            reserved: 0,
            payload_len,
        }
    }

    /// Encode the header into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.packet_type.0);
        buf.put_u16_le(0);
        buf.put_u32_le(self.payload_len);
    }

    /// Decode the header from the front of `buf`.
    ///
    /// Returns `None` when fewer than [`FIXED_HEADER_SIZE`] bytes are present.
    pub fn peek(buf: &[u8]) -> Option<Self> {
        if buf.len() < FIXED_HEADER_SIZE {
            return None;
        }
        let mut hdr = &buf[..FIXED_HEADER_SIZE];
        Some(Self {
            packet_type: PacketType(hdr.get_u16_le()),
            reserved: hdr.get_u16_le(),
            payload_len: hdr.get_u32_le(),
        })
    }

    /// Total encoded frame length implied by this header
    pub fn frame_len(&self) -> usize {
        self.packet_type.header_len() + self.payload_len as usize
    }
}

/// Header present only on reliable frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedHeader {
    /// Sender-assigned sequence id
    pub sequence_id: u32,
    /// Highest id the sender has received from us
    pub peer_ack_id: u32,
}

impl ExtendedHeader {
    /// Encode the header into a buffer
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.sequence_id);
        buf.put_u32_le(self.peer_ack_id);
    }

    /// Decode the header from a buffer
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, crate::WireError> {
        if buf.remaining() < EXTENDED_HEADER_SIZE {
            return Err(crate::WireError::Malformed);
        }
        Ok(Self {
            sequence_id: buf.get_u32_le(),
            peer_ack_id: buf.get_u32_le(),
        })
    }
}
