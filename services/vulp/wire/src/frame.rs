//! Packet framing for the wire protocol.
//!
//! ```text
//! +----------------+-----------------+---------------------+
//! | u16 type       | u16 reserved    | u32 payload_len     |   fixed header
//! +----------------+-----------------+---------------------+
//! | u32 sequence_id                  | u32 peer_ack_id     |   reliable only
//! +----------------------------------+---------------------+
//! | payload (payload_len bytes)                            |
//! +--------------------------------------------------------+
//! ```
//!
//! All integers are little-endian.

use crate::header::{ExtendedHeader, FixedHeader, PacketType, FIXED_HEADER_SIZE};
use crate::WireError;
use bytes::{Buf, Bytes, BytesMut};

/// Default ceiling on a declared payload length (16 MiB)
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A protocol packet.
///
/// Reliable packets (control bit clear) always carry a sequence id; control
/// packets never do. The acknowledgment cursor is not part of the packet, it
/// is supplied when the packet is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    packet_type: PacketType,
    payload: Bytes,
    sequence_id: Option<u32>,
}

impl Packet {
    /// Create a reliable packet with an already-assigned sequence id
    pub fn reliable(
        packet_type: PacketType,
        sequence_id: u32,
        payload: impl Into<Bytes>,
    ) -> Result<Self, WireError> {
        if packet_type.is_control() {
            return Err(WireError::Type(packet_type.0));
        }
        Ok(Self {
            packet_type,
            payload: payload.into(),
            sequence_id: Some(sequence_id),
        })
    }

    /// Create a control packet
    pub fn control(packet_type: PacketType, payload: impl Into<Bytes>) -> Result<Self, WireError> {
        if !packet_type.is_control() {
            return Err(WireError::Type(packet_type.0));
        }
        Ok(Self {
            packet_type,
            payload: payload.into(),
            sequence_id: None,
        })
    }

    /// Packet type
    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    /// Opaque payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Sequence id, present on reliable packets only
    pub fn sequence_id(&self) -> Option<u32> {
        self.sequence_id
    }

    /// Whether this is a control packet
    pub fn is_control(&self) -> bool {
        self.packet_type.is_control()
    }

    /// Size of the packet once encoded
    pub fn encoded_len(&self) -> usize {
        self.packet_type.header_len() + self.payload.len()
    }

    /// Encode the packet, stamping `peer_ack_id` on reliable packets
    pub fn encode(&self, peer_ack_id: u32) -> Result<Bytes, WireError> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(peer_ack_id, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Encode the packet onto the end of `buf`
    pub fn encode_into(&self, peer_ack_id: u32, buf: &mut BytesMut) -> Result<(), WireError> {
        let payload_len =
            u32::try_from(self.payload.len()).map_err(|_| WireError::Size(self.payload.len()))?;
        buf.reserve(self.encoded_len());

        FixedHeader::new(self.packet_type, payload_len).encode(buf);
        if let Some(sequence_id) = self.sequence_id {
            ExtendedHeader {
                sequence_id,
                peer_ack_id,
            }
            .encode(buf);
        }
        buf.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// A decoded frame: the packet plus the acknowledgment cursor it carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The packet
    pub packet: Packet,
    /// Peer's acknowledgment cursor (reliable frames only)
    pub peer_ack_id: Option<u32>,
}

/// Check whether a complete frame sits at the front of `buf`.
///
/// Returns the fixed header and the full frame length, `None` if more bytes
/// are needed, or an error when the declared payload exceeds `max_payload`.
fn peek_frame(buf: &[u8], max_payload: usize) -> Result<Option<(FixedHeader, usize)>, WireError> {
    let Some(fixed) = FixedHeader::peek(buf) else {
        return Ok(None);
    };

    let payload_len = fixed.payload_len as usize;
    if payload_len > max_payload {
        return Err(WireError::Size(payload_len));
    }

    let frame_len = fixed.frame_len();
    if buf.len() < frame_len {
        return Ok(None);
    }
    Ok(Some((fixed, frame_len)))
}

/// Split a complete frame (headers included) into a [`Frame`]
fn parse_frame(fixed: FixedHeader, mut frame_buf: Bytes) -> Result<Frame, WireError> {
    frame_buf.advance(FIXED_HEADER_SIZE);

    if fixed.packet_type.is_control() {
        return Ok(Frame {
            packet: Packet {
                packet_type: fixed.packet_type,
                payload: frame_buf,
                sequence_id: None,
            },
            peer_ack_id: None,
        });
    }

    let ext = ExtendedHeader::decode(&mut frame_buf)?;
    Ok(Frame {
        packet: Packet {
            packet_type: fixed.packet_type,
            payload: frame_buf,
            sequence_id: Some(ext.sequence_id),
        },
        peer_ack_id: Some(ext.peer_ack_id),
    })
}

/// Decode one frame starting at `offset`.
///
/// Consumes nothing unless the whole frame is present: on success returns the
/// frame together with the number of bytes it occupied, `Ok(None)` when the
/// frame is still incomplete.
pub fn decode(
    buf: &[u8],
    offset: usize,
    max_payload: usize,
) -> Result<Option<(Frame, usize)>, WireError> {
    let available = buf.get(offset..).unwrap_or_default();
    let Some((fixed, frame_len)) = peek_frame(available, max_payload)? else {
        return Ok(None);
    };

    let frame = parse_frame(fixed, Bytes::copy_from_slice(&available[..frame_len]))?;
    Ok(Some((frame, frame_len)))
}

/// Frame decoder for parsing incoming frames out of an accumulating buffer
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    max_payload: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder with the default payload ceiling
    pub fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Create a decoder with a custom payload ceiling
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Configured payload ceiling
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Decode one frame from the front of `buf`.
    ///
    /// On success the frame's bytes are split off `buf`; the retained suffix
    /// is never copied. On `Ok(None)` the buffer is left untouched.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        let Some((fixed, frame_len)) = peek_frame(buf, self.max_payload)? else {
            return Ok(None);
        };

        let frame_buf = buf.split_to(frame_len).freeze();
        parse_frame(fixed, frame_buf).map(Some)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reliable(ty: u16, id: u32, payload: &'static [u8]) -> Packet {
        Packet::reliable(PacketType(ty), id, Bytes::from_static(payload)).unwrap()
    }

    #[test]
    fn test_reliable_layout() {
        let bytes = reliable(0x0001, 7, b"hi").encode(3).unwrap();
        assert_eq!(
            &bytes[..],
            &[
                0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, // fixed
                0x07, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, // extended
                b'h', b'i',
            ]
        );
    }

    #[test]
    fn test_control_has_no_extended_header() {
        let packet = Packet::control(PacketType::RESYNC, vec![4u8, 0, 0, 0]).unwrap();
        let bytes = packet.encode(99).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(packet.sequence_id(), None);
    }

    #[test]
    fn test_namespace_checked() {
        assert_eq!(
            Packet::reliable(PacketType(0x8001), 1, Bytes::new()),
            Err(WireError::Type(0x8001))
        );
        assert_eq!(
            Packet::control(PacketType(0x0001), Bytes::new()),
            Err(WireError::Type(0x0001))
        );
    }

    #[test]
    fn test_decode_roundtrip() {
        let packets = [
            reliable(0x0001, 1, b"hello"),
            reliable(0x0102, 42, b""),
            Packet::control(PacketType::AUTH_SUCCESS, vec![0xABu8; 16]).unwrap(),
            Packet::control(PacketType(0xFFFF), Bytes::new()).unwrap(),
        ];

        for packet in packets {
            let bytes = packet.encode(17).unwrap();
            let (frame, consumed) = decode(&bytes, 0, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(frame.packet, packet);
            let expected_ack = if packet.is_control() { None } else { Some(17) };
            assert_eq!(frame.peer_ack_id, expected_ack);
        }
    }

    #[test]
    fn test_decode_incomplete_consumes_nothing() {
        let bytes = reliable(0x0001, 1, b"payload").encode(0).unwrap();
        for cut in 0..bytes.len() {
            assert_eq!(decode(&bytes[..cut], 0, DEFAULT_MAX_PAYLOAD), Ok(None));
        }
    }

    #[test]
    fn test_decode_at_offset() {
        let mut buf = BytesMut::new();
        reliable(0x0001, 1, b"a").encode_into(0, &mut buf).unwrap();
        reliable(0x0001, 2, b"bc").encode_into(0, &mut buf).unwrap();

        let (first, used) = decode(&buf, 0, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        let (second, _) = decode(&buf, used, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(first.packet.sequence_id(), Some(1));
        assert_eq!(second.packet.payload().as_ref(), b"bc");
        assert_eq!(decode(&buf, buf.len() + 5, DEFAULT_MAX_PAYLOAD), Ok(None));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut buf = BytesMut::new();
        FixedHeader::new(PacketType(0x0001), 1024).encode(&mut buf);

        let mut decoder = FrameDecoder::with_max_payload(512);
        assert_eq!(decoder.decode(&mut buf), Err(WireError::Size(1024)));
        assert_eq!(decode(&buf, 0, 512), Err(WireError::Size(1024)));
    }

    #[test]
    fn test_frame_decoder_retains_suffix() {
        let mut buf = BytesMut::new();
        reliable(0x0001, 1, b"one").encode_into(5, &mut buf).unwrap();
        let second = reliable(0x0001, 2, b"two").encode(5).unwrap();
        buf.extend_from_slice(&second[..10]);

        let mut decoder = FrameDecoder::new();
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.packet.payload().as_ref(), b"one");
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], &second[..10]);

        buf.extend_from_slice(&second[10..]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.packet.sequence_id(), Some(2));
        assert!(buf.is_empty());
    }
}
