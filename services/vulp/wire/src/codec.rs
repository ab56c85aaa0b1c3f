//! Payload encoding helpers.
//!
//! The core treats payloads as opaque bytes. These helpers build and parse the
//! few payloads the handshake needs (login, session key, resync cursor) and
//! the text payloads used by the command-line client.

use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Length of a session key in bytes
pub const SESSION_KEY_LEN: usize = 16;

/// Opaque session token issued by the bouncer on successful authentication
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// The all-zero key presented when starting a fresh session
    pub const ZERO: SessionKey = SessionKey([0; SESSION_KEY_LEN]);

    /// Wrap raw key bytes
    pub fn new(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from an auth-success payload
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        let raw: [u8; SESSION_KEY_LEN] = bytes
            .try_into()
            .map_err(|_| WireError::Payload("session key must be 16 bytes"))?;
        Ok(Self(raw))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    /// Whether this is the fresh-session key
    pub fn is_zero(&self) -> bool {
        self.0 == [0; SESSION_KEY_LEN]
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix, keys end up in logs otherwise.
        write!(
            f,
            "SessionKey({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Login request payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Login {
    /// Protocol version spoken by this client
    pub protocol_version: u32,
    /// Highest sequence id received from the bouncer on the previous connection
    pub last_received_id: u32,
    /// Previous session key, or [`SessionKey::ZERO`]
    pub session_key: SessionKey,
}

impl Login {
    /// Encoded payload length
    pub const LEN: usize = 8 + SESSION_KEY_LEN;

    /// Encode the login payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u32_le(self.protocol_version);
        buf.put_u32_le(self.last_received_id);
        buf.put_slice(self.session_key.as_bytes());
        buf.freeze()
    }

    /// Decode a login payload
    pub fn decode(mut payload: &[u8]) -> Result<Self, WireError> {
        if payload.len() != Self::LEN {
            return Err(WireError::Payload("login payload must be 24 bytes"));
        }
        let protocol_version = payload.get_u32_le();
        let last_received_id = payload.get_u32_le();
        let session_key = SessionKey::from_slice(payload)?;
        Ok(Self {
            protocol_version,
            last_received_id,
            session_key,
        })
    }
}

/// Encode a resync payload
pub fn build_resync(acked_id: u32) -> Bytes {
    Bytes::copy_from_slice(&acked_id.to_le_bytes())
}

/// Parse the acknowledged id carried by a resync packet
pub fn parse_resync(mut payload: &[u8]) -> Result<u32, WireError> {
    if payload.len() < 4 {
        return Err(WireError::Payload("resync payload shorter than 4 bytes"));
    }
    Ok(payload.get_u32_le())
}

/// Append a `u32`-length-prefixed UTF-8 string
pub fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

/// Read a `u32`-length-prefixed string, replacing invalid UTF-8
pub fn get_string<B: Buf>(buf: &mut B) -> Result<String, WireError> {
    if buf.remaining() < 4 {
        return Err(WireError::Payload("missing string length"));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(WireError::Payload("string longer than payload"));
    }
    let raw = buf.copy_to_bytes(len);
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Build a debug command payload
pub fn build_debug_command(command: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + command.len());
    put_string(&mut buf, command);
    buf.freeze()
}

/// Build the payload for text typed into a window
pub fn build_window_input(window_id: u32, text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + text.len());
    buf.put_u32_le(window_id);
    put_string(&mut buf, text);
    buf.freeze()
}

/// Parse a status text payload
pub fn parse_status_text(mut payload: &[u8]) -> Result<String, WireError> {
    get_string(&mut payload)
}

/// Parse a window message payload into `(window_id, text)`
pub fn parse_window_message(mut payload: &[u8]) -> Result<(u32, String), WireError> {
    if payload.len() < 4 {
        return Err(WireError::Payload("missing window id"));
    }
    let window_id = payload.get_u32_le();
    let text = get_string(&mut payload)?;
    Ok((window_id, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_layout() {
        let login = Login {
            protocol_version: 1,
            last_received_id: 0x0102,
            session_key: SessionKey::ZERO,
        };
        let bytes = login.encode();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[..8], &[1, 0, 0, 0, 0x02, 0x01, 0, 0]);
        assert!(bytes[8..].iter().all(|b| *b == 0));
        assert_eq!(Login::decode(&bytes).unwrap(), login);
    }

    #[test]
    fn test_login_decode_rejects_bad_length() {
        assert!(Login::decode(&[0; 23]).is_err());
        assert!(Login::decode(&[0; 25]).is_err());
    }

    #[test]
    fn test_session_key() {
        assert!(SessionKey::ZERO.is_zero());
        let key = SessionKey::from_slice(&[7; 16]).unwrap();
        assert!(!key.is_zero());
        assert_eq!(key.as_bytes(), &[7; 16]);
        assert!(SessionKey::from_slice(&[7; 15]).is_err());
        assert_eq!(format!("{:?}", key), "SessionKey(07070707..)");
    }

    #[test]
    fn test_resync_payload() {
        assert_eq!(parse_resync(&build_resync(0xDEAD)).unwrap(), 0xDEAD);
        assert!(parse_resync(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_text_payloads() {
        let cmd = build_debug_command("all hello");
        assert_eq!(&cmd[..4], &[9, 0, 0, 0]);
        assert_eq!(parse_status_text(&cmd).unwrap(), "all hello");

        let win = build_window_input(3, "hey");
        assert_eq!(parse_window_message(&win).unwrap(), (3, "hey".to_string()));

        assert!(parse_status_text(&[10, 0, 0, 0, b'x']).is_err());
        assert!(parse_window_message(&[1, 0]).is_err());
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let payload = [2, 0, 0, 0, 0xFF, b'a'];
        assert_eq!(parse_status_text(&payload).unwrap(), "\u{FFFD}a");
    }
}
