//! Wire protocol framing and payload helpers for the vulp bouncer client.
//!
//! This crate provides the low-level framing used between the client and the
//! bouncer: a fixed little-endian header on every frame, an extended header
//! carrying sequence and acknowledgment ids on reliable frames, and helpers
//! for the handful of payloads the session layer has to understand.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u16 type             | top bit set = control      |
//! +----------------------+----------------------------+
//! | u16 reserved         | zero                       |
//! +----------------------+----------------------------+
//! | u32 payload_len      | bytes of payload           |
//! +----------------------+----------------------------+
//! | u32 sequence_id      | reliable frames only       |
//! +----------------------+----------------------------+
//! | u32 peer_ack_id      | reliable frames only       |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod header;

// Re-export main types
pub use codec::{
    build_debug_command, build_resync, build_window_input, get_string, parse_resync,
    parse_status_text, parse_window_message, put_string, Login, SessionKey, SESSION_KEY_LEN,
};
pub use error::WireError;
pub use frame::{decode, Frame, FrameDecoder, Packet, DEFAULT_MAX_PAYLOAD};
pub use header::{
    ControlCode, ExtendedHeader, FixedHeader, PacketType, CONTROL_FLAG, EXTENDED_HEADER_SIZE,
    FIXED_HEADER_SIZE,
};
