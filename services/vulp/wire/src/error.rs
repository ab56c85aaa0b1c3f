//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Declared payload length exceeds the configured ceiling
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Packet type used in the wrong namespace (control vs reliable)
    #[error("packet type 0x{0:04x} not valid here")]
    Type(u16),

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,

    /// Application payload could not be parsed
    #[error("malformed payload: {0}")]
    Payload(&'static str),
}
