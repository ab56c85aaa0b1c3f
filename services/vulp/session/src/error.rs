//! Session error types.

use thiserror::Error;
use vulp_wire::WireError;

/// Retransmission cache errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Appended id does not exceed the newest cached id
    #[error("sequence id {id} not above last cached id {last}")]
    OutOfOrder {
        /// Rejected id
        id: u32,
        /// Newest id already cached
        last: u32,
    },
    /// Control packets are never cached
    #[error("control packets cannot be cached")]
    NotReliable,
}

/// Errors surfaced by the client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Framing or payload error
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    /// Retransmission cache invariant violated
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    /// Every reliable sequence id has been used
    #[error("sequence id space exhausted")]
    SequenceExhausted,
}
