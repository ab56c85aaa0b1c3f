//! Ordered hand-off of decoded packets and session events to the consumer.

use crate::state::ConnectionState;
use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;
use vulp_wire::PacketType;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The bouncer closed the stream
    Closed,
    /// Read failure
    Transport(String),
    /// The bouncer sent something that cannot be framed or handled
    Protocol(String),
    /// [`crate::Client::disconnect`] was called
    Local,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => f.write_str("closed by peer"),
            DisconnectReason::Transport(e) => write!(f, "transport error: {}", e),
            DisconnectReason::Protocol(e) => write!(f, "protocol error: {}", e),
            DisconnectReason::Local => f.write_str("closed locally"),
        }
    }
}

/// Events delivered to the consumer, in the order they happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A packet the core does not handle itself
    Packet {
        /// Packet type
        packet_type: PacketType,
        /// Payload, fully received
        payload: Bytes,
    },
    /// Connection state changed
    StateChanged(ConnectionState),
    /// The bouncer rejected the login
    AuthFailed,
    /// A write failed; reliable packets stay cached for the next resync
    WriteFailed {
        /// Sequence id of the packet, if reliable
        sequence_id: Option<u32>,
        /// Error text
        error: String,
    },
    /// The connection ended
    Disconnected {
        /// Why
        reason: DisconnectReason,
    },
}

/// Receiving end of the event channel
pub type ClientEvents = mpsc::UnboundedReceiver<ClientEvent>;

/// Producer side of the consumer channel.
///
/// Sends never block, so calling these while the session lock is held cannot
/// stall the receive loop on a slow consumer.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl Dispatcher {
    /// Create a dispatcher and the matching consumer end
    pub fn channel() -> (Self, ClientEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Hand a decoded packet to the consumer
    pub fn deliver(&self, packet_type: PacketType, payload: Bytes) {
        self.emit(ClientEvent::Packet {
            packet_type,
            payload,
        });
    }

    /// Report a state change
    pub fn connection_state_changed(&self, state: ConnectionState) {
        self.emit(ClientEvent::StateChanged(state));
    }

    /// Report a rejected login
    pub fn auth_failed(&self) {
        self.emit(ClientEvent::AuthFailed);
    }

    /// Report a failed write
    pub fn write_failed(&self, sequence_id: Option<u32>, error: &std::io::Error) {
        self.emit(ClientEvent::WriteFailed {
            sequence_id,
            error: error.to_string(),
        });
    }

    /// Report the end of a connection
    pub fn disconnected(&self, reason: DisconnectReason) {
        self.emit(ClientEvent::Disconnected { reason });
    }

    fn emit(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event consumer gone, dropping event");
        }
    }
}
