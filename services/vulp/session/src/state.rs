//! Authentication and resync state machine.

use std::fmt;
use tracing::{debug, info};
use vulp_wire::{Login, SessionKey};

/// Connection lifecycle as seen by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport
    Disconnected,
    /// Transport up, no login sent yet (or the last one was rejected)
    Connected,
    /// Login sent, waiting for the bouncer's verdict
    Authenticating,
    /// Session established; reliable and control traffic may flow
    Authenticated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

/// Session state shared by the receive loop and the write path.
///
/// Transition methods return the new state when it actually changed, so the
/// caller can report it exactly once.
#[derive(Debug, Clone)]
pub struct SessionState {
    state: ConnectionState,
    session_key: SessionKey,
    last_received_id: u32,
}

impl SessionState {
    /// Fresh session: disconnected, zero key, nothing received
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session_key: SessionKey::ZERO,
            last_received_id: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current (or previous) session key
    pub fn session_key(&self) -> SessionKey {
        self.session_key
    }

    /// Highest sequence id received from the bouncer
    pub fn last_received_id(&self) -> u32 {
        self.last_received_id
    }

    /// Whether the session is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// Gate for outbound reliable/control writes
    pub fn may_write(&self, allow_unauthenticated: bool) -> bool {
        match self.state {
            ConnectionState::Authenticated => true,
            ConnectionState::Disconnected => false,
            ConnectionState::Connected | ConnectionState::Authenticating => {
                allow_unauthenticated
            }
        }
    }

    /// Record the sequence id of an inbound reliable packet
    pub fn record_received(&mut self, sequence_id: u32) {
        self.last_received_id = sequence_id;
    }

    /// Build the login payload resuming this session
    pub fn login(&self, protocol_version: u32) -> Login {
        Login {
            protocol_version,
            last_received_id: self.last_received_id,
            session_key: self.session_key,
        }
    }

    /// Transport established
    pub fn on_connected(&mut self) -> Option<ConnectionState> {
        self.transition(ConnectionState::Connected)
    }

    /// Login packet written
    pub fn on_login_sent(&mut self) -> Option<ConnectionState> {
        match self.state {
            ConnectionState::Connected => self.transition(ConnectionState::Authenticating),
            _ => None,
        }
    }

    /// Bouncer accepted the login and issued a key
    pub fn on_auth_success(&mut self, key: SessionKey) -> Option<ConnectionState> {
        self.session_key = key;
        debug!("Stored session key {:?}", key);
        self.transition(ConnectionState::Authenticated)
    }

    /// Bouncer rejected the login; the connection stays open
    pub fn on_auth_failure(&mut self) -> Option<ConnectionState> {
        match self.state {
            ConnectionState::Authenticating => self.transition(ConnectionState::Connected),
            _ => None,
        }
    }

    /// Bouncer resumed the session
    pub fn on_resync(&mut self) -> Option<ConnectionState> {
        self.transition(ConnectionState::Authenticated)
    }

    /// Transport closed or failed.
    ///
    /// The key and `last_received_id` are kept: the next login presents them
    /// so the bouncer knows which session to resume and what to resend.
    pub fn on_disconnected(&mut self) -> Option<ConnectionState> {
        self.transition(ConnectionState::Disconnected)
    }

    fn transition(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.state == next {
            return None;
        }
        info!("Session state {} -> {}", self.state, next);
        self.state = next;
        Some(next)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
