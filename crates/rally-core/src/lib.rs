//! Core types for Rally.
//!
//! This crate is the pure protocol layer of the game client: the records that
//! travel over the wire, the decoder that turns a raw text frame into an
//! [`InboundMessage`], and the [`Roster`] that folds decoded messages into the
//! other-players view. Nothing here touches the network or a runtime.

mod message;
mod player;
mod roster;
mod router;

pub use message::{GameStarted, InboundMessage};
pub use player::{PlayerPosition, DEFAULT_SPAWN};
pub use roster::{Roster, Routed};
pub use router::{decode, try_decode, DecodeError};

/// Connection lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session and no retry in progress.
    #[default]
    Disconnected,
    /// Opening a session, either for `connect` or for a retry attempt.
    Connecting,
    /// Session is live and frames are flowing.
    Connected,
    /// The last attempt failed. The retry loop may still be running.
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// The failure reason, if this is an error state.
    pub fn error(&self) -> Option<&str> {
        match self {
            ConnectionState::Error(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error(reason) => write!(f, "error: {}", reason),
        }
    }
}
