//! Client error types.

use tokio_tungstenite::tungstenite;

/// Errors surfaced by the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    /// The session could not be opened or was lost.
    #[error("transport error: {0}")]
    Transport(#[source] tungstenite::Error),
    /// A single frame could not be written. The session is left alone.
    #[error("send failed: {0}")]
    Send(#[source] tungstenite::Error),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("max attempts exceeded")]
    ExhaustedRetries,
    /// A concurrent `disconnect` won the race against session setup.
    #[error("connection attempt cancelled by disconnect")]
    Cancelled,
    /// No previous `connect` target to re-establish.
    #[error("nothing to reconnect to")]
    NoTarget,
    /// A reconnect callback reported failure.
    #[error("{0}")]
    Callback(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
