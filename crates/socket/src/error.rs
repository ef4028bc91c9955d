//! Error types for the inference connection.

use thiserror::Error;

use crate::packet::PacketError;

/// Result type for connection operations.
pub type Result<T> = std::result::Result<T, SocketError>;

/// Errors that can occur while establishing or using the connection.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The manager was created outside a tokio runtime.
    #[error("no tokio runtime available - create the connection manager inside a runtime")]
    NoRuntime,

    /// The configured endpoint could not be turned into a WebSocket URL.
    #[error("invalid endpoint url '{0}'")]
    InvalidUrl(String),

    /// The underlying WebSocket failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server did not complete the Engine.IO/Socket.IO handshake in time.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The server sent something unexpected during the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server refused the namespace connection.
    #[error("connection rejected by server: {0}")]
    Rejected(String),

    /// A frame could not be decoded.
    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),
}
