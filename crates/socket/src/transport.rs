//! Transport seam between the connection manager and the wire.
//!
//! A [`Transport`] opens one logical Socket.IO connection and hands back a
//! [`Link`]: a pair of channels carrying events in each direction. The link
//! ends with exactly one [`Inbound::Closed`] carrying the disconnect reason.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

/// Why a connection ended. String forms match the Socket.IO client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client asked to disconnect.
    ClientDisconnect,
    /// The server closed the namespace.
    ServerDisconnect,
    /// The underlying socket closed.
    TransportClose,
    /// The underlying socket failed.
    TransportError,
    /// The server stopped answering heartbeats.
    PingTimeout,
    Other(String),
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::ClientDisconnect => "io client disconnect",
            DisconnectReason::ServerDisconnect => "io server disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::Other(reason) => reason,
        }
    }

    /// Only a client-requested disconnect is intentional; everything else
    /// counts as a failure and triggers a retry.
    pub fn is_intentional(&self) -> bool {
        matches!(self, DisconnectReason::ClientDisconnect)
    }
}

impl From<&str> for DisconnectReason {
    fn from(reason: &str) -> Self {
        match reason {
            "io client disconnect" => DisconnectReason::ClientDisconnect,
            "io server disconnect" => DisconnectReason::ServerDisconnect,
            "transport close" => DisconnectReason::TransportClose,
            "transport error" => DisconnectReason::TransportError,
            "ping timeout" => DisconnectReason::PingTimeout,
            other => DisconnectReason::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frames sent from the manager to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event { name: String, payload: Value },
    /// Close the connection cleanly.
    Close,
}

/// Frames delivered from the transport to the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Event { name: String, payload: Value },
    Closed(DisconnectReason),
}

/// An open connection.
pub struct Link {
    /// Session id assigned by the server, if it sent one.
    pub sid: Option<String>,
    pub outbound: mpsc::UnboundedSender<Outbound>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Opens connections to the inference service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection and complete the namespace handshake.
    ///
    /// An error here is a connect error: the manager counts it as a failed
    /// attempt.
    async fn open(&self, url: &str) -> Result<Link>;
}
