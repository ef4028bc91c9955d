//! Connection to the hand-sign inference service.
//!
//! The service speaks Socket.IO. This crate keeps exactly one long-lived
//! connection per [`ConnectionManager`], retries unintended disconnects up to
//! a limit, and lets the rest of the pipeline emit requests and observe
//! connection state without knowing about the wire format.
//!
//! ```text
//! ConnectionManager ── Transport::open ──▶ Link { outbound, inbound }
//!        ▲                                     │
//!        └──────── Inbound::Event / Closed ◀───┘
//! ```

mod error;
pub mod loopback;
mod manager;
pub mod packet;
mod policy;
mod transport;
mod websocket;

pub use error::{Result, SocketError};
pub use manager::{
    ConnectionConfig, ConnectionManager, EventHandler, EventStream, HandlerId, StateListener,
    Subscription, DEFAULT_RECONNECT_SETTLE,
};
pub use policy::{ConnectionStatus, ReconnectPolicy, RetryDecision};
pub use transport::{DisconnectReason, Inbound, Link, Outbound, Transport};
pub use websocket::{socket_io_url, WebSocketTransport, DEFAULT_HANDSHAKE_TIMEOUT};

use serde_json::Value;

/// Where outbound requests go.
///
/// Implemented by [`ConnectionManager`]; the dispatcher and composer depend on
/// this trait so they can be tested without a connection.
pub trait EventSink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Emit an event. Returns false if nothing was sent.
    fn emit(&self, event: &str, payload: Value) -> bool;
}
