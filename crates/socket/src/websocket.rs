//! Socket.IO over a plain WebSocket, using tokio-tungstenite.
//!
//! The handshake is: server `open` packet, client namespace connect (`40`),
//! server connect ack (`40{sid}`). After that a pump task owns the socket,
//! answers heartbeats and moves events between the socket and the [`Link`].

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Result, SocketError};
use crate::packet::{EnginePacket, OpenPayload, SocketPacket};
use crate::transport::{DisconnectReason, Inbound, Link, Outbound, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Default time allowed for the WebSocket upgrade plus namespace handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Rewrite an endpoint such as `http://localhost:8000` into the Engine.IO
/// WebSocket URL `ws://localhost:8000/socket.io/?EIO=4&transport=websocket`.
///
/// `https`/`wss` map to `wss`; a missing scheme means `ws`. A path is kept
/// only when it already points at the Engine.IO mount (`.../socket.io`).
pub fn socket_io_url(endpoint: &str) -> Result<String> {
    let trimmed = endpoint.trim();
    let (scheme, rest) = match trimmed.split_once("://") {
        Some(("http", rest)) | Some(("ws", rest)) => ("ws", rest),
        Some(("https", rest)) | Some(("wss", rest)) => ("wss", rest),
        Some(_) => return Err(SocketError::InvalidUrl(endpoint.to_string())),
        None => ("ws", trimmed),
    };

    let rest = rest
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    if authority.is_empty() || authority.contains(char::is_whitespace) {
        return Err(SocketError::InvalidUrl(endpoint.to_string()));
    }

    let path = if path.ends_with("/socket.io") {
        path
    } else {
        if !path.is_empty() {
            tracing::warn!(path, "Ignoring endpoint path, namespaces are not supported");
        }
        "/socket.io"
    };
    Ok(format!(
        "{scheme}://{authority}{path}/?EIO=4&transport=websocket"
    ))
}

/// Production transport.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    handshake_timeout: Duration,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> Result<Link> {
        let ws_url = socket_io_url(url)?;
        tracing::debug!(url = %ws_url, "Opening WebSocket");

        let established = tokio::time::timeout(self.handshake_timeout, establish(&ws_url))
            .await
            .map_err(|_| SocketError::HandshakeTimeout)??;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let heartbeat = Duration::from_millis(
            established
                .open
                .ping_interval
                .saturating_add(established.open.ping_timeout),
        );

        tokio::spawn(pump(
            established.sink,
            established.source,
            outbound_rx,
            inbound_tx,
            heartbeat,
        ));

        Ok(Link {
            sid: established.sid,
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

struct Established {
    sink: WsSink,
    source: WsSource,
    open: OpenPayload,
    sid: Option<String>,
}

async fn establish(url: &str) -> Result<Established> {
    let (stream, _response) = connect_async(url)
        .await
        .map_err(|e| SocketError::Transport(e.to_string()))?;
    let (mut sink, mut source) = stream.split();

    let open = match next_packet(&mut source).await? {
        EnginePacket::Open(open) => open,
        other => {
            return Err(SocketError::Handshake(format!(
                "expected open packet, got {other:?}"
            )))
        }
    };
    tracing::trace!(sid = %open.sid, ping_interval = open.ping_interval, "Engine.IO open");

    send_packet(&mut sink, &EnginePacket::Message(SocketPacket::Connect(None))).await?;

    loop {
        match next_packet(&mut source).await? {
            EnginePacket::Message(SocketPacket::Connect(data)) => {
                let sid = data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Ok(Established {
                    sink,
                    source,
                    open,
                    sid,
                });
            }
            EnginePacket::Message(SocketPacket::ConnectError(data)) => {
                let message = data
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| data.to_string());
                return Err(SocketError::Rejected(message));
            }
            EnginePacket::Ping => send_packet(&mut sink, &EnginePacket::Pong).await?,
            EnginePacket::Close => {
                return Err(SocketError::Handshake(
                    "server closed during handshake".to_string(),
                ))
            }
            other => tracing::trace!(?other, "Ignoring packet during handshake"),
        }
    }
}

async fn next_packet(source: &mut WsSource) -> Result<EnginePacket> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => return Ok(EnginePacket::decode(&text)?),
            Some(Ok(Message::Close(_))) | None => {
                return Err(SocketError::Transport(
                    "connection closed during handshake".to_string(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(SocketError::Transport(e.to_string())),
        }
    }
}

async fn send_packet(sink: &mut WsSink, packet: &EnginePacket) -> Result<()> {
    sink.send(Message::Text(packet.encode()))
        .await
        .map_err(|e| SocketError::Transport(e.to_string()))
}

/// Own the socket until either side closes it; always ends with one
/// [`Inbound::Closed`].
async fn pump(
    mut sink: WsSink,
    mut source: WsSource,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    inbound: mpsc::UnboundedSender<Inbound>,
    heartbeat: Duration,
) {
    let mut deadline = Instant::now() + heartbeat;

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Event { name, payload }) => {
                    if let Err(e) = send_packet(&mut sink, &EnginePacket::event(name, payload)).await {
                        tracing::warn!(error = %e, "Failed to send event");
                        break DisconnectReason::TransportError;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = send_packet(&mut sink, &EnginePacket::Message(SocketPacket::Disconnect)).await;
                    let _ = sink.close().await;
                    break DisconnectReason::ClientDisconnect;
                }
            },
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(?heartbeat, "No heartbeat from server");
                break DisconnectReason::PingTimeout;
            }
            message = source.next() => {
                deadline = Instant::now() + heartbeat;
                match message {
                    Some(Ok(Message::Text(text))) => match EnginePacket::decode(&text) {
                        Ok(EnginePacket::Ping) => {
                            if let Err(e) = send_packet(&mut sink, &EnginePacket::Pong).await {
                                tracing::warn!(error = %e, "Failed to answer ping");
                                break DisconnectReason::TransportError;
                            }
                        }
                        Ok(EnginePacket::Message(SocketPacket::Event { name, payload })) => {
                            if inbound.send(Inbound::Event { name, payload }).is_err() {
                                break DisconnectReason::ClientDisconnect;
                            }
                        }
                        Ok(EnginePacket::Message(SocketPacket::Disconnect)) => {
                            break DisconnectReason::ServerDisconnect;
                        }
                        Ok(EnginePacket::Close) => break DisconnectReason::TransportClose,
                        Ok(other) => tracing::trace!(?other, "Ignoring packet"),
                        Err(e) => tracing::warn!(error = %e, "Dropping malformed packet"),
                    },
                    Some(Ok(Message::Close(_))) | None => break DisconnectReason::TransportClose,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "WebSocket read failed");
                        break DisconnectReason::TransportError;
                    }
                }
            }
        }
    };

    tracing::debug!(%reason, "WebSocket closed");
    let _ = inbound.send(Inbound::Closed(reason));
}
