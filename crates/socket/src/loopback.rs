//! In-process transport for tests and offline demos.
//!
//! Every accepted `open` hands the server half of the link to the test via
//! [`LoopbackTransport::next_server`], so a test can play the inference
//! service: push events, read what the client emitted, or drop the link.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Result, SocketError};
use crate::transport::{DisconnectReason, Inbound, Link, Outbound, Transport};

/// Server half of a loopback link.
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<Inbound>,
    from_client: mpsc::UnboundedReceiver<Outbound>,
}

impl ServerEnd {
    /// Deliver an event to the client. Returns false if the client is gone.
    pub fn send_event(&self, name: &str, payload: Value) -> bool {
        self.to_client
            .send(Inbound::Event {
                name: name.to_string(),
                payload,
            })
            .is_ok()
    }

    /// End the connection with `reason`, as the transport would.
    pub fn close(&self, reason: DisconnectReason) {
        let _ = self.to_client.send(Inbound::Closed(reason));
    }

    /// Next frame sent by the client; `None` once the client dropped the link.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.from_client.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.from_client.try_recv().ok()
    }

    /// Drain all frames the client has sent so far.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Transport that connects to an in-process "server".
pub struct LoopbackTransport {
    failures: Mutex<VecDeque<String>>,
    refuse_all: Mutex<Option<String>>,
    opens: AtomicUsize,
    accepted_tx: mpsc::UnboundedSender<ServerEnd>,
    accepted_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerEnd>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            failures: Mutex::new(VecDeque::new()),
            refuse_all: Mutex::new(None),
            opens: AtomicUsize::new(0),
            accepted_tx,
            accepted_rx: tokio::sync::Mutex::new(accepted_rx),
        }
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` opens with `message`.
    pub fn fail_next(&self, count: usize, message: &str) {
        let mut failures = self.failures.lock().expect("loopback mutex poisoned");
        failures.extend(std::iter::repeat(message.to_string()).take(count));
    }

    /// Fail every open until cleared with `None`.
    pub fn refuse_all(&self, message: Option<&str>) {
        *self.refuse_all.lock().expect("loopback mutex poisoned") = message.map(str::to_string);
    }

    /// Number of `open` calls so far, successful or not.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection.
    pub async fn next_server(&self) -> ServerEnd {
        self.accepted_rx
            .lock()
            .await
            .recv()
            .await
            .expect("loopback transport owns the sender")
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self, _url: &str) -> Result<Link> {
        self.opens.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.refuse_all.lock().expect("loopback mutex poisoned").clone() {
            return Err(SocketError::Transport(message));
        }
        if let Some(message) = self
            .failures
            .lock()
            .expect("loopback mutex poisoned")
            .pop_front()
        {
            return Err(SocketError::Transport(message));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let server = ServerEnd {
            to_client,
            from_client,
        };
        if self.accepted_tx.send(server).is_err() {
            return Err(SocketError::Transport("loopback server gone".to_string()));
        }

        Ok(Link {
            sid: Some(format!("loopback-{}", self.opens.load(Ordering::SeqCst))),
            outbound,
            inbound,
        })
    }
}
