//! Connection manager: one long-lived, auto-reconnecting connection to the
//! inference service.
//!
//! The manager owns the connection state machine and exposes:
//! - lifecycle control (`connect`, `disconnect`, `reconnect`, `dismiss_error`)
//! - state observation (`subscribe`, `watch_state`, `get_state`)
//! - event plumbing (`emit`, `on`/`off`, `listen`)
//!
//! State listeners and event handlers are always invoked outside the internal
//! lock, so they may call back into the manager. State changes are delivered
//! one round at a time, and each round re-reads the latest state, so
//! listeners never end up on a superseded state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::ThreadId;
use std::time::Duration;

use handsign_events::{event_names, ConnectionAck, ConnectionState};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{Result, SocketError};
use crate::policy::{ConnectionStatus, ReconnectPolicy, RetryDecision};
use crate::transport::{DisconnectReason, Inbound, Link, Outbound, Transport};
use crate::websocket::WebSocketTransport;
use crate::EventSink;

/// Default pause between the forced disconnect and the new connect when the
/// user asks for a manual reconnect.
pub const DEFAULT_RECONNECT_SETTLE: Duration = Duration::from_millis(500);

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Inference service endpoint, e.g. `http://localhost:8000`.
    pub url: String,
    pub policy: ReconnectPolicy,
    pub reconnect_settle: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            reconnect_settle: DEFAULT_RECONNECT_SETTLE,
        }
    }
}

/// Listener for connection state changes.
pub type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Handler for an inbound server event.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Registration handle returned by [`ConnectionManager::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// A retry or settle timer is pending.
    Waiting,
    Connecting,
    Connected,
}

struct Inner {
    status: ConnectionStatus,
    phase: Phase,
    /// Bumped whenever the current connection attempt is superseded, so late
    /// callbacks from an old task are ignored.
    generation: u64,
    cancel: Option<CancellationToken>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    /// Greeting of the current connection, once the service has sent it.
    ack: Option<ConnectionAck>,
}

struct Shared {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    runtime: Handle,
    root: CancellationToken,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    /// Last state delivered to listeners. Held for a whole delivery round.
    delivered: Mutex<ConnectionState>,
    /// Thread running the current round; re-entrant changes are picked up by
    /// that round instead of starting a new one.
    delivering_on: Mutex<Option<ThreadId>>,
    listeners: Mutex<Vec<(u64, StateListener)>>,
    handlers: Mutex<HashMap<String, Vec<(u64, EventHandler)>>>,
    next_id: AtomicU64,
    dropped_emits: AtomicU64,
}

/// Cheaply cloneable handle to the shared connection.
///
/// When the last handle is dropped the connection task is cancelled.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
    _lifetime: Arc<DropGuard>,
}

impl ConnectionManager {
    /// Create a manager using `transport`. Must be called inside a tokio runtime.
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| SocketError::NoRuntime)?;
        let root = CancellationToken::new();
        let (state_tx, _) = watch::channel(ConnectionState::default());

        let shared = Arc::new(Shared {
            config,
            transport,
            runtime,
            root: root.clone(),
            inner: Mutex::new(Inner {
                status: ConnectionStatus::new(),
                phase: Phase::Idle,
                generation: 0,
                cancel: None,
                outbound: None,
                ack: None,
            }),
            state_tx,
            delivered: Mutex::new(ConnectionState::default()),
            delivering_on: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dropped_emits: AtomicU64::new(0),
        });

        Ok(Self {
            shared,
            _lifetime: Arc::new(root.drop_guard()),
        })
    }

    /// Create a manager backed by a real WebSocket.
    pub fn with_websocket(config: ConnectionConfig) -> Result<Self> {
        Self::new(config, Arc::new(WebSocketTransport::new()))
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Start connecting. No-op while a connection is active or in progress.
    pub fn connect(&self) {
        self.shared.begin_connect(None);
    }

    /// Close the connection intentionally. Pending retries are cancelled and
    /// the failure counter is left alone.
    pub fn disconnect(&self) {
        tracing::info!("Disconnecting from inference service");
        self.shared.close_intentionally();
    }

    /// Manual reconnect: reset the failure counter, hide the error, drop any
    /// current connection and connect again after a short settle delay.
    pub fn reconnect(&self) {
        tracing::info!("Manual reconnect requested");
        let changed = {
            let mut inner = self.shared.lock();
            inner.status.reset();
            self.shared.record(&inner)
        };
        self.shared.notify(changed);

        self.shared.close_intentionally();
        self.shared
            .schedule_connect(self.shared.config.reconnect_settle);
    }

    /// Hide the connection error without touching the connection.
    pub fn dismiss_error(&self) {
        let changed = {
            let mut inner = self.shared.lock();
            inner.status.dismiss_error();
            self.shared.record(&inner)
        };
        self.shared.notify(changed);
    }

    pub fn get_state(&self) -> ConnectionState {
        self.shared.lock().status.state()
    }

    /// The service's greeting for the current connection.
    pub fn acknowledgement(&self) -> Option<ConnectionAck> {
        self.shared.lock().ack.clone()
    }

    /// Consecutive failures since the last successful connect or manual reset.
    pub fn attempts(&self) -> u32 {
        self.shared.lock().status.attempts()
    }

    /// Register a state listener. It is called immediately with the current
    /// state, then on every change, in registration order.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: StateListener = Arc::new(listener);

        if self.shared.is_delivering_here() {
            // Registered from inside a listener: the running round delivers
            // anything newer.
            self.shared.push_listener(id, Arc::clone(&listener));
            listener(self.shared.current_state());
        } else {
            self.shared.deliver(Some((id, listener)));
        }

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Watch channel mirroring the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Register a handler for a server event.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .handlers
            .lock()
            .expect("handler mutex poisoned")
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        HandlerId(id)
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        self.shared.remove_handler(event, id.0)
    }

    /// Receive a server event as a stream of payloads. The handler is removed
    /// when the stream is dropped.
    pub fn listen(&self, event: &str) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.on(event, move |payload| {
            let _ = tx.send(payload.clone());
        });
        EventStream {
            rx,
            event: event.to_string(),
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Send an event if connected. While disconnected this is a logged no-op;
    /// returns whether the frame was handed to the transport.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        let outbound = {
            let inner = self.shared.lock();
            if inner.status.is_connected() {
                inner.outbound.clone()
            } else {
                None
            }
        };

        let Some(outbound) = outbound else {
            let dropped = self.shared.dropped_emits.fetch_add(1, Ordering::Relaxed) + 1;
            // Rate-limit logging: a disconnected camera loop emits several times a second
            if dropped % 10 == 1 {
                tracing::debug!(event, dropped, "Not connected, dropping event");
            }
            return false;
        };

        let sent = outbound
            .send(Outbound::Event {
                name: event.to_string(),
                payload,
            })
            .is_ok();
        if !sent {
            tracing::warn!(event, "Connection closed while emitting");
        }
        sent
    }
}

impl EventSink for ConnectionManager {
    fn is_connected(&self) -> bool {
        self.shared.lock().status.is_connected()
    }

    fn emit(&self, event: &str, payload: Value) -> bool {
        ConnectionManager::emit(self, event, payload)
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("connection state mutex poisoned")
    }

    /// Publish the current state to the watch channel. Called with the lock
    /// held so the watch value never goes backwards; returns whether it
    /// changed so listeners can be notified after the lock is released.
    fn record(&self, inner: &Inner) -> bool {
        let state = inner.status.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        })
    }

    fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn push_listener(&self, id: u64, listener: StateListener) {
        self.listeners
            .lock()
            .expect("listener mutex poisoned")
            .push((id, listener));
    }

    fn is_delivering_here(&self) -> bool {
        *self.delivering_on.lock().expect("delivery mutex poisoned")
            == Some(std::thread::current().id())
    }

    fn notify(&self, changed: bool) {
        if changed && !self.is_delivering_here() {
            self.deliver(None);
        }
    }

    /// Run one delivery round, optionally registering a listener first and
    /// handing it the current state. Only one round runs at a time, and it
    /// keeps going until the latest recorded state has been delivered.
    fn deliver(&self, joining: Option<(u64, StateListener)>) {
        let mut delivered = self.delivered.lock().expect("delivery mutex poisoned");
        *self.delivering_on.lock().expect("delivery mutex poisoned") =
            Some(std::thread::current().id());

        if let Some((id, listener)) = joining {
            let initial = self.current_state();
            self.push_listener(id, Arc::clone(&listener));
            listener(initial);
            // Changes pending from other threads are delivered by their own
            // round; only pick up what the new listener itself changed.
            if self.current_state() == initial {
                *self.delivering_on.lock().expect("delivery mutex poisoned") = None;
                return;
            }
        }

        loop {
            let state = self.current_state();
            if *delivered == state {
                break;
            }
            *delivered = state;

            tracing::debug!(
                connected = state.is_connected,
                show_error = state.show_connection_error,
                "Connection state changed"
            );
            let listeners: Vec<StateListener> = self
                .listeners
                .lock()
                .expect("listener mutex poisoned")
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            for listener in listeners {
                listener(state);
            }
        }

        *self.delivering_on.lock().expect("delivery mutex poisoned") = None;
    }

    /// Start a connection task. With `only_generation`, only proceed if that
    /// timer is still the current one.
    fn begin_connect(self: &Arc<Self>, only_generation: Option<u64>) {
        let (token, generation) = {
            let mut inner = self.lock();
            if let Some(expected) = only_generation {
                if inner.generation != expected || inner.phase != Phase::Waiting {
                    return;
                }
            }
            match inner.phase {
                Phase::Connecting | Phase::Connected => {
                    tracing::debug!(phase = ?inner.phase, "Connect requested while already active");
                    return;
                }
                Phase::Idle | Phase::Waiting => {}
            }
            if let Some(previous) = inner.cancel.take() {
                previous.cancel();
            }
            inner.generation += 1;
            inner.phase = Phase::Connecting;
            let token = self.root.child_token();
            inner.cancel = Some(token.clone());
            (token, inner.generation)
        };

        let shared = Arc::clone(self);
        self.runtime
            .spawn(async move { shared.run_connection(token, generation).await });
    }

    fn schedule_connect(self: &Arc<Self>, delay: Duration) {
        let (token, generation) = {
            let mut inner = self.lock();
            if matches!(inner.phase, Phase::Connecting | Phase::Connected) {
                return;
            }
            if let Some(previous) = inner.cancel.take() {
                previous.cancel();
            }
            inner.generation += 1;
            inner.phase = Phase::Waiting;
            let token = self.root.child_token();
            inner.cancel = Some(token.clone());
            (token, inner.generation)
        };

        tracing::debug!(?delay, "Scheduling connect");
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => shared.begin_connect(Some(generation)),
            }
        });
    }

    fn close_intentionally(&self) {
        let changed = {
            let mut inner = self.lock();
            if let Some(token) = inner.cancel.take() {
                token.cancel();
            }
            let was_connected = inner.phase == Phase::Connected;
            inner.phase = Phase::Idle;
            inner.outbound = None;
            inner.ack = None;
            inner.generation += 1;
            if was_connected {
                inner
                    .status
                    .on_disconnect(&DisconnectReason::ClientDisconnect, &self.config.policy);
            }
            self.record(&inner)
        };
        self.notify(changed);
    }

    async fn run_connection(self: Arc<Self>, token: CancellationToken, generation: u64) {
        tracing::info!(url = %self.config.url, "Connecting to inference service");

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("Connect cancelled");
                return;
            }
            result = self.transport.open(&self.config.url) => result,
        };

        let Link {
            sid,
            outbound,
            mut inbound,
        } = match opened {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(error = %e, "Connection error");
                self.handle_connect_error(generation);
                return;
            }
        };

        if !self.handle_connected(generation, outbound.clone()) {
            let _ = outbound.send(Outbound::Close);
            return;
        }
        tracing::info!(sid = sid.as_deref().unwrap_or("-"), "Connected to inference service");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    let _ = outbound.send(Outbound::Close);
                    break;
                }
                frame = inbound.recv() => match frame {
                    Some(Inbound::Event { name, payload }) => {
                        if name == event_names::CONNECTION_ACK {
                            self.acknowledge(generation, &payload);
                        }
                        self.dispatch(&name, &payload);
                    }
                    Some(Inbound::Closed(reason)) => {
                        self.handle_disconnected(generation, reason);
                        break;
                    }
                    None => {
                        self.handle_disconnected(generation, DisconnectReason::TransportClose);
                        break;
                    }
                }
            }
        }
    }

    fn handle_connected(
        &self,
        generation: u64,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> bool {
        let changed = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.phase != Phase::Connecting {
                return false;
            }
            inner.phase = Phase::Connected;
            inner.outbound = Some(outbound);
            inner.ack = None;
            inner.status.on_connect();
            self.record(&inner)
        };
        self.dropped_emits.store(0, Ordering::Relaxed);
        self.notify(changed);
        true
    }

    fn handle_connect_error(self: &Arc<Self>, generation: u64) {
        let (changed, decision, attempts) = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.phase = Phase::Idle;
            inner.cancel = None;
            let decision = inner.status.on_connect_error(&self.config.policy);
            (self.record(&inner), decision, inner.status.attempts())
        };
        self.notify(changed);
        self.apply(decision, attempts);
    }

    fn handle_disconnected(self: &Arc<Self>, generation: u64, reason: DisconnectReason) {
        let (changed, decision, attempts) = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.phase = Phase::Idle;
            inner.cancel = None;
            inner.outbound = None;
            inner.ack = None;
            let decision = inner.status.on_disconnect(&reason, &self.config.policy);
            (self.record(&inner), decision, inner.status.attempts())
        };
        if reason.is_intentional() {
            tracing::info!(%reason, "Disconnected");
        } else {
            tracing::warn!(%reason, attempts, "Connection lost");
        }
        self.notify(changed);
        self.apply(decision, attempts);
    }

    fn apply(self: &Arc<Self>, decision: RetryDecision, attempts: u32) {
        match decision {
            RetryDecision::RetryAfter(delay) => self.schedule_connect(delay),
            RetryDecision::GiveUp => {
                tracing::error!(attempts, "Giving up on inference service, manual reconnect required");
            }
            RetryDecision::Stay => {}
        }
    }

    fn acknowledge(&self, generation: u64, payload: &Value) {
        let ack = match serde_json::from_value::<ConnectionAck>(payload.clone()) {
            Ok(ack) => ack,
            Err(e) => {
                tracing::warn!(error = %e, %payload, "Malformed connection_ack");
                return;
            }
        };
        tracing::debug!(sid = %ack.sid, message = %ack.message, "Connection acknowledged");

        let mut inner = self.lock();
        if inner.generation == generation && inner.phase == Phase::Connected {
            inner.ack = Some(ack);
        }
    }

    fn dispatch(&self, name: &str, payload: &Value) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .expect("handler mutex poisoned")
            .get(name)
            .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!(event = name, "No handler for event");
            return;
        }
        for handler in handlers {
            handler(payload);
        }
    }

    fn remove_handler(&self, event: &str, id: u64) -> bool {
        let mut handlers = self.handlers.lock().expect("handler mutex poisoned");
        let Some(entries) = handlers.get_mut(event) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            handlers.remove(event);
        }
        removed
    }
}

/// Keeps a state listener registered; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .listeners
                .lock()
                .expect("listener mutex poisoned")
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Payloads of one server event; the handler is removed on drop.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Value>,
    event: String,
    id: HandlerId,
    shared: Weak<Shared>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove_handler(&self.event, self.id.0);
        }
    }
}
