//! Throttled dispatcher - forwards at most one landmark frame per interval.
//!
//! Frames arrive from the capture thread far faster than the inference
//! service needs them. Anything that arrives too soon, while another dispatch
//! is still being handed to the socket, or while the connection is down is
//! dropped on the floor. There is no queue.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use handsign_events::{event_names, HandSignRequest};
use handsign_landmarks::{normalize, RawHand};
use handsign_socket::EventSink;
use serde::Serialize;

const NEVER: i64 = i64::MIN;

/// What happened to one frame handed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Throttled,
    InFlight,
    Disconnected,
    Malformed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub sent: u64,
    pub throttled: u64,
    pub in_flight: u64,
    pub disconnected: u64,
    pub malformed: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    throttled: AtomicU64,
    in_flight: AtomicU64,
    disconnected: AtomicU64,
    malformed: AtomicU64,
}

pub struct ThrottledDispatcher {
    sink: Arc<dyn EventSink>,
    interval_ms: i64,
    last_dispatch_ms: AtomicI64,
    in_flight: AtomicBool,
    counters: Counters,
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ThrottledDispatcher {
    pub fn new(sink: Arc<dyn EventSink>, interval_ms: u64) -> Self {
        Self {
            sink,
            interval_ms: i64::try_from(interval_ms).unwrap_or(i64::MAX),
            last_dispatch_ms: AtomicI64::new(NEVER),
            in_flight: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms as u64
    }

    /// Dispatch using the wall clock.
    pub fn dispatch_now(&self, hands: &[RawHand]) -> DispatchOutcome {
        self.maybe_dispatch(hands, chrono::Utc::now().timestamp_millis())
    }

    pub fn maybe_dispatch(&self, hands: &[RawHand], now_ms: i64) -> DispatchOutcome {
        let outcome = self.try_dispatch(hands, now_ms);
        self.count(outcome);
        outcome
    }

    fn try_dispatch(&self, hands: &[RawHand], now_ms: i64) -> DispatchOutcome {
        if !self.sink.is_connected() {
            return DispatchOutcome::Disconnected;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return DispatchOutcome::InFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let last = self.last_dispatch_ms.load(Ordering::Acquire);
        if last != NEVER && now_ms.saturating_sub(last) <= self.interval_ms {
            return DispatchOutcome::Throttled;
        }
        self.last_dispatch_ms.store(now_ms, Ordering::Release);

        let Some(frame) = normalize(hands) else {
            tracing::debug!(hands = hands.len(), "Dropping malformed landmark frame");
            return DispatchOutcome::Malformed;
        };

        let payload = match serde_json::to_value(HandSignRequest::from(&frame)) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize landmark request");
                return DispatchOutcome::Malformed;
            }
        };

        if self.sink.emit(event_names::REQ_HANDSIGN, payload) {
            DispatchOutcome::Sent
        } else {
            // Connection dropped between the check and the emit
            DispatchOutcome::Disconnected
        }
    }

    fn count(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Sent => &self.counters.sent,
            DispatchOutcome::Throttled => &self.counters.throttled,
            DispatchOutcome::InFlight => &self.counters.in_flight,
            DispatchOutcome::Disconnected => &self.counters.disconnected,
            DispatchOutcome::Malformed => &self.counters.malformed,
        };
        let total = counter.fetch_add(1, Ordering::Relaxed) + 1;

        if outcome == DispatchOutcome::Disconnected && total % 10 == 1 {
            tracing::debug!(dropped = total, "Connection down, dropping landmark frames");
        }
    }

    /// Forget the last dispatch time so the next frame goes out immediately.
    pub fn reset(&self) {
        self.last_dispatch_ms.store(NEVER, Ordering::Release);
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            disconnected: self.counters.disconnected.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }
}
