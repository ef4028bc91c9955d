//! Reconnect bookkeeping, kept free of I/O so it can be tested directly.

use std::time::Duration;

use handsign_events::ConnectionState;

use crate::transport::DisconnectReason;

/// Retry limits for unintended disconnects and failed connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Failures tolerated before the error is surfaced and retries stop.
    pub max_attempts: u32,
    /// Delay before the next connect after a failure.
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(2000),
        }
    }
}

/// What the manager should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another connect after the delay.
    RetryAfter(Duration),
    /// Attempts are exhausted; stay disconnected and show the error.
    GiveUp,
    /// The disconnect was intentional; do nothing.
    Stay,
}

/// Connection flags plus the failure counter.
///
/// Invariant: `show_error` is only set once `attempts >= max_attempts`, and is
/// cleared by any successful connect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    connected: bool,
    show_error: bool,
    attempts: u32,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState {
            is_connected: self.connected,
            show_connection_error: self.show_error,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn on_connect(&mut self) {
        self.connected = true;
        self.show_error = false;
        self.attempts = 0;
    }

    pub fn on_disconnect(
        &mut self,
        reason: &DisconnectReason,
        policy: &ReconnectPolicy,
    ) -> RetryDecision {
        self.connected = false;
        if reason.is_intentional() {
            self.show_error = false;
            return RetryDecision::Stay;
        }
        self.register_failure(policy)
    }

    pub fn on_connect_error(&mut self, policy: &ReconnectPolicy) -> RetryDecision {
        self.connected = false;
        self.register_failure(policy)
    }

    /// Manual reconnect: forget previous failures and hide the error.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.show_error = false;
    }

    pub fn dismiss_error(&mut self) {
        self.show_error = false;
    }

    fn register_failure(&mut self, policy: &ReconnectPolicy) -> RetryDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts >= policy.max_attempts {
            self.show_error = true;
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(policy.retry_delay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_clears_error_and_attempts() {
        let policy = ReconnectPolicy::default();
        let mut status = ConnectionStatus::new();
        for _ in 0..5 {
            status.on_connect_error(&policy);
        }
        assert!(status.state().show_connection_error);

        status.on_connect();
        assert_eq!(
            status.state(),
            ConnectionState {
                is_connected: true,
                show_connection_error: false
            }
        );
        assert_eq!(status.attempts(), 0);
    }

    #[test]
    fn test_error_shown_only_at_max_attempts() {
        let policy = ReconnectPolicy::default();
        let mut status = ConnectionStatus::new();
        status.on_connect();

        for attempt in 1..5 {
            let decision = status.on_disconnect(&DisconnectReason::TransportClose, &policy);
            assert_eq!(decision, RetryDecision::RetryAfter(Duration::from_millis(2000)));
            assert_eq!(status.attempts(), attempt);
            assert!(!status.state().show_connection_error);
        }

        let decision = status.on_connect_error(&policy);
        assert_eq!(decision, RetryDecision::GiveUp);
        assert!(status.state().show_connection_error);
        assert!(!status.is_connected());
    }

    #[test]
    fn test_intentional_disconnect_does_not_count() {
        let policy = ReconnectPolicy::default();
        let mut status = ConnectionStatus::new();
        status.on_connect();

        let decision = status.on_disconnect(&DisconnectReason::ClientDisconnect, &policy);
        assert_eq!(decision, RetryDecision::Stay);
        assert_eq!(status.attempts(), 0);
        assert_eq!(status.state(), ConnectionState::default());
    }

    #[test]
    fn test_server_disconnect_counts_as_failure() {
        let policy = ReconnectPolicy::default();
        let mut status = ConnectionStatus::new();
        status.on_connect();

        let decision = status.on_disconnect(&DisconnectReason::ServerDisconnect, &policy);
        assert!(matches!(decision, RetryDecision::RetryAfter(_)));
        assert_eq!(status.attempts(), 1);
    }

    #[test]
    fn test_reset_and_dismiss() {
        let policy = ReconnectPolicy {
            max_attempts: 1,
            retry_delay: Duration::from_millis(10),
        };
        let mut status = ConnectionStatus::new();
        assert_eq!(status.on_connect_error(&policy), RetryDecision::GiveUp);
        assert!(status.state().show_connection_error);

        status.dismiss_error();
        assert!(!status.state().show_connection_error);
        assert_eq!(status.attempts(), 1);

        status.on_connect_error(&policy);
        status.reset();
        assert_eq!(status.attempts(), 0);
        assert!(!status.state().show_connection_error);
    }
}
