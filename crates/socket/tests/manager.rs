//! Integration tests for the connection manager.
//!
//! All tests run on a paused clock: retry and settle delays elapse as soon as
//! the runtime is otherwise idle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use handsign_events::{ConnectionAck, ConnectionState};
use handsign_socket::loopback::LoopbackTransport;
use handsign_socket::{
    ConnectionConfig, ConnectionManager, DisconnectReason, EventSink, Outbound,
};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;

fn manager() -> (ConnectionManager, Arc<LoopbackTransport>) {
    let transport = Arc::new(LoopbackTransport::new());
    let manager = ConnectionManager::new(
        ConnectionConfig::new("http://localhost:8000"),
        transport.clone(),
    )
    .unwrap();
    (manager, transport)
}

async fn wait_for(
    rx: &mut watch::Receiver<ConnectionState>,
    predicate: impl FnMut(&ConnectionState) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for connection state")
        .expect("connection manager dropped");
}

const CONNECTED: ConnectionState = ConnectionState {
    is_connected: true,
    show_connection_error: false,
};

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_connect_notifies_subscribers() {
        let (manager, transport) = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = manager.subscribe(move |state| seen_clone.lock().unwrap().push(state));

        // Immediate notification with the current state
        assert_eq!(*seen.lock().unwrap(), vec![ConnectionState::default()]);

        let mut rx = manager.watch_state();
        manager.connect();
        let _server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionState::default(), CONNECTED]
        );
        assert_eq!(manager.get_state(), CONNECTED);
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();

        manager.connect();
        manager.connect();
        let _server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        manager.connect();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intentional_disconnect_does_not_retry() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();

        manager.connect();
        let mut server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        manager.disconnect();
        assert_eq!(manager.get_state(), ConnectionState::default());
        assert_eq!(server.recv().await, Some(Outbound::Close));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.open_count(), 1);
        assert_eq!(manager.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_last_handle_closes_connection() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();

        manager.connect();
        let mut server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        drop(manager);
        assert_eq!(server.recv().await, Some(Outbound::Close));
    }
}

// ============================================================================
// Reconnect policy
// ============================================================================

mod reconnect {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unintended_disconnect_retries_after_delay() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();

        manager.connect();
        let server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        server.close(DisconnectReason::TransportClose);
        wait_for(&mut rx, |s| !s.is_connected).await;
        assert_eq!(manager.attempts(), 1);
        assert!(!manager.get_state().show_connection_error);

        let lost_at = Instant::now();
        let _server = transport.next_server().await;
        assert!(lost_at.elapsed() >= Duration::from_millis(2000));

        wait_for(&mut rx, |s| s.is_connected).await;
        assert_eq!(manager.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_disconnect_counts_as_failure() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();

        manager.connect();
        let server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        server.close(DisconnectReason::ServerDisconnect);
        wait_for(&mut rx, |s| !s.is_connected).await;
        assert_eq!(manager.attempts(), 1);

        let _server = transport.next_server().await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (manager, transport) = manager();
        transport.refuse_all(Some("connection refused"));
        let mut rx = manager.watch_state();

        manager.connect();
        wait_for(&mut rx, |s| s.show_connection_error).await;

        assert_eq!(transport.open_count(), 5);
        assert_eq!(manager.attempts(), 5);
        assert!(!manager.get_state().is_connected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.open_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_hidden_before_limit() {
        let (manager, transport) = manager();
        transport.fail_next(4, "connection refused");
        let mut rx = manager.watch_state();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _subscription = manager.subscribe(move |state| seen_clone.lock().unwrap().push(state));

        manager.connect();
        let _server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        assert_eq!(transport.open_count(), 5);
        assert!(seen.lock().unwrap().iter().all(|s| !s.show_connection_error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_resets_attempts() {
        let (manager, transport) = manager();
        transport.refuse_all(Some("connection refused"));
        let mut rx = manager.watch_state();

        manager.connect();
        wait_for(&mut rx, |s| s.show_connection_error).await;

        transport.refuse_all(None);
        let requested_at = Instant::now();
        manager.reconnect();

        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.get_state(), ConnectionState::default());

        let _server = transport.next_server().await;
        assert!(requested_at.elapsed() >= Duration::from_millis(500));
        wait_for(&mut rx, |s| s.is_connected).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_while_connected() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();

        manager.connect();
        let mut first = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        manager.reconnect();
        assert!(!manager.get_state().is_connected);
        assert_eq!(first.recv().await, Some(Outbound::Close));

        let _second = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_error_keeps_connection_down() {
        let (manager, transport) = manager();
        transport.refuse_all(Some("connection refused"));
        let mut rx = manager.watch_state();

        manager.connect();
        wait_for(&mut rx, |s| s.show_connection_error).await;

        manager.dismiss_error();
        assert_eq!(manager.get_state(), ConnectionState::default());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.open_count(), 5);
    }
}

// ============================================================================
// Events
// ============================================================================

mod events {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_emit_while_disconnected_is_noop() {
        let (manager, _transport) = manager();
        assert!(!manager.emit("req_handsign", json!({"landmarks": []})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_reaches_server() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();

        manager.connect();
        let mut server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        assert!(manager.emit("req_autocomp", json!({"text": "HEL"})));
        assert_eq!(
            server.recv().await,
            Some(Outbound::Event {
                name: "req_autocomp".to_string(),
                payload: json!({"text": "HEL"}),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handlers_run_in_registration_order() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        manager.on("res_handsign", move |_| first.lock().unwrap().push(1));
        let second = order.clone();
        let removed = manager.on("res_handsign", move |_| second.lock().unwrap().push(2));
        let third = order.clone();
        manager.on("res_handsign", move |_| third.lock().unwrap().push(3));
        assert!(manager.off("res_handsign", removed));
        assert!(!manager.off("res_handsign", removed));

        let mut stream = manager.listen("res_handsign");

        manager.connect();
        let server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        let payload = json!({"time": 1, "pred": "A", "prob": 0.93, "infer": 4});
        assert!(server.send_event("res_handsign", payload.clone()));
        assert_eq!(stream.recv().await, Some(payload));
        assert_eq!(*order.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_events_are_ignored() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();
        let mut stream = manager.listen("res_autocomp");

        manager.connect();
        let server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        server.send_event("connection_ack", json!({"message": "Connected", "sid": "abc"}));
        server.send_event("res_autocomp", json!({"suggestions": ["HELLO"]}));
        assert_eq!(
            stream.recv().await,
            Some(json!({"suggestions": ["HELLO"]}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_ack_is_recorded_per_connection() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();
        let mut stream = manager.listen("res_autocomp");

        manager.connect();
        let server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;
        assert_eq!(manager.acknowledgement(), None);

        server.send_event("connection_ack", json!({"message": "Connected", "sid": "abc"}));
        server.send_event("res_autocomp", json!({"suggestions": []}));
        stream.recv().await;
        assert_eq!(
            manager.acknowledgement(),
            Some(ConnectionAck {
                message: "Connected".to_string(),
                sid: "abc".to_string(),
            })
        );

        manager.disconnect();
        assert_eq!(manager.acknowledgement(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_may_call_back_into_manager() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let handle = manager.clone();
        let observed_clone = observed.clone();
        let _subscription = manager.subscribe(move |state| {
            // Must not deadlock: listeners run outside the state lock.
            observed_clone
                .lock()
                .unwrap()
                .push((state, handle.get_state()));
        });

        manager.connect();
        let _server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;

        let observed = observed.lock().unwrap();
        assert_eq!(observed.last(), Some(&(CONNECTED, CONNECTED)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_subscription_stops_notifications() {
        let (manager, transport) = manager();
        let mut rx = manager.watch_state();
        let count = Arc::new(Mutex::new(0));

        let count_clone = count.clone();
        let subscription = manager.subscribe(move |_| *count_clone.lock().unwrap() += 1);
        assert_eq!(*count.lock().unwrap(), 1);
        subscription.unsubscribe();

        manager.connect();
        let _server = transport.next_server().await;
        wait_for(&mut rx, |s| s.is_connected).await;
        assert_eq!(*count.lock().unwrap(), 1);
    }
}

// ============================================================================
// Notification ordering
// ============================================================================

mod notifications {
    use super::*;

    use handsign_socket::ReconnectPolicy;

    fn failing_once() -> (ConnectionManager, Arc<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport::new());
        transport.refuse_all(Some("connection refused"));
        let mut config = ConnectionConfig::new("http://localhost:8000");
        config.policy = ReconnectPolicy {
            max_attempts: 1,
            ..ReconnectPolicy::default()
        };
        let manager = ConnectionManager::new(config, transport.clone()).unwrap();
        (manager, transport)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_changes_end_on_latest_state() {
        let (manager, _transport) = failing_once();

        // Earlier listener that is slow to handle the error state
        let (reached_tx, reached_rx) = std::sync::mpsc::channel();
        let reached_tx = Mutex::new(Some(reached_tx));
        let _slow = manager.subscribe(move |state| {
            if state.show_connection_error {
                if let Some(tx) = reached_tx.lock().unwrap().take() {
                    tx.send(()).unwrap();
                    std::thread::sleep(Duration::from_millis(300));
                }
            }
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _recorder = manager.subscribe(move |state| seen_clone.lock().unwrap().push(state));

        manager.connect();
        tokio::task::spawn_blocking(move || reached_rx.recv())
            .await
            .unwrap()
            .expect("error state never delivered");

        // The error round is still running on another thread
        manager.dismiss_error();

        let seen = seen.lock().unwrap();
        assert_eq!(manager.get_state(), ConnectionState::default());
        assert_eq!(seen.last(), Some(&manager.get_state()));
        assert!(seen.iter().any(|s| s.show_connection_error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_made_by_a_listener_reaches_every_listener() {
        let (manager, _transport) = failing_once();
        let mut rx = manager.watch_state();

        let handle = manager.clone();
        let _dismisser = manager.subscribe(move |state| {
            if state.show_connection_error {
                handle.dismiss_error();
            }
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _recorder = manager.subscribe(move |state| seen_clone.lock().unwrap().push(state));

        manager.connect();
        let deadline = Instant::now() + Duration::from_secs(60);
        while !seen.lock().unwrap().iter().any(|s| s.show_connection_error) {
            assert!(Instant::now() < deadline, "error state never delivered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(manager.attempts(), 1);
        assert_eq!(manager.get_state(), ConnectionState::default());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::default());
        assert_eq!(seen.lock().unwrap().last(), Some(&ConnectionState::default()));
    }
}
