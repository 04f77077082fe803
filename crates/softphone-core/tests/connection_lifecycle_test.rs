//! Connection lifecycle: start/stop sequencing, failures and unsolicited drops

mod common;

use common::{active_call, client, config, Recorder, Reply, Request, Script};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use rvoip_softphone_core::{
    AdapterEvent, CallState, ClientError, ClientEvent, ConnectionState, EndCause, EventKind, RegistrationState,
};

#[tokio::test(start_paused = true)]
async fn start_and_stop_pass_through_transitional_states() {
    let (client, adapter) = client(config().with_auto_register(false), Script::default());
    let recorder = Recorder::attach(&client);

    for _ in 0..3 {
        assert_ok!(client.start().await);
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_ok!(client.stop().await);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    let cycle = [
        EventKind::ConnectionConnecting,
        EventKind::ConnectionConnected,
        EventKind::ConnectionDisconnecting,
        EventKind::ConnectionDisconnected,
    ];
    assert_eq!(recorder.kinds_in("connection"), cycle.repeat(3));
    // The adapter is bound once per client.
    assert_eq!(adapter.count("initialize"), 1);
    assert_eq!(adapter.count("connect"), 3);
}

#[tokio::test(start_paused = true)]
async fn start_while_connected_is_a_no_op() {
    let (client, adapter) = client(config().with_auto_register(false), Script::default());
    assert_ok!(client.start().await);
    assert_ok!(client.start().await);
    assert_eq!(adapter.count("connect"), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_start_is_rejected() {
    let script = Script {
        latency: Duration::from_millis(300),
        ..Script::default()
    };
    let (client, adapter) = client(config().with_auto_register(false), script);

    let (first, second) = tokio::join!(client.start(), client.start());
    assert_ok!(first);
    assert!(matches!(second, Err(ClientError::AlreadyInProgress { operation: "start" })));
    assert_eq!(adapter.count("connect"), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_connection_returns_to_disconnected() {
    let script = Script {
        connect: Reply::reject(503, "service unavailable"),
        ..Script::default()
    };
    let (client, adapter) = client(config(), script);
    let recorder = Recorder::attach(&client);

    let err = assert_err!(client.start().await);
    assert!(matches!(err, ClientError::Connection { .. }), "unexpected {err:?}");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        recorder.kinds_in("connection"),
        [EventKind::ConnectionConnecting, EventKind::ConnectionFailed]
    );
    // No registration is attempted on a failed connection.
    assert_eq!(adapter.count("register"), 0);

    adapter.script(|s| s.connect = Reply::Confirm);
    assert_ok!(client.start().await);
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn connect_request_failure_carries_the_adapter_error() {
    let script = Script {
        failing: vec!["connect"],
        ..Script::default()
    };
    let (client, _adapter) = client(config(), script);

    let err = assert_err!(client.start().await);
    assert!(matches!(err, ClientError::Connection { .. }));
    assert!(err.adapter_error().is_some());
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out_and_late_confirmation_is_ignored() {
    let script = Script {
        connect: Reply::Silent,
        ..Script::default()
    };
    let (client, adapter) = client(config(), script);
    let recorder = Recorder::attach(&client);

    let started = Instant::now();
    let err = assert_err!(client.start().await);
    assert!(matches!(err, ClientError::ConnectionTimeout { .. }), "unexpected {err:?}");
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    adapter.emit(AdapterEvent::Connected);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(recorder.count(EventKind::ConnectionConnected), 0);
    assert_eq!(recorder.count(EventKind::ConnectionFailed), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_when_disconnected_does_nothing() {
    let (client, adapter) = client(config(), Script::default());
    let recorder = Recorder::attach(&client);
    assert_ok!(client.stop().await);
    assert!(recorder.events().is_empty());
    assert!(adapter.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_hangs_up_live_calls_and_unregisters() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);
    let call_id = active_call(&client, &adapter, "sip:bob@example.com").await;
    let recorder = Recorder::attach(&client);

    assert_ok!(client.stop().await);

    assert!(adapter.requests().contains(&Request::Hangup(call_id, EndCause::Normal)));
    assert_eq!(adapter.count("unregister"), 1);
    let info = client.call_info(call_id).expect("still within the drain window");
    assert_eq!(info.state, CallState::Terminated);
    assert_eq!(
        recorder.kinds(),
        [
            EventKind::ConnectionDisconnecting,
            EventKind::CallEnded,
            EventKind::RegistrationUnregistering,
            EventKind::RegistrationUnregistered,
            EventKind::ConnectionDisconnected,
        ]
    );
    assert_eq!(client.registration().state, RegistrationState::Unregistered);
}

#[tokio::test(start_paused = true)]
async fn unsolicited_disconnect_ends_calls_and_binding() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);
    let call_id = active_call(&client, &adapter, "sip:bob@example.com").await;
    let recorder = Recorder::attach(&client);

    adapter.emit(AdapterEvent::Disconnected {
        reason: Some("network down".into()),
    });

    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(client.registration().state, RegistrationState::Unregistered);
    assert_eq!(
        recorder.kinds(),
        [
            EventKind::ConnectionDisconnecting,
            EventKind::CallEnded,
            EventKind::RegistrationUnregistered,
            EventKind::ConnectionDisconnected,
        ]
    );
    let ended = recorder
        .events()
        .into_iter()
        .find_map(|e| match e {
            ClientEvent::CallEnded { cause, .. } => Some(cause),
            _ => None,
        });
    assert_eq!(ended, Some(EndCause::NetworkError));
    assert!(matches!(
        recorder.events().last(),
        Some(ClientEvent::ConnectionDisconnected { reason: Some(reason) }) if reason == "network down"
    ));
    // No request was sent for a connection that is already gone.
    assert!(!adapter.requests().contains(&Request::Hangup(call_id, EndCause::NetworkError)));

    // The client can come back.
    assert_ok!(client.start().await);
    assert!(client.is_registered());
    assert_eq!(adapter.count("initialize"), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_completes_when_the_adapter_stalls() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);
    assert!(client.is_registered());
    adapter.script(|s| s.hanging = vec!["unregister", "disconnect"]);
    let recorder = Recorder::attach(&client);

    let started = Instant::now();
    let stopped = tokio::time::timeout(Duration::from_secs(60), client.stop())
        .await
        .expect("stop finishes on its own");
    assert_ok!(stopped);

    // Bounded by the unregister (10 s) and disconnect (5 s) timeouts.
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(client.registration().state, RegistrationState::Unregistered);
    assert_eq!(
        recorder.kinds_in("connection"),
        [EventKind::ConnectionDisconnecting, EventKind::ConnectionDisconnected]
    );
    assert_eq!(adapter.count("unregister"), 1);
    assert_eq!(adapter.count("disconnect"), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_connect_request_times_out() {
    let script = Script {
        hanging: vec!["connect"],
        ..Script::default()
    };
    let (client, adapter) = client(config(), script);
    let recorder = Recorder::attach(&client);

    let err = assert_err!(client.start().await);
    assert!(matches!(err, ClientError::ConnectionTimeout { .. }), "unexpected {err:?}");
    assert!(err.elapsed() >= Duration::from_secs(10));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        recorder.kinds_in("connection"),
        [EventKind::ConnectionConnecting, EventKind::ConnectionFailed]
    );

    // The Connect slot was released with the timeout.
    adapter.script(|s| s.hanging.clear());
    assert_ok!(client.start().await);
    assert!(client.is_registered());
}

#[tokio::test(start_paused = true)]
async fn stalled_adapter_initialization_times_out() {
    let script = Script {
        hanging: vec!["initialize"],
        ..Script::default()
    };
    let (client, adapter) = client(config().with_auto_register(false), script);

    let err = assert_err!(client.start().await);
    assert!(matches!(err, ClientError::ConnectionTimeout { .. }), "unexpected {err:?}");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(adapter.count("connect"), 0);

    adapter.script(|s| s.hanging.clear());
    assert_ok!(client.start().await);
    assert_eq!(adapter.count("initialize"), 2);
}

#[tokio::test(start_paused = true)]
async fn start_during_a_pending_registration_reports_start() {
    let script = Script {
        register_latency: Some(Duration::from_secs(1)),
        ..Script::default()
    };
    let (client, adapter) = client(config(), script);

    let starting = client.clone();
    let first = tokio::spawn(async move { starting.start().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(client.registration().state, RegistrationState::Registering);

    let err = assert_err!(client.start().await);
    assert!(matches!(err, ClientError::AlreadyInProgress { operation: "start" }), "unexpected {err:?}");

    assert_ok!(first.await.expect("start task"));
    assert!(client.is_registered());
    assert_eq!(adapter.count("register"), 1);
}
