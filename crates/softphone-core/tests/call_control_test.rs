//! Per-call control: progress, hold/resume, mute, transfer, hangup

mod common;

use common::{active_call, client, config, Recorder, Request, Script};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

use rvoip_softphone_core::{
    AdapterEvent, CallId, CallOptions, CallState, ClientError, ClientEvent, EndCause, EventKind, MediaStreamHandle,
};

#[tokio::test(start_paused = true)]
async fn outbound_call_follows_adapter_events() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);
    let recorder = Recorder::attach(&client);

    let call = assert_ok!(client.call("sip:bob@example.com", CallOptions::default()).await);
    let call_id = call.id();
    assert_eq!(call.state(), CallState::Trying);
    assert_eq!(
        call.info().and_then(|i| i.local_stream),
        Some(MediaStreamHandle(format!("local-{call_id}")))
    );

    adapter.emit(AdapterEvent::CallProgress { call_id, status: 180 });
    assert_eq!(call.state(), CallState::Ringing);

    adapter.emit(AdapterEvent::CallAccepted {
        call_id,
        remote_stream: Some(MediaStreamHandle("remote-1".into())),
    });
    assert_eq!(call.state(), CallState::Active);
    assert_eq!(
        call.info().and_then(|i| i.remote_stream),
        Some(MediaStreamHandle("remote-1".into()))
    );

    assert_eq!(
        recorder.kinds(),
        [
            EventKind::CallOutgoing,
            EventKind::LineActivated,
            EventKind::CallProgress,
            EventKind::CallAccepted,
        ]
    );
    assert!(recorder.events().contains(&ClientEvent::CallProgress {
        call_id,
        status: 180,
        state: CallState::Ringing,
    }));
}

#[tokio::test(start_paused = true)]
async fn remote_status_codes_map_onto_end_causes() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);

    for (status, cause) in [
        (Some(486), EndCause::Busy),
        (Some(603), EndCause::Rejected),
        (Some(408), EndCause::Timeout),
        (Some(503), EndCause::NetworkError),
        (None, EndCause::Normal),
    ] {
        let call = assert_ok!(client.call("sip:bob@example.com", CallOptions::default()).await);
        adapter.emit(AdapterEvent::CallEnded {
            call_id: call.id(),
            status,
            reason: None,
        });
        assert_eq!(call.info().and_then(|i| i.end_cause), Some(cause), "status {status:?}");
        // Let the drain window free the line for the next iteration.
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn hold_on_a_held_call_emits_nothing() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);
    let call_id = active_call(&client, &adapter, "sip:bob@example.com").await;
    let recorder = Recorder::attach(&client);

    assert_ok!(client.hold(call_id).await);
    assert_eq!(client.call_info(call_id).map(|i| i.state), Some(CallState::OnHold));
    assert_ok!(client.hold(call_id).await);

    assert_eq!(recorder.count(EventKind::CallHeld), 1);
    assert_eq!(adapter.count("hold"), 1);

    assert_ok!(client.resume(call_id).await);
    assert_ok!(client.resume(call_id).await);
    assert_eq!(client.call_info(call_id).map(|i| i.state), Some(CallState::Active));
    assert_eq!(recorder.count(EventKind::CallResumed), 1);
    assert_eq!(adapter.count("resume"), 1);
}

#[tokio::test(start_paused = true)]
async fn hold_requires_an_answered_call() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);
    let call = assert_ok!(client.call("sip:bob@example.com", CallOptions::default()).await);

    let err = assert_err!(call.hold().await);
    assert!(matches!(err, ClientError::InvalidState { operation: "hold", .. }), "unexpected {err:?}");
    assert_eq!(adapter.count("hold"), 0);
}

#[tokio::test(start_paused = true)]
async fn mute_is_independent_of_hold() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);
    let call_id = active_call(&client, &adapter, "sip:bob@example.com").await;
    let recorder = Recorder::attach(&client);

    assert_ok!(client.mute(call_id).await);
    assert_ok!(client.mute(call_id).await);
    let info = client.call_info(call_id).expect("call present");
    assert!(info.muted);
    assert_eq!(info.state, CallState::Active);
    assert_eq!(recorder.count(EventKind::CallMuted), 1);
    assert_eq!(adapter.requests().last(), Some(&Request::SetMuted(call_id, true)));

    assert_ok!(client.unmute(call_id).await);
    assert_eq!(recorder.count(EventKind::CallUnmuted), 1);

    assert_ok!(client.hold(call_id).await);
    assert!(matches!(client.mute(call_id).await, Err(ClientError::InvalidState { .. })));
}

#[tokio::test(start_paused = true)]
async fn successful_transfer_returns_to_active() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);
    let call_id = active_call(&client, &adapter, "sip:bob@example.com").await;
    let recorder = Recorder::attach(&client);

    assert_ok!(client.transfer(call_id, "sip:carol@example.com").await);

    assert_eq!(client.call_info(call_id).map(|i| i.state), Some(CallState::Active));
    assert!(adapter
        .requests()
        .contains(&Request::Transfer(call_id, "sip:carol@example.com".into())));
    assert_eq!(
        recorder.kinds(),
        [EventKind::CallTransferring, EventKind::CallTransferred]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_transfer_terminates_the_call() {
    let script = Script {
        failing: vec!["transfer"],
        ..Script::default()
    };
    let (client, adapter) = client(config(), script);
    assert_ok!(client.start().await);
    let call_id = active_call(&client, &adapter, "sip:bob@example.com").await;
    let recorder = Recorder::attach(&client);

    let err = assert_err!(client.transfer(call_id, "sip:carol@example.com").await);
    assert!(matches!(err, ClientError::Adapter { operation: "transfer", .. }), "unexpected {err:?}");

    let info = client.call_info(call_id).expect("drain window keeps the session");
    assert_eq!(info.state, CallState::Terminated);
    assert_eq!(info.end_cause, Some(EndCause::NetworkError));
    assert_eq!(
        recorder.kinds(),
        [
            EventKind::CallTransferring,
            EventKind::CallTransferFailed,
            EventKind::CallEnded,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_call_setup_leaves_no_trace() {
    let script = Script {
        failing: vec!["call"],
        ..Script::default()
    };
    let (client, _adapter) = client(config(), script);
    assert_ok!(client.start().await);
    let recorder = Recorder::attach(&client);

    let err = assert_err!(client.call("sip:bob@example.com", CallOptions::default()).await);
    assert!(matches!(err, ClientError::Adapter { operation: "call", .. }), "unexpected {err:?}");
    assert!(client.calls().is_empty());
    assert!(client.active_line().is_none());
    assert!(recorder.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn calls_need_a_connection_and_a_target() {
    let (client, adapter) = client(config(), Script::default());
    let err = assert_err!(client.call("sip:bob@example.com", CallOptions::default()).await);
    assert!(matches!(err, ClientError::InvalidState { operation: "call", .. }));

    assert_ok!(client.start().await);
    let err = assert_err!(client.call("  ", CallOptions::default()).await);
    assert!(matches!(err, ClientError::InvalidConfiguration { .. }));
    assert_eq!(adapter.count("call"), 0);
}

#[tokio::test(start_paused = true)]
async fn handles_report_purged_calls() {
    let (client, adapter) = client(config(), Script::default());
    assert_ok!(client.start().await);
    let call_id = active_call(&client, &adapter, "sip:bob@example.com").await;
    let handle = assert_ok!(client.call_handle(call_id));

    assert_ok!(handle.hangup().await);
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(handle.state(), CallState::Terminated);
    assert!(handle.info().is_none());
    assert!(matches!(handle.hold().await, Err(ClientError::NotFound { .. })));
    assert!(matches!(handle.hangup().await, Err(ClientError::NotFound { .. })));
    assert!(matches!(client.call_handle(call_id), Err(ClientError::NotFound { .. })));
    assert!(matches!(client.hangup(CallId::new()).await, Err(ClientError::NotFound { .. })));
}
