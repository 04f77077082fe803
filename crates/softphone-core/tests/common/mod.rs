//! Shared fixtures for the softphone-core integration tests
//!
//! `MockAdapter` records every request it receives and answers the ones that
//! conclude asynchronously (connect, register, ...) by emitting the matching
//! adapter event after a scripted latency, the way a real signaling stack
//! would.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use rvoip_softphone_core::{
    AdapterError, AdapterEvent, AdapterEventSink, AdapterFactory, AdapterResult, AnswerOptions, CallId,
    CallOptions, ClientConfig, ClientEvent, ClientResult, DtmfTone, EndCause, EventKind, MediaStreamHandle,
    OutboundCall, SignalingAdapter, SipClient, SipClientBuilder,
};

/// Install a log subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One request as seen by the adapter
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Initialize,
    Connect,
    Disconnect,
    Register,
    Unregister,
    Call { call_id: CallId, target: String },
    Answer(CallId),
    Hangup(CallId, EndCause),
    Hold(CallId),
    Resume(CallId),
    SetMuted(CallId, bool),
    Transfer(CallId, String),
    SendMessage { target: String, body: String },
    SendDtmf(CallId, DtmfTone),
    Subscribe { target: String, event: String },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Initialize => "initialize",
            Request::Connect => "connect",
            Request::Disconnect => "disconnect",
            Request::Register => "register",
            Request::Unregister => "unregister",
            Request::Call { .. } => "call",
            Request::Answer(_) => "answer",
            Request::Hangup(..) => "hangup",
            Request::Hold(_) => "hold",
            Request::Resume(_) => "resume",
            Request::SetMuted(..) => "set_muted",
            Request::Transfer(..) => "transfer",
            Request::SendMessage { .. } => "send_message",
            Request::SendDtmf(..) => "send_dtmf",
            Request::Subscribe { .. } => "subscribe",
        }
    }
}

/// How the remote side answers a request that concludes through an event
#[derive(Debug, Clone)]
pub enum Reply {
    Confirm,
    Reject { status: Option<u16>, reason: String },
    /// Never answer
    Silent,
}

impl Reply {
    pub fn reject(status: u16, reason: &str) -> Self {
        Reply::Reject {
            status: Some(status),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Script {
    pub connect: Reply,
    pub disconnect: Reply,
    pub register: Reply,
    pub unregister: Reply,
    /// Delay before any scripted event
    pub latency: Duration,
    pub register_latency: Option<Duration>,
    pub unregister_latency: Option<Duration>,
    /// Granted binding lifetime
    pub expires: u32,
    /// Remote side answers outbound calls after `latency`
    pub auto_answer: bool,
    /// Time the stack takes to play one tone
    pub dtmf_playout: Duration,
    /// Requests (by name) that fail immediately
    pub failing: Vec<&'static str>,
    /// Requests (by name) that are recorded but whose future never resolves
    pub hanging: Vec<&'static str>,
    pub presence: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect: Reply::Confirm,
            disconnect: Reply::Confirm,
            register: Reply::Confirm,
            unregister: Reply::Confirm,
            latency: Duration::from_millis(10),
            register_latency: None,
            unregister_latency: None,
            expires: 3600,
            auto_answer: false,
            dtmf_playout: Duration::from_millis(100),
            failing: Vec::new(),
            hanging: Vec::new(),
            presence: false,
        }
    }
}

#[derive(Default)]
struct MockState {
    sink: Option<AdapterEventSink>,
    requests: Vec<Request>,
    script: Script,
}

/// Scripted signaling stack
#[derive(Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    pub fn new(script: Script) -> Self {
        let adapter = Self::default();
        adapter.state.lock().script = script;
        adapter
    }

    pub fn factory(&self) -> impl AdapterFactory + 'static {
        let adapter = self.clone();
        move |_: &ClientConfig| -> ClientResult<Box<dyn SignalingAdapter>> { Ok(Box::new(adapter.clone())) }
    }

    /// Change the script of a running adapter
    pub fn script(&self, change: impl FnOnce(&mut Script)) {
        change(&mut self.state.lock().script);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().requests.clone()
    }

    /// Number of requests with the given name
    pub fn count(&self, name: &str) -> usize {
        self.state.lock().requests.iter().filter(|r| r.name() == name).count()
    }

    /// Deliver an event right now, as if the stack reported it
    pub fn emit(&self, event: AdapterEvent) {
        let sink = self.state.lock().sink.clone();
        match sink {
            Some(sink) => sink.emit(event),
            None => panic!("adapter not initialized, cannot emit {}", event.name()),
        }
    }

    /// Deliver an event from the stack's own task after `delay`
    pub fn emit_later(&self, delay: Duration, event: AdapterEvent) {
        let adapter = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            adapter.emit(event);
        });
    }

    fn record(&self, request: Request) -> AdapterResult<Script> {
        let mut state = self.state.lock();
        let name = request.name();
        state.requests.push(request);
        if state.script.failing.contains(&name) {
            return Err(AdapterError::Transport(format!("scripted {name} failure")));
        }
        Ok(state.script.clone())
    }

    /// Record the request, then stall forever if the script says so
    async fn accept(&self, request: Request) -> AdapterResult<Script> {
        let name = request.name();
        let script = self.record(request)?;
        if script.hanging.contains(&name) {
            std::future::pending::<()>().await;
        }
        Ok(script)
    }

    fn answer_with(
        &self,
        reply: &Reply,
        delay: Duration,
        confirmed: AdapterEvent,
        rejected: impl FnOnce(Option<u16>, String) -> AdapterEvent,
    ) {
        match reply {
            Reply::Confirm => self.emit_later(delay, confirmed),
            Reply::Reject { status, reason } => self.emit_later(delay, rejected(*status, reason.clone())),
            Reply::Silent => {}
        }
    }
}

#[async_trait]
impl SignalingAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn initialize(&self, _config: &ClientConfig, sink: AdapterEventSink) -> AdapterResult<()> {
        self.accept(Request::Initialize).await?;
        self.state.lock().sink = Some(sink);
        Ok(())
    }

    async fn connect(&self) -> AdapterResult<()> {
        let script = self.accept(Request::Connect).await?;
        self.answer_with(&script.connect, script.latency, AdapterEvent::Connected, |_, reason| {
            AdapterEvent::ConnectionFailed { reason }
        });
        Ok(())
    }

    async fn disconnect(&self) -> AdapterResult<()> {
        let script = self.accept(Request::Disconnect).await?;
        self.answer_with(
            &script.disconnect,
            script.latency,
            AdapterEvent::Disconnected { reason: None },
            |_, reason| AdapterEvent::Disconnected { reason: Some(reason) },
        );
        Ok(())
    }

    async fn register(&self) -> AdapterResult<()> {
        let script = self.accept(Request::Register).await?;
        self.answer_with(
            &script.register,
            script.register_latency.unwrap_or(script.latency),
            AdapterEvent::Registered {
                expires: script.expires,
            },
            |status, reason| AdapterEvent::RegistrationFailed { status, reason },
        );
        Ok(())
    }

    async fn unregister(&self) -> AdapterResult<()> {
        let script = self.accept(Request::Unregister).await?;
        self.answer_with(
            &script.unregister,
            script.unregister_latency.unwrap_or(script.latency),
            AdapterEvent::Unregistered,
            |status, reason| AdapterEvent::RegistrationFailed { status, reason },
        );
        Ok(())
    }

    async fn call(&self, call_id: &CallId, target: &str, _options: &CallOptions) -> AdapterResult<OutboundCall> {
        let script = self.record(Request::Call {
            call_id: *call_id,
            target: target.to_string(),
        })?;
        if script.auto_answer {
            self.emit_later(
                script.latency,
                AdapterEvent::CallAccepted {
                    call_id: *call_id,
                    remote_stream: Some(MediaStreamHandle(format!("remote-{call_id}"))),
                },
            );
        }
        Ok(OutboundCall {
            local_stream: Some(MediaStreamHandle(format!("local-{call_id}"))),
        })
    }

    async fn answer(&self, call_id: &CallId, _options: &AnswerOptions) -> AdapterResult<()> {
        self.record(Request::Answer(*call_id)).map(|_| ())
    }

    async fn hangup(&self, call_id: &CallId, cause: EndCause) -> AdapterResult<()> {
        self.record(Request::Hangup(*call_id, cause)).map(|_| ())
    }

    async fn hold(&self, call_id: &CallId) -> AdapterResult<()> {
        self.record(Request::Hold(*call_id)).map(|_| ())
    }

    async fn resume(&self, call_id: &CallId) -> AdapterResult<()> {
        self.record(Request::Resume(*call_id)).map(|_| ())
    }

    async fn set_muted(&self, call_id: &CallId, muted: bool) -> AdapterResult<()> {
        self.record(Request::SetMuted(*call_id, muted)).map(|_| ())
    }

    async fn transfer(&self, call_id: &CallId, target: &str) -> AdapterResult<()> {
        self.record(Request::Transfer(*call_id, target.to_string())).map(|_| ())
    }

    async fn send_message(&self, target: &str, body: &str) -> AdapterResult<()> {
        self.record(Request::SendMessage {
            target: target.to_string(),
            body: body.to_string(),
        })
        .map(|_| ())
    }

    async fn send_dtmf(&self, call_id: &CallId, tone: DtmfTone, _duration: Duration) -> AdapterResult<()> {
        let script = self.record(Request::SendDtmf(*call_id, tone))?;
        tokio::time::sleep(script.dtmf_playout).await;
        Ok(())
    }

    async fn subscribe(&self, target: &str, event: &str) -> AdapterResult<()> {
        let script = self.record(Request::Subscribe {
            target: target.to_string(),
            event: event.to_string(),
        })?;
        if script.presence {
            Ok(())
        } else {
            Err(AdapterError::not_supported(
                format!("subscribe:{event}"),
                Some("poll the directory instead"),
            ))
        }
    }
}

/// Configuration every test starts from
pub fn config() -> ClientConfig {
    ClientConfig::new("wss://sip.example.com:7443", "sip:alice@example.com").with_credentials("alice", "secret")
}

/// Client bound to a fresh mock
pub fn client(config: ClientConfig, script: Script) -> (SipClient, MockAdapter) {
    init_tracing();
    let adapter = MockAdapter::new(script);
    let client = SipClientBuilder::new(config)
        .adapter(adapter.factory())
        .build()
        .expect("client builds");
    (client, adapter)
}

/// Collects every event published on a client's bus
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl Recorder {
    pub fn attach(client: &SipClient) -> Self {
        let recorder = Self::default();
        let events = recorder.events.clone();
        client.events().subscribe_all(move |event| events.lock().push(event.clone()));
        recorder
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(ClientEvent::kind).collect()
    }

    /// Kinds within one namespace (`connection`, `registration`, ...)
    pub fn kinds_in(&self, namespace: &str) -> Vec<EventKind> {
        self.kinds().into_iter().filter(|k| k.namespace() == namespace).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Connected client with an outbound call that the remote side answered
pub async fn active_call(client: &SipClient, adapter: &MockAdapter, target: &str) -> CallId {
    let call = client.call(target, CallOptions::default()).await.expect("call placed");
    adapter.emit(AdapterEvent::CallAccepted {
        call_id: call.id(),
        remote_stream: None,
    });
    call.id()
}
