//! Softphone client orchestrator
//!
//! [`SipClient`] is the only component host applications call directly. It
//! owns the adapter, the event bus, the line manager and the pending operation
//! table, and runs the connection × registration state machine:
//!
//! ```text
//! Disconnected ──start()──► Connecting ──connection:connected──► Connected
//!      ▲                                                             │
//!      └──────── connection:disconnected ◄── Disconnecting ◄─stop()──┘
//!
//! Unregistered ──register()──► Registering ──registration:registered──► Registered
//!      ▲                             │ failed / timeout                   │
//!      │                             ▼                                    │
//!      └──── registration:unregistered ◄── Unregistering ◄─unregister()───┘
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use rvoip_softphone_core::{ClientConfig, SipClientBuilder, SignalingAdapter, ClientResult};
//! # fn my_adapter() -> Box<dyn SignalingAdapter> { unimplemented!() }
//!
//! # async fn example() -> ClientResult<()> {
//! let config = ClientConfig::new("wss://sip.example.com:7443", "sip:alice@example.com")
//!     .with_credentials("alice", "secret");
//! let client = SipClientBuilder::new(config)
//!     .adapter(|_: &ClientConfig| -> ClientResult<Box<dyn SignalingAdapter>> { Ok(my_adapter()) })
//!     .build()?;
//!
//! client.start().await?;
//! let call = client.call("sip:bob@example.com", Default::default()).await?;
//! call.hold().await?;
//! call.resume().await?;
//! call.send_dtmf("1234#")?;
//! call.hangup().await?;
//! client.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
mod calls;
pub mod config;
mod connection;
mod events;
mod registration;
pub mod types;

pub use builder::SipClientBuilder;
pub use types::{ClientStats, ConnectionState};

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use tokio::time::Instant;

use crate::adapter::SignalingAdapter;
use crate::call::{AnswerOptions, CallHandle, CallId, CallInfo, CallOptions};
use crate::error::{AdapterResult, ClientError, ClientResult};
use crate::event_bus::EventBus;
use crate::lines::MultiLineManager;
use crate::pending::PendingOperations;
use crate::registration::{RegistrationInfo, RegistrationState};
use crate::timeout::{with_timeout, TimeoutKind};
use config::ClientConfig;
use types::Counters;

/// Mutable orchestrator state, guarded by one short-lived lock
#[derive(Debug)]
pub(crate) struct CoreState {
    pub connection: ConnectionState,
    pub registration: RegistrationInfo,
    pub counters: Counters,
}

impl Default for CoreState {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            registration: RegistrationInfo::default(),
            counters: Counters::default(),
        }
    }
}

/// Shared orchestrator internals
pub(crate) struct ClientInner {
    pub(crate) config: ClientConfig,
    pub(crate) adapter: Arc<dyn SignalingAdapter>,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) lines: Arc<MultiLineManager>,
    pub(crate) pending: PendingOperations,
    pub(crate) state: Mutex<CoreState>,
    pub(crate) adapter_initialized: AtomicBool,
}

impl std::fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ClientInner")
            .field("adapter", &self.adapter.name())
            .field("connection", &state.connection)
            .field("registration", &state.registration.state)
            .field("pending", &self.pending)
            .finish()
    }
}

impl ClientInner {
    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    /// Fail unless the connection is up
    pub(crate) fn require_connected(&self, operation: &'static str) -> ClientResult<()> {
        match self.connection_state() {
            ConnectionState::Connected => Ok(()),
            other => Err(ClientError::invalid_state(operation, other, "Connected")),
        }
    }

    /// One adapter round-trip bounded by the request timeout
    pub(crate) async fn request<T, F>(&self, operation: &'static str, future: F) -> ClientResult<T>
    where
        F: Future<Output = AdapterResult<T>>,
    {
        let started = Instant::now();
        with_timeout(operation, self.config.timeouts.request(), TimeoutKind::Request, async {
            future
                .await
                .map_err(|e| ClientError::from_adapter(operation, started.elapsed(), e))
        })
        .await
    }

    pub(crate) fn stats(&self) -> ClientStats {
        let (connection, registration, counters) = {
            let state = self.state.lock();
            (state.connection, state.registration.state, state.counters.clone())
        };
        ClientStats {
            connection,
            registration,
            live_calls: self.lines.live_count(),
            lines_in_use: self.lines.len(),
            max_lines: self.lines.max_lines(),
            total_calls: self.lines.total_created(),
            calls_placed: counters.calls_placed,
            calls_received: counters.calls_received,
            calls_rejected: counters.calls_rejected,
            messages_sent: counters.messages_sent,
            messages_received: counters.messages_received,
            pending_operations: self.pending.len(),
        }
    }
}

/// Softphone client
///
/// Cheap to clone; every clone drives the same orchestrator.
#[derive(Clone, Debug)]
pub struct SipClient {
    inner: Arc<ClientInner>,
}

/// Non-owning reference to a [`SipClient`], for observers
#[derive(Clone, Debug)]
pub struct WeakSipClient {
    inner: Weak<ClientInner>,
}

impl WeakSipClient {
    pub fn upgrade(&self) -> Option<SipClient> {
        self.inner.upgrade().map(|inner| SipClient { inner })
    }
}

impl SipClient {
    pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    // ===== LIFECYCLE =====

    /// Connect to the signaling server, registering afterwards when
    /// `registration.auto_register` is set
    pub async fn start(&self) -> ClientResult<()> {
        self.inner.start().await
    }

    /// Tear everything down: pending operations are cancelled, live calls are
    /// hung up, the binding is removed and the connection closed
    pub async fn stop(&self) -> ClientResult<()> {
        self.inner.stop().await
    }

    pub async fn register(&self) -> ClientResult<()> {
        self.inner.register().await
    }

    pub async fn unregister(&self) -> ClientResult<()> {
        self.inner.unregister().await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    pub fn registration(&self) -> RegistrationInfo {
        self.inner.state.lock().registration.clone()
    }

    pub fn is_registered(&self) -> bool {
        self.inner.state.lock().registration.state == RegistrationState::Registered
    }

    // ===== CALLS =====

    /// Place an outbound call; the returned handle starts in `Trying`
    pub async fn call(&self, target: &str, options: CallOptions) -> ClientResult<CallHandle> {
        let call_id = self.inner.call(target, options).await?;
        Ok(CallHandle::new(self.clone(), call_id))
    }

    /// Handle for a call that is still held by the line manager
    pub fn call_handle(&self, call_id: CallId) -> ClientResult<CallHandle> {
        if self.inner.lines.contains(&call_id) {
            Ok(CallHandle::new(self.clone(), call_id))
        } else {
            Err(ClientError::not_found("call_handle", call_id))
        }
    }

    pub async fn answer(&self, call_id: CallId, options: AnswerOptions) -> ClientResult<()> {
        self.inner.answer(call_id, options).await
    }

    pub async fn hangup(&self, call_id: CallId) -> ClientResult<()> {
        self.inner.hangup(call_id).await
    }

    pub async fn hold(&self, call_id: CallId) -> ClientResult<()> {
        self.inner.hold(call_id).await
    }

    pub async fn resume(&self, call_id: CallId) -> ClientResult<()> {
        self.inner.resume(call_id).await
    }

    pub async fn mute(&self, call_id: CallId) -> ClientResult<()> {
        self.inner.set_muted(call_id, true).await
    }

    pub async fn unmute(&self, call_id: CallId) -> ClientResult<()> {
        self.inner.set_muted(call_id, false).await
    }

    pub async fn transfer(&self, call_id: CallId, target: &str) -> ClientResult<()> {
        self.inner.transfer(call_id, target).await
    }

    /// Queue DTMF tones on an active call; returns the number queued
    pub fn send_dtmf(&self, call_id: CallId, digits: &str) -> ClientResult<usize> {
        self.inner.send_dtmf(call_id, digits)
    }

    /// Discard queued tones; returns the number discarded
    pub fn clear_dtmf(&self, call_id: CallId) -> ClientResult<usize> {
        self.inner.clear_dtmf(call_id)
    }

    // ===== LINES =====

    pub fn set_active_line(&self, call_id: CallId) -> ClientResult<()> {
        self.inner.lines.set_active(&call_id)
    }

    pub fn active_line(&self) -> Option<CallId> {
        self.inner.lines.active_line()
    }

    pub fn call_info(&self, call_id: CallId) -> Option<CallInfo> {
        self.inner.lines.info(&call_id)
    }

    /// Every session held, in line order
    pub fn calls(&self) -> Vec<CallInfo> {
        self.inner.lines.calls()
    }

    // ===== MESSAGING & PRESENCE =====

    pub async fn send_message(&self, target: &str, body: &str) -> ClientResult<()> {
        self.inner.send_message(target, body).await
    }

    /// Subscribe to an event package of `target`, e.g. presence
    pub async fn subscribe(&self, target: &str, event: &str) -> ClientResult<()> {
        self.inner.subscribe(target, event).await
    }

    // ===== OBSERVATION =====

    pub fn stats(&self) -> ClientStats {
        self.inner.stats()
    }

    /// Event bus carrying every [`ClientEvent`](crate::events::ClientEvent)
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn adapter_name(&self) -> &str {
        self.inner.adapter.name()
    }

    pub fn downgrade(&self) -> WeakSipClient {
        WeakSipClient {
            inner: Arc::downgrade(&self.inner),
        }
    }
}
