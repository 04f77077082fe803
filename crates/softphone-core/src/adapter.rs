//! Signaling adapter boundary
//!
//! The core never speaks a wire protocol. A [`SignalingAdapter`] translates the
//! abstract operations below into a concrete signaling stack and reports what
//! happens on the wire back through an [`AdapterEventSink`] as
//! [`AdapterEvent`]s. Those events are the only source of truth for
//! connection and registration state; the core never polls the adapter.
//!
//! # Implementing an adapter
//!
//! ```rust
//! use async_trait::async_trait;
//! use rvoip_softphone_core::adapter::{AdapterEvent, AdapterEventSink, OutboundCall, SignalingAdapter};
//! use rvoip_softphone_core::call::{AnswerOptions, CallId, CallOptions, EndCause};
//! use rvoip_softphone_core::client::config::ClientConfig;
//! use rvoip_softphone_core::dtmf::DtmfTone;
//! use rvoip_softphone_core::AdapterResult;
//! use parking_lot::Mutex;
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct LoopbackAdapter {
//!     sink: Mutex<Option<AdapterEventSink>>,
//! }
//!
//! impl LoopbackAdapter {
//!     fn emit(&self, event: AdapterEvent) {
//!         if let Some(sink) = self.sink.lock().clone() {
//!             sink.emit(event);
//!         }
//!     }
//! }
//!
//! #[async_trait]
//! impl SignalingAdapter for LoopbackAdapter {
//!     fn name(&self) -> &str { "loopback" }
//!     async fn initialize(&self, _config: &ClientConfig, sink: AdapterEventSink) -> AdapterResult<()> {
//!         *self.sink.lock() = Some(sink);
//!         Ok(())
//!     }
//!     async fn connect(&self) -> AdapterResult<()> {
//!         self.emit(AdapterEvent::Connected);
//!         Ok(())
//!     }
//!     async fn disconnect(&self) -> AdapterResult<()> {
//!         self.emit(AdapterEvent::Disconnected { reason: None });
//!         Ok(())
//!     }
//!     async fn register(&self) -> AdapterResult<()> {
//!         self.emit(AdapterEvent::Registered { expires: 3600 });
//!         Ok(())
//!     }
//!     async fn unregister(&self) -> AdapterResult<()> {
//!         self.emit(AdapterEvent::Unregistered);
//!         Ok(())
//!     }
//!     async fn call(&self, _id: &CallId, _target: &str, _options: &CallOptions) -> AdapterResult<OutboundCall> {
//!         Ok(OutboundCall::default())
//!     }
//!     async fn answer(&self, _id: &CallId, _options: &AnswerOptions) -> AdapterResult<()> { Ok(()) }
//!     async fn hangup(&self, _id: &CallId, _cause: EndCause) -> AdapterResult<()> { Ok(()) }
//!     async fn hold(&self, _id: &CallId) -> AdapterResult<()> { Ok(()) }
//!     async fn resume(&self, _id: &CallId) -> AdapterResult<()> { Ok(()) }
//!     async fn transfer(&self, _id: &CallId, _target: &str) -> AdapterResult<()> { Ok(()) }
//!     async fn send_message(&self, _target: &str, _body: &str) -> AdapterResult<()> { Ok(()) }
//!     async fn send_dtmf(&self, _id: &CallId, _tone: DtmfTone, _duration: Duration) -> AdapterResult<()> { Ok(()) }
//! }
//! ```

use async_trait::async_trait;
use std::sync::Weak;
use std::time::Duration;
use tracing::trace;

use crate::call::{AnswerOptions, CallId, CallOptions, EndCause, MediaStreamHandle};
use crate::client::ClientInner;
use crate::client::config::ClientConfig;
use crate::dtmf::DtmfTone;
use crate::error::{AdapterError, AdapterResult, ClientResult};

/// Result of a successful outbound call request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundCall {
    /// Local media stream allocated for the call, if any
    pub local_stream: Option<MediaStreamHandle>,
}

/// Low-level events reported by an adapter
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    /// `connection:connecting`
    Connecting,
    /// `connection:connected`
    Connected,
    /// `connection:disconnected`
    Disconnected {
        /// Why, when the drop was not requested
        reason: Option<String>,
    },
    /// `connection:failed`
    ConnectionFailed {
        /// Failure reason
        reason: String,
    },
    /// `registration:registering`
    Registering,
    /// `registration:registered`
    Registered {
        /// Granted binding lifetime in seconds
        expires: u32,
    },
    /// `registration:unregistered`
    Unregistered,
    /// `registration:failed`
    RegistrationFailed {
        /// Registrar status code, if any
        status: Option<u16>,
        /// Reason phrase
        reason: String,
    },
    /// `registration:expiring`
    RegistrationExpiring {
        /// Seconds until the binding lapses
        remaining_secs: u32,
    },
    /// `call:incoming`; the adapter mints the id
    CallIncoming {
        call_id: CallId,
        remote: String,
        display_name: Option<String>,
        remote_stream: Option<MediaStreamHandle>,
    },
    /// `call:outgoing`
    CallOutgoing { call_id: CallId },
    /// `call:progress`
    CallProgress { call_id: CallId, status: u16 },
    /// `call:accepted`
    CallAccepted {
        call_id: CallId,
        remote_stream: Option<MediaStreamHandle>,
    },
    /// `call:ended`
    CallEnded {
        call_id: CallId,
        status: Option<u16>,
        reason: Option<String>,
    },
    /// `message:received`
    MessageReceived { from: String, body: String },
}

impl AdapterEvent {
    /// Wire-style name of the event
    pub fn name(&self) -> &'static str {
        match self {
            AdapterEvent::Connecting => "connection:connecting",
            AdapterEvent::Connected => "connection:connected",
            AdapterEvent::Disconnected { .. } => "connection:disconnected",
            AdapterEvent::ConnectionFailed { .. } => "connection:failed",
            AdapterEvent::Registering => "registration:registering",
            AdapterEvent::Registered { .. } => "registration:registered",
            AdapterEvent::Unregistered => "registration:unregistered",
            AdapterEvent::RegistrationFailed { .. } => "registration:failed",
            AdapterEvent::RegistrationExpiring { .. } => "registration:expiring",
            AdapterEvent::CallIncoming { .. } => "call:incoming",
            AdapterEvent::CallOutgoing { .. } => "call:outgoing",
            AdapterEvent::CallProgress { .. } => "call:progress",
            AdapterEvent::CallAccepted { .. } => "call:accepted",
            AdapterEvent::CallEnded { .. } => "call:ended",
            AdapterEvent::MessageReceived { .. } => "message:received",
        }
    }
}

/// Channel from the adapter back into the orchestrator.
///
/// Delivery is synchronous: by the time `emit` returns, the orchestrator has
/// applied the event and, if it concluded a pending operation, settled it.
/// Events emitted after the client was dropped are discarded.
#[derive(Clone)]
pub struct AdapterEventSink {
    client: Weak<ClientInner>,
}

impl std::fmt::Debug for AdapterEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterEventSink")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl AdapterEventSink {
    pub(crate) fn new(client: Weak<ClientInner>) -> Self {
        Self { client }
    }

    /// Whether the owning client still exists
    pub fn is_attached(&self) -> bool {
        self.client.strong_count() > 0
    }

    /// Hand an event to the orchestrator
    pub fn emit(&self, event: AdapterEvent) {
        match self.client.upgrade() {
            Some(client) => client.handle_adapter_event(event),
            None => trace!(event = event.name(), "client dropped, adapter event discarded"),
        }
    }
}

/// Signaling stack binding
///
/// Request methods return once the request was handed to the stack. Outcomes
/// that arrive later (registered, accepted, ended, ...) are reported through
/// the sink passed to [`initialize`](SignalingAdapter::initialize).
#[async_trait]
pub trait SignalingAdapter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Called once, before the first `connect`
    async fn initialize(&self, config: &ClientConfig, sink: AdapterEventSink) -> AdapterResult<()>;

    async fn connect(&self) -> AdapterResult<()>;

    async fn disconnect(&self) -> AdapterResult<()>;

    async fn register(&self) -> AdapterResult<()>;

    async fn unregister(&self) -> AdapterResult<()>;

    /// Start an outbound call under the core-assigned id
    async fn call(&self, call_id: &CallId, target: &str, options: &CallOptions) -> AdapterResult<OutboundCall>;

    async fn answer(&self, call_id: &CallId, options: &AnswerOptions) -> AdapterResult<()>;

    async fn hangup(&self, call_id: &CallId, cause: EndCause) -> AdapterResult<()>;

    async fn hold(&self, call_id: &CallId) -> AdapterResult<()>;

    async fn resume(&self, call_id: &CallId) -> AdapterResult<()>;

    /// Mute the local microphone. Stacks that mute purely in the media layer
    /// can keep the default.
    async fn set_muted(&self, _call_id: &CallId, _muted: bool) -> AdapterResult<()> {
        Ok(())
    }

    async fn transfer(&self, call_id: &CallId, target: &str) -> AdapterResult<()>;

    async fn send_message(&self, target: &str, body: &str) -> AdapterResult<()>;

    async fn send_dtmf(&self, call_id: &CallId, tone: DtmfTone, duration: Duration) -> AdapterResult<()>;

    /// Subscribe to an event package (presence, dialog, ...) of `target`
    async fn subscribe(&self, _target: &str, event: &str) -> AdapterResult<()> {
        Err(AdapterError::not_supported(
            format!("subscribe:{event}"),
            Some("watch call:incoming and message:received instead"),
        ))
    }
}

/// Produces the adapter a client is bound to.
///
/// Invoked exactly once per [`SipClientBuilder::build`](crate::client::SipClientBuilder::build).
pub trait AdapterFactory: Send + Sync {
    fn create(&self, config: &ClientConfig) -> ClientResult<Box<dyn SignalingAdapter>>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&ClientConfig) -> ClientResult<Box<dyn SignalingAdapter>> + Send + Sync,
{
    fn create(&self, config: &ClientConfig) -> ClientResult<Box<dyn SignalingAdapter>> {
        self(config)
    }
}
