//! # Softphone Core - Call Signaling Orchestration
//!
//! This crate is the call-control brain of a multi-line softphone. It sits
//! between a host application (UI, CLI, bot) and a pluggable signaling stack:
//!
//! - **[`SipClient`]**: connection and registration lifecycle, call placement
//!   and control, all guarded against overlapping operations and bounded by
//!   configurable timeouts
//! - **[`SignalingAdapter`]**: the only boundary to the actual signaling stack;
//!   adapters report outcomes back through an [`AdapterEventSink`]
//! - **[`MultiLineManager`](lines::MultiLineManager)**: concurrent call legs on
//!   numbered lines, one of them active
//! - **[`DtmfManager`](dtmf::DtmfManager)**: per-call tone queue with paced
//!   delivery
//! - **[`EventBus`](event_bus::EventBus)**: typed events for everything that
//!   happens, consumed by handlers or as a stream
//!
//! Media is out of scope: streams are passed around as opaque
//! [`MediaStreamHandle`]s.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rvoip_softphone_core::{ClientConfig, ClientEvent, EventKind, SignalingAdapter, SipClientBuilder};
//! # fn my_adapter() -> Box<dyn SignalingAdapter> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("wss://sip.example.com:7443", "sip:alice@example.com")
//!         .with_credentials("alice", "secret")
//!         .with_max_lines(2);
//!
//!     let client = SipClientBuilder::new(config)
//!         .adapter(|_: &ClientConfig| -> rvoip_softphone_core::ClientResult<Box<dyn SignalingAdapter>> {
//!             Ok(my_adapter())
//!         })
//!         .build()?;
//!
//!     client.events().subscribe(EventKind::CallIncoming, |event| {
//!         if let ClientEvent::CallIncoming { info } = event {
//!             println!("incoming call from {} on line {}", info.remote, info.line);
//!         }
//!     });
//!
//!     client.start().await?;
//!     let call = client.call("sip:bob@example.com", Default::default()).await?;
//!     call.hangup().await?;
//!     client.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod call;
pub mod client;
pub mod dtmf;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod features;
pub mod lines;
pub mod pending;
pub mod registration;
pub mod timeout;

// Re-export main types
pub use adapter::{AdapterEvent, AdapterEventSink, AdapterFactory, OutboundCall, SignalingAdapter};
pub use call::{
    AnswerOptions, CallDirection, CallHandle, CallId, CallInfo, CallOptions, CallState, EndCause,
    MediaStreamHandle,
};
pub use client::config::{ClientConfig, Credentials, RegistrationConfig, SessionConfig, TimeoutConfig};
pub use client::{ClientStats, ConnectionState, SipClient, SipClientBuilder, WeakSipClient};
pub use dtmf::{DtmfOptions, DtmfTone};
pub use error::{AdapterError, AdapterResult, ClientError, ClientResult};
pub use event_bus::{EventBus, SubscriptionId};
pub use events::{ClientEvent, EventKind};
pub use registration::{RegistrationInfo, RegistrationState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
