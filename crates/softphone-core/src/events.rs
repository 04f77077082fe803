//! Domain events published on the [`EventBus`](crate::event_bus::EventBus)
//!
//! This is the stable integration surface for presentation layers. Every
//! [`ClientEvent`] has an [`EventKind`] whose string form follows the
//! `namespace:name` vocabulary (`connection:connected`, `call:ended`,
//! `dtmf:cleared`, ...).
//!
//! # Event Types
//!
//! - **Connection Events** - transport lifecycle of the signaling adapter
//! - **Registration Events** - registrar binding, expiry warnings
//! - **Call Events** - per-call state changes
//! - **Line Events** - active line bookkeeping and line release
//! - **Message Events** - inbound instant messages
//! - **DTMF Events** - tone playback progress
//!
//! ```rust
//! use rvoip_softphone_core::events::{ClientEvent, EventKind};
//!
//! let event = ClientEvent::ConnectionConnected;
//! assert_eq!(event.kind(), EventKind::ConnectionConnected);
//! assert_eq!(event.kind().as_str(), "connection:connected");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::call::{CallId, CallInfo, CallState, EndCause};
use crate::dtmf::DtmfTone;

/// Events emitted by the softphone core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    // Connection events
    /// Connecting to the signaling server
    ConnectionConnecting,
    /// Connected
    ConnectionConnected,
    /// Teardown started
    ConnectionDisconnecting,
    /// Disconnected
    ConnectionDisconnected {
        /// Why the connection went away, if not requested
        reason: Option<String>,
    },
    /// Connection attempt failed
    ConnectionFailed {
        /// Adapter or timeout reason
        reason: String,
    },

    // Registration events
    /// REGISTER sent
    RegistrationRegistering,
    /// Binding accepted by the registrar
    RegistrationRegistered {
        /// Granted expiry in seconds
        expires: u32,
        /// Absolute expiry
        expires_at: DateTime<Utc>,
    },
    /// Unregistration started
    RegistrationUnregistering,
    /// Binding removed
    RegistrationUnregistered,
    /// Registrar refused, or the request timed out
    RegistrationFailed {
        /// Server status code if any
        status: Option<u16>,
        /// Reason
        reason: String,
    },
    /// Binding is about to expire
    RegistrationExpiring {
        /// Seconds left
        remaining_secs: u32,
    },

    // Call events
    /// Inbound call offered on a line
    CallIncoming {
        /// Call snapshot
        info: CallInfo,
    },
    /// Outbound call accepted for delivery by the adapter
    CallOutgoing {
        /// Call snapshot
        info: CallInfo,
    },
    /// Provisional response on an outbound call
    CallProgress {
        /// Call id
        call_id: CallId,
        /// Provisional status code
        status: u16,
        /// State after applying the response
        state: CallState,
    },
    /// Call answered
    CallAccepted {
        /// Call snapshot
        info: CallInfo,
    },
    /// Call put on hold
    CallHeld {
        /// Call id
        call_id: CallId,
    },
    /// Call taken off hold
    CallResumed {
        /// Call id
        call_id: CallId,
    },
    /// Microphone muted
    CallMuted {
        /// Call id
        call_id: CallId,
    },
    /// Microphone unmuted
    CallUnmuted {
        /// Call id
        call_id: CallId,
    },
    /// Transfer requested
    CallTransferring {
        /// Call id
        call_id: CallId,
        /// Transfer target
        target: String,
    },
    /// Transfer accepted by the adapter
    CallTransferred {
        /// Call id
        call_id: CallId,
        /// Transfer target
        target: String,
    },
    /// Transfer failed; the call is terminated right after
    CallTransferFailed {
        /// Call id
        call_id: CallId,
        /// Transfer target
        target: String,
        /// Failure reason
        reason: String,
    },
    /// Call reached Terminated
    CallEnded {
        /// Final call snapshot
        info: CallInfo,
        /// Normalized cause
        cause: EndCause,
    },
    /// Inbound call refused before a session was created
    CallRejected {
        /// Id minted by the adapter for the offer
        call_id: CallId,
        /// Calling party
        remote: String,
        /// Cause signaled back
        cause: EndCause,
    },

    // Line events
    /// Active line designator changed
    LineActivated {
        /// Newly active call
        call_id: CallId,
        /// Its line number
        line: usize,
        /// Previously active call
        previous: Option<CallId>,
    },
    /// Terminated session purged, line free again
    LineReleased {
        /// Purged call
        call_id: CallId,
        /// Freed line number
        line: usize,
    },

    // Message events
    /// Instant message received
    MessageReceived {
        /// Sender
        from: String,
        /// Body
        body: String,
    },

    // DTMF events
    /// One tone handed to the adapter successfully
    DtmfSent {
        /// Call id
        call_id: CallId,
        /// Tone
        tone: DtmfTone,
    },
    /// One tone failed to send
    DtmfFailed {
        /// Call id
        call_id: CallId,
        /// Tone
        tone: DtmfTone,
        /// Adapter reason
        reason: String,
    },
    /// Queue forcibly emptied
    DtmfCleared {
        /// Call id
        call_id: CallId,
        /// Entries discarded
        discarded: usize,
    },
    /// Queue emptied by processing
    DtmfDrained {
        /// Call id
        call_id: CallId,
    },
}

/// Discriminant of [`ClientEvent`], used as subscription topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ConnectionConnecting,
    ConnectionConnected,
    ConnectionDisconnecting,
    ConnectionDisconnected,
    ConnectionFailed,
    RegistrationRegistering,
    RegistrationRegistered,
    RegistrationUnregistering,
    RegistrationUnregistered,
    RegistrationFailed,
    RegistrationExpiring,
    CallIncoming,
    CallOutgoing,
    CallProgress,
    CallAccepted,
    CallHeld,
    CallResumed,
    CallMuted,
    CallUnmuted,
    CallTransferring,
    CallTransferred,
    CallTransferFailed,
    CallEnded,
    CallRejected,
    LineActivated,
    LineReleased,
    MessageReceived,
    DtmfSent,
    DtmfFailed,
    DtmfCleared,
    DtmfDrained,
}

impl EventKind {
    /// Wire-style name, `namespace:name`
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ConnectionConnecting => "connection:connecting",
            EventKind::ConnectionConnected => "connection:connected",
            EventKind::ConnectionDisconnecting => "connection:disconnecting",
            EventKind::ConnectionDisconnected => "connection:disconnected",
            EventKind::ConnectionFailed => "connection:failed",
            EventKind::RegistrationRegistering => "registration:registering",
            EventKind::RegistrationRegistered => "registration:registered",
            EventKind::RegistrationUnregistering => "registration:unregistering",
            EventKind::RegistrationUnregistered => "registration:unregistered",
            EventKind::RegistrationFailed => "registration:failed",
            EventKind::RegistrationExpiring => "registration:expiring",
            EventKind::CallIncoming => "call:incoming",
            EventKind::CallOutgoing => "call:outgoing",
            EventKind::CallProgress => "call:progress",
            EventKind::CallAccepted => "call:accepted",
            EventKind::CallHeld => "call:held",
            EventKind::CallResumed => "call:resumed",
            EventKind::CallMuted => "call:muted",
            EventKind::CallUnmuted => "call:unmuted",
            EventKind::CallTransferring => "call:transferring",
            EventKind::CallTransferred => "call:transferred",
            EventKind::CallTransferFailed => "call:transfer_failed",
            EventKind::CallEnded => "call:ended",
            EventKind::CallRejected => "call:rejected",
            EventKind::LineActivated => "line:activated",
            EventKind::LineReleased => "line:released",
            EventKind::MessageReceived => "message:received",
            EventKind::DtmfSent => "dtmf:sent",
            EventKind::DtmfFailed => "dtmf:failed",
            EventKind::DtmfCleared => "dtmf:cleared",
            EventKind::DtmfDrained => "dtmf:drained",
        }
    }

    /// Namespace part of the name (`connection`, `call`, ...)
    pub fn namespace(&self) -> &'static str {
        let name = self.as_str();
        name.split(':').next().unwrap_or(name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ClientEvent {
    /// Topic of this event
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::ConnectionConnecting => EventKind::ConnectionConnecting,
            ClientEvent::ConnectionConnected => EventKind::ConnectionConnected,
            ClientEvent::ConnectionDisconnecting => EventKind::ConnectionDisconnecting,
            ClientEvent::ConnectionDisconnected { .. } => EventKind::ConnectionDisconnected,
            ClientEvent::ConnectionFailed { .. } => EventKind::ConnectionFailed,
            ClientEvent::RegistrationRegistering => EventKind::RegistrationRegistering,
            ClientEvent::RegistrationRegistered { .. } => EventKind::RegistrationRegistered,
            ClientEvent::RegistrationUnregistering => EventKind::RegistrationUnregistering,
            ClientEvent::RegistrationUnregistered => EventKind::RegistrationUnregistered,
            ClientEvent::RegistrationFailed { .. } => EventKind::RegistrationFailed,
            ClientEvent::RegistrationExpiring { .. } => EventKind::RegistrationExpiring,
            ClientEvent::CallIncoming { .. } => EventKind::CallIncoming,
            ClientEvent::CallOutgoing { .. } => EventKind::CallOutgoing,
            ClientEvent::CallProgress { .. } => EventKind::CallProgress,
            ClientEvent::CallAccepted { .. } => EventKind::CallAccepted,
            ClientEvent::CallHeld { .. } => EventKind::CallHeld,
            ClientEvent::CallResumed { .. } => EventKind::CallResumed,
            ClientEvent::CallMuted { .. } => EventKind::CallMuted,
            ClientEvent::CallUnmuted { .. } => EventKind::CallUnmuted,
            ClientEvent::CallTransferring { .. } => EventKind::CallTransferring,
            ClientEvent::CallTransferred { .. } => EventKind::CallTransferred,
            ClientEvent::CallTransferFailed { .. } => EventKind::CallTransferFailed,
            ClientEvent::CallEnded { .. } => EventKind::CallEnded,
            ClientEvent::CallRejected { .. } => EventKind::CallRejected,
            ClientEvent::LineActivated { .. } => EventKind::LineActivated,
            ClientEvent::LineReleased { .. } => EventKind::LineReleased,
            ClientEvent::MessageReceived { .. } => EventKind::MessageReceived,
            ClientEvent::DtmfSent { .. } => EventKind::DtmfSent,
            ClientEvent::DtmfFailed { .. } => EventKind::DtmfFailed,
            ClientEvent::DtmfCleared { .. } => EventKind::DtmfCleared,
            ClientEvent::DtmfDrained { .. } => EventKind::DtmfDrained,
        }
    }

    /// Call the event relates to, if any
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            ClientEvent::CallIncoming { info }
            | ClientEvent::CallOutgoing { info }
            | ClientEvent::CallAccepted { info }
            | ClientEvent::CallEnded { info, .. } => Some(info.call_id),
            ClientEvent::CallProgress { call_id, .. }
            | ClientEvent::CallHeld { call_id }
            | ClientEvent::CallResumed { call_id }
            | ClientEvent::CallMuted { call_id }
            | ClientEvent::CallUnmuted { call_id }
            | ClientEvent::CallTransferring { call_id, .. }
            | ClientEvent::CallTransferred { call_id, .. }
            | ClientEvent::CallTransferFailed { call_id, .. }
            | ClientEvent::CallRejected { call_id, .. }
            | ClientEvent::LineActivated { call_id, .. }
            | ClientEvent::LineReleased { call_id, .. }
            | ClientEvent::DtmfSent { call_id, .. }
            | ClientEvent::DtmfFailed { call_id, .. }
            | ClientEvent::DtmfCleared { call_id, .. }
            | ClientEvent::DtmfDrained { call_id } => Some(*call_id),
            _ => None,
        }
    }
}
