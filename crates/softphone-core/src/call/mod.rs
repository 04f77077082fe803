//! Call types and the per-call state machine
//!
//! A call leg is identified by a [`CallId`] that is unique for the lifetime of
//! the process. The mutable [`CallSession`] lives exclusively inside the
//! [`MultiLineManager`](crate::lines::MultiLineManager); everything outside of
//! it works with [`CallInfo`] snapshots or the id-based [`CallHandle`].
//!
//! # State machine
//!
//! ```text
//!            ┌──────────┐  progress   ┌─────────┐
//!  outbound  │  Trying  │────────────►│ Ringing │◄── inbound
//!            └────┬─────┘             └────┬────┘
//!                 │ accepted               │ accepted / answer()
//!                 ▼                        ▼
//!            ┌──────────────────────────────────┐  hold()   ┌────────┐
//!            │              Active              │──────────►│ OnHold │
//!            │        (mute flag orthogonal)    │◄──────────│        │
//!            └───────┬───────────────▲──────────┘ resume()  └────────┘
//!          transfer()│               │ success
//!                    ▼               │
//!              ┌──────────────┐──────┘
//!              │ Transferring │──── failure ───► Terminated
//!              └──────────────┘
//! ```
//!
//! Every non-terminal state reaches `Terminated` through `hangup()` or an
//! adapter `call:ended` event.

mod handle;
mod session;

pub use handle::CallHandle;
pub use session::{CallSession, ControlStep};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Process-unique identifier of a call leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Mint a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying uuid
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Direction of a call leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    /// Remote party called us
    Inbound,
    /// We called the remote party
    Outbound,
}

/// State of a call leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Line reserved, nothing signaled yet
    Idle,
    /// Outbound request sent, no provisional response yet
    Trying,
    /// Alerting (outbound remote ringing or inbound offer pending)
    Ringing,
    /// Media flowing
    Active,
    /// Held by us
    OnHold,
    /// Transfer request outstanding
    Transferring,
    /// Final state
    Terminated,
}

impl CallState {
    /// Whether the call has not been answered yet
    pub fn is_early(&self) -> bool {
        matches!(self, CallState::Idle | CallState::Trying | CallState::Ringing)
    }

    /// Whether the call reached its final state
    pub fn is_terminated(&self) -> bool {
        matches!(self, CallState::Terminated)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "Idle",
            CallState::Trying => "Trying",
            CallState::Ringing => "Ringing",
            CallState::Active => "Active",
            CallState::OnHold => "OnHold",
            CallState::Transferring => "Transferring",
            CallState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Normalized reason a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndCause {
    /// Regular hangup by either side
    Normal,
    /// Remote party busy
    Busy,
    /// Call declined
    Rejected,
    /// Transport or server failure
    NetworkError,
    /// No answer in time
    Timeout,
    /// Unanswered call withdrawn by the caller
    Cancelled,
}

impl EndCause {
    /// Map a final status code reported by the adapter onto the taxonomy
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            None => EndCause::Normal,
            Some(486) | Some(600) => EndCause::Busy,
            Some(403) | Some(603) => EndCause::Rejected,
            Some(408) | Some(480) => EndCause::Timeout,
            Some(487) => EndCause::Cancelled,
            Some(s) if s >= 500 => EndCause::NetworkError,
            Some(_) => EndCause::Normal,
        }
    }
}

impl fmt::Display for EndCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque handle to a media stream owned by the media layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaStreamHandle(pub String);

/// Options for an outbound call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallOptions {
    /// Extra headers handed to the adapter untouched
    pub extra_headers: HashMap<String, String>,
    /// Request video in addition to audio
    pub video: bool,
}

/// Options for answering an inbound call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerOptions {
    /// Extra headers handed to the adapter untouched
    pub extra_headers: HashMap<String, String>,
    /// Accept with video
    pub video: bool,
}

/// Snapshot of a call leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    /// Call id
    pub call_id: CallId,
    /// Line number the call occupies (1-based)
    pub line: usize,
    /// Direction
    pub direction: CallDirection,
    /// Current state
    pub state: CallState,
    /// Remote party identifier
    pub remote: String,
    /// Remote display name if known
    pub display_name: Option<String>,
    /// Microphone muted
    pub muted: bool,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the call became Active for the first time
    pub answered_at: Option<DateTime<Utc>>,
    /// When the call reached Terminated
    pub ended_at: Option<DateTime<Utc>>,
    /// Why the call ended
    pub end_cause: Option<EndCause>,
    /// Local media stream
    pub local_stream: Option<MediaStreamHandle>,
    /// Remote media stream
    pub remote_stream: Option<MediaStreamHandle>,
}

impl CallInfo {
    /// Talk time, from answer to end (or now while the call is up)
    pub fn duration(&self) -> Option<chrono::Duration> {
        let answered = self.answered_at?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        Some(end - answered)
    }
}
