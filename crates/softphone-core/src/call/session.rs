//! Per-call state machine
//!
//! `CallSession` is pure bookkeeping: it validates requested transitions and
//! applies them, returning the [`ClientEvent`] to publish. It never performs
//! I/O and never emits anything itself; the orchestrator emits the returned
//! events once the line table lock has been released.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{CallDirection, CallId, CallInfo, CallState, EndCause, MediaStreamHandle};
use crate::dtmf::DtmfManager;
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;

/// Outcome of validating an explicit call control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStep {
    /// The adapter has to be asked to perform the change
    Signal,
    /// The requested state already holds; nothing to do, nothing to emit
    AlreadyDone,
}

/// One call leg
#[derive(Debug)]
pub struct CallSession {
    id: CallId,
    line: usize,
    direction: CallDirection,
    state: CallState,
    remote: String,
    display_name: Option<String>,
    muted: bool,
    created_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    end_cause: Option<EndCause>,
    local_stream: Option<MediaStreamHandle>,
    remote_stream: Option<MediaStreamHandle>,
    dtmf: Arc<DtmfManager>,
}

impl CallSession {
    /// Outbound legs start in `Idle` until the adapter accepted the request,
    /// inbound legs start `Ringing`.
    pub(crate) fn new(
        id: CallId,
        direction: CallDirection,
        remote: impl Into<String>,
        display_name: Option<String>,
        dtmf: Arc<DtmfManager>,
    ) -> Self {
        let state = match direction {
            CallDirection::Outbound => CallState::Idle,
            CallDirection::Inbound => CallState::Ringing,
        };
        Self {
            id,
            line: 0,
            direction,
            state,
            remote: remote.into(),
            display_name,
            muted: false,
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            end_cause: None,
            local_stream: None,
            remote_stream: None,
            dtmf,
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub(crate) fn set_line(&mut self, line: usize) {
        self.line = line;
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub(crate) fn dtmf(&self) -> &Arc<DtmfManager> {
        &self.dtmf
    }

    pub(crate) fn set_remote_stream(&mut self, stream: Option<MediaStreamHandle>) {
        if stream.is_some() {
            self.remote_stream = stream;
        }
    }

    /// Snapshot for hosts and events
    pub fn info(&self) -> CallInfo {
        CallInfo {
            call_id: self.id,
            line: self.line,
            direction: self.direction,
            state: self.state,
            remote: self.remote.clone(),
            display_name: self.display_name.clone(),
            muted: self.muted,
            created_at: self.created_at,
            answered_at: self.answered_at,
            ended_at: self.ended_at,
            end_cause: self.end_cause,
            local_stream: self.local_stream.clone(),
            remote_stream: self.remote_stream.clone(),
        }
    }

    // ===== ADAPTER DRIVEN TRANSITIONS =====

    /// The adapter accepted an outbound request
    pub(crate) fn on_outgoing(&mut self, local_stream: Option<MediaStreamHandle>) -> Option<ClientEvent> {
        if local_stream.is_some() {
            self.local_stream = local_stream;
        }
        if self.state != CallState::Idle {
            return None;
        }
        self.state = CallState::Trying;
        Some(ClientEvent::CallOutgoing { info: self.info() })
    }

    /// Provisional response for an outbound leg
    pub(crate) fn on_progress(&mut self, status: u16) -> Option<ClientEvent> {
        if !self.state.is_early() || self.direction != CallDirection::Outbound {
            return None;
        }
        self.state = if matches!(status, 180 | 183) {
            CallState::Ringing
        } else if self.state == CallState::Idle {
            CallState::Trying
        } else {
            self.state
        };
        Some(ClientEvent::CallProgress {
            call_id: self.id,
            status,
            state: self.state,
        })
    }

    /// The call was answered, by the remote side or by us
    pub(crate) fn on_accepted(&mut self, remote_stream: Option<MediaStreamHandle>) -> Option<ClientEvent> {
        self.set_remote_stream(remote_stream);
        if !self.state.is_early() {
            return None;
        }
        self.state = CallState::Active;
        self.answered_at = Some(Utc::now());
        Some(ClientEvent::CallAccepted { info: self.info() })
    }

    /// Terminal transition; a second end is a no-op
    pub(crate) fn on_ended(&mut self, cause: EndCause) -> Option<ClientEvent> {
        if self.state.is_terminated() {
            return None;
        }
        self.state = CallState::Terminated;
        self.ended_at = Some(Utc::now());
        self.end_cause = Some(cause);
        Some(ClientEvent::CallEnded {
            info: self.info(),
            cause,
        })
    }

    // ===== EXPLICIT CONTROL: VALIDATION =====

    fn reject(&self, operation: &'static str, expected: &str) -> ClientError {
        ClientError::invalid_state(operation, self.state, expected)
    }

    pub fn check_answer(&self) -> ClientResult<ControlStep> {
        match (self.direction, self.state) {
            (CallDirection::Inbound, CallState::Ringing) => Ok(ControlStep::Signal),
            (CallDirection::Inbound, CallState::Active | CallState::OnHold) => Ok(ControlStep::AlreadyDone),
            _ => Err(self.reject("answer", "ringing inbound call")),
        }
    }

    pub fn check_hold(&self) -> ClientResult<ControlStep> {
        match self.state {
            CallState::Active => Ok(ControlStep::Signal),
            CallState::OnHold => Ok(ControlStep::AlreadyDone),
            _ => Err(self.reject("hold", "Active")),
        }
    }

    pub fn check_resume(&self) -> ClientResult<ControlStep> {
        match self.state {
            CallState::OnHold => Ok(ControlStep::Signal),
            CallState::Active => Ok(ControlStep::AlreadyDone),
            _ => Err(self.reject("resume", "OnHold")),
        }
    }

    pub fn check_mute(&self, muted: bool) -> ClientResult<ControlStep> {
        let operation = if muted { "mute" } else { "unmute" };
        if self.state != CallState::Active {
            return Err(self.reject(operation, "Active"));
        }
        if self.muted == muted {
            Ok(ControlStep::AlreadyDone)
        } else {
            Ok(ControlStep::Signal)
        }
    }

    pub fn check_transfer(&self) -> ClientResult<()> {
        match self.state {
            CallState::Active => Ok(()),
            CallState::Transferring => Err(ClientError::AlreadyInProgress { operation: "transfer" }),
            _ => Err(self.reject("transfer", "Active")),
        }
    }

    pub fn check_dtmf(&self) -> ClientResult<()> {
        match self.state {
            CallState::Active => Ok(()),
            _ => Err(self.reject("send_dtmf", "Active")),
        }
    }

    /// Cause an explicit hangup would end the call with; `None` once terminated
    pub fn hangup_cause(&self) -> Option<EndCause> {
        match (self.state, self.direction) {
            (CallState::Terminated, _) => None,
            (state, CallDirection::Inbound) if state.is_early() => Some(EndCause::Rejected),
            (state, CallDirection::Outbound) if state.is_early() => Some(EndCause::Cancelled),
            _ => Some(EndCause::Normal),
        }
    }

    // ===== EXPLICIT CONTROL: COMPLETION AFTER THE ADAPTER ROUND-TRIP =====

    fn ensure_alive(&self, operation: &'static str) -> ClientResult<()> {
        if self.state.is_terminated() {
            Err(self.reject(operation, "a live call"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn apply_hold(&mut self) -> ClientResult<Option<ClientEvent>> {
        self.ensure_alive("hold")?;
        match self.state {
            CallState::Active => {
                self.state = CallState::OnHold;
                Ok(Some(ClientEvent::CallHeld { call_id: self.id }))
            }
            CallState::OnHold => Ok(None),
            _ => Err(self.reject("hold", "Active")),
        }
    }

    pub(crate) fn apply_resume(&mut self) -> ClientResult<Option<ClientEvent>> {
        self.ensure_alive("resume")?;
        match self.state {
            CallState::OnHold => {
                self.state = CallState::Active;
                Ok(Some(ClientEvent::CallResumed { call_id: self.id }))
            }
            CallState::Active => Ok(None),
            _ => Err(self.reject("resume", "OnHold")),
        }
    }

    pub(crate) fn apply_mute(&mut self, muted: bool) -> ClientResult<Option<ClientEvent>> {
        self.ensure_alive(if muted { "mute" } else { "unmute" })?;
        if self.muted == muted {
            return Ok(None);
        }
        self.muted = muted;
        Ok(Some(if muted {
            ClientEvent::CallMuted { call_id: self.id }
        } else {
            ClientEvent::CallUnmuted { call_id: self.id }
        }))
    }

    pub(crate) fn begin_transfer(&mut self, target: &str) -> ClientResult<ClientEvent> {
        self.check_transfer()?;
        self.state = CallState::Transferring;
        Ok(ClientEvent::CallTransferring {
            call_id: self.id,
            target: target.to_string(),
        })
    }

    /// Leave `Transferring`: back to Active on success, Terminated on failure
    pub(crate) fn complete_transfer(&mut self, target: &str, failure: Option<String>) -> Vec<ClientEvent> {
        if self.state != CallState::Transferring {
            return Vec::new();
        }
        match failure {
            None => {
                self.state = CallState::Active;
                vec![ClientEvent::CallTransferred {
                    call_id: self.id,
                    target: target.to_string(),
                }]
            }
            Some(reason) => {
                let mut events = vec![ClientEvent::CallTransferFailed {
                    call_id: self.id,
                    target: target.to_string(),
                    reason,
                }];
                events.extend(self.on_ended(EndCause::NetworkError));
                events
            }
        }
    }
}
