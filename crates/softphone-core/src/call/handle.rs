use super::{AnswerOptions, CallId, CallInfo, CallState};
use crate::client::SipClient;
use crate::error::ClientResult;

/// Id-based handle to one call
///
/// The handle does not own the session; once the line has been purged every
/// control method reports `NotFound` and [`info`](Self::info) returns `None`.
#[derive(Clone, Debug)]
pub struct CallHandle {
    client: SipClient,
    call_id: CallId,
}

impl CallHandle {
    pub(crate) fn new(client: SipClient, call_id: CallId) -> Self {
        Self { client, call_id }
    }

    pub fn id(&self) -> CallId {
        self.call_id
    }

    pub fn info(&self) -> Option<CallInfo> {
        self.client.call_info(self.call_id)
    }

    /// Current state; `Terminated` once the session is gone
    pub fn state(&self) -> CallState {
        self.info().map_or(CallState::Terminated, |info| info.state)
    }

    pub async fn answer(&self, options: AnswerOptions) -> ClientResult<()> {
        self.client.answer(self.call_id, options).await
    }

    pub async fn hangup(&self) -> ClientResult<()> {
        self.client.hangup(self.call_id).await
    }

    pub async fn hold(&self) -> ClientResult<()> {
        self.client.hold(self.call_id).await
    }

    pub async fn resume(&self) -> ClientResult<()> {
        self.client.resume(self.call_id).await
    }

    pub async fn mute(&self) -> ClientResult<()> {
        self.client.mute(self.call_id).await
    }

    pub async fn unmute(&self) -> ClientResult<()> {
        self.client.unmute(self.call_id).await
    }

    pub async fn transfer(&self, target: &str) -> ClientResult<()> {
        self.client.transfer(self.call_id, target).await
    }

    pub fn send_dtmf(&self, digits: &str) -> ClientResult<usize> {
        self.client.send_dtmf(self.call_id, digits)
    }

    pub fn clear_dtmf(&self) -> ClientResult<usize> {
        self.client.clear_dtmf(self.call_id)
    }

    /// Make this call the active line
    pub fn activate(&self) -> ClientResult<()> {
        self.client.set_active_line(self.call_id)
    }
}
