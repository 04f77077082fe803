//! Call control: placing, answering and steering calls, DTMF and messaging

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ClientInner;
use crate::call::{AnswerOptions, CallDirection, CallId, CallOptions, CallSession, ControlStep, EndCause};
use crate::dtmf::DtmfManager;
use crate::error::{AdapterResult, ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::pending::OperationKind;

impl ClientInner {
    pub(crate) async fn call(self: &Arc<Self>, target: &str, options: CallOptions) -> ClientResult<CallId> {
        const OPERATION: &str = "call";
        self.require_connected(OPERATION)?;
        if target.trim().is_empty() {
            return Err(ClientError::config("target", "call target must not be empty"));
        }

        let guard = self.pending.begin(OperationKind::Call(target.to_string()), OPERATION)?;
        let call_id = CallId::new();
        let dtmf = DtmfManager::new(
            call_id,
            self.adapter.clone(),
            self.bus.clone(),
            self.config.session.dtmf.clone(),
        );
        let session = CallSession::new(call_id, CallDirection::Outbound, target, None, dtmf.clone());
        let line = match self.lines.insert(session, OPERATION) {
            Ok(line) => line,
            Err(e) => {
                dtmf.shutdown();
                warn!(%target, error = %e, "Call refused");
                return Err(e);
            }
        };
        self.state.lock().counters.calls_placed += 1;
        info!(%call_id, %target, line, "Placing call");

        let result = guard
            .run(self.request(OPERATION, self.adapter.call(&call_id, target, &options)))
            .await;
        drop(guard);

        match result {
            Ok(outbound) => {
                let event = self
                    .lines
                    .with_session(&call_id, |s| s.on_outgoing(outbound.local_stream))
                    .flatten();
                self.emit_all(event);
                self.lines.activate_if_idle(&call_id);
                Ok(call_id)
            }
            Err(e) => {
                self.lines.discard(&call_id);
                if matches!(e, ClientError::RequestTimeout { .. }) {
                    // The adapter may still set the call up; make sure it does not.
                    if let Err(cancel) = self
                        .request("cancel_call", self.adapter.hangup(&call_id, EndCause::Cancelled))
                        .await
                    {
                        debug!(%call_id, error = %cancel, "Cancel after timeout failed");
                    }
                }
                if !matches!(e, ClientError::Cancelled { .. }) {
                    warn!(%call_id, %target, error = %e, "Call setup failed");
                }
                Err(e)
            }
        }
    }

    /// Validate, signal and apply one explicit state change of a call.
    ///
    /// The change is validated twice: once before taking the call's control
    /// slot, once after, since another control may have completed meanwhile.
    /// Returns whether the change was applied.
    async fn control<S, F, A>(
        &self,
        operation: &'static str,
        call_id: CallId,
        check: impl Fn(&CallSession) -> ClientResult<ControlStep>,
        signal: S,
        apply: A,
    ) -> ClientResult<bool>
    where
        S: FnOnce() -> F,
        F: Future<Output = AdapterResult<()>>,
        A: FnOnce(&mut CallSession) -> ClientResult<Option<ClientEvent>>,
    {
        self.require_connected(operation)?;
        if self.lines.try_with_session(operation, &call_id, |s| check(s))?? == ControlStep::AlreadyDone {
            debug!(%call_id, operation, "Already in the requested state");
            return Ok(false);
        }

        let guard = self.pending.begin(OperationKind::CallControl(call_id), operation)?;
        if self.lines.try_with_session(operation, &call_id, |s| check(s))?? == ControlStep::AlreadyDone {
            return Ok(false);
        }

        guard.run(self.request(operation, signal())).await?;
        let event = self.lines.try_with_session(operation, &call_id, apply)??;
        drop(guard);

        let applied = event.is_some();
        self.emit_all(event);
        Ok(applied)
    }

    pub(crate) async fn answer(&self, call_id: CallId, options: AnswerOptions) -> ClientResult<()> {
        let answered = self
            .control(
                "answer",
                call_id,
                CallSession::check_answer,
                || self.adapter.answer(&call_id, &options),
                |s| {
                    if s.state().is_terminated() {
                        return Err(ClientError::invalid_state("answer", s.state(), "ringing inbound call"));
                    }
                    Ok(s.on_accepted(None))
                },
            )
            .await?;
        if answered {
            info!(%call_id, "Call answered");
            self.lines.activate_if_idle(&call_id);
        }
        Ok(())
    }

    pub(crate) async fn hold(&self, call_id: CallId) -> ClientResult<()> {
        self.control(
            "hold",
            call_id,
            CallSession::check_hold,
            || self.adapter.hold(&call_id),
            CallSession::apply_hold,
        )
        .await
        .map(|_| ())
    }

    pub(crate) async fn resume(&self, call_id: CallId) -> ClientResult<()> {
        self.control(
            "resume",
            call_id,
            CallSession::check_resume,
            || self.adapter.resume(&call_id),
            CallSession::apply_resume,
        )
        .await
        .map(|_| ())
    }

    pub(crate) async fn set_muted(&self, call_id: CallId, muted: bool) -> ClientResult<()> {
        let operation = if muted { "mute" } else { "unmute" };
        self.control(
            operation,
            call_id,
            |s| s.check_mute(muted),
            || self.adapter.set_muted(&call_id, muted),
            |s| s.apply_mute(muted),
        )
        .await
        .map(|_| ())
    }

    /// Blind transfer. The call is `Transferring` for the duration of the
    /// request, then `Active` again on success or `Terminated` on failure.
    pub(crate) async fn transfer(&self, call_id: CallId, target: &str) -> ClientResult<()> {
        const OPERATION: &str = "transfer";
        self.require_connected(OPERATION)?;
        if target.trim().is_empty() {
            return Err(ClientError::config("target", "transfer target must not be empty"));
        }
        self.lines.try_with_session(OPERATION, &call_id, |s| s.check_transfer())??;

        let guard = self.pending.begin(OperationKind::CallControl(call_id), OPERATION)?;
        let started = self
            .lines
            .try_with_session(OPERATION, &call_id, |s| s.begin_transfer(target))??;
        info!(%call_id, %target, "Transferring call");
        self.bus.emit(started);

        let result = guard
            .run(self.request(OPERATION, self.adapter.transfer(&call_id, target)))
            .await;
        let failure = result.as_ref().err().map(ToString::to_string);
        let events = self
            .lines
            .with_session(&call_id, |s| s.complete_transfer(target, failure))
            .unwrap_or_default();
        drop(guard);

        if let Err(e) = &result {
            warn!(%call_id, %target, error = %e, "Transfer failed");
        }
        self.emit_all(events);
        result
    }

    /// End a call. Adapter failures are logged; the call is terminated locally
    /// regardless.
    pub(crate) async fn hangup(&self, call_id: CallId) -> ClientResult<()> {
        const OPERATION: &str = "hangup";
        let Some(cause) = self
            .lines
            .try_with_session(OPERATION, &call_id, |s| s.hangup_cause())?
        else {
            debug!(%call_id, "Call already ended");
            return Ok(());
        };

        self.pending.cancel(&OperationKind::CallControl(call_id));
        if let Err(e) = self.request(OPERATION, self.adapter.hangup(&call_id, cause)).await {
            warn!(%call_id, error = %e, "Adapter hangup failed, ending call locally");
        }

        let event = self.lines.with_session(&call_id, |s| s.on_ended(cause)).flatten();
        if event.is_some() {
            info!(%call_id, %cause, "Call hung up");
        }
        self.emit_all(event);
        Ok(())
    }

    pub(crate) fn send_dtmf(&self, call_id: CallId, digits: &str) -> ClientResult<usize> {
        const OPERATION: &str = "send_dtmf";
        let dtmf = self
            .lines
            .try_with_session(OPERATION, &call_id, |s| s.check_dtmf().map(|()| s.dtmf().clone()))??;
        dtmf.enqueue(digits)
    }

    pub(crate) fn clear_dtmf(&self, call_id: CallId) -> ClientResult<usize> {
        let dtmf = self
            .lines
            .dtmf(&call_id)
            .ok_or_else(|| ClientError::not_found("clear_dtmf", call_id))?;
        Ok(dtmf.clear())
    }

    pub(crate) async fn send_message(&self, target: &str, body: &str) -> ClientResult<()> {
        const OPERATION: &str = "send_message";
        self.require_connected(OPERATION)?;
        self.request(OPERATION, self.adapter.send_message(target, body)).await?;
        self.state.lock().counters.messages_sent += 1;
        debug!(%target, bytes = body.len(), "Message sent");
        Ok(())
    }

    pub(crate) async fn subscribe(&self, target: &str, event: &str) -> ClientResult<()> {
        const OPERATION: &str = "subscribe";
        self.require_connected(OPERATION)?;
        match self.request(OPERATION, self.adapter.subscribe(target, event)).await {
            Ok(()) => {
                debug!(%target, event, "Subscribed");
                Ok(())
            }
            Err(e @ ClientError::AdapterNotSupported { .. }) => {
                info!(adapter = self.adapter.name(), event, error = %e, "Subscription not supported");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
