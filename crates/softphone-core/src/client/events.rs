//! Adapter event handling
//!
//! Every [`AdapterEvent`] enters the orchestrator here, synchronously, on the
//! adapter's own task. Events that conclude a pending operation settle it
//! through the pending table; everything else updates state directly. State
//! is updated first, domain events are emitted after all locks are released.

use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use super::{ClientInner, ConnectionState};
use crate::adapter::AdapterEvent;
use crate::call::{CallDirection, CallId, CallSession, EndCause, MediaStreamHandle};
use crate::dtmf::DtmfManager;
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::pending::{OperationKind, SettleOutcome};
use crate::registration::RegistrationState;

impl ClientInner {
    pub(crate) fn handle_adapter_event(self: &Arc<Self>, event: AdapterEvent) {
        trace!(event = event.name(), "adapter event");
        match event {
            AdapterEvent::Connecting => {
                debug!("Adapter reports connecting");
            }
            AdapterEvent::Connected => self.on_connected(),
            AdapterEvent::Disconnected { reason } => self.on_disconnected(reason),
            AdapterEvent::ConnectionFailed { reason } => self.on_connection_failed(reason),
            AdapterEvent::Registering => {
                debug!("Adapter reports registering");
            }
            AdapterEvent::Registered { expires } => self.on_registered(expires),
            AdapterEvent::Unregistered => self.on_unregistered(),
            AdapterEvent::RegistrationFailed { status, reason } => self.on_registration_failed(status, reason),
            AdapterEvent::RegistrationExpiring { remaining_secs } => self.on_registration_expiring(remaining_secs),
            AdapterEvent::CallIncoming {
                call_id,
                remote,
                display_name,
                remote_stream,
            } => self.on_call_incoming(call_id, remote, display_name, remote_stream),
            AdapterEvent::CallOutgoing { call_id } => {
                let event = self.lines.with_session(&call_id, |s| s.on_outgoing(None)).flatten();
                self.emit_all(event);
            }
            AdapterEvent::CallProgress { call_id, status } => {
                let event = self.lines.with_session(&call_id, |s| s.on_progress(status)).flatten();
                self.emit_all(event);
            }
            AdapterEvent::CallAccepted { call_id, remote_stream } => {
                let event = self
                    .lines
                    .with_session(&call_id, |s| s.on_accepted(remote_stream))
                    .flatten();
                if event.is_some() {
                    info!(%call_id, "Call accepted");
                }
                self.emit_all(event);
            }
            AdapterEvent::CallEnded {
                call_id,
                status,
                reason,
            } => {
                let cause = EndCause::from_status(status);
                self.pending.cancel(&OperationKind::CallControl(call_id));
                let event = self.lines.with_session(&call_id, |s| s.on_ended(cause)).flatten();
                if event.is_some() {
                    info!(%call_id, ?status, ?reason, %cause, "Call ended by remote or network");
                }
                self.emit_all(event);
            }
            AdapterEvent::MessageReceived { from, body } => {
                self.state.lock().counters.messages_received += 1;
                self.bus.emit(ClientEvent::MessageReceived { from, body });
            }
        }
    }

    pub(super) fn emit_all(&self, events: impl IntoIterator<Item = ClientEvent>) {
        for event in events {
            self.bus.emit(event);
        }
    }

    // ===== CONNECTION =====

    fn on_connected(&self) {
        let outcome = self.pending.settle_with(&OperationKind::Connect, |_| {
            self.state.lock().connection = ConnectionState::Connected;
            Ok(())
        });
        match outcome {
            SettleOutcome::Delivered => self.bus.emit(ClientEvent::ConnectionConnected),
            SettleOutcome::Stale => warn!("connection:connected after the attempt was decided, ignored"),
            SettleOutcome::NoPending => warn!("Unsolicited connection:connected, ignored"),
        }
    }

    fn on_connection_failed(&self, reason: String) {
        let outcome = self.pending.settle_with(&OperationKind::Connect, |elapsed| {
            self.state.lock().connection = ConnectionState::Disconnected;
            Err(ClientError::Connection {
                operation: "start",
                reason: reason.clone(),
                elapsed,
                source: None,
            })
        });
        match outcome {
            SettleOutcome::Delivered => {
                warn!(%reason, "Connection attempt failed");
                self.bus.emit(ClientEvent::ConnectionFailed { reason });
            }
            _ => warn!(%reason, "connection:failed without a pending attempt, ignored"),
        }
    }

    fn on_disconnected(&self, reason: Option<String>) {
        // Requested by stop().
        let outcome = self.pending.settle_with(&OperationKind::Disconnect, |_| {
            let mut state = self.state.lock();
            state.connection = ConnectionState::Disconnected;
            state.registration.clear();
            Ok(())
        });
        match outcome {
            SettleOutcome::Delivered => {
                self.bus.emit(ClientEvent::ConnectionDisconnected { reason });
                return;
            }
            SettleOutcome::Stale => {
                debug!("connection:disconnected after teardown timed out");
                return;
            }
            SettleOutcome::NoPending => {}
        }

        // Dropped while a connect attempt was running.
        let failure = reason.clone().unwrap_or_else(|| "connection closed".to_string());
        let outcome = self.pending.settle_with(&OperationKind::Connect, |elapsed| {
            self.state.lock().connection = ConnectionState::Disconnected;
            Err(ClientError::Connection {
                operation: "start",
                reason: failure.clone(),
                elapsed,
                source: None,
            })
        });
        if outcome == SettleOutcome::Delivered {
            self.bus.emit(ClientEvent::ConnectionFailed { reason: failure });
            return;
        }

        if self.connection_state() != ConnectionState::Connected {
            debug!(?reason, "connection:disconnected while not connected, ignored");
            return;
        }
        self.connection_lost(reason);
    }

    /// The transport went away on its own: Connected → Disconnecting → Disconnected
    fn connection_lost(&self, reason: Option<String>) {
        warn!(?reason, "Connection lost");
        self.state.lock().connection = ConnectionState::Disconnecting;
        self.bus.emit(ClientEvent::ConnectionDisconnecting);

        let cancelled = self
            .pending
            .cancel_matching(|kind| *kind != OperationKind::Connect && *kind != OperationKind::Disconnect);
        if !cancelled.is_empty() {
            debug!(?cancelled, "Cancelled operations of the lost connection");
        }

        for call_id in self.lines.live_ids() {
            let event = self
                .lines
                .with_session(&call_id, |s| s.on_ended(EndCause::NetworkError))
                .flatten();
            self.emit_all(event);
        }

        self.clear_registration();
        self.finish_disconnect(reason);
    }

    // ===== REGISTRATION =====

    fn on_registered(&self, expires: u32) {
        let mut expires_at = None;
        let outcome = self.pending.settle_with(&OperationKind::Register, |_| {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Connected {
                return Err(ClientError::invalid_state("register", state.connection, "Connected"));
            }
            expires_at = Some(state.registration.mark_registered(expires));
            Ok(())
        });

        match outcome {
            SettleOutcome::Delivered => {}
            SettleOutcome::Stale => {
                warn!("registration:registered after the attempt was decided, ignored");
                return;
            }
            SettleOutcome::NoPending => {
                // Refresh performed by the adapter on its own.
                let mut state = self.state.lock();
                if state.registration.state == RegistrationState::Registered
                    && state.connection == ConnectionState::Connected
                {
                    expires_at = Some(state.registration.mark_registered(expires));
                } else {
                    warn!(state = %state.registration.state, "Unsolicited registration:registered, ignored");
                    return;
                }
            }
        }

        if let Some(expires_at) = expires_at {
            info!(expires, %expires_at, "Registered");
            self.bus.emit(ClientEvent::RegistrationRegistered { expires, expires_at });
        }
    }

    fn on_registration_failed(&self, status: Option<u16>, reason: String) {
        let mark = |state: &mut super::CoreState| state.registration.mark_failed(reason.clone());
        let outcome = self.pending.settle_with(&OperationKind::Register, |elapsed| {
            mark(&mut *self.state.lock());
            Err(ClientError::Registration {
                operation: "register",
                status,
                reason: reason.clone(),
                elapsed,
                source: None,
            })
        });
        let outcome = match outcome {
            SettleOutcome::NoPending => self.pending.settle_with(&OperationKind::Unregister, |elapsed| {
                mark(&mut *self.state.lock());
                Err(ClientError::Registration {
                    operation: "unregister",
                    status,
                    reason: reason.clone(),
                    elapsed,
                    source: None,
                })
            }),
            other => other,
        };

        match outcome {
            SettleOutcome::Delivered => {}
            SettleOutcome::Stale => {
                warn!(?status, %reason, "registration:failed after the attempt was decided, ignored");
                return;
            }
            SettleOutcome::NoPending => {
                // The registrar dropped a live binding.
                let mut state = self.state.lock();
                if state.registration.state != RegistrationState::Registered {
                    debug!(?status, %reason, "registration:failed without a binding, ignored");
                    return;
                }
                mark(&mut *state);
            }
        }
        warn!(?status, %reason, "Registration failed");
        self.bus.emit(ClientEvent::RegistrationFailed { status, reason });
    }

    fn on_unregistered(&self) {
        let outcome = self.pending.settle_with(&OperationKind::Unregister, |_| {
            self.state.lock().registration.clear();
            Ok(())
        });
        match outcome {
            SettleOutcome::Delivered => {
                info!("Unregistered");
                self.bus.emit(ClientEvent::RegistrationUnregistered);
            }
            SettleOutcome::Stale => warn!("registration:unregistered after the attempt was decided, ignored"),
            SettleOutcome::NoPending => {
                // The registrar removed the binding on its own.
                if self.connection_state() == ConnectionState::Connected
                    && !self.pending.is_pending(&OperationKind::Register)
                {
                    self.clear_registration();
                } else {
                    debug!("Unsolicited registration:unregistered, ignored");
                }
            }
        }
    }

    fn on_registration_expiring(self: &Arc<Self>, remaining_secs: u32) {
        let registered = self.state.lock().registration.state == RegistrationState::Registered;
        if !registered {
            debug!(remaining_secs, "registration:expiring without a binding, ignored");
            return;
        }
        self.bus.emit(ClientEvent::RegistrationExpiring { remaining_secs });
        if !self.config.registration.auto_refresh {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let client = self.clone();
                handle.spawn(async move { client.refresh_registration().await });
            }
            Err(_) => warn!("No runtime to refresh the registration on"),
        }
    }

    // ===== CALLS =====

    fn on_call_incoming(
        self: &Arc<Self>,
        call_id: CallId,
        remote: String,
        display_name: Option<String>,
        remote_stream: Option<MediaStreamHandle>,
    ) {
        let connection = self.state.lock().connection;
        if connection != ConnectionState::Connected {
            warn!(%call_id, %remote, %connection, "call:incoming without a connection, ignored");
            return;
        }
        if self.lines.contains(&call_id) {
            warn!(%call_id, "Duplicate call:incoming, ignored");
            return;
        }
        let dtmf = DtmfManager::new(
            call_id,
            self.adapter.clone(),
            self.bus.clone(),
            self.config.session.dtmf.clone(),
        );
        let mut session = CallSession::new(call_id, CallDirection::Inbound, remote.clone(), display_name, dtmf.clone());
        session.set_remote_stream(remote_stream);

        match self.lines.insert(session, "call:incoming") {
            Ok(line) => {
                self.state.lock().counters.calls_received += 1;
                info!(%call_id, %remote, line, "Incoming call");
                if let Some(info) = self.lines.info(&call_id) {
                    self.bus.emit(ClientEvent::CallIncoming { info });
                }
                self.lines.activate_if_idle(&call_id);
            }
            Err(e) => {
                dtmf.shutdown();
                self.state.lock().counters.calls_rejected += 1;
                warn!(%call_id, %remote, error = %e, "Rejecting incoming call, no free line");
                self.reject_busy(call_id);
                self.bus.emit(ClientEvent::CallRejected {
                    call_id,
                    remote,
                    cause: EndCause::Busy,
                });
            }
        }
    }

    /// Tell the remote side we are busy, without holding up event delivery
    fn reject_busy(self: &Arc<Self>, call_id: CallId) {
        let Ok(handle) = Handle::try_current() else {
            warn!(%call_id, "No runtime to signal the rejection on");
            return;
        };
        let client = self.clone();
        handle.spawn(async move {
            if let Err(e) = client
                .request("reject", client.adapter.hangup(&call_id, EndCause::Busy))
                .await
            {
                warn!(%call_id, error = %e, "Rejection was not delivered");
            }
        });
    }
}
