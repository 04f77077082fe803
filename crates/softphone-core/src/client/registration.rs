//! Registration lifecycle: `register()`, `unregister()` and binding refresh

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{ClientInner, ConnectionState};
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::pending::{OperationKind, SettleOutcome};
use crate::registration::RegistrationState;
use crate::timeout::TimeoutKind;

impl ClientInner {
    pub(crate) async fn register(self: &Arc<Self>) -> ClientResult<()> {
        const OPERATION: &str = "register";
        if self.registration_ready(OPERATION)? {
            return Ok(());
        }

        let mut guard = self.pending.begin(OperationKind::Register, OPERATION)?;
        if self.registration_ready(OPERATION)? {
            return Ok(());
        }
        self.state.lock().registration.state = RegistrationState::Registering;
        debug!(operation = OPERATION, expires = self.config.registration.expires, "Registering");
        self.bus.emit(ClientEvent::RegistrationRegistering);

        let requested = guard
            .send_within(self.config.timeouts.register(), TimeoutKind::Register, async {
                self.adapter.register().await.map_err(|e| ClientError::Registration {
                    operation: OPERATION,
                    status: e.status(),
                    reason: e.to_string(),
                    elapsed: guard.elapsed(),
                    source: Some(e),
                })
            })
            .await;
        if let Err(e) = requested {
            self.fail_registration_request(&OperationKind::Register, e);
        }

        let result = guard
            .wait_until(self.config.timeouts.register(), TimeoutKind::Register, || {
                self.state.lock().registration.mark_failed("registration timed out");
            })
            .await;
        drop(guard);

        match result {
            Ok(()) => Ok(()),
            Err(e @ ClientError::RegistrationTimeout { .. }) => {
                error!(operation = OPERATION, elapsed_ms = e.elapsed().as_millis() as u64, "Registration timed out");
                self.bus.emit(ClientEvent::RegistrationFailed {
                    status: None,
                    reason: e.to_string(),
                });
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// `Ok(true)` when already registered, an error when not connected
    fn registration_ready(&self, operation: &'static str) -> ClientResult<bool> {
        let state = self.state.lock();
        if state.connection != ConnectionState::Connected {
            return Err(ClientError::invalid_state(operation, state.connection, "Connected"));
        }
        Ok(state.registration.state == RegistrationState::Registered)
    }

    /// The adapter refused to send the request itself
    fn fail_registration_request(&self, kind: &OperationKind, e: ClientError) {
        if matches!(e, ClientError::Cancelled { .. }) {
            return;
        }
        let reason = e.to_string();
        let status = match &e {
            ClientError::Registration { status, .. } => *status,
            _ => None,
        };
        let outcome = self.pending.settle_with(kind, |_| {
            self.state.lock().registration.mark_failed(reason.clone());
            Err(e)
        });
        if outcome == SettleOutcome::Delivered {
            error!(operation = operation_name(kind), %reason, "Registration request failed");
            self.bus.emit(ClientEvent::RegistrationFailed { status, reason });
        }
    }

    pub(crate) async fn unregister(self: &Arc<Self>) -> ClientResult<()> {
        const OPERATION: &str = "unregister";
        if self.unregistration_skipped(OPERATION)? {
            return Ok(());
        }

        let mut guard = self.pending.begin(OperationKind::Unregister, OPERATION)?;
        if self.unregistration_skipped(OPERATION)? {
            return Ok(());
        }
        self.state.lock().registration.state = RegistrationState::Unregistering;
        debug!(operation = OPERATION, "Unregistering");
        self.bus.emit(ClientEvent::RegistrationUnregistering);

        let requested = guard
            .send_within(self.config.timeouts.unregister(), TimeoutKind::Unregister, async {
                self.adapter
                    .unregister()
                    .await
                    .map_err(|e| ClientError::from_adapter(OPERATION, guard.elapsed(), e))
            })
            .await;
        if let Err(e) = requested {
            self.fail_registration_request(&OperationKind::Unregister, e);
        }

        let result = guard
            .wait_until(self.config.timeouts.unregister(), TimeoutKind::Unregister, || {
                self.state.lock().registration.mark_failed("unregistration timed out");
            })
            .await;
        drop(guard);

        match result {
            Ok(()) => Ok(()),
            Err(e @ ClientError::UnregistrationTimeout { .. }) => {
                error!(operation = OPERATION, elapsed_ms = e.elapsed().as_millis() as u64, "Unregistration timed out");
                self.bus.emit(ClientEvent::RegistrationFailed {
                    status: None,
                    reason: e.to_string(),
                });
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// `Ok(true)` when there is nothing to unregister or teardown owns it
    fn unregistration_skipped(&self, operation: &'static str) -> ClientResult<bool> {
        let state = self.state.lock();
        match (state.connection, state.registration.state) {
            (ConnectionState::Disconnecting, _) => Ok(true),
            (_, RegistrationState::Unregistered) => Ok(true),
            (ConnectionState::Connected, RegistrationState::Registered | RegistrationState::Failed) => Ok(false),
            (ConnectionState::Connected, other) => {
                Err(ClientError::invalid_state(operation, other, "Registered or Failed"))
            }
            (connection, _) => Err(ClientError::invalid_state(operation, connection, "Connected")),
        }
    }

    /// Re-send the registration ahead of expiry
    pub(crate) async fn refresh_registration(self: &Arc<Self>) {
        const OPERATION: &str = "refresh_registration";
        if !matches!(self.registration_ready(OPERATION), Ok(true)) {
            return;
        }
        let Ok(mut guard) = self.pending.begin(OperationKind::Register, OPERATION) else {
            debug!("Registration already in flight, refresh skipped");
            return;
        };
        info!("Refreshing registration");

        let requested = guard
            .send_within(self.config.timeouts.register(), TimeoutKind::Register, async {
                self.adapter.register().await.map_err(|e| ClientError::Registration {
                    operation: OPERATION,
                    status: e.status(),
                    reason: e.to_string(),
                    elapsed: guard.elapsed(),
                    source: Some(e),
                })
            })
            .await;
        if let Err(e) = requested {
            self.fail_registration_request(&OperationKind::Register, e);
        }

        let result = guard
            .wait_until(self.config.timeouts.register(), TimeoutKind::Register, || {
                self.state.lock().registration.mark_failed("registration refresh timed out");
            })
            .await;
        match result {
            Ok(()) => debug!("Registration refreshed"),
            Err(e @ ClientError::RegistrationTimeout { .. }) => {
                warn!(operation = OPERATION, error = %e, "Registration refresh timed out");
                self.bus.emit(ClientEvent::RegistrationFailed {
                    status: None,
                    reason: e.to_string(),
                });
            }
            Err(e) => warn!(operation = OPERATION, error = %e, "Registration refresh failed"),
        }
    }
}

fn operation_name(kind: &OperationKind) -> &'static str {
    match kind {
        OperationKind::Unregister => "unregister",
        _ => "register",
    }
}
