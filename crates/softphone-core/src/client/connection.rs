//! Connection lifecycle: `start()` and `stop()`

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{ClientInner, ConnectionState};
use crate::adapter::AdapterEventSink;
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvent;
use crate::pending::{OperationKind, PendingGuard, SettleOutcome};
use crate::registration::RegistrationState;
use crate::timeout::{with_timeout, TimeoutKind};

impl ClientInner {
    /// Bind the adapter to this client on first use
    async fn ensure_initialized(self: &Arc<Self>, guard: &PendingGuard<'_>) -> ClientResult<()> {
        if self.adapter_initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let sink = AdapterEventSink::new(Arc::downgrade(self));
        let initialize = guard.run(async {
            self.adapter
                .initialize(&self.config, sink)
                .await
                .map_err(|e| ClientError::Connection {
                    operation: "start",
                    reason: format!("adapter initialization failed: {e}"),
                    elapsed: guard.elapsed(),
                    source: Some(e),
                })
        });
        let remaining = guard.remaining(self.config.timeouts.connect());
        with_timeout("start", remaining, TimeoutKind::Connect, initialize).await?;
        self.adapter_initialized.store(true, Ordering::Release);
        debug!(adapter = self.adapter.name(), "Adapter initialized");
        Ok(())
    }

    pub(crate) async fn start(self: &Arc<Self>) -> ClientResult<()> {
        const OPERATION: &str = "start";
        self.config.validate()?;

        match self.connection_state() {
            ConnectionState::Connected => return self.register_after_connect().await,
            ConnectionState::Disconnecting => {
                return Err(ClientError::invalid_state(
                    OPERATION,
                    ConnectionState::Disconnecting,
                    "Disconnected or Connected",
                ));
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        let mut guard = self.pending.begin(OperationKind::Connect, OPERATION)?;

        // The state may have moved while the slot was contended.
        let found = {
            let mut state = self.state.lock();
            let found = state.connection;
            if found == ConnectionState::Disconnected {
                state.connection = ConnectionState::Connecting;
            }
            found
        };
        match found {
            ConnectionState::Disconnected => {}
            ConnectionState::Connected => {
                drop(guard);
                return self.register_after_connect().await;
            }
            other => {
                return Err(ClientError::invalid_state(OPERATION, other, "Disconnected or Connected"));
            }
        }
        info!(uri = %self.config.uri, adapter = self.adapter.name(), "Connecting");
        self.bus.emit(ClientEvent::ConnectionConnecting);

        if let Err(e) = self.ensure_initialized(&guard).await {
            return Err(self.connect_failed(e));
        }

        let requested = guard
            .send_within(self.config.timeouts.connect(), TimeoutKind::Connect, async {
                self.adapter.connect().await.map_err(|e| ClientError::Connection {
                    operation: OPERATION,
                    reason: e.to_string(),
                    elapsed: guard.elapsed(),
                    source: Some(e),
                })
            })
            .await;
        if let Err(e) = requested {
            // An event may have decided the attempt while the request ran.
            let outcome = self.pending.settle_with(&OperationKind::Connect, |_| {
                self.state.lock().connection = ConnectionState::Disconnected;
                Err(e.clone())
            });
            if outcome == SettleOutcome::Delivered {
                self.bus.emit(ClientEvent::ConnectionFailed { reason: e.to_string() });
            }
        }

        let result = guard
            .wait_until(self.config.timeouts.connect(), TimeoutKind::Connect, || {
                self.state.lock().connection = ConnectionState::Disconnected;
            })
            .await;
        drop(guard);

        match result {
            Ok(()) => {
                info!("Connected");
                self.register_after_connect().await
            }
            Err(e @ ClientError::ConnectionTimeout { .. }) => {
                error!(operation = OPERATION, elapsed_ms = e.elapsed().as_millis() as u64, "Connection timed out");
                self.bus.emit(ClientEvent::ConnectionFailed { reason: e.to_string() });
                Err(e)
            }
            Err(e) => {
                if !matches!(e, ClientError::Cancelled { .. }) {
                    error!(operation = OPERATION, error = %e, "Connection failed");
                }
                Err(e)
            }
        }
    }

    /// Record a connect failure detected before the adapter was asked to connect
    fn connect_failed(&self, e: ClientError) -> ClientError {
        if matches!(e, ClientError::Cancelled { .. }) {
            return e;
        }
        self.state.lock().connection = ConnectionState::Disconnected;
        error!(operation = "start", error = %e, "Connection failed");
        self.bus.emit(ClientEvent::ConnectionFailed { reason: e.to_string() });
        e
    }

    async fn register_after_connect(self: &Arc<Self>) -> ClientResult<()> {
        if !self.config.registration.auto_register {
            return Ok(());
        }
        match self.register().await {
            // A registration started elsewhere is still running; report it as
            // the caller's own operation.
            Err(ClientError::AlreadyInProgress { .. }) => {
                Err(ClientError::AlreadyInProgress { operation: "start" })
            }
            other => other,
        }
    }

    pub(crate) async fn stop(self: &Arc<Self>) -> ClientResult<()> {
        const OPERATION: &str = "stop";
        let mut guard = self.pending.begin(OperationKind::Disconnect, OPERATION)?;

        let cancelled = self
            .pending
            .cancel_matching(|kind| *kind != OperationKind::Disconnect);
        let register_interrupted = cancelled.contains(&OperationKind::Register);
        if !cancelled.is_empty() {
            debug!(operation = OPERATION, ?cancelled, "Cancelled in-flight operations");
        }

        let (previous, registration) = {
            let mut state = self.state.lock();
            let previous = state.connection;
            if previous != ConnectionState::Disconnected {
                state.connection = ConnectionState::Disconnecting;
            }
            (previous, state.registration.state)
        };
        if previous == ConnectionState::Disconnected {
            debug!("Already disconnected");
            return Ok(());
        }
        info!(from = %previous, "Disconnecting");
        self.bus.emit(ClientEvent::ConnectionDisconnecting);

        for call_id in self.lines.live_ids() {
            if let Err(e) = self.hangup(call_id).await {
                warn!(%call_id, error = %e, "Hangup during teardown failed");
            }
        }

        let bound = matches!(
            registration,
            RegistrationState::Registered | RegistrationState::Unregistering
        );
        if bound || register_interrupted {
            self.teardown_unregister().await;
        }
        self.clear_registration();

        // The disconnect budget starts once calls and binding are torn down.
        let deadline = guard.elapsed() + self.config.timeouts.disconnect();
        let requested = guard
            .send_within(deadline, TimeoutKind::Disconnect, async {
                self.adapter
                    .disconnect()
                    .await
                    .map_err(|e| ClientError::from_adapter(OPERATION, guard.elapsed(), e))
            })
            .await;
        match requested {
            Ok(()) => {
                if let Err(e) = guard.wait_until(deadline, TimeoutKind::Disconnect, || {}).await {
                    warn!(operation = OPERATION, error = %e, "No disconnect confirmation from adapter");
                }
            }
            Err(e) => warn!(operation = OPERATION, error = %e, "Adapter disconnect failed"),
        }
        drop(guard);

        self.finish_disconnect(None);
        info!("Disconnected");
        Ok(())
    }

    /// Best-effort unregistration while tearing down; failures are only logged
    async fn teardown_unregister(&self) {
        const OPERATION: &str = "stop";
        let Ok(mut guard) = self.pending.begin(OperationKind::Unregister, OPERATION) else {
            warn!("Unregister slot busy during teardown, skipping");
            return;
        };
        self.state.lock().registration.state = RegistrationState::Unregistering;
        self.bus.emit(ClientEvent::RegistrationUnregistering);

        let deadline = self.config.timeouts.unregister();
        let requested = guard
            .send_within(deadline, TimeoutKind::Unregister, async {
                self.adapter
                    .unregister()
                    .await
                    .map_err(|e| ClientError::from_adapter(OPERATION, guard.elapsed(), e))
            })
            .await;
        if let Err(e) = requested {
            warn!(operation = OPERATION, error = %e, "Unregister during teardown failed");
            return;
        }
        if let Err(e) = guard
            .wait_until(deadline, TimeoutKind::Unregister, || {})
            .await
        {
            warn!(operation = OPERATION, error = %e, "Unregister during teardown not confirmed");
        }
    }

    /// Drop the binding locally, announcing it unless already unregistered
    pub(crate) fn clear_registration(&self) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.registration.state != RegistrationState::Unregistered;
            state.registration.clear();
            changed
        };
        if changed {
            self.bus.emit(ClientEvent::RegistrationUnregistered);
        }
    }

    /// Settle on Disconnected, announcing it unless already there
    pub(crate) fn finish_disconnect(&self, reason: Option<String>) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.connection != ConnectionState::Disconnected;
            state.connection = ConnectionState::Disconnected;
            state.registration.clear();
            changed
        };
        if changed {
            self.bus.emit(ClientEvent::ConnectionDisconnected { reason });
        }
    }
}
