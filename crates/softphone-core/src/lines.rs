//! Multi-line coordination
//!
//! [`MultiLineManager`] exclusively owns every [`CallSession`]. It enforces the
//! line limit, hands out line numbers, tracks which line is active and purges
//! terminated sessions once their drain window has elapsed.
//!
//! Terminated sessions keep their line until they are purged, so hosts can
//! still read the final [`CallInfo`] from `call:ended` handlers.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::call::{CallId, CallInfo, CallSession};
use crate::dtmf::DtmfManager;
use crate::error::{ClientError, ClientResult};
use crate::event_bus::{EventBus, SubscriptionId};
use crate::events::{ClientEvent, EventKind};

#[derive(Debug, Default)]
struct LineTable {
    sessions: IndexMap<CallId, CallSession>,
    active: Option<CallId>,
    total_created: u64,
}

impl LineTable {
    fn lowest_free_line(&self, max_lines: usize) -> Option<usize> {
        (1..=max_lines).find(|line| !self.sessions.values().any(|s| s.line() == *line))
    }
}

/// Owner of all call sessions
pub struct MultiLineManager {
    table: Mutex<LineTable>,
    max_lines: usize,
    drain_window: Duration,
    bus: Arc<EventBus>,
    weak_self: Weak<MultiLineManager>,
    subscription: SubscriptionId,
}

impl std::fmt::Debug for MultiLineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("MultiLineManager")
            .field("sessions", &table.sessions.len())
            .field("active", &table.active)
            .field("max_lines", &self.max_lines)
            .finish()
    }
}

impl MultiLineManager {
    /// Create the manager and subscribe it to `call:ended` for purging
    pub fn new(max_lines: usize, drain_window: Duration, bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<MultiLineManager>| {
            let purge_target = weak.clone();
            let subscription = bus.subscribe(EventKind::CallEnded, move |event| {
                let (Some(call_id), Some(lines)) = (event.call_id(), purge_target.upgrade()) else {
                    return;
                };
                if lines.contains(&call_id) {
                    lines.schedule_purge(call_id);
                }
            });
            Self {
                table: Mutex::new(LineTable::default()),
                max_lines,
                drain_window,
                bus,
                weak_self: weak.clone(),
                subscription,
            }
        })
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    pub fn drain_window(&self) -> Duration {
        self.drain_window
    }

    /// Sessions held, terminated ones in their drain window included
    pub fn len(&self) -> usize {
        self.table.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions that have not reached Terminated
    pub fn live_count(&self) -> usize {
        self.table
            .lock()
            .sessions
            .values()
            .filter(|s| !s.state().is_terminated())
            .count()
    }

    /// Sessions ever inserted
    pub fn total_created(&self) -> u64 {
        self.table.lock().total_created
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.table.lock().sessions.contains_key(call_id)
    }

    /// Take ownership of `session` on the lowest free line
    pub fn insert(&self, mut session: CallSession, operation: &'static str) -> ClientResult<usize> {
        let mut table = self.table.lock();
        if table.sessions.len() >= self.max_lines {
            debug!(operation, max = self.max_lines, "No free line");
            return Err(ClientError::LineLimitExceeded {
                operation,
                max: self.max_lines,
            });
        }
        let line = table
            .lowest_free_line(self.max_lines)
            .ok_or(ClientError::LineLimitExceeded {
                operation,
                max: self.max_lines,
            })?;
        session.set_line(line);
        let call_id = session.id();
        table.sessions.insert(call_id, session);
        table.total_created += 1;
        debug!(%call_id, line, "Session placed on line");
        Ok(line)
    }

    /// Run `f` against the session, if present
    pub fn with_session<R>(&self, call_id: &CallId, f: impl FnOnce(&mut CallSession) -> R) -> Option<R> {
        self.table.lock().sessions.get_mut(call_id).map(f)
    }

    /// Like [`with_session`](Self::with_session) but reports unknown ids
    pub fn try_with_session<R>(
        &self,
        operation: &'static str,
        call_id: &CallId,
        f: impl FnOnce(&mut CallSession) -> R,
    ) -> ClientResult<R> {
        self.with_session(call_id, f)
            .ok_or_else(|| ClientError::not_found(operation, *call_id))
    }

    pub fn info(&self, call_id: &CallId) -> Option<CallInfo> {
        self.with_session(call_id, |s| s.info())
    }

    /// Snapshots in line order
    pub fn calls(&self) -> Vec<CallInfo> {
        let table = self.table.lock();
        let mut calls: Vec<CallInfo> = table.sessions.values().map(CallSession::info).collect();
        calls.sort_by_key(|c| c.line);
        calls
    }

    /// Ids of sessions that have not reached Terminated
    pub fn live_ids(&self) -> Vec<CallId> {
        self.table
            .lock()
            .sessions
            .values()
            .filter(|s| !s.state().is_terminated())
            .map(CallSession::id)
            .collect()
    }

    pub fn dtmf(&self, call_id: &CallId) -> Option<Arc<DtmfManager>> {
        self.with_session(call_id, |s| s.dtmf().clone())
    }

    /// Drop a session that never became visible (failed call setup).
    /// No event is emitted.
    pub fn discard(&self, call_id: &CallId) -> Option<CallSession> {
        let session = {
            let mut table = self.table.lock();
            if table.active == Some(*call_id) {
                table.active = None;
            }
            table.sessions.shift_remove(call_id)
        };
        if let Some(session) = &session {
            session.dtmf().shutdown();
            debug!(%call_id, line = session.line(), "Session discarded");
        }
        session
    }

    /// Make `call_id` active if no line is active yet
    pub fn activate_if_idle(&self, call_id: &CallId) {
        let event = {
            let mut table = self.table.lock();
            if table.active.is_some() {
                return;
            }
            let Some(line) = table.sessions.get(call_id).map(CallSession::line) else {
                return;
            };
            table.active = Some(*call_id);
            ClientEvent::LineActivated {
                call_id: *call_id,
                line,
                previous: None,
            }
        };
        self.bus.emit(event);
    }

    /// Designate the active line. Bookkeeping only: nothing is signaled and
    /// the previously active call keeps its state.
    pub fn set_active(&self, call_id: &CallId) -> ClientResult<()> {
        let event = {
            let mut table = self.table.lock();
            let Some(session) = table.sessions.get(call_id) else {
                return Err(ClientError::not_found("set_active_line", *call_id));
            };
            if session.state().is_terminated() {
                return Err(ClientError::invalid_state("set_active_line", session.state(), "a live call"));
            }
            let line = session.line();
            if table.active == Some(*call_id) {
                return Ok(());
            }
            let previous = table.active.replace(*call_id);
            ClientEvent::LineActivated {
                call_id: *call_id,
                line,
                previous,
            }
        };
        self.bus.emit(event);
        Ok(())
    }

    pub fn active_line(&self) -> Option<CallId> {
        self.table.lock().active
    }

    /// Purge a terminated session now. Live sessions are left alone.
    pub fn release(&self, call_id: &CallId) -> bool {
        let line = {
            let mut table = self.table.lock();
            match table.sessions.get(call_id) {
                Some(session) if session.state().is_terminated() => {}
                _ => return false,
            }
            if table.active == Some(*call_id) {
                table.active = None;
            }
            match table.sessions.shift_remove(call_id) {
                Some(session) => session.line(),
                None => return false,
            }
        };
        info!(%call_id, line, "Line released");
        self.bus.emit(ClientEvent::LineReleased {
            call_id: *call_id,
            line,
        });
        true
    }

    /// Purge `call_id` once the drain window has elapsed
    pub fn schedule_purge(&self, call_id: CallId) {
        let Ok(handle) = Handle::try_current() else {
            warn!(%call_id, "No runtime to schedule the purge on, releasing now");
            self.release(&call_id);
            return;
        };
        let lines = self.weak_self.clone();
        let window = self.drain_window;
        handle.spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(lines) = lines.upgrade() {
                lines.release(&call_id);
            }
        });
    }
}

impl Drop for MultiLineManager {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}
