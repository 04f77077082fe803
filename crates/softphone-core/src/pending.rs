//! Mutual-exclusion slots for asynchronous operations
//!
//! Every asynchronous operation of the orchestrator (connect, disconnect,
//! register, unregister, call setup, per-call control) occupies one slot keyed
//! by its [`OperationKind`] for as long as it runs. A second operation of the
//! same kind is refused with [`ClientError::AlreadyInProgress`]; operations of
//! different kinds proceed independently.
//!
//! A slot also carries:
//!
//! - a take-once completion sender. Whoever takes it (the adapter event that
//!   concludes the operation, the timeout branch, or `cancel`) decides the
//!   outcome; everyone arriving later is told the slot is stale.
//! - a [`CancellationToken`] so that `stop()` can abort the waiter.
//!
//! The slot is released when the [`PendingGuard`] is dropped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::call::CallId;
use crate::error::{ClientError, ClientResult};
use crate::timeout::{with_timeout, TimeoutKind};

/// Key of a pending operation slot
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Connect,
    Disconnect,
    Register,
    Unregister,
    /// Outbound call setup towards one target
    Call(String),
    /// Hold/resume/mute/transfer/answer on one call
    CallControl(CallId),
}

/// What happened to an attempt to conclude a pending operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// The waiter received the result
    Delivered,
    /// A slot exists but its outcome was already decided (timeout, cancel)
    Stale,
    /// No operation of that kind is outstanding
    NoPending,
}

struct Slot {
    id: u64,
    operation: &'static str,
    started: Instant,
    completion: Option<oneshot::Sender<ClientResult<()>>>,
    cancel: CancellationToken,
}

/// Table of outstanding operations
#[derive(Default)]
pub struct PendingOperations {
    slots: DashMap<OperationKind, Slot>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for PendingOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperations")
            .field("outstanding", &self.slots.len())
            .finish()
    }
}

impl PendingOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupy the slot for `kind`, or fail if it is taken
    pub fn begin(&self, kind: OperationKind, operation: &'static str) -> ClientResult<PendingGuard<'_>> {
        match self.slots.entry(kind.clone()) {
            Entry::Occupied(_) => {
                debug!(operation, ?kind, "Rejected: operation already in progress");
                Err(ClientError::AlreadyInProgress { operation })
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                let cancel = CancellationToken::new();
                let started = Instant::now();
                vacant.insert(Slot {
                    id,
                    operation,
                    started,
                    completion: Some(tx),
                    cancel: cancel.clone(),
                });
                trace!(operation, ?kind, id, "pending operation started");
                Ok(PendingGuard {
                    ops: self,
                    kind,
                    id,
                    operation,
                    started,
                    receiver: rx,
                    cancel,
                })
            }
        }
    }

    /// Whether an operation of `kind` is outstanding
    pub fn is_pending(&self, kind: &OperationKind) -> bool {
        self.slots.contains_key(kind)
    }

    /// Number of outstanding operations
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Conclude the operation of `kind`.
    ///
    /// `decide` runs only when this call takes the completion, while the slot
    /// is still locked, so a competing timeout cannot interleave with it. It
    /// receives the time elapsed since the operation began and returns the
    /// result handed to the waiter.
    pub fn settle_with<F>(&self, kind: &OperationKind, decide: F) -> SettleOutcome
    where
        F: FnOnce(Duration) -> ClientResult<()>,
    {
        let Some(mut slot) = self.slots.get_mut(kind) else {
            return SettleOutcome::NoPending;
        };
        match slot.completion.take() {
            Some(tx) => {
                let result = decide(slot.started.elapsed());
                let _ = tx.send(result);
                SettleOutcome::Delivered
            }
            None => SettleOutcome::Stale,
        }
    }

    pub fn settle(&self, kind: &OperationKind, result: ClientResult<()>) -> SettleOutcome {
        self.settle_with(kind, move |_| result)
    }

    /// Abort the operation of `kind`: its waiter observes `Cancelled` and the
    /// slot is freed immediately.
    pub fn cancel(&self, kind: &OperationKind) -> bool {
        let Some((_, mut slot)) = self.slots.remove(kind) else {
            return false;
        };
        slot.cancel.cancel();
        if let Some(tx) = slot.completion.take() {
            let _ = tx.send(Err(ClientError::Cancelled {
                operation: slot.operation,
                elapsed: slot.started.elapsed(),
            }));
        }
        debug!(operation = slot.operation, ?kind, "pending operation cancelled");
        true
    }

    /// Cancel every outstanding operation whose kind matches `predicate`
    pub fn cancel_matching<P>(&self, predicate: P) -> Vec<OperationKind>
    where
        P: Fn(&OperationKind) -> bool,
    {
        let kinds: Vec<OperationKind> = self
            .slots
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        kinds.into_iter().filter(|kind| self.cancel(kind)).collect()
    }

    /// Timeout side of the settled guard
    fn claim<F: FnOnce()>(&self, kind: &OperationKind, id: u64, apply: F) -> bool {
        let Some(mut slot) = self.slots.get_mut(kind) else {
            return false;
        };
        if slot.id != id {
            return false;
        }
        match slot.completion.take() {
            Some(_) => {
                apply();
                true
            }
            None => false,
        }
    }

    fn release(&self, kind: &OperationKind, id: u64) {
        self.slots.remove_if(kind, |_, slot| slot.id == id);
    }
}

/// Occupancy of one slot; releases it on drop
pub struct PendingGuard<'a> {
    ops: &'a PendingOperations,
    kind: OperationKind,
    id: u64,
    operation: &'static str,
    started: Instant,
    receiver: oneshot::Receiver<ClientResult<()>>,
    cancel: CancellationToken,
}

impl PendingGuard<'_> {
    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn cancelled_error(&self) -> ClientError {
        ClientError::Cancelled {
            operation: self.operation,
            elapsed: self.elapsed(),
        }
    }

    /// Wait until the operation is settled or cancelled
    pub async fn wait(&mut self) -> ClientResult<()> {
        tokio::select! {
            biased;
            result = &mut self.receiver => result.unwrap_or_else(|_| Err(ClientError::Cancelled {
                operation: self.operation,
                elapsed: self.started.elapsed(),
            })),
            _ = self.cancel.cancelled() => Err(self.cancelled_error()),
        }
    }

    /// Time left until `deadline`, measured from the start of the operation
    pub fn remaining(&self, deadline: Duration) -> Duration {
        deadline.saturating_sub(self.elapsed())
    }

    /// Wait for settlement until `deadline` after the operation began.
    ///
    /// On timeout, the slot's completion is claimed first; `on_timeout` runs
    /// only if the claim succeeds. If an event concluded the operation in the
    /// meantime, its result is returned instead of the timeout.
    pub async fn wait_until<F>(&mut self, deadline: Duration, kind: TimeoutKind, on_timeout: F) -> ClientResult<()>
    where
        F: FnOnce(),
    {
        let operation = self.operation;
        let remaining = self.remaining(deadline);
        match with_timeout(operation, remaining, kind, self.wait()).await {
            Err(e) if e.is_timeout() => {
                if self.ops.claim(&self.kind, self.id, on_timeout) {
                    Err(kind.into_error(operation, self.elapsed()))
                } else {
                    debug!(operation, "Deadline raced with settlement, settlement wins");
                    self.receiver.try_recv().unwrap_or_else(|_| Err(self.cancelled_error()))
                }
            }
            other => other,
        }
    }

    /// Run an adapter request while honoring cancellation of this slot
    pub async fn run<T, F>(&self, future: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled_error()),
            result = future => result,
        }
    }

    /// Send the adapter request under the same deadline as the wait that
    /// follows it.
    ///
    /// Only a failure of the request itself is returned. A request still
    /// outstanding when the deadline passes yields `Ok(())`; the subsequent
    /// [`wait_until`](Self::wait_until) then finds no time left, claims the
    /// slot and reports the timeout.
    pub async fn send_within<F>(&self, deadline: Duration, kind: TimeoutKind, future: F) -> ClientResult<()>
    where
        F: Future<Output = ClientResult<()>>,
    {
        match with_timeout(self.operation, self.remaining(deadline), kind, self.run(future)).await {
            Err(e) if e.is_timeout() => {
                debug!(
                    operation = self.operation,
                    elapsed_ms = self.elapsed().as_millis() as u64,
                    "Adapter request still outstanding at deadline"
                );
                Ok(())
            }
            other => other,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.ops.release(&self.kind, self.id);
        trace!(operation = self.operation, id = self.id, "pending operation released");
    }
}
