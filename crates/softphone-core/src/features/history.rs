//! Call history
//!
//! Records the final [`CallInfo`] of every call as it ends. The snapshot is
//! taken inside the `call:ended` handler, while the session still holds its
//! line.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use crate::call::{CallDirection, CallHandle, CallInfo, CallOptions, EndCause};
use crate::client::{SipClient, WeakSipClient};
use crate::error::{ClientError, ClientResult};
use crate::event_bus::{EventBus, SubscriptionId};
use crate::events::{ClientEvent, EventKind};

/// One finished call
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub info: CallInfo,
    pub cause: EndCause,
}

impl CallRecord {
    /// Inbound call that was never answered
    pub fn is_missed(&self) -> bool {
        self.info.direction == CallDirection::Inbound && self.info.answered_at.is_none()
    }
}

/// Bounded log of finished calls, oldest first
pub struct CallHistory {
    client: WeakSipClient,
    bus: Arc<EventBus>,
    subscription: SubscriptionId,
    records: Arc<Mutex<VecDeque<CallRecord>>>,
}

impl CallHistory {
    /// Start recording; at most `capacity` calls are kept
    pub fn new(client: &SipClient, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let records = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let bus = client.events().clone();

        let sink = records.clone();
        let subscription = bus.subscribe(EventKind::CallEnded, move |event| {
            let ClientEvent::CallEnded { info, cause } = event else {
                return;
            };
            let mut records = sink.lock();
            if records.len() == capacity {
                records.pop_front();
            }
            records.push_back(CallRecord {
                info: info.clone(),
                cause: *cause,
            });
            debug!(call_id = %info.call_id, %cause, "Call recorded");
        });

        Self {
            client: client.downgrade(),
            bus,
            subscription,
            records,
        }
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn last(&self) -> Option<CallRecord> {
        self.records.lock().back().cloned()
    }

    pub fn missed(&self) -> Vec<CallRecord> {
        self.records.lock().iter().filter(|r| r.is_missed()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Call the remote party of the most recent record again
    pub async fn redial_last(&self) -> ClientResult<CallHandle> {
        let remote = self
            .last()
            .map(|r| r.info.remote)
            .ok_or_else(|| ClientError::invalid_state("redial", "empty history", "a recorded call"))?;
        let client = self
            .client
            .upgrade()
            .ok_or_else(|| ClientError::invalid_state("redial", "client dropped", "a live client"))?;
        client.call(&remote, CallOptions::default()).await
    }
}

impl Drop for CallHistory {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription);
    }
}

impl std::fmt::Debug for CallHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHistory").field("records", &self.len()).finish()
    }
}
