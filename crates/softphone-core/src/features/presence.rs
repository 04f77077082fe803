//! Presence watching
//!
//! Adapters decide whether presence exists at all. The watcher finds out with
//! the first subscription and remembers the answer, so hosts can hide
//! presence UI once the adapter reported it unsupported.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::client::{SipClient, WeakSipClient};
use crate::error::{ClientError, ClientResult};

const PRESENCE_EVENT: &str = "presence";

#[derive(Debug, Default)]
struct WatchState {
    supported: Option<bool>,
    suggestion: Option<String>,
    watched: BTreeSet<String>,
}

/// Tracks presence subscriptions made through a client
#[derive(Debug)]
pub struct PresenceWatcher {
    client: WeakSipClient,
    state: Mutex<WatchState>,
}

impl PresenceWatcher {
    pub fn new(client: &SipClient) -> Self {
        Self {
            client: client.downgrade(),
            state: Mutex::new(WatchState::default()),
        }
    }

    /// Subscribe to the presence of `target`.
    ///
    /// Fails fast with the recorded `AdapterNotSupported` once the adapter
    /// has refused presence.
    pub async fn watch(&self, target: &str) -> ClientResult<()> {
        const OPERATION: &str = "watch_presence";
        {
            let state = self.state.lock();
            if state.supported == Some(false) {
                return Err(ClientError::AdapterNotSupported {
                    operation: OPERATION,
                    capability: format!("subscribe:{PRESENCE_EVENT}"),
                    suggestion: state.suggestion.clone(),
                    elapsed: std::time::Duration::ZERO,
                });
            }
            if state.watched.contains(target) {
                return Ok(());
            }
        }
        let client = self
            .client
            .upgrade()
            .ok_or_else(|| ClientError::invalid_state(OPERATION, "client dropped", "a live client"))?;

        match client.subscribe(target, PRESENCE_EVENT).await {
            Ok(()) => {
                let mut state = self.state.lock();
                state.supported = Some(true);
                state.watched.insert(target.to_string());
                debug!(%target, "Watching presence");
                Ok(())
            }
            Err(ClientError::AdapterNotSupported {
                capability,
                suggestion,
                elapsed,
                ..
            }) => {
                info!(adapter = client.adapter_name(), ?suggestion, "Presence not available");
                let mut state = self.state.lock();
                state.supported = Some(false);
                state.suggestion = suggestion.clone();
                Err(ClientError::AdapterNotSupported {
                    operation: OPERATION,
                    capability,
                    suggestion,
                    elapsed,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Forget `target`; returns whether it was watched
    pub fn unwatch(&self, target: &str) -> bool {
        self.state.lock().watched.remove(target)
    }

    /// `None` until the first subscription attempt got an answer
    pub fn is_supported(&self) -> Option<bool> {
        self.state.lock().supported
    }

    /// Alternative offered by the adapter when presence is unsupported
    pub fn suggestion(&self) -> Option<String> {
        self.state.lock().suggestion.clone()
    }

    pub fn watched(&self) -> Vec<String> {
        self.state.lock().watched.iter().cloned().collect()
    }
}
