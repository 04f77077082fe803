//! DTMF tone sequencing
//!
//! Each call owns one [`DtmfManager`]: a FIFO of [`DtmfQueueEntry`]s drained by
//! a single worker task, so at most one tone is in flight per call. A tone is
//! handed to the adapter, then the worker waits for the inter-tone gap before
//! taking the next one.
//!
//! Events published on the bus:
//!
//! | event          | when                                              |
//! |----------------|---------------------------------------------------|
//! | `dtmf:sent`    | the adapter accepted a tone                       |
//! | `dtmf:failed`  | the adapter refused a tone                        |
//! | `dtmf:cleared` | the queue was emptied by `clear()` or on shutdown |
//! | `dtmf:drained` | the worker ran out of tones                       |
//!
//! The manager shuts itself down when its call ends, through its own
//! `call:ended` subscription.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::adapter::SignalingAdapter;
use crate::call::CallId;
use crate::error::{ClientError, ClientResult};
use crate::event_bus::{EventBus, SubscriptionId};
use crate::events::{ClientEvent, EventKind};

/// DTMF tone definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DtmfTone {
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    Star,
    Pound,
    A,
    B,
    C,
    D,
}

impl DtmfTone {
    pub fn to_char(self) -> char {
        match self {
            Self::Digit0 => '0',
            Self::Digit1 => '1',
            Self::Digit2 => '2',
            Self::Digit3 => '3',
            Self::Digit4 => '4',
            Self::Digit5 => '5',
            Self::Digit6 => '6',
            Self::Digit7 => '7',
            Self::Digit8 => '8',
            Self::Digit9 => '9',
            Self::Star => '*',
            Self::Pound => '#',
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Digit0),
            '1' => Some(Self::Digit1),
            '2' => Some(Self::Digit2),
            '3' => Some(Self::Digit3),
            '4' => Some(Self::Digit4),
            '5' => Some(Self::Digit5),
            '6' => Some(Self::Digit6),
            '7' => Some(Self::Digit7),
            '8' => Some(Self::Digit8),
            '9' => Some(Self::Digit9),
            '*' => Some(Self::Star),
            '#' => Some(Self::Pound),
            'A' | 'a' => Some(Self::A),
            'B' | 'b' => Some(Self::B),
            'C' | 'c' => Some(Self::C),
            'D' | 'd' => Some(Self::D),
            _ => None,
        }
    }

    /// Parse a whole digit string; fails on the first invalid character
    pub fn parse_sequence(digits: &str) -> ClientResult<Vec<DtmfTone>> {
        digits
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| {
                Self::from_char(c).ok_or(ClientError::InvalidDtmf {
                    operation: "send_dtmf",
                    tone: c,
                })
            })
            .collect()
    }
}

impl fmt::Display for DtmfTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// Tone timing and failure policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DtmfOptions {
    /// Tone duration handed to the adapter
    pub duration_ms: u64,
    /// Pause after each tone
    pub inter_tone_gap_ms: u64,
    /// Clear the remaining queue after the first failed tone
    pub fail_fast: bool,
}

impl Default for DtmfOptions {
    fn default() -> Self {
        Self {
            duration_ms: 100,
            inter_tone_gap_ms: 70,
            fail_fast: false,
        }
    }
}

/// One queued tone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtmfQueueEntry {
    pub tone: DtmfTone,
    pub duration: Duration,
    pub gap: Duration,
    pub enqueued_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<DtmfQueueEntry>,
    worker_running: bool,
    in_flight: Option<DtmfTone>,
    /// Set by `clear()` so the worker does not report a drain it did not do
    suppress_drained: bool,
    closed: bool,
    sent: u64,
    failed: u64,
    subscription: Option<SubscriptionId>,
}

/// Per-call DTMF queue and sequencer
pub struct DtmfManager {
    call_id: CallId,
    adapter: Arc<dyn SignalingAdapter>,
    bus: Arc<EventBus>,
    options: DtmfOptions,
    state: Mutex<QueueState>,
    shutdown: CancellationToken,
    /// Runtime the worker is spawned on, so hosts may enqueue from any thread
    runtime: Option<Handle>,
}

impl fmt::Debug for DtmfManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DtmfManager")
            .field("call_id", &self.call_id)
            .field("queued", &state.queue.len())
            .field("in_flight", &state.in_flight)
            .field("closed", &state.closed)
            .finish()
    }
}

impl DtmfManager {
    /// Create the manager for `call_id` and hook it to that call's `call:ended`
    pub fn new(
        call_id: CallId,
        adapter: Arc<dyn SignalingAdapter>,
        bus: Arc<EventBus>,
        options: DtmfOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<DtmfManager>| {
            let weak = weak.clone();
            let subscription = bus.subscribe(EventKind::CallEnded, move |event| {
                if event.call_id() != Some(call_id) {
                    return;
                }
                if let Some(manager) = weak.upgrade() {
                    manager.shutdown();
                }
            });
            Self {
                call_id,
                adapter,
                bus,
                options,
                state: Mutex::new(QueueState {
                    subscription: Some(subscription),
                    ..QueueState::default()
                }),
                shutdown: CancellationToken::new(),
                runtime: Handle::try_current().ok(),
            }
        })
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Tones waiting behind the one in flight
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Tone currently being handed to the adapter
    pub fn in_flight(&self) -> Option<DtmfTone> {
        self.state.lock().in_flight
    }

    /// (sent, failed) counters
    pub fn counters(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.sent, state.failed)
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Validate `digits` and append them to the queue.
    ///
    /// Nothing is appended unless every character is a valid tone. Returns the
    /// number of tones queued. Callable from any thread as long as the
    /// manager was created inside a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, digits: &str) -> ClientResult<usize> {
        let tones = DtmfTone::parse_sequence(digits)?;
        if tones.is_empty() {
            return Ok(0);
        }
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            warn!(call_id = %self.call_id, "No tokio runtime to play DTMF on");
            return Err(ClientError::invalid_state(
                "send_dtmf",
                "outside a tokio runtime",
                "a running tokio runtime",
            ));
        };

        let now = Instant::now();
        let duration = Duration::from_millis(self.options.duration_ms);
        let gap = Duration::from_millis(self.options.inter_tone_gap_ms);

        let spawn_worker = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ClientError::invalid_state("send_dtmf", "Terminated", "Active"));
            }
            state.queue.extend(tones.iter().map(|&tone| DtmfQueueEntry {
                tone,
                duration,
                gap,
                enqueued_at: now,
            }));
            state.suppress_drained = false;
            !std::mem::replace(&mut state.worker_running, true)
        };

        debug!(call_id = %self.call_id, count = tones.len(), "DTMF tones queued");
        if spawn_worker {
            runtime.spawn(self.clone().run_worker());
        }
        Ok(tones.len())
    }

    /// Drop every queued tone. The tone in flight, if any, completes.
    pub fn clear(&self) -> usize {
        let discarded = {
            let mut state = self.state.lock();
            let discarded = state.queue.len();
            state.queue.clear();
            if state.worker_running {
                state.suppress_drained = true;
            }
            discarded
        };
        debug!(call_id = %self.call_id, discarded, "DTMF queue cleared");
        self.bus.emit(ClientEvent::DtmfCleared {
            call_id: self.call_id,
            discarded,
        });
        discarded
    }

    /// Stop the worker for good; the remainder is reported as cleared
    pub fn shutdown(&self) {
        let (discarded, subscription) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let discarded = state.queue.len();
            state.queue.clear();
            (discarded, state.subscription.take())
        };
        self.shutdown.cancel();
        if let Some(id) = subscription {
            self.bus.unsubscribe(id);
        }
        trace!(call_id = %self.call_id, discarded, "DTMF manager shut down");
        if discarded > 0 {
            self.bus.emit(ClientEvent::DtmfCleared {
                call_id: self.call_id,
                discarded,
            });
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(entry) => {
                        state.in_flight = Some(entry.tone);
                        Some(entry)
                    }
                    None => {
                        state.worker_running = false;
                        state.in_flight = None;
                        let drained = !state.closed && !std::mem::take(&mut state.suppress_drained);
                        drop(state);
                        if drained {
                            self.bus.emit(ClientEvent::DtmfDrained { call_id: self.call_id });
                        }
                        None
                    }
                }
            };
            let Some(entry) = next else {
                break;
            };

            trace!(
                call_id = %self.call_id,
                tone = %entry.tone,
                queued_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                "Sending DTMF tone"
            );
            let result = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.stop_worker();
                    return;
                }
                result = self.adapter.send_dtmf(&self.call_id, entry.tone, entry.duration) => result,
            };

            match result {
                Ok(()) => {
                    self.state.lock().sent += 1;
                    self.bus.emit(ClientEvent::DtmfSent {
                        call_id: self.call_id,
                        tone: entry.tone,
                    });
                }
                Err(e) => {
                    warn!(call_id = %self.call_id, tone = %entry.tone, error = %e, "DTMF tone failed");
                    self.state.lock().failed += 1;
                    self.bus.emit(ClientEvent::DtmfFailed {
                        call_id: self.call_id,
                        tone: entry.tone,
                        reason: e.to_string(),
                    });
                    if self.options.fail_fast {
                        self.clear();
                    }
                }
            }
            self.state.lock().in_flight = None;

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.stop_worker();
                    return;
                }
                _ = tokio::time::sleep(entry.gap) => {}
            }
        }
    }

    fn stop_worker(&self) {
        let mut state = self.state.lock();
        state.worker_running = false;
        state.in_flight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::NullAdapter;

    #[test]
    fn tones_parse_case_insensitively() {
        assert_eq!(DtmfTone::from_char('a'), Some(DtmfTone::A));
        assert_eq!(DtmfTone::from_char('#'), Some(DtmfTone::Pound));
        assert_eq!(DtmfTone::from_char('x'), None);
        let tones = DtmfTone::parse_sequence("12*#").unwrap();
        assert_eq!(tones.len(), 4);
        assert_eq!(tones[3].to_char(), '#');
    }

    #[test]
    fn invalid_sequence_names_the_offending_tone() {
        match DtmfTone::parse_sequence("12x3") {
            Err(ClientError::InvalidDtmf { tone, .. }) => assert_eq!(tone, 'x'),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn enqueue_without_a_runtime_is_refused() {
        let bus = Arc::new(EventBus::new());
        let manager = DtmfManager::new(CallId::new(), Arc::new(NullAdapter), bus, DtmfOptions::default());
        let err = manager.enqueue("12").unwrap_err();
        assert!(matches!(err, ClientError::InvalidState { operation: "send_dtmf", .. }));
        assert_eq!(manager.pending(), 0);
    }

    #[test]
    fn enqueue_from_a_plain_thread_uses_the_creating_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let bus = Arc::new(EventBus::new());
        let sent = Arc::new(Mutex::new(0));
        {
            let sent = sent.clone();
            bus.subscribe(EventKind::DtmfSent, move |_| *sent.lock() += 1);
        }
        let manager = runtime.block_on(async {
            DtmfManager::new(CallId::new(), Arc::new(NullAdapter), bus, DtmfOptions::default())
        });

        let host = manager.clone();
        let queued = std::thread::spawn(move || host.enqueue("5"))
            .join()
            .unwrap();
        assert_eq!(queued.unwrap(), 1);

        runtime.block_on(async { tokio::time::sleep(Duration::from_secs(1)).await });
        assert_eq!(*sent.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_string_appends_nothing() {
        let bus = Arc::new(EventBus::new());
        let manager = DtmfManager::new(CallId::new(), Arc::new(NullAdapter), bus, DtmfOptions::default());
        assert!(manager.enqueue("12z").is_err());
        assert_eq!(manager.pending(), 0);
        assert!(manager.in_flight().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn queue_drains_in_order() {
        let bus = Arc::new(EventBus::new());
        let call_id = CallId::new();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let drained = Arc::new(Mutex::new(0));
        {
            let sent = sent.clone();
            bus.subscribe(EventKind::DtmfSent, move |event| {
                if let ClientEvent::DtmfSent { tone, .. } = event {
                    sent.lock().push(tone.to_char());
                }
            });
            let drained = drained.clone();
            bus.subscribe(EventKind::DtmfDrained, move |_| *drained.lock() += 1);
        }
        let manager = DtmfManager::new(call_id, Arc::new(NullAdapter), bus, DtmfOptions::default());
        assert_eq!(manager.enqueue("9#").unwrap(), 2);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*sent.lock(), vec!['9', '#']);
        assert_eq!(*drained.lock(), 1);
        assert_eq!(manager.counters(), (2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn call_end_shuts_the_queue_down() {
        let bus = Arc::new(EventBus::new());
        let call_id = CallId::new();
        let cleared = Arc::new(Mutex::new(None));
        {
            let cleared = cleared.clone();
            bus.subscribe(EventKind::DtmfCleared, move |event| {
                if let ClientEvent::DtmfCleared { discarded, .. } = event {
                    *cleared.lock() = Some(*discarded);
                }
            });
        }
        let options = DtmfOptions {
            inter_tone_gap_ms: 1_000,
            ..DtmfOptions::default()
        };
        let manager = DtmfManager::new(call_id, Arc::new(NullAdapter), bus.clone(), options);
        let subscriptions_with_manager = bus.subscription_count();
        manager.enqueue("1234").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Simulate the end of the call this queue belongs to.
        let mut session = crate::call::CallSession::new(
            call_id,
            crate::call::CallDirection::Outbound,
            "sip:bob@example.com",
            None,
            manager.clone(),
        );
        let ended = session.on_ended(crate::call::EndCause::Normal).unwrap();
        bus.emit(ended);

        assert!(manager.is_closed());
        assert_eq!(*cleared.lock(), Some(3));
        assert_eq!(bus.subscription_count(), subscriptions_with_manager - 1);
        assert!(matches!(manager.enqueue("5"), Err(ClientError::InvalidState { .. })));
    }
}
