//! Typed publish/subscribe hub
//!
//! Every component of the core talks to every other component through the
//! [`EventBus`] rather than through direct references. Hosts use the same bus
//! to drive their presentation layer.
//!
//! # Delivery rules
//!
//! - [`EventBus::emit`] delivers synchronously to a snapshot of the matching
//!   subscribers, in registration order. Subscribing or unsubscribing from
//!   inside a handler only affects later emits.
//! - A once-handler is claimed and removed from the registry before it runs,
//!   so a handler that re-enters `emit` can never fire itself twice.
//! - [`EventBus::emit_async`] queues the event for a per-bus dispatcher task.
//!   Queued events are delivered in the order they were queued; there is no
//!   backpressure.
//! - After synchronous handlers ran, the event is forwarded to the broadcast
//!   channel behind [`EventBus::stream`].
//!
//! ```rust
//! use rvoip_softphone_core::event_bus::EventBus;
//! use rvoip_softphone_core::events::{ClientEvent, EventKind};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let bus = EventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! bus.subscribe_once(EventKind::ConnectionConnected, move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! bus.emit(ClientEvent::ConnectionConnected);
//! bus.emit(ClientEvent::ConnectionConnected);
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! assert_eq!(bus.subscription_count(), 0);
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace, warn};

use crate::events::{ClientEvent, EventKind};

/// Capacity of the broadcast channel behind [`EventBus::stream`]
const STREAM_CAPACITY: usize = 256;

/// Token returned by `subscribe*`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handler signature
pub type EventHandler = dyn Fn(&ClientEvent) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    All,
    Kind(EventKind),
}

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    once: bool,
    fired: AtomicBool,
    handler: Arc<EventHandler>,
}

impl Subscription {
    fn matches(&self, kind: EventKind) -> bool {
        match self.topic {
            Topic::All => true,
            Topic::Kind(k) => k == kind,
        }
    }
}

/// Publish/subscribe hub for [`ClientEvent`]s
pub struct EventBus {
    subscriptions: Mutex<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
    broadcast: broadcast::Sender<ClientEvent>,
    deferred: OnceLock<mpsc::UnboundedSender<ClientEvent>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            broadcast,
            deferred: OnceLock::new(),
        }
    }

    fn insert(&self, topic: Topic, once: bool, handler: Arc<EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push(Arc::new(Subscription {
            id,
            topic,
            once,
            fired: AtomicBool::new(false),
            handler,
        }));
        trace!(subscription = id.0, once, "subscribed");
        id
    }

    /// Subscribe to every occurrence of `kind`
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.insert(Topic::Kind(kind), false, Arc::new(handler))
    }

    /// Subscribe to the next occurrence of `kind` only
    pub fn subscribe_once<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.insert(Topic::Kind(kind), true, Arc::new(handler))
    }

    /// Subscribe to every event
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.insert(Topic::All, false, Arc::new(handler))
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.iter().position(|s| s.id == id) {
            Some(pos) => {
                subscriptions.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Number of registered subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Deliver `event` synchronously
    pub fn emit(&self, event: ClientEvent) {
        let kind = event.kind();
        let snapshot: Vec<Arc<Subscription>> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.matches(kind))
            .cloned()
            .collect();

        debug!(event = kind.as_str(), handlers = snapshot.len(), "emit");

        for subscription in snapshot {
            if subscription.once {
                if subscription.fired.swap(true, Ordering::AcqRel) {
                    continue;
                }
                self.unsubscribe(subscription.id);
            }
            (subscription.handler)(&event);
        }

        // No receivers is fine.
        let _ = self.broadcast.send(event);
    }

    /// Queue `event` for delivery from the bus dispatcher task.
    ///
    /// The dispatcher is started on first use. If that first use happens
    /// outside a tokio runtime the event is delivered inline instead.
    pub fn emit_async(self: &Arc<Self>, event: ClientEvent) {
        let sender = match self.deferred.get() {
            Some(sender) => sender,
            None => {
                let Ok(runtime) = Handle::try_current() else {
                    debug!(event = event.kind().as_str(), "No runtime for deferred delivery, emitting inline");
                    self.emit(event);
                    return;
                };
                self.deferred.get_or_init(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    runtime.spawn(Self::dispatch_deferred(Arc::downgrade(self), rx));
                    tx
                })
            }
        };
        if let Err(e) = sender.send(event) {
            warn!(event = e.0.kind().as_str(), "deferred dispatcher is gone, dropping event");
        }
    }

    async fn dispatch_deferred(bus: Weak<EventBus>, mut rx: mpsc::UnboundedReceiver<ClientEvent>) {
        while let Some(event) = rx.recv().await {
            match bus.upgrade() {
                Some(bus) => bus.emit(event),
                None => break,
            }
        }
        trace!("deferred dispatcher stopped");
    }

    /// Receiver for async consumption of every emitted event
    pub fn receiver(&self) -> broadcast::Receiver<ClientEvent> {
        self.broadcast.subscribe()
    }

    /// [`Stream`](tokio_stream::Stream) of every emitted event.
    ///
    /// Lagging consumers observe `Err(Lagged)` items rather than blocking
    /// emitters.
    pub fn stream(&self) -> BroadcastStream<ClientEvent> {
        BroadcastStream::new(self.receiver())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
