//! Store lifecycle and operation events
//!
//! Observers are plain callbacks invoked synchronously, in registration
//! order, on the task that emits the event. Events are not buffered: an
//! observer registered after an event fired never sees it.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::session::SessionData;

/// Events published by a store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Init,
    Connecting,
    Connected,
    Disconnected,
    /// A deferred connection attempt failed
    Error(String),
    Get(String),
    Set(String),
    /// Fired alongside `Set` on every write, created or updated
    Upsert(String),
    Touch(String, SessionData),
    Destroy(String),
    All(Vec<SessionData>),
}

/// Event names observers subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Init,
    Connecting,
    Connected,
    Disconnected,
    Error,
    Get,
    Set,
    Upsert,
    Touch,
    Destroy,
    All,
}

impl StoreEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StoreEvent::Init => EventKind::Init,
            StoreEvent::Connecting => EventKind::Connecting,
            StoreEvent::Connected => EventKind::Connected,
            StoreEvent::Disconnected => EventKind::Disconnected,
            StoreEvent::Error(_) => EventKind::Error,
            StoreEvent::Get(_) => EventKind::Get,
            StoreEvent::Set(_) => EventKind::Set,
            StoreEvent::Upsert(_) => EventKind::Upsert,
            StoreEvent::Touch(..) => EventKind::Touch,
            StoreEvent::Destroy(_) => EventKind::Destroy,
            StoreEvent::All(_) => EventKind::All,
        }
    }
}

/// Handle returned by subscriptions, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: Option<EventKind>,
    once: bool,
    observer: Observer,
}

/// Synchronous fan-out of [`StoreEvent`]s.
///
/// Cloning yields a handle to the same set of observers.
#[derive(Clone, Default)]
pub struct EventNotifier {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    next_id: Arc<AtomicU64>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe every event of `kind`
    pub fn on<F>(&self, kind: EventKind, observer: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), false, Arc::new(observer))
    }

    /// Observe the next event of `kind` only
    pub fn once<F>(&self, kind: EventKind, observer: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), true, Arc::new(observer))
    }

    /// Observe all events
    pub fn on_any<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.subscribe(None, false, Arc::new(observer))
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Number of live subscriptions
    pub fn observer_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Deliver an event to every matching observer
    pub fn emit(&self, event: StoreEvent) {
        let kind = event.kind();

        // Observers run without the lock held so they may subscribe or
        // unsubscribe from inside the callback.
        let observers: Vec<Observer> = {
            let mut subscriptions = self.subscriptions.write();
            let matching = subscriptions
                .iter()
                .filter(|s| s.kind.map_or(true, |k| k == kind))
                .map(|s| Arc::clone(&s.observer))
                .collect();
            subscriptions.retain(|s| !(s.once && s.kind == Some(kind)));
            matching
        };

        tracing::trace!(?kind, observers = observers.len(), "emitting store event");
        for observer in observers {
            observer(&event);
        }
    }

    fn subscribe(&self, kind: Option<EventKind>, once: bool, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription {
            id,
            kind,
            once,
            observer,
        });
        id
    }
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("observers", &self.observer_count())
            .finish()
    }
}
