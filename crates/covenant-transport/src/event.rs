//! Transport notifications and the observer list that delivers them.
//!
//! Observers are plain synchronous callbacks invoked in registration order
//! on whatever task raised the event. They must not block; anything that
//! needs to await should use [`Listeners::channel`], which forwards events
//! into an unbounded channel and returns immediately.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::TransportError;

/// Something a transport wants the outside world to know about.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A session was established by an explicit `start`.
    Connected,

    /// The transport was stopped (or gave up). Emitted once per start/stop
    /// cycle.
    Disconnected,

    /// A decoded envelope arrived.
    CommandReceived { will: String, obj: Option<Value> },

    /// Something went wrong. The transport decides whether it recovers.
    Error(Arc<TransportError>),

    /// The reliable transport is about to wait before reconnection
    /// attempt number `attempt` (1-based).
    Reconnecting { attempt: u32 },

    /// The reliable transport re-established a session after a failure.
    Reconnected,
}

impl TransportEvent {
    pub(crate) fn error(err: TransportError) -> Self {
        Self::Error(Arc::new(err))
    }
}

/// Handle returned by [`Listeners::add`], used to remove the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Arc<dyn Fn(&TransportEvent) + Send + Sync>;
type CallbackList = RwLock<Vec<(ListenerId, Callback)>>;

/// An ordered list of transport observers.
///
/// Cloning is cheap and every clone shares the same list.
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Arc<CallbackList>,
    next_id: Arc<AtomicU64>,
}

impl Listeners {
    /// Creates an empty observer list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer. Later observers see each event after
    /// earlier ones.
    pub fn add<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Removes an observer. Returns `false` if it was already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        remove_from(&self.inner, id)
    }

    /// Registers an observer that forwards every event into a channel.
    ///
    /// The observer unregisters itself the first time it finds the
    /// receiver dropped.
    pub fn channel(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let list: Weak<CallbackList> = Arc::downgrade(&self.inner);
        let id_slot: Arc<RwLock<Option<ListenerId>>> = Arc::default();
        let slot = Arc::clone(&id_slot);
        let id = self.add(move |event| {
            if tx.send(event.clone()).is_err() {
                let id = *slot.read().unwrap_or_else(PoisonError::into_inner);
                if let (Some(id), Some(list)) = (id, list.upgrade()) {
                    remove_from(&list, id);
                }
            }
        });
        *id_slot.write().unwrap_or_else(PoisonError::into_inner) = Some(id);
        rx
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every observer in registration order.
    ///
    /// The list is snapshotted first, so observers may add or remove
    /// observers without deadlocking. A panicking observer is logged and
    /// skipped; the rest still run.
    pub fn emit(&self, event: TransportEvent) {
        let snapshot: Vec<Callback> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                tracing::error!(?event, "transport observer panicked");
            }
        }
    }
}

fn remove_from(list: &CallbackList, id: ListenerId) -> bool {
    let mut list = list.write().unwrap_or_else(PoisonError::into_inner);
    let before = list.len();
    list.retain(|(existing, _)| *existing != id);
    list.len() != before
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}
