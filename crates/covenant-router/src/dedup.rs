//! Bounded memory of recently seen message ids.
//!
//! Chat platforms occasionally redeliver a message (after a reconnect, or
//! when the same event reaches us over two paths). The client asks this
//! cache before dispatching, so a redelivered `!command` runs once.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Capacity used by [`DedupCache::default`].
pub const DEFAULT_DEDUP_CAPACITY: usize = 1_000;

/// A FIFO set of message ids with a fixed capacity.
///
/// When full, inserting evicts the oldest id. Eviction order is insertion
/// order; seeing a duplicate does not refresh its position.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    seen: Mutex<Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupCache {
    /// Creates a cache remembering up to `capacity` ids (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            seen: Mutex::new(Seen {
                ids: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// Records `id` and returns `true` if it had not been seen.
    ///
    /// The check and the insert happen under one lock, so two concurrent
    /// deliveries of the same id can't both get `true`. An empty id is
    /// never recorded and always returns `true`.
    pub fn check_and_insert(&self, id: &str) -> bool {
        if id.is_empty() {
            return true;
        }

        let mut seen = self.lock();
        if seen.ids.contains(id) {
            tracing::debug!(id, "duplicate message suppressed");
            return false;
        }

        if seen.order.len() >= self.capacity {
            if let Some(oldest) = seen.order.pop_front() {
                seen.ids.remove(&oldest);
            }
        }
        seen.ids.insert(id.to_owned());
        seen.order.push_back(id.to_owned());
        true
    }

    /// Returns `true` if `id` is currently remembered.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().ids.contains(id)
    }

    /// Number of ids currently remembered.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Seen> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
