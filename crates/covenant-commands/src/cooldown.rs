//! Per-user, per-command rate limiting.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Last-use instants keyed by (canonical trigger, user id).
///
/// Entries are never expired; one entry per user per command that has a
/// cooldown is small enough to keep.
#[derive(Debug, Default)]
pub struct CooldownStore {
    last_used: Mutex<HashMap<(String, String), Instant>>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits the invocation and stamps `now`, or returns how long the
    /// user still has to wait.
    ///
    /// The check and the stamp happen under one lock, so two concurrent
    /// invocations within the window can't both be admitted. A zero
    /// `cooldown` always admits and stamps nothing.
    pub fn check_and_stamp(
        &self,
        trigger: &str,
        user: &str,
        cooldown: Duration,
        now: Instant,
    ) -> Result<(), Duration> {
        if cooldown.is_zero() {
            return Ok(());
        }

        let mut entries = self.lock();
        let key = (trigger.to_lowercase(), user.to_owned());
        if let Some(last) = entries.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < cooldown {
                return Err(cooldown - elapsed);
            }
        }
        entries.insert(key, now);
        Ok(())
    }

    /// When `user` last passed the check for `trigger`.
    pub fn last_used(&self, trigger: &str, user: &str) -> Option<Instant> {
        self.lock()
            .get(&(trigger.to_lowercase(), user.to_owned()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), Instant>> {
        self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
