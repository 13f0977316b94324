//! Reconnection backoff for the reliable transport.
//!
//! The schedule is a fixed table rather than a multiplier: the first few
//! retries are quick so a server restart is barely noticed, then the
//! transport settles into one attempt every two minutes.
//!
//! ```text
//! attempt:  1    2    3    4     5+
//! delay:    1s   2s   4s   10s   120s
//! ```
//!
//! A failure streak is abandoned once it has lasted longer than the
//! ceiling (six hours by default), no matter how many attempts that took.

use std::time::Duration;

use tokio::time::Instant;

/// Backoff schedule and give-up ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before attempt `n` is `schedule[n - 1]`; attempts past the end
    /// reuse the last entry.
    pub schedule: Vec<Duration>,

    /// Maximum length of a failure streak, measured from its first failure.
    pub ceiling: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            schedule: [1, 2, 4, 10, 120]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            ceiling: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait before the given 1-based attempt.
    ///
    /// An empty schedule means "retry immediately".
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) as usize - 1).min(self.schedule.len().saturating_sub(1));
        self.schedule.get(index).copied().unwrap_or(Duration::ZERO)
    }
}

/// One step of the reconnection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait `delay`, then make attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// The streak outlived the ceiling. Stop trying.
    GiveUp { attempts: u32, elapsed: Duration },
}

/// Attempt counter and streak start for one failure streak.
///
/// Uses Tokio's clock so paused-time tests can drive a six-hour streak in
/// milliseconds.
#[derive(Debug, Default, Clone)]
pub struct ReconnectState {
    attempts: u32,
    window_start: Option<Instant>,
}

impl ReconnectState {
    /// Creates a fresh state with no failures recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the current streak. Called on `start` and after every
    /// successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.window_start = None;
    }

    /// Records a failed connection and decides what to do next.
    ///
    /// The first call of a streak opens the window at `now`.
    pub fn on_failure(&mut self, policy: &ReconnectPolicy, now: Instant) -> Backoff {
        let start = *self.window_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start);
        if elapsed > policy.ceiling {
            return Backoff::GiveUp {
                attempts: self.attempts,
                elapsed,
            };
        }

        self.attempts = self.attempts.saturating_add(1);
        Backoff::Retry {
            attempt: self.attempts,
            delay: policy.delay_for(self.attempts),
        }
    }

    /// Number of reconnection attempts scheduled in the current streak.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the current streak began, if one is in progress.
    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }
}
