//! Per-`vendor:model` pacer (spec §4.5): a lighter-weight cousin of
//! [`super::CircuitBreaker`] that only tracks an explicit wait deadline
//! derived from `Retry-After` / `x-ratelimit-reset-*` response headers. It
//! does not count failures and never opens on its own; it just remembers
//! "don't call this key again before `T`".

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct Pacer {
    deadlines: Mutex<HashMap<String, Instant>>,
}

impl Pacer {
    pub fn new() -> Self {
        Self {
            deadlines: Mutex::new(HashMap::new()),
        }
    }

    /// Record a pacing deadline `wait` from now for `key`, per a
    /// `Retry-After` or rate-limit-reset header. A later call with a
    /// shorter wait never moves the deadline earlier.
    pub fn record_wait(&self, key: &str, wait: Duration) {
        let deadline = Instant::now() + wait;
        let mut deadlines = self.deadlines.lock().expect("pacer mutex poisoned");
        let slot = deadlines.entry(key.to_string()).or_insert(deadline);
        if deadline > *slot {
            *slot = deadline;
        }
    }

    /// Remaining wait for `key`, or `None` if the key is clear to call now.
    pub fn wait_remaining(&self, key: &str) -> Option<Duration> {
        let mut deadlines = self.deadlines.lock().expect("pacer mutex poisoned");
        let Some(deadline) = deadlines.get(key).copied() else {
            return None;
        };
        let now = Instant::now();
        if deadline <= now {
            deadlines.remove(key);
            None
        } else {
            Some(deadline - now)
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new()
    }
}
