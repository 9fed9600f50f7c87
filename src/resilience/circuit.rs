//! Per-`vendor:model` circuit breaker (spec §4.5).
//!
//! `closed -> open -> half-open -> closed|open`. Cooldown is jittered
//! within `[60s, 120s]` so that many models tripping at once don't all
//! retry in lockstep.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

struct Entry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Thread-safe breaker keyed by `vendor:model` (spec §5: `std::sync::Mutex`
/// guarding a `HashMap`, no async lock needed since critical sections never
/// hold across an `.await`).
pub struct CircuitBreaker {
    failure_threshold: u32,
    entries: Mutex<HashMap<String, Entry>>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_threshold,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a call is currently allowed for this key. Transitions
    /// `open -> half-open` automatically once the cooldown has elapsed.
    pub fn allow(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().expect("circuit breaker mutex poisoned");
        let entry = entries.entry(key.to_string()).or_insert_with(Entry::new);

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = entry.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= entry.cooldown {
                    entry.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Time until the breaker for `key` would transition out of `Open`,
    /// for [`crate::error::RouterError::CircuitOpen`] reporting.
    pub fn reopen_at_epoch_ms(&self, key: &str) -> Option<u128> {
        let entries = self.entries.lock().expect("circuit breaker mutex poisoned");
        let entry = entries.get(key)?;
        if entry.state != CircuitState::Open {
            return None;
        }
        let opened_at = entry.opened_at?;
        let remaining = entry.cooldown.saturating_sub(opened_at.elapsed());
        Some((std::time::SystemTime::now() + remaining)
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis())
    }

    /// Record a successful call: closes the breaker and resets its failure
    /// count, whether it was closed, half-open, or (defensively) open.
    pub fn record_success(&self, key: &str) {
        let mut entries = self.entries.lock().expect("circuit breaker mutex poisoned");
        let entry = entries.entry(key.to_string()).or_insert_with(Entry::new);
        entry.state = CircuitState::Closed;
        entry.consecutive_failures = 0;
        entry.opened_at = None;
    }

    /// Record a transient failure. Only transient failures should ever
    /// reach this call (spec §7); the router is responsible for filtering.
    pub fn record_failure(&self, key: &str) {
        let mut entries = self.entries.lock().expect("circuit breaker mutex poisoned");
        let entry = entries.entry(key.to_string()).or_insert_with(Entry::new);

        match entry.state {
            CircuitState::HalfOpen => {
                // A half-open probe failing re-opens immediately with a
                // fresh jittered cooldown.
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
                entry.cooldown = jittered_cooldown();
            }
            CircuitState::Closed | CircuitState::Open => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.opened_at = Some(Instant::now());
                    entry.cooldown = jittered_cooldown();
                }
            }
        }
    }

    pub fn state(&self, key: &str) -> CircuitState {
        let entries = self.entries.lock().expect("circuit breaker mutex poisoned");
        entries.get(key).map(|e| e.state).unwrap_or(CircuitState::Closed)
    }
}

fn jittered_cooldown() -> Duration {
    let secs = 60 + fastrand::u64(0..=60);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3);
        let key = "openai:gpt-5";

        assert!(breaker.allow(key));
        breaker.record_failure(key);
        assert_eq!(breaker.state(key), CircuitState::Closed);
        breaker.record_failure(key);
        assert_eq!(breaker.state(key), CircuitState::Closed);
        breaker.record_failure(key);
        assert_eq!(breaker.state(key), CircuitState::Open);
        assert!(!breaker.allow(key));
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3);
        let key = "openai:gpt-5";

        breaker.record_failure(key);
        breaker.record_failure(key);
        breaker.record_success(key);
        breaker.record_failure(key);
        breaker.record_failure(key);
        assert_eq!(breaker.state(key), CircuitState::Closed);
    }

    #[test]
    fn separate_keys_have_independent_state() {
        let breaker = CircuitBreaker::new(1);
        breaker.record_failure("openai:gpt-5");
        assert_eq!(breaker.state("openai:gpt-5"), CircuitState::Open);
        assert_eq!(breaker.state("vertex:gemini-2.5-pro"), CircuitState::Closed);
        assert!(breaker.allow("vertex:gemini-2.5-pro"));
    }
}
