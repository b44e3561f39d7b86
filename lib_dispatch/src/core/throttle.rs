//! # Throttle Guard
//!
//! Minimum-interval suppression of repeated calls to the same logical endpoint.
//! A rejected attempt leaves the original window untouched, so hammering a
//! throttled endpoint does not keep extending the wait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::clock::Clock;

/// Per-endpoint record of the last attempt that was allowed through.
pub struct ThrottleGuard {
    last_attempt: Mutex<HashMap<String, u64>>,
    clock: Arc<dyn Clock>,
}

impl ThrottleGuard {
    /// Creates an empty guard reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            last_attempt: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Returns `true` when the call must be rejected.
    ///
    /// When the call is allowed the current time becomes the key's new
    /// `lastAttemptAt`. A zero interval never throttles and records nothing.
    pub fn should_throttle(&self, key: &str, interval: Duration) -> bool {
        if interval.is_zero() {
            return false;
        }
        let now = self.clock.now_ms();
        let interval_ms = interval.as_millis() as u64;
        let mut records = self.last_attempt.lock().expect("Throttle lock poisoned");

        match records.get(key) {
            Some(&last) if now.saturating_sub(last) < interval_ms => {
                log::debug!(
                    "Throttled '{}' ({} ms since last attempt)",
                    key,
                    now.saturating_sub(last)
                );
                true
            }
            _ => {
                records.insert(key.to_string(), now);
                false
            }
        }
    }

    /// Forgets every record.
    pub fn reset(&self) {
        self.last_attempt.lock().expect("Throttle lock poisoned").clear();
    }

    /// Number of endpoints currently tracked.
    pub fn tracked(&self) -> usize {
        self.last_attempt.lock().expect("Throttle lock poisoned").len()
    }
}
