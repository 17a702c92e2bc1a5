//! Exponential backoff for transient reconcile failures

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Delay before retry `attempt` (0-based): base * 2^attempt, capped at max.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let delay = base.saturating_mul(2_u32.saturating_pow(attempt.min(16)));
    delay.min(max)
}

/// Tracks consecutive transient failures per object.
#[derive(Debug)]
pub struct FailureTracker {
    base: Duration,
    max: Duration,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

impl FailureTracker {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut attempts = match self.attempts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let attempt = attempts.entry(key.to_string()).or_insert(0);
        let delay = calculate_backoff(*attempt, self.base, self.max);
        *attempt = attempt.saturating_add(1);
        delay
    }

    pub fn reset(&self, key: &str) {
        let mut attempts = match self.attempts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        attempts.remove(key);
    }
}
