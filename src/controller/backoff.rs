//! Per-key exponential backoff for failed reconciles.

use std::collections::HashMap;
use std::time::Duration;

use crate::api::ObjectKey;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: HashMap<ObjectKey, u32>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Delay before the next retry of `key`: `base * 2^failures`, capped at `max`.
    pub fn next_delay(&mut self, key: &ObjectKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let exponent = (*failures).min(31);
        *failures = failures.saturating_add(1);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Clears the failure history of `key` after a successful reconcile.
    pub fn forget(&mut self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
