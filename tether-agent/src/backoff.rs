//! Per-project exponential backoff.

use std::collections::HashMap;
use std::time::Duration;

use tether_engine::ProjectKey;

/// Tracks consecutive failures per project. The delay doubles with each
/// failure, starting at `base` and capped at `max`.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: HashMap<ProjectKey, u32>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            failures: HashMap::new(),
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self, key: &ProjectKey) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let factor = 1u32.checked_shl(*failures).unwrap_or(u32::MAX);
        *failures = failures.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self, key: &ProjectKey) {
        self.failures.remove(key);
    }
}
