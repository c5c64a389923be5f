// =============================================================================
// Cooldown — per-key suppression with TTL
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Suppresses repeated allowances of the same key within a fixed TTL.
/// Single-process, in-memory only — no persistence, matching the spec.
pub struct Cooldown {
    ttl: Duration,
    last_allowed: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl Cooldown {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last_allowed: RwLock::new(HashMap::new()),
        }
    }

    /// Returns true iff `key` was not already allowed within the TTL window
    /// ending at `now`. On `true`, atomically records `now` as the new
    /// last-allow timestamp for `key`.
    pub fn allow(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut map = self.last_allowed.write();
        match map.get(key) {
            Some(last) if now.signed_duration_since(*last) < chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero()) => {
                false
            }
            _ => {
                map.insert(key.to_string(), now);
                true
            }
        }
    }
}
