// =============================================================================
// PivotStore — swappable, immutable-after-publish level snapshots
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::pivot::levels::LevelTable;
use crate::types::Period;

/// Immutable map of per-symbol level tables captured at one instant. Once
/// published, a snapshot is never mutated — readers either see the previous
/// snapshot entirely or the new one entirely, never a partial swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub period: Period,
    pub updated_at: DateTime<Utc>,
    pub levels: HashMap<String, LevelTable>,
}

impl Snapshot {
    pub fn new(period: Period, updated_at: DateTime<Utc>, levels: HashMap<String, LevelTable>) -> Self {
        Self {
            period,
            updated_at,
            levels,
        }
    }

    pub fn symbol_count(&self) -> usize {
        self.levels.len()
    }
}

/// Holds at most one snapshot per period. `swap` replaces atomically;
/// `get_levels` is the fast path consulted on every price tick.
pub struct PivotStore {
    slots: RwLock<[Option<Arc<Snapshot>>; 2]>,
}

impl PivotStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new([None, None]),
        }
    }

    /// Replace the snapshot for `period`. The old `Arc` is simply dropped
    /// once the last reader holding it finishes; no reader ever observes a
    /// half-written table.
    pub fn swap(&self, period: Period, snapshot: Snapshot) {
        let mut slots = self.slots.write();
        slots[period.index()] = Some(Arc::new(snapshot));
    }

    /// The current (possibly absent) snapshot for `period`.
    pub fn snapshot(&self, period: Period) -> Option<Arc<Snapshot>> {
        self.slots.read()[period.index()].clone()
    }

    /// Fast path: a single read-lock acquisition plus an `Arc` clone of the
    /// whole snapshot, from which the caller reads one symbol's level table.
    /// Never clones the full symbol map.
    pub fn get_levels(&self, period: Period, symbol: &str) -> Option<LevelTable> {
        let snap = self.slots.read()[period.index()].clone()?;
        snap.levels.get(symbol).copied()
    }
}

impl Default for PivotStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimum acceptable symbol count for a candidate snapshot, per spec §3:
/// at least `min(half of requested, 80% of prior snapshot, 1)`.
pub fn min_acceptable_symbol_count(requested: usize, prior_snapshot_count: Option<usize>) -> usize {
    let half_requested = requested / 2;
    let prior_floor = prior_snapshot_count
        .map(|c| (c as f64 * 0.8).floor() as usize)
        .unwrap_or(usize::MAX);
    half_requested.min(prior_floor).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snap(levels: HashMap<String, LevelTable>) -> Snapshot {
        Snapshot::new(Period::Daily, Utc::now(), levels)
    }

    #[test]
    fn swap_then_get_levels_roundtrips() {
        let store = PivotStore::new();
        let mut levels = HashMap::new();
        levels.insert(
            "BTCUSDT".to_string(),
            LevelTable {
                r4: 50_000.0,
                ..Default::default()
            },
        );
        store.swap(Period::Daily, snap(levels));

        let table = store.get_levels(Period::Daily, "BTCUSDT").unwrap();
        assert_eq!(table.r4, 50_000.0);
        assert!(store.get_levels(Period::Weekly, "BTCUSDT").is_none());
    }

    #[test]
    fn missing_symbol_returns_none() {
        let store = PivotStore::new();
        store.swap(Period::Daily, snap(HashMap::new()));
        assert!(store.get_levels(Period::Daily, "ETHUSDT").is_none());
    }

    #[test]
    fn swap_is_atomic_across_periods() {
        let store = PivotStore::new();
        let mut d = HashMap::new();
        d.insert("BTCUSDT".to_string(), LevelTable::default());
        store.swap(Period::Daily, snap(d));
        assert!(store.snapshot(Period::Weekly).is_none());
        assert!(store.snapshot(Period::Daily).is_some());
    }

    #[test]
    fn min_acceptable_uses_the_smallest_floor() {
        assert_eq!(min_acceptable_symbol_count(100, Some(50)), 40); // 80% of 50
        assert_eq!(min_acceptable_symbol_count(10, None), 5);
        assert_eq!(min_acceptable_symbol_count(1, None), 1);
        assert_eq!(min_acceptable_symbol_count(0, Some(0)), 1);
    }
}
