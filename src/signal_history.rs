// =============================================================================
// SignalHistory — bucketed, bounded, optionally-persistent ring of signals
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::signal::Signal;
use crate::types::normalize_period;

const BUCKET_NAMES: [&str; 3] = ["1d", "1w", "other"];

struct Bucket {
    entries: VecDeque<Signal>,
    capacity: usize,
    adds_since_compaction: u64,
}

impl Bucket {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            adds_since_compaction: 0,
        }
    }

    fn push(&mut self, signal: Signal) {
        self.entries.push_back(signal);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        self.adds_since_compaction += 1;
    }
}

/// File-backed persistence for one bucket: append-only JSONL plus periodic
/// atomic compaction, matching `RuntimeConfig::save`'s tmp+rename idiom.
struct BucketPersistence {
    path: PathBuf,
}

impl BucketPersistence {
    fn append(&self, signal: &Signal) {
        let Ok(mut line) = serde_json::to_string(signal) else {
            return;
        };
        line.push('\n');
        if let Err(e) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(line.as_bytes())
            })
        {
            warn!(path = %self.path.display(), error = %e, "failed to append signal history line");
        }
    }

    /// Rewrite the file to contain exactly `entries`, atomically.
    fn compact(&self, entries: &VecDeque<Signal>) {
        let mut content = String::new();
        for s in entries {
            if let Ok(line) = serde_json::to_string(s) {
                content.push_str(&line);
                content.push('\n');
            }
        }
        let tmp_path = self.path.with_extension("jsonl.tmp");
        if let Err(e) = std::fs::write(&tmp_path, &content) {
            warn!(path = %tmp_path.display(), error = %e, "failed to write compacted signal history");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to rename compacted signal history");
        }
    }

    fn line_count(&self) -> usize {
        std::fs::read_to_string(&self.path)
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }
}

pub struct SignalQuery {
    pub symbol: Option<String>,
    pub period: Option<String>,
    pub levels: Vec<String>,
    pub direction: Option<String>,
    pub source: Option<String>,
    pub limit: i64,
}

impl Default for SignalQuery {
    fn default() -> Self {
        Self {
            symbol: None,
            period: None,
            levels: Vec::new(),
            direction: None,
            source: None,
            limit: 200,
        }
    }
}

fn resolve_limit(limit: i64) -> usize {
    if limit <= 0 {
        200
    } else {
        (limit as usize).min(4000)
    }
}

pub struct SignalHistory {
    buckets: HashMap<&'static str, RwLock<Bucket>>,
    persistence: RwLock<Option<HashMap<&'static str, BucketPersistence>>>,
}

impl SignalHistory {
    /// `total_capacity` is split ~80% daily, ~15% weekly, remainder other.
    pub fn new(total_capacity: usize) -> Self {
        let daily_cap = ((total_capacity as f64) * 0.80).round() as usize;
        let weekly_cap = ((total_capacity as f64) * 0.15).round() as usize;
        let other_cap = total_capacity.saturating_sub(daily_cap + weekly_cap).max(1);

        let mut buckets = HashMap::new();
        buckets.insert("1d", RwLock::new(Bucket::new(daily_cap.max(1))));
        buckets.insert("1w", RwLock::new(Bucket::new(weekly_cap.max(1))));
        buckets.insert("other", RwLock::new(Bucket::new(other_cap)));

        Self {
            buckets,
            persistence: RwLock::new(None),
        }
    }

    /// Open one append-only JSONL file per bucket under `dir`. Migrates an
    /// existing unified history file (if present) by streaming each line
    /// into its bucket file, then renaming the old file with `.migrated`.
    pub fn enable_persistence(&self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).ok();

        let legacy_path = dir.join("history.jsonl");
        if legacy_path.exists() {
            self.migrate_unified_file(&legacy_path, dir);
        }

        let mut map = HashMap::new();
        for name in BUCKET_NAMES {
            let path = dir.join(format!("history_{name}.jsonl"));
            map.insert(name, BucketPersistence { path });
        }
        *self.persistence.write() = Some(map);
        info!(dir = %dir.display(), "signal history persistence enabled");
    }

    fn migrate_unified_file(&self, legacy_path: &Path, dir: &Path) {
        let Ok(content) = std::fs::read_to_string(legacy_path) else {
            return;
        };
        let mut by_bucket: HashMap<&'static str, Vec<String>> = HashMap::new();
        for line in content.lines() {
            let Ok(signal) = serde_json::from_str::<Signal>(line) else {
                continue;
            };
            let key = normalize_period(&signal.period.to_string());
            let bucket_name = BUCKET_NAMES
                .iter()
                .find(|b| **b == key)
                .copied()
                .unwrap_or("other");
            by_bucket.entry(bucket_name).or_default().push(line.to_string());
        }
        for (bucket_name, lines) in by_bucket {
            let path = dir.join(format!("history_{bucket_name}.jsonl"));
            let content = lines.join("\n") + "\n";
            if let Err(e) = std::fs::write(&path, content) {
                error!(path = %path.display(), error = %e, "failed to write migrated signal history");
            }
        }
        let migrated_path = legacy_path.with_extension("jsonl.migrated");
        if let Err(e) = std::fs::rename(legacy_path, &migrated_path) {
            warn!(error = %e, "failed to rename legacy unified history file");
        }
    }

    /// Route `signal` to its normalized-period bucket, evicting locally on
    /// overflow, and append to its JSONL file if persistence is enabled.
    pub fn add(&self, signal: Signal) {
        let key = normalize_period(&signal.period.to_string());
        let bucket_name = BUCKET_NAMES.iter().find(|b| **b == key).copied().unwrap_or("other");

        let Some(bucket_lock) = self.buckets.get(bucket_name) else {
            return;
        };

        {
            let guard = self.persistence.read();
            if let Some(map) = guard.as_ref() {
                if let Some(p) = map.get(bucket_name) {
                    p.append(&signal);
                }
            }
        }

        let mut bucket = bucket_lock.write();
        bucket.push(signal);

        let should_compact = {
            let guard = self.persistence.read();
            guard.as_ref().and_then(|map| map.get(bucket_name)).map(|p| {
                bucket.adds_since_compaction >= 100 || p.line_count() > bucket.capacity * 2
            })
        };

        if should_compact == Some(true) {
            let guard = self.persistence.read();
            if let Some(p) = guard.as_ref().and_then(|map| map.get(bucket_name)) {
                p.compact(&bucket.entries);
                bucket.adds_since_compaction = 0;
            }
        }
    }

    pub fn query(&self, q: &SignalQuery) -> Vec<Signal> {
        let limit = resolve_limit(q.limit);

        let matches = |s: &Signal| -> bool {
            if let Some(sym) = &q.symbol {
                if !s.symbol.contains(sym.as_str()) {
                    return false;
                }
            }
            if !q.levels.is_empty() && !q.levels.iter().any(|l| l.eq_ignore_ascii_case(&s.level)) {
                return false;
            }
            if let Some(dir) = &q.direction {
                if !s.direction.to_string().eq_ignore_ascii_case(dir) {
                    return false;
                }
            }
            if let Some(src) = &q.source {
                if &s.source != src {
                    return false;
                }
            }
            true
        };

        if let Some(period) = &q.period {
            let key = normalize_period(period);
            let Some(bucket_lock) = self.buckets.get(key.as_str()) else {
                return Vec::new();
            };
            let bucket = bucket_lock.read();
            let mut result: Vec<Signal> = bucket.entries.iter().rev().filter(|s| matches(s)).cloned().collect();
            result.truncate(limit);
            result
        } else {
            let mut merged: Vec<Signal> = BUCKET_NAMES
                .iter()
                .flat_map(|name| self.buckets.get(name).unwrap().read().entries.clone())
                .filter(|s| matches(s))
                .collect();
            merged.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
            merged.truncate(limit);
            merged
        }
    }

    pub fn count(&self, bucket_name: &str) -> usize {
        self.buckets
            .get(bucket_name)
            .map(|b| b.read().entries.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, Period};
    use chrono::{TimeZone, Utc};

    fn signal(symbol: &str, period: Period, seq: i64) -> Signal {
        Signal::new(
            symbol,
            period,
            "R4",
            100.0,
            Direction::Up,
            Utc.timestamp_opt(1_700_000_000 + seq, 0).unwrap(),
            "price_monitor",
        )
    }

    #[test]
    fn s6_bucket_capacity_and_eviction() {
        let history = SignalHistory::new(100);
        for i in 0..150 {
            history.add(signal("BTCUSDT", Period::Daily, i));
        }
        assert_eq!(history.count("1d"), 80);

        let query = SignalQuery {
            period: Some("1d".to_string()),
            limit: 200,
            ..Default::default()
        };
        assert_eq!(history.query(&query).len(), 80);

        for i in 0..50 {
            history.add(signal("ETHUSDT", Period::Weekly, i));
        }
        assert_eq!(history.count("1d") + history.count("1w"), 130);

        let weekly_query = SignalQuery {
            period: Some("1w".to_string()),
            limit: 10,
            ..Default::default()
        };
        assert_eq!(history.query(&weekly_query).len(), 10);
    }

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(resolve_limit(0), 200);
        assert_eq!(resolve_limit(-5), 200);
        assert_eq!(resolve_limit(10_000), 4000);
        assert_eq!(resolve_limit(50), 50);
    }

    #[test]
    fn query_without_period_merges_buckets_descending() {
        let history = SignalHistory::new(100);
        history.add(signal("BTCUSDT", Period::Daily, 1));
        history.add(signal("BTCUSDT", Period::Weekly, 2));
        let results = history.query(&SignalQuery::default());
        assert_eq!(results.len(), 2);
        assert!(results[0].triggered_at >= results[1].triggered_at);
    }

    #[test]
    fn symbol_filter_is_substring_match() {
        let history = SignalHistory::new(100);
        history.add(signal("BTCUSDT", Period::Daily, 1));
        history.add(signal("ETHUSDT", Period::Daily, 2));
        let query = SignalQuery {
            symbol: Some("BTC".to_string()),
            ..Default::default()
        };
        let results = history.query(&query);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol, "BTCUSDT");
    }
}
