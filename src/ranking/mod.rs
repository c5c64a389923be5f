pub mod sampler;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingType {
    Volume,
    Trades,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoverDirection {
    Up,
    Down,
}

/// Comparison lookback for ranking queries; `None` means "the previous snapshot".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareWindow {
    Minutes5,
    Minutes15,
    Minutes30,
    Hours1,
    Hours6,
    Hours24,
}

impl CompareWindow {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "5m" => Some(Self::Minutes5),
            "15m" => Some(Self::Minutes15),
            "30m" => Some(Self::Minutes30),
            "1h" => Some(Self::Hours1),
            "6h" => Some(Self::Hours6),
            "24h" => Some(Self::Hours24),
            _ => None,
        }
    }

    fn duration(self) -> ChronoDuration {
        match self {
            Self::Minutes5 => ChronoDuration::minutes(5),
            Self::Minutes15 => ChronoDuration::minutes(15),
            Self::Minutes30 => ChronoDuration::minutes(30),
            Self::Hours1 => ChronoDuration::hours(1),
            Self::Hours6 => ChronoDuration::hours(6),
            Self::Hours24 => ChronoDuration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingEntry {
    pub price: f64,
    pub volume: f64,
    pub trade_count: i64,
    pub volume_rank: u32,
    pub trades_rank: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub entries: HashMap<String, RankingEntry>,
}

/// Assigns dense ranks (equal values share a rank; the next distinct value
/// gets rank+1) over a descending sort of `values`.
pub fn dense_rank(values: &[(String, f64)]) -> HashMap<String, u32> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = HashMap::new();
    let mut rank = 0u32;
    let mut prev_value: Option<f64> = None;
    for (symbol, value) in sorted {
        if prev_value != Some(value) {
            rank += 1;
            prev_value = Some(value);
        }
        ranks.insert(symbol, rank);
    }
    ranks
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedSymbol {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub trade_count: i64,
    pub current_rank: u32,
    pub rank_change: Option<i64>,
    pub price_change_pct: Option<f64>,
    pub volume_change_pct: Option<f64>,
    pub trade_count_change_pct: Option<f64>,
    pub is_new: bool,
}

pub struct RankingStore {
    max_age: ChronoDuration,
    snapshots: RwLock<Vec<Snapshot>>,
}

fn pct_change(new: f64, prev: f64) -> Option<f64> {
    if prev <= 0.0 {
        None
    } else {
        Some((new / prev - 1.0) * 100.0)
    }
}

impl RankingStore {
    pub fn new(max_age: ChronoDuration) -> Self {
        Self {
            max_age,
            snapshots: RwLock::new(Vec::new()),
        }
    }

    pub fn append(&self, snapshot: Snapshot) {
        let mut guard = self.snapshots.write();
        guard.push(snapshot);
        let cutoff = Utc::now() - self.max_age;
        guard.retain(|s| s.timestamp >= cutoff);
    }

    fn snapshot_path(data_dir: &Path) -> PathBuf {
        data_dir.join("ranking").join("snapshots.json")
    }

    pub fn persist(&self, data_dir: &Path) {
        let path = Self::snapshot_path(data_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let guard = self.snapshots.read();
        let Ok(json) = serde_json::to_string(&*guard) else {
            return;
        };
        let tmp_path = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&tmp_path, json) {
            error!(path = %tmp_path.display(), error = %e, "failed to write ranking snapshots");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp_path, &path) {
            error!(path = %path.display(), error = %e, "failed to rename ranking snapshots file");
        }
    }

    pub fn load(&self, data_dir: &Path) {
        let path = Self::snapshot_path(data_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return,
        };
        match serde_json::from_str::<Vec<Snapshot>>(&content) {
            Ok(mut loaded) => {
                let cutoff = Utc::now() - self.max_age;
                loaded.retain(|s| s.timestamp >= cutoff);
                info!(count = loaded.len(), "loaded ranking snapshots from disk");
                *self.snapshots.write() = loaded;
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to parse ranking snapshots file"),
        }
    }

    fn rank_of(entry: &RankingEntry, rtype: RankingType) -> u32 {
        match rtype {
            RankingType::Volume => entry.volume_rank,
            RankingType::Trades => entry.trades_rank,
        }
    }

    /// Find the comparison snapshot: the one whose timestamp is the greatest
    /// not exceeding `target`; if none qualifies, the oldest available.
    fn find_comparison<'a>(snapshots: &'a [Snapshot], target: DateTime<Utc>) -> Option<&'a Snapshot> {
        snapshots
            .iter()
            .filter(|s| s.timestamp <= target)
            .max_by_key(|s| s.timestamp)
            .or_else(|| snapshots.iter().min_by_key(|s| s.timestamp))
    }

    fn build_ranked(
        latest: &Snapshot,
        comparison: Option<&Snapshot>,
        rtype: RankingType,
    ) -> Vec<RankedSymbol> {
        let mut out: Vec<RankedSymbol> = latest
            .entries
            .iter()
            .map(|(symbol, entry)| {
                let current_rank = Self::rank_of(entry, rtype);
                let prev = comparison.and_then(|c| c.entries.get(symbol));
                match prev {
                    Some(p) => RankedSymbol {
                        symbol: symbol.clone(),
                        price: entry.price,
                        volume: entry.volume,
                        trade_count: entry.trade_count,
                        current_rank,
                        rank_change: Some(Self::rank_of(p, rtype) as i64 - current_rank as i64),
                        price_change_pct: pct_change(entry.price, p.price),
                        volume_change_pct: pct_change(entry.volume, p.volume),
                        trade_count_change_pct: pct_change(entry.trade_count as f64, p.trade_count as f64),
                        is_new: false,
                    },
                    None => RankedSymbol {
                        symbol: symbol.clone(),
                        price: entry.price,
                        volume: entry.volume,
                        trade_count: entry.trade_count,
                        current_rank,
                        rank_change: None,
                        price_change_pct: None,
                        volume_change_pct: None,
                        trade_count_change_pct: None,
                        is_new: true,
                    },
                }
            })
            .collect();
        out.sort_by_key(|r| r.current_rank);
        out
    }

    pub fn get_current(&self, rtype: RankingType, compare: Option<CompareWindow>, limit: usize) -> Vec<RankedSymbol> {
        let guard = self.snapshots.read();
        let Some(latest) = guard.iter().max_by_key(|s| s.timestamp) else {
            return Vec::new();
        };
        let comparison = match compare {
            Some(window) => Self::find_comparison(&guard, latest.timestamp - window.duration()),
            None => {
                let mut others: Vec<&Snapshot> = guard.iter().filter(|s| s.timestamp < latest.timestamp).collect();
                others.sort_by_key(|s| s.timestamp);
                others.last().copied()
            }
        };
        let mut ranked = Self::build_ranked(latest, comparison, rtype);
        ranked.truncate(limit);
        ranked
    }

    pub fn get_history(&self, symbol: &str) -> Vec<(DateTime<Utc>, RankingEntry)> {
        let guard = self.snapshots.read();
        let mut out: Vec<(DateTime<Utc>, RankingEntry)> = guard
            .iter()
            .filter_map(|s| s.entries.get(symbol).map(|e| (s.timestamp, e.clone())))
            .collect();
        out.sort_by_key(|(ts, _)| *ts);
        out
    }

    pub fn get_movers(
        &self,
        rtype: RankingType,
        direction: MoverDirection,
        compare: Option<CompareWindow>,
        limit: usize,
    ) -> Vec<RankedSymbol> {
        let mut ranked = self.get_current(rtype, compare, usize::MAX);
        ranked.retain(|r| match (r.rank_change, direction) {
            (Some(change), MoverDirection::Up) => change > 0,
            (Some(change), MoverDirection::Down) => change < 0,
            (None, _) => false,
        });
        ranked.sort_by_key(|r| std::cmp::Reverse(r.rank_change.unwrap_or(0).abs()));
        ranked.truncate(limit);
        ranked
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }
}
