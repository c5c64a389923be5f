// =============================================================================
// PatternHistory — bounded ring of emitted pattern signals, optional
// single-file persistence
// =============================================================================

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::warn;

use crate::signal::PatternSignal;

pub struct PatternQuery {
    pub symbol: Option<String>,
    pub pattern: Option<String>,
    pub direction: Option<String>,
    pub limit: i64,
}

impl Default for PatternQuery {
    fn default() -> Self {
        Self {
            symbol: None,
            pattern: None,
            direction: None,
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

struct Persistence {
    path: PathBuf,
}

impl Persistence {
    fn append(&self, signal: &PatternSignal) {
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
            warn!(path = %self.path.display(), error = %e, "failed to append pattern history line");
        }
    }
}

pub struct PatternHistory {
    capacity: usize,
    entries: RwLock<VecDeque<PatternSignal>>,
    persistence: RwLock<Option<Persistence>>,
}

impl PatternHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
            persistence: RwLock::new(None),
        }
    }

    pub fn enable_persistence(&self, dir: impl AsRef<Path>) {
        let path = dir.as_ref().join("history.jsonl");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        *self.persistence.write() = Some(Persistence { path });
    }

    pub fn add(&self, signal: PatternSignal) {
        {
            let guard = self.persistence.read();
            if let Some(p) = guard.as_ref() {
                p.append(&signal);
            }
        }
        let mut entries = self.entries.write();
        entries.push_back(signal);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn query(&self, q: &PatternQuery) -> Vec<PatternSignal> {
        let limit = resolve_limit(q.limit);
        let entries = self.entries.read();
        let mut result: Vec<PatternSignal> = entries
            .iter()
            .rev()
            .filter(|s| {
                if let Some(sym) = &q.symbol {
                    if !s.symbol.contains(sym.as_str()) {
                        return false;
                    }
                }
                if let Some(pattern) = &q.pattern {
                    if !s.pattern.eq_ignore_ascii_case(pattern) {
                        return false;
                    }
                }
                if let Some(dir) = &q.direction {
                    if !s.direction.to_string().eq_ignore_ascii_case(dir) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();
        result.truncate(limit);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PatternDirection;
    use chrono::Utc;

    fn pattern(symbol: &str, name: &str, direction: PatternDirection) -> PatternSignal {
        PatternSignal::new(symbol, name, direction, 70.0, Utc::now(), 0, Default::default())
    }

    #[test]
    fn add_evicts_oldest_past_capacity() {
        let history = PatternHistory::new(2);
        history.add(pattern("BTCUSDT", "Hammer", PatternDirection::Bullish));
        history.add(pattern("ETHUSDT", "Doji", PatternDirection::Neutral));
        history.add(pattern("SOLUSDT", "Engulfing", PatternDirection::Bearish));
        let all = history.query(&PatternQuery::default());
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|s| s.symbol != "BTCUSDT"));
    }

    #[test]
    fn query_filters_by_pattern_name() {
        let history = PatternHistory::new(10);
        history.add(pattern("BTCUSDT", "Hammer", PatternDirection::Bullish));
        history.add(pattern("BTCUSDT", "Doji", PatternDirection::Neutral));
        let q = PatternQuery {
            pattern: Some("Hammer".to_string()),
            ..Default::default()
        };
        let results = history.query(&q);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].pattern, "Hammer");
    }
}
