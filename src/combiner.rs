// =============================================================================
// Combiner — correlates pivot crossings with pattern detections per symbol
// =============================================================================

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::signal::{CombinedSignal, PatternSignal, Signal};
use crate::types::{Correlation, Direction, PatternDirection};

struct SymbolWindow {
    pivots: Vec<Signal>,
    patterns: Vec<PatternSignal>,
}

impl SymbolWindow {
    fn new() -> Self {
        Self {
            pivots: Vec::new(),
            patterns: Vec::new(),
        }
    }
}

fn correlation_strength(pivot_direction: Direction, pattern_direction: PatternDirection) -> Correlation {
    match pattern_direction {
        PatternDirection::Neutral => Correlation::Moderate,
        PatternDirection::Bullish if pivot_direction == Direction::Up => Correlation::Strong,
        PatternDirection::Bearish if pivot_direction == Direction::Down => Correlation::Strong,
        _ => Correlation::Weak,
    }
}

/// Keeps per-symbol FIFO windows of recent pivot and pattern signals and
/// pairs them when they fall within the correlation window of each other.
pub struct Combiner {
    window: Duration,
    symbols: RwLock<HashMap<String, SymbolWindow>>,
}

impl Combiner {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            symbols: RwLock::new(HashMap::new()),
        }
    }

    fn within_window(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        let diff = (a - b).num_milliseconds().abs();
        diff as u128 <= self.window.as_millis()
    }

    /// Record a pivot crossing and pair it against recent patterns for the
    /// same symbol. Returns the resulting combined signals; callers dispatch
    /// them after releasing any locks of their own.
    pub fn add_pivot_signal(&self, pivot: Signal) -> Vec<CombinedSignal> {
        let mut combined = Vec::new();
        let mut guard = self.symbols.write();
        let entry = guard.entry(pivot.symbol.clone()).or_insert_with(SymbolWindow::new);

        for pattern in &entry.patterns {
            if self.within_window(pivot.triggered_at, pattern.detected_at) {
                combined.push(CombinedSignal {
                    pivot: pivot.clone(),
                    pattern: pattern.clone(),
                    correlation: correlation_strength(pivot.direction, pattern.direction),
                    combined_at: Utc::now(),
                });
            }
        }
        entry.pivots.push(pivot);
        combined
    }

    /// Record a pattern detection and pair it against recent pivots for the
    /// same symbol.
    pub fn add_pattern_signal(&self, pattern: PatternSignal) -> Vec<CombinedSignal> {
        let mut combined = Vec::new();
        let mut guard = self.symbols.write();
        let entry = guard.entry(pattern.symbol.clone()).or_insert_with(SymbolWindow::new);

        for pivot in &entry.pivots {
            if self.within_window(pivot.triggered_at, pattern.detected_at) {
                combined.push(CombinedSignal {
                    pivot: pivot.clone(),
                    pattern: pattern.clone(),
                    correlation: correlation_strength(pivot.direction, pattern.direction),
                    combined_at: Utc::now(),
                });
            }
        }
        entry.patterns.push(pattern);
        combined
    }

    /// Drop entries older than twice the correlation window. Run periodically
    /// from a background task; never holds the lock during a callback.
    pub fn cleanup(&self, now: DateTime<Utc>) {
        let cutoff = chrono::Duration::from_std(self.window * 2).unwrap_or_else(|_| chrono::Duration::zero());
        let mut guard = self.symbols.write();
        for window in guard.values_mut() {
            window.pivots.retain(|s| now - s.triggered_at <= cutoff);
            window.patterns.retain(|s| now - s.detected_at <= cutoff);
        }
        guard.retain(|_, w| !w.pivots.is_empty() || !w.patterns.is_empty());
    }

    pub async fn run_cleanup_loop(self: std::sync::Arc<Self>) {
        let mut ticker = tokio::time::interval(self.window * 2);
        loop {
            ticker.tick().await;
            self.cleanup(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Period;

    fn pivot(symbol: &str, direction: Direction, at: DateTime<Utc>) -> Signal {
        Signal::new(symbol, Period::Daily, "R4", 100.0, direction, at, "price_monitor")
    }

    fn pattern(symbol: &str, direction: PatternDirection, at: DateTime<Utc>) -> PatternSignal {
        PatternSignal::new(symbol, "Hammer", direction, 70.0, at, at.timestamp(), Default::default())
    }

    #[test]
    fn bullish_pattern_with_up_crossing_is_strong() {
        let combiner = Combiner::new(Duration::from_secs(900));
        let now = Utc::now();
        combiner.add_pivot_signal(pivot("BTCUSDT", Direction::Up, now));
        let combined = combiner.add_pattern_signal(pattern("BTCUSDT", PatternDirection::Bullish, now));
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].correlation, Correlation::Strong);
    }

    #[test]
    fn conflicting_direction_is_weak() {
        let combiner = Combiner::new(Duration::from_secs(900));
        let now = Utc::now();
        combiner.add_pivot_signal(pivot("BTCUSDT", Direction::Up, now));
        let combined = combiner.add_pattern_signal(pattern("BTCUSDT", PatternDirection::Bearish, now));
        assert_eq!(combined[0].correlation, Correlation::Weak);
    }

    #[test]
    fn neutral_pattern_is_moderate() {
        let combiner = Combiner::new(Duration::from_secs(900));
        let now = Utc::now();
        combiner.add_pivot_signal(pivot("BTCUSDT", Direction::Down, now));
        let combined = combiner.add_pattern_signal(pattern("BTCUSDT", PatternDirection::Neutral, now));
        assert_eq!(combined[0].correlation, Correlation::Moderate);
    }

    #[test]
    fn outside_window_does_not_correlate() {
        let combiner = Combiner::new(Duration::from_secs(60));
        let now = Utc::now();
        combiner.add_pivot_signal(pivot("BTCUSDT", Direction::Up, now - chrono::Duration::seconds(120)));
        let combined = combiner.add_pattern_signal(pattern("BTCUSDT", PatternDirection::Bullish, now));
        assert!(combined.is_empty());
    }

    #[test]
    fn different_symbols_never_correlate() {
        let combiner = Combiner::new(Duration::from_secs(900));
        let now = Utc::now();
        combiner.add_pivot_signal(pivot("BTCUSDT", Direction::Up, now));
        let combined = combiner.add_pattern_signal(pattern("ETHUSDT", PatternDirection::Bullish, now));
        assert!(combined.is_empty());
    }

    #[test]
    fn cleanup_drops_stale_entries() {
        let combiner = Combiner::new(Duration::from_secs(10));
        let old = Utc::now() - chrono::Duration::seconds(100);
        combiner.add_pivot_signal(pivot("BTCUSDT", Direction::Up, old));
        combiner.cleanup(Utc::now());
        let combined = combiner.add_pattern_signal(pattern("BTCUSDT", PatternDirection::Bullish, Utc::now()));
        assert!(combined.is_empty());
    }
}
