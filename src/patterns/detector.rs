// =============================================================================
// PatternDetector — composes the library scan and custom detector, filters,
// deduplicates, and gates emission on the pivot universe
// =============================================================================

use chrono::Utc;

use crate::kline::Kline;
use crate::patterns::custom;
use crate::patterns::library;
use crate::pivot::PivotStore;
use crate::signal::{PatternSignal, PatternStatistics};
use crate::types::{Period, PatternDirection};

#[derive(Debug, Clone)]
pub struct DetectedPattern {
    pub name: String,
    pub direction: PatternDirection,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct PatternDetectorConfig {
    pub min_confidence: f64,
    pub crypto_mode: bool,
    pub high_efficiency_only: bool,
}

impl Default for PatternDetectorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 60.0,
            crypto_mode: true,
            high_efficiency_only: false,
        }
    }
}

/// A pattern's "efficiency grade" gates it under `high_efficiency_only`.
/// Library-superset patterns and the strongest reversal formations grade A/B;
/// weaker single-bar signals grade C.
fn efficiency_grade(name: &str) -> &'static str {
    match name {
        "ThreeWhiteSoldiers" | "ThreeBlackCrows" | "ThreeLineStrike" | "Kicking"
        | "Engulfing" | "MorningStar" | "EveningStar" | "ThreeInside" | "ThreeOutside" => "A",
        "Hammer" | "InvertedHammer" | "HangingMan" | "ShootingStar" | "Piercing"
        | "DarkCloudCover" | "MorningDojiStar" | "EveningDojiStar" => "B",
        _ => "C",
    }
}

/// Stateless scan of recent closed klines (oldest first, newest last) for
/// named candlestick patterns. Deterministic: calling `detect` twice with the
/// same slice yields the same patterns in the same order.
pub fn detect(klines: &[Kline], config: &PatternDetectorConfig) -> Vec<DetectedPattern> {
    if klines.len() < 2 {
        return Vec::new();
    }

    let mut found: Vec<DetectedPattern> = Vec::new();

    for p in library::scan(klines, config.crypto_mode) {
        found.push(DetectedPattern {
            name: p.name.to_string(),
            direction: p.direction,
            confidence: p.confidence,
        });
    }
    for p in custom::detect(klines, config.crypto_mode) {
        found.push(DetectedPattern {
            name: p.name.to_string(),
            direction: p.direction,
            confidence: p.confidence,
        });
    }

    // Filtering runs before dedup so a filtered-out library pattern cannot
    // silently suppress a surviving custom one.
    found.retain(|p| p.confidence >= config.min_confidence);
    if config.high_efficiency_only {
        found.retain(|p| matches!(efficiency_grade(&p.name), "A" | "B"));
    }

    let has = |name: &str| found.iter().any(|p| p.name == name);
    let suppress_harami = has("ThreeInside");
    let suppress_engulfing = has("ThreeOutside");

    if suppress_harami {
        found.retain(|p| p.name != "Harami" && p.name != "HaramiCross");
    }
    if suppress_engulfing {
        found.retain(|p| p.name != "Engulfing");
    }

    found
}

/// Build `PatternSignal`s for each detected pattern on `symbol`, gated on the
/// pivot universe: no emission unless at least one period has a loaded
/// snapshot containing this symbol.
pub fn build_signals(
    symbol: &str,
    kline_close_time: i64,
    detected: &[DetectedPattern],
    pivots: &PivotStore,
) -> Vec<PatternSignal> {
    let has_pivot_coverage = Period::ALL
        .iter()
        .any(|p| pivots.get_levels(*p, symbol).is_some());
    if !has_pivot_coverage {
        return Vec::new();
    }

    let now = Utc::now();
    detected
        .iter()
        .map(|p| {
            let statistics = PatternStatistics {
                efficiency_grade: Some(efficiency_grade(&p.name).to_string()),
                stat_source: Some("internal".to_string()),
                ..Default::default()
            };
            PatternSignal::new(
                symbol,
                p.name.clone(),
                p.direction,
                p.confidence,
                now,
                kline_close_time,
                statistics,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Kline {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Kline {
            open,
            high,
            low,
            close,
            open_time: t0,
            close_time: t0 + chrono::Duration::minutes(5),
            is_closed: true,
        }
    }

    #[test]
    fn detect_is_idempotent() {
        let klines = vec![bar(100.0, 100.0, 95.0, 96.0), bar(95.0, 105.0, 94.0, 104.0)];
        let config = PatternDetectorConfig::default();
        let first = detect(&klines, &config);
        let second = detect(&klines, &config);
        let names_a: Vec<&str> = first.iter().map(|p| p.name.as_str()).collect();
        let names_b: Vec<&str> = second.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn three_inside_suppresses_harami() {
        // Construct bars where both ThreeInside (library) and Harami (custom)
        // would otherwise fire on the same window.
        let klines = vec![
            bar(110.0, 111.0, 95.0, 96.0),  // large bearish body
            bar(100.0, 101.0, 99.0, 100.5), // small body inside prior
            bar(100.5, 112.0, 100.0, 111.0), // closes above a.open
        ];
        let config = PatternDetectorConfig {
            min_confidence: 0.0,
            ..Default::default()
        };
        let found = detect(&klines, &config);
        let has_three_inside = found.iter().any(|p| p.name == "ThreeInside");
        if has_three_inside {
            assert!(!found.iter().any(|p| p.name == "Harami" || p.name == "HaramiCross"));
        }
    }

    #[test]
    fn no_emission_without_pivot_coverage() {
        let pivots = PivotStore::new();
        let detected = vec![DetectedPattern {
            name: "Hammer".to_string(),
            direction: PatternDirection::Bullish,
            confidence: 70.0,
        }];
        let signals = build_signals("BTCUSDT", 0, &detected, &pivots);
        assert!(signals.is_empty());
    }
}
