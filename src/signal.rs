// =============================================================================
// Signal types shared by PriceMonitor, PatternDetector, Combiner and
// SignalHistory
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Correlation, Direction, PatternDirection, Period};

/// Process-wide monotonic counter used for `Signal::id` and `PatternSignal`
/// tie-breaking. Combined with a trigger timestamp this makes ids unique even
/// when two crossings land in the same nanosecond.
static SIGNAL_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_sequence() -> u64 {
    SIGNAL_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// A pivot-level crossing signal. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub period: Period,
    pub level: String,
    pub price: f64,
    pub direction: Direction,
    pub triggered_at: DateTime<Utc>,
    pub source: String,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        period: Period,
        level: impl Into<String>,
        price: f64,
        direction: Direction,
        triggered_at: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        let seq = next_sequence();
        let id = format!("{}-{}", seq, triggered_at.timestamp_nanos_opt().unwrap_or(0));
        Self {
            id,
            symbol: symbol.into(),
            period,
            level: level.into(),
            price,
            direction,
            triggered_at,
            source: source.into(),
        }
    }
}

/// Static historical statistics attached to a detected pattern (library or
/// custom detectors both populate this the same way).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatternStatistics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efficiency_grade: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat_source: Option<String>,
}

/// A detected candlestick pattern signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSignal {
    pub id: String,
    pub symbol: String,
    pub pattern: String,
    pub direction: PatternDirection,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
    pub kline_close_time: i64,
    #[serde(flatten)]
    pub statistics: PatternStatistics,
}

impl PatternSignal {
    pub fn new(
        symbol: impl Into<String>,
        pattern: impl Into<String>,
        direction: PatternDirection,
        confidence: f64,
        detected_at: DateTime<Utc>,
        kline_close_time: i64,
        statistics: PatternStatistics,
    ) -> Self {
        let symbol = symbol.into();
        let pattern = pattern.into();
        let id = format!("{}-{}-{}", kline_close_time, symbol, pattern);
        Self {
            id,
            symbol,
            pattern,
            direction,
            confidence: confidence.clamp(0.0, 100.0),
            detected_at,
            kline_close_time,
            statistics,
        }
    }
}

/// A pivot signal correlated with a pattern signal within the correlation
/// window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombinedSignal {
    pub pivot: Signal,
    pub pattern: PatternSignal,
    pub correlation: Correlation,
    pub combined_at: DateTime<Utc>,
}
