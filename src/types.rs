// =============================================================================
// Shared scalar types used across the pivot signal engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// The two pivot periods the engine tracks level tables for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
}

impl Period {
    pub const ALL: [Period; 2] = [Period::Daily, Period::Weekly];

    /// Index into a fixed 2-slot array, as used by `PivotStore`.
    pub fn index(self) -> usize {
        match self {
            Period::Daily => 0,
            Period::Weekly => 1,
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Period::Daily => write!(f, "1d"),
            Period::Weekly => write!(f, "1w"),
        }
    }
}

/// Fold alias spellings of a period ("d", "daily", "1d", ...) into the
/// canonical bucket key used by `SignalHistory`. Unrecognized input folds to
/// `"other"` rather than being rejected.
pub fn normalize_period(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "d" | "daily" | "1d" => "1d".to_string(),
        "w" | "weekly" | "1w" => "1w".to_string(),
        _ => "other".to_string(),
    }
}

/// Direction of a pivot-level crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Direction implied by a detected candlestick pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for PatternDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternDirection::Bullish => write!(f, "bullish"),
            PatternDirection::Bearish => write!(f, "bearish"),
            PatternDirection::Neutral => write!(f, "neutral"),
        }
    }
}

/// Strength of a pivot/pattern correlation computed by the Combiner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Correlation {
    Strong,
    Moderate,
    Weak,
}

impl std::fmt::Display for Correlation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Correlation::Strong => write!(f, "strong"),
            Correlation::Moderate => write!(f, "moderate"),
            Correlation::Weak => write!(f, "weak"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_period_folds_aliases() {
        assert_eq!(normalize_period("d"), "1d");
        assert_eq!(normalize_period("Daily"), "1d");
        assert_eq!(normalize_period("1D"), "1d");
        assert_eq!(normalize_period("w"), "1w");
        assert_eq!(normalize_period("WEEKLY"), "1w");
        assert_eq!(normalize_period("monthly"), "other");
        assert_eq!(normalize_period(""), "other");
    }

    #[test]
    fn period_index_is_stable() {
        assert_eq!(Period::Daily.index(), 0);
        assert_eq!(Period::Weekly.index(), 1);
    }
}
