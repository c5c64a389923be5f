// =============================================================================
// Camarilla pivot level computation
// =============================================================================

use serde::{Deserialize, Serialize};

/// Named numeric levels for one symbol in one period. A value of `0.0` means
/// "not set; skip" — callers must treat zero levels as absent, never as a
/// real price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct LevelTable {
    #[serde(default)]
    pub r1: f64,
    #[serde(default)]
    pub r2: f64,
    #[serde(default)]
    pub r3: f64,
    #[serde(default)]
    pub r4: f64,
    #[serde(default)]
    pub r5: f64,
    #[serde(default)]
    pub pp: f64,
    #[serde(default)]
    pub s1: f64,
    #[serde(default)]
    pub s2: f64,
    #[serde(default)]
    pub s3: f64,
    #[serde(default)]
    pub s4: f64,
    #[serde(default)]
    pub s5: f64,
}

impl LevelTable {
    /// Iterate the six levels the crossing detector cares about, paired with
    /// their canonical names.
    pub fn named_crossing_levels(&self) -> [(&'static str, f64); 6] {
        [
            ("R3", self.r3),
            ("R4", self.r4),
            ("R5", self.r5),
            ("S3", self.s3),
            ("S4", self.s4),
            ("S5", self.s5),
        ]
    }
}

/// Compute Camarilla levels from a previous period's High/Low/Close.
///
/// ```text
/// range = H - L
/// R3 = C + range*1.1/4      S3 = C - range*1.1/4
/// R4 = C + range*1.1/2      S4 = C - range*1.1/2
/// R5 = (H/L)*C              S5 = C - (R5 - C)
/// ```
///
/// Also fills the classical R1/R2/PP/S1/S2 levels for completeness (spec §3
/// lists them as optional additional fields of the level table).
pub fn camarilla(high: f64, low: f64, close: f64) -> LevelTable {
    if low <= 0.0 {
        return LevelTable::default();
    }

    let range = high - low;
    let r3 = close + range * 1.1 / 4.0;
    let r4 = close + range * 1.1 / 2.0;
    let r5 = (high / low) * close;
    let s3 = close - range * 1.1 / 4.0;
    let s4 = close - range * 1.1 / 2.0;
    let s5 = close - (r5 - close);

    let pp = (high + low + close) / 3.0;
    let r1 = 2.0 * pp - low;
    let r2 = pp + range;
    let s1 = 2.0 * pp - high;
    let s2 = pp - range;

    LevelTable {
        r1,
        r2,
        r3,
        r4,
        r5,
        pp,
        s1,
        s2,
        s3,
        s4,
        s5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camarilla_formulas_match_spec() {
        let levels = camarilla(105.0, 95.0, 100.0);
        let range = 10.0;
        assert!((levels.r3 - (100.0 + range * 1.1 / 4.0)).abs() < 1e-9);
        assert!((levels.r4 - (100.0 + range * 1.1 / 2.0)).abs() < 1e-9);
        assert!((levels.r5 - (105.0 / 95.0) * 100.0).abs() < 1e-9);
        assert!((levels.s3 - (100.0 - range * 1.1 / 4.0)).abs() < 1e-9);
        assert!((levels.s4 - (100.0 - range * 1.1 / 2.0)).abs() < 1e-9);
        assert!((levels.s5 - (100.0 - (levels.r5 - 100.0))).abs() < 1e-9);
    }

    #[test]
    fn zero_low_yields_empty_table() {
        let levels = camarilla(10.0, 0.0, 5.0);
        assert_eq!(levels.r3, 0.0);
        assert_eq!(levels.r5, 0.0);
    }

    #[test]
    fn named_crossing_levels_covers_r3_through_s5() {
        let levels = camarilla(105.0, 95.0, 100.0);
        let named = levels.named_crossing_levels();
        let names: Vec<&str> = named.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["R3", "R4", "R5", "S3", "S4", "S5"]);
    }
}
