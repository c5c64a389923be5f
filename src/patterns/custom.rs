// =============================================================================
// Custom candlestick detector — patterns not covered by the library scan
// =============================================================================

use crate::kline::Kline;
use crate::types::PatternDirection;

#[derive(Debug, Clone)]
pub struct CustomPattern {
    pub name: &'static str,
    pub direction: PatternDirection,
    pub confidence: f64,
}

fn body(k: &Kline) -> f64 {
    (k.close - k.open).abs()
}

fn upper_shadow(k: &Kline) -> f64 {
    k.high - k.open.max(k.close)
}

fn lower_shadow(k: &Kline) -> f64 {
    k.open.min(k.close) - k.low
}

fn range(k: &Kline) -> f64 {
    k.high - k.low
}

fn is_doji(k: &Kline) -> bool {
    let r = range(k);
    r > 0.0 && body(k) / r < 0.1
}

fn is_bullish(k: &Kline) -> bool {
    k.close > k.open
}

fn is_bearish(k: &Kline) -> bool {
    k.close < k.open
}

/// Trend over the prior three bars preceding the detection bar: a downtrend
/// is monotonically decreasing closes, or at least 2 of 3 bearish bars.
fn is_downtrend(prior: &[Kline]) -> bool {
    if prior.len() < 3 {
        return false;
    }
    let n = prior.len();
    let last3 = &prior[n - 3..];
    let monotonic = last3[0].close > last3[1].close && last3[1].close > last3[2].close;
    let bearish_count = last3.iter().filter(|k| is_bearish(k)).count();
    monotonic || bearish_count >= 2
}

fn is_uptrend(prior: &[Kline]) -> bool {
    if prior.len() < 3 {
        return false;
    }
    let n = prior.len();
    let last3 = &prior[n - 3..];
    let monotonic = last3[0].close < last3[1].close && last3[1].close < last3[2].close;
    let bullish_count = last3.iter().filter(|k| is_bullish(k)).count();
    monotonic || bullish_count >= 2
}

fn push(
    out: &mut Vec<CustomPattern>,
    name: &'static str,
    direction: PatternDirection,
    confidence: f64,
) {
    out.push(CustomPattern {
        name,
        direction,
        confidence,
    });
}

/// Run every custom detector against the last one-to-three closed bars of
/// `klines` (oldest first, newest last). `crypto_mode` relaxes DarkCloudCover's
/// gap requirement since continuous trading rarely produces a true gap.
pub fn detect(klines: &[Kline], crypto_mode: bool) -> Vec<CustomPattern> {
    let mut out = Vec::new();
    if klines.len() < 2 {
        return out;
    }
    let n = klines.len();
    let last = &klines[n - 1];
    let prev = &klines[n - 2];
    let prior = &klines[..n - 1];

    detect_hammer_family(&mut out, last, prior);
    detect_engulfing(&mut out, prev, last);
    detect_harami(&mut out, prev, last);
    detect_dark_cloud_cover(&mut out, prev, last, crypto_mode);
    detect_doji_variants(&mut out, last);

    if n >= 3 {
        let a = &klines[n - 3];
        let b = &klines[n - 2];
        let c = &klines[n - 1];
        detect_star_patterns(&mut out, a, b, c);
    }

    out
}

fn detect_hammer_family(out: &mut Vec<CustomPattern>, last: &Kline, prior: &[Kline]) {
    let b = body(last);
    if b <= 0.0 {
        return;
    }
    let upper = upper_shadow(last);
    let lower = lower_shadow(last);

    let confidence_for = |shadow: f64| -> Option<f64> {
        if shadow >= b * 3.0 {
            Some(85.0)
        } else if shadow >= b * 2.0 {
            Some(70.0)
        } else {
            None
        }
    };

    let downtrend = is_downtrend(prior);
    let uptrend = is_uptrend(prior);

    // Hammer / InvertedHammer require a downtrend.
    if downtrend {
        if let Some(conf) = confidence_for(lower) {
            if upper < b * 0.3 {
                push(out, "Hammer", PatternDirection::Bullish, conf);
            }
        }
        if let Some(conf) = confidence_for(upper) {
            if lower < b * 0.3 {
                push(out, "InvertedHammer", PatternDirection::Bullish, conf);
            }
        }
    }

    // HangingMan / ShootingStar require an uptrend.
    if uptrend {
        if let Some(conf) = confidence_for(lower) {
            if upper < b * 0.3 {
                push(out, "HangingMan", PatternDirection::Bearish, conf);
            }
        }
        if let Some(conf) = confidence_for(upper) {
            if lower < b * 0.3 {
                push(out, "ShootingStar", PatternDirection::Bearish, conf);
            }
        }
    }
}

fn detect_engulfing(out: &mut Vec<CustomPattern>, prev: &Kline, last: &Kline) {
    let opposite = (is_bullish(prev) && is_bearish(last)) || (is_bearish(prev) && is_bullish(last));
    if !opposite {
        return;
    }
    let prev_lo = prev.open.min(prev.close);
    let prev_hi = prev.open.max(prev.close);
    let last_lo = last.open.min(last.close);
    let last_hi = last.open.max(last.close);
    let engulfs = last_lo <= prev_lo && last_hi >= prev_hi;
    if !engulfs {
        return;
    }
    let confidence = if body(last) > body(prev) * 1.5 { 90.0 } else { 75.0 };
    let direction = if is_bullish(last) {
        PatternDirection::Bullish
    } else {
        PatternDirection::Bearish
    };
    push(out, "Engulfing", direction, confidence);
}

fn detect_harami(out: &mut Vec<CustomPattern>, prev: &Kline, last: &Kline) {
    let prev_range = range(prev);
    if prev_range <= 0.0 || body(prev) / prev_range < 0.5 {
        return;
    }
    let prev_lo = prev.open.min(prev.close);
    let prev_hi = prev.open.max(prev.close);
    let last_lo = last.open.min(last.close);
    let last_hi = last.open.max(last.close);
    let inside = last_lo >= prev_lo && last_hi <= prev_hi;
    if !inside {
        return;
    }
    let direction = if is_bearish(prev) {
        PatternDirection::Bullish
    } else {
        PatternDirection::Bearish
    };
    if is_doji(last) {
        push(out, "HaramiCross", direction, 65.0);
    } else {
        push(out, "Harami", direction, 55.0);
    }
}

fn detect_dark_cloud_cover(out: &mut Vec<CustomPattern>, prev: &Kline, last: &Kline, crypto_mode: bool) {
    if !is_bullish(prev) || !is_bearish(last) {
        return;
    }
    let gap_ok = if crypto_mode {
        last.open >= prev.close
    } else {
        last.open > prev.high
    };
    if !gap_ok {
        return;
    }
    let prev_midpoint = (prev.open + prev.close) / 2.0;
    if last.close < prev_midpoint {
        let true_gap = last.open > prev.high;
        let confidence = if true_gap { 85.0 } else { 70.0 };
        push(out, "DarkCloudCover", PatternDirection::Bearish, confidence);
    }
}

fn detect_doji_variants(out: &mut Vec<CustomPattern>, last: &Kline) {
    if !is_doji(last) {
        return;
    }
    let r = range(last);
    if r <= 0.0 {
        return;
    }
    let upper = upper_shadow(last);
    let lower = lower_shadow(last);

    if lower > r * 0.6 && upper < r * 0.1 {
        push(out, "DragonflyDoji", PatternDirection::Bullish, 65.0);
    }
    if upper > r * 0.6 && lower < r * 0.1 {
        push(out, "GravestoneDoji", PatternDirection::Bearish, 65.0);
    }
}

fn detect_star_patterns(out: &mut Vec<CustomPattern>, a: &Kline, b: &Kline, c: &Kline) {
    let a_range = range(a);
    if a_range <= 0.0 {
        return;
    }
    let a_body_ratio = body(a) / a_range;
    if a_body_ratio < 0.6 || body(b) > body(a) * 0.3 {
        return;
    }
    let midpoint = (a.open + a.close) / 2.0;
    let b_is_doji = is_doji(b);

    if is_bearish(a) && is_bullish(c) && c.close > midpoint {
        let confidence = if b_is_doji { 80.0 } else { 78.0 };
        let name = if b_is_doji { "MorningDojiStar" } else { "MorningStar" };
        push(out, name, PatternDirection::Bullish, confidence);
    } else if is_bullish(a) && is_bearish(c) && c.close < midpoint {
        let confidence = if b_is_doji { 80.0 } else { 78.0 };
        let name = if b_is_doji { "EveningDojiStar" } else { "EveningStar" };
        push(out, name, PatternDirection::Bearish, confidence);
    }
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

    // S2: klines [O=100,H=100,L=95,C=96], [O=95,H=105,L=94,C=104] -> Engulfing bullish.
    #[test]
    fn s2_engulfing_scenario() {
        let klines = vec![bar(100.0, 100.0, 95.0, 96.0), bar(95.0, 105.0, 94.0, 104.0)];
        let found = detect(&klines, true);
        let engulfing = found.iter().find(|p| p.name == "Engulfing").expect("Engulfing not detected");
        assert_eq!(engulfing.direction, PatternDirection::Bullish);
    }

    #[test]
    fn hammer_requires_downtrend() {
        let downtrend = vec![bar(110.0, 111.0, 105.0, 106.0), bar(106.0, 107.0, 100.0, 101.0), bar(101.0, 102.0, 96.0, 97.0), bar(97.0, 98.0, 80.0, 96.0)];
        let found = detect(&downtrend, true);
        assert!(found.iter().any(|p| p.name == "Hammer"));
    }

    #[test]
    fn dark_cloud_cover_relaxes_gap_in_crypto_mode() {
        let klines = vec![bar(100.0, 110.0, 99.0, 108.0), bar(108.0, 109.0, 95.0, 102.0)];
        let found = detect(&klines, true);
        assert!(found.iter().any(|p| p.name == "DarkCloudCover"));
    }

    #[test]
    fn detect_is_deterministic() {
        let klines = vec![bar(100.0, 100.0, 95.0, 96.0), bar(95.0, 105.0, 94.0, 104.0)];
        let first: Vec<&str> = detect(&klines, true).iter().map(|p| p.name).collect();
        let second: Vec<&str> = detect(&klines, true).iter().map(|p| p.name).collect();
        assert_eq!(first, second);
    }
}
