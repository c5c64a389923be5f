// =============================================================================
// Library-backed pattern scan — ~18 named patterns
// =============================================================================
//
// No TA crate ships in the retrieval pack (the `ta` family is absent), so
// this follows the same manual, per-bar-arithmetic style the indicators
// module already uses for RSI/ADX/ATR: each detector here returns a signed
// integer for the *last* bar only (positive = bullish, negative = bearish,
// zero = not present), mirroring the signed-output convention of classic
// candlestick-recognition libraries. Sign gives direction; magnitude gives
// confidence (already scaled to [0, 100]).

use crate::kline::Kline;
use crate::types::PatternDirection;

fn body(k: &Kline) -> f64 {
    (k.close - k.open).abs()
}

fn range(k: &Kline) -> f64 {
    k.high - k.low
}

fn is_bullish(k: &Kline) -> bool {
    k.close > k.open
}

fn is_bearish(k: &Kline) -> bool {
    k.close < k.open
}

fn is_doji_bar(k: &Kline) -> bool {
    let r = range(k);
    r > 0.0 && body(k) / r < 0.1
}

/// One named result from the library scan, matching the custom detector's
/// output shape so the two sources compose uniformly.
#[derive(Debug, Clone)]
pub struct LibraryPattern {
    pub name: &'static str,
    pub direction: PatternDirection,
    pub confidence: f64,
}

fn from_signed(name: &'static str, signed: i32) -> Option<LibraryPattern> {
    if signed == 0 {
        return None;
    }
    let direction = if signed > 0 {
        PatternDirection::Bullish
    } else {
        PatternDirection::Bearish
    };
    Some(LibraryPattern {
        name,
        direction,
        confidence: signed.unsigned_abs() as f64,
    })
}

/// Run every library pattern against the last bar of `klines` (closed bars,
/// oldest first). `crypto_mode` skips gap-dependent patterns (AbandonedBaby)
/// since 24/7 trading almost never produces a true gap.
pub fn scan(klines: &[Kline], crypto_mode: bool) -> Vec<LibraryPattern> {
    let mut out = Vec::new();
    let n = klines.len();
    if n == 0 {
        return out;
    }

    macro_rules! push {
        ($name:expr, $signed:expr) => {
            if let Some(p) = from_signed($name, $signed) {
                out.push(p);
            }
        };
    }

    push!("Doji", doji(klines));
    push!("DojiStar", doji_star(klines));
    push!("LongLeggedDoji", long_legged_doji(klines));
    push!("Marubozu", marubozu(klines));
    push!("SpinningTop", spinning_top(klines));
    push!("BeltHold", belt_hold(klines));
    push!("Piercing", piercing(klines));
    push!("ThreeWhiteSoldiers", three_white_soldiers(klines));
    push!("ThreeBlackCrows", three_black_crows(klines));
    push!("ThreeLineStrike", three_line_strike(klines));
    push!("ThreeInside", three_inside(klines));
    push!("ThreeOutside", three_outside(klines));
    push!("MorningStarLib", morning_star_lib(klines));
    push!("EveningStar", evening_star_lib(klines));
    push!("TweezerTop", tweezer_top(klines));
    push!("TweezerBottom", tweezer_bottom(klines));
    push!("Kicking", kicking(klines));

    if !crypto_mode {
        push!("AbandonedBaby", abandoned_baby(klines));
    }

    let _ = n;
    out
}

fn doji(k: &[Kline]) -> i32 {
    let last = match k.last() {
        Some(x) => x,
        None => return 0,
    };
    if is_doji_bar(last) {
        if is_bullish(last) {
            10
        } else {
            -10
        }
    } else {
        0
    }
}

fn doji_star(k: &[Kline]) -> i32 {
    if k.len() < 2 {
        return 0;
    }
    let prev = &k[k.len() - 2];
    let last = &k[k.len() - 1];
    if !is_doji_bar(last) || body(prev) / range(prev).max(1e-9) < 0.4 {
        return 0;
    }
    if is_bearish(prev) {
        60
    } else {
        -60
    }
}

fn long_legged_doji(k: &[Kline]) -> i32 {
    let last = match k.last() {
        Some(x) => x,
        None => return 0,
    };
    let r = range(last);
    if r <= 0.0 || body(last) / r >= 0.1 {
        return 0;
    }
    let upper = last.high - last.open.max(last.close);
    let lower = last.open.min(last.close) - last.low;
    if upper > r * 0.35 && lower > r * 0.35 {
        if is_bullish(last) {
            45
        } else {
            -45
        }
    } else {
        0
    }
}

fn marubozu(k: &[Kline]) -> i32 {
    let last = match k.last() {
        Some(x) => x,
        None => return 0,
    };
    let r = range(last);
    if r <= 0.0 {
        return 0;
    }
    let shadow = r - body(last);
    if shadow / r < 0.05 {
        if is_bullish(last) {
            80
        } else {
            -80
        }
    } else {
        0
    }
}

fn spinning_top(k: &[Kline]) -> i32 {
    let last = match k.last() {
        Some(x) => x,
        None => return 0,
    };
    let r = range(last);
    if r <= 0.0 {
        return 0;
    }
    let b = body(last);
    let upper = last.high - last.open.max(last.close);
    let lower = last.open.min(last.close) - last.low;
    if b / r < 0.3 && upper > b && lower > b {
        if is_bullish(last) {
            35
        } else {
            -35
        }
    } else {
        0
    }
}

fn belt_hold(k: &[Kline]) -> i32 {
    let last = match k.last() {
        Some(x) => x,
        None => return 0,
    };
    let r = range(last);
    if r <= 0.0 {
        return 0;
    }
    if is_bullish(last) && (last.open - last.low) / r < 0.05 {
        55
    } else if is_bearish(last) && (last.high - last.open) / r < 0.05 {
        -55
    } else {
        0
    }
}

fn piercing(k: &[Kline]) -> i32 {
    if k.len() < 2 {
        return 0;
    }
    let prev = &k[k.len() - 2];
    let last = &k[k.len() - 1];
    if !is_bearish(prev) || !is_bullish(last) {
        return 0;
    }
    let prev_mid = (prev.open + prev.close) / 2.0;
    if last.open < prev.close && last.close > prev_mid && last.close < prev.open {
        70
    } else {
        0
    }
}

fn three_white_soldiers(k: &[Kline]) -> i32 {
    if k.len() < 3 {
        return 0;
    }
    let bars = &k[k.len() - 3..];
    let all_bullish = bars.iter().all(is_bullish);
    let increasing = bars[0].close < bars[1].close && bars[1].close < bars[2].close;
    if all_bullish && increasing {
        85
    } else {
        0
    }
}

fn three_black_crows(k: &[Kline]) -> i32 {
    if k.len() < 3 {
        return 0;
    }
    let bars = &k[k.len() - 3..];
    let all_bearish = bars.iter().all(is_bearish);
    let decreasing = bars[0].close > bars[1].close && bars[1].close > bars[2].close;
    if all_bearish && decreasing {
        -85
    } else {
        0
    }
}

fn three_line_strike(k: &[Kline]) -> i32 {
    if k.len() < 4 {
        return 0;
    }
    let bars = &k[k.len() - 4..];
    let (a, b, c, d) = (&bars[0], &bars[1], &bars[2], &bars[3]);
    let three_same_up = is_bullish(a) && is_bullish(b) && is_bullish(c) && c.close > b.close && b.close > a.close;
    if three_same_up && is_bearish(d) && d.open > c.close && d.close < a.open {
        75
    } else {
        let three_same_down = is_bearish(a) && is_bearish(b) && is_bearish(c) && c.close < b.close && b.close < a.close;
        if three_same_down && is_bullish(d) && d.open < c.close && d.close > a.open {
            -75
        } else {
            0
        }
    }
}

/// Library-recognized superset pattern that subsumes Harami/HaramiCross:
/// three candles where the middle candle's body sits inside the first's, and
/// the third closes beyond the first's open in the reversal direction.
fn three_inside(k: &[Kline]) -> i32 {
    if k.len() < 3 {
        return 0;
    }
    let bars = &k[k.len() - 3..];
    let (a, b, c) = (&bars[0], &bars[1], &bars[2]);
    let a_body_hi = a.open.max(a.close);
    let a_body_lo = a.open.min(a.close);
    let inside = b.open.max(b.close) <= a_body_hi && b.open.min(b.close) >= a_body_lo;
    if !inside {
        return 0;
    }
    if is_bearish(a) && is_bullish(c) && c.close > a.open {
        65
    } else if is_bullish(a) && is_bearish(c) && c.close < a.open {
        -65
    } else {
        0
    }
}

/// Library-recognized superset pattern that subsumes Engulfing: a third
/// candle confirms the prior engulfing move past the first candle's open.
fn three_outside(k: &[Kline]) -> i32 {
    if k.len() < 3 {
        return 0;
    }
    let bars = &k[k.len() - 3..];
    let (a, b, c) = (&bars[0], &bars[1], &bars[2]);
    let engulfs = b.open.min(b.close) <= a.open.min(a.close) && b.open.max(b.close) >= a.open.max(a.close);
    if !engulfs {
        return 0;
    }
    if is_bearish(a) && is_bullish(b) && is_bullish(c) && c.close > b.close {
        70
    } else if is_bullish(a) && is_bearish(b) && is_bearish(c) && c.close < b.close {
        -70
    } else {
        0
    }
}

fn morning_star_lib(k: &[Kline]) -> i32 {
    if k.len() < 3 {
        return 0;
    }
    let bars = &k[k.len() - 3..];
    let (a, b, c) = (&bars[0], &bars[1], &bars[2]);
    let a_range = range(a).max(1e-9);
    if is_bearish(a) && body(a) / a_range >= 0.6 && body(b) <= body(a) * 0.3 {
        let midpoint = (a.open + a.close) / 2.0;
        if is_bullish(c) && c.close > midpoint {
            return 78;
        }
    }
    0
}

fn evening_star_lib(k: &[Kline]) -> i32 {
    if k.len() < 3 {
        return 0;
    }
    let bars = &k[k.len() - 3..];
    let (a, b, c) = (&bars[0], &bars[1], &bars[2]);
    let a_range = range(a).max(1e-9);
    if is_bullish(a) && body(a) / a_range >= 0.6 && body(b) <= body(a) * 0.3 {
        let midpoint = (a.open + a.close) / 2.0;
        if is_bearish(c) && c.close < midpoint {
            return -78;
        }
    }
    0
}

fn tweezer_top(k: &[Kline]) -> i32 {
    if k.len() < 2 {
        return 0;
    }
    let prev = &k[k.len() - 2];
    let last = &k[k.len() - 1];
    let high_diff = (prev.high - last.high).abs() / prev.high.max(1e-9);
    if high_diff < 0.001 && is_bullish(prev) && is_bearish(last) {
        -50
    } else {
        0
    }
}

fn tweezer_bottom(k: &[Kline]) -> i32 {
    if k.len() < 2 {
        return 0;
    }
    let prev = &k[k.len() - 2];
    let last = &k[k.len() - 1];
    let low_diff = (prev.low - last.low).abs() / prev.low.max(1e-9);
    if low_diff < 0.001 && is_bearish(prev) && is_bullish(last) {
        50
    } else {
        0
    }
}

fn kicking(k: &[Kline]) -> i32 {
    if k.len() < 2 {
        return 0;
    }
    let prev = &k[k.len() - 2];
    let last = &k[k.len() - 1];
    let prev_marubozu = (range(prev) - body(prev)) / range(prev).max(1e-9) < 0.05;
    let last_marubozu = (range(last) - body(last)) / range(last).max(1e-9) < 0.05;
    if !prev_marubozu || !last_marubozu {
        return 0;
    }
    if is_bearish(prev) && is_bullish(last) && last.open > prev.open {
        90
    } else if is_bullish(prev) && is_bearish(last) && last.open < prev.open {
        -90
    } else {
        0
    }
}

fn abandoned_baby(k: &[Kline]) -> i32 {
    if k.len() < 3 {
        return 0;
    }
    let bars = &k[k.len() - 3..];
    let (a, b, c) = (&bars[0], &bars[1], &bars[2]);
    if !is_doji_bar(b) {
        return 0;
    }
    if is_bearish(a) && b.high < a.low && is_bullish(c) && c.low > b.high {
        80
    } else if is_bullish(a) && b.low > a.high && is_bearish(c) && c.high < b.low {
        -80
    } else {
        0
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

    #[test]
    fn doji_detects_small_body() {
        let klines = vec![bar(100.0, 101.0, 99.0, 100.05)];
        assert_ne!(doji(&klines), 0);
    }

    #[test]
    fn three_white_soldiers_needs_increasing_closes() {
        let klines = vec![bar(100.0, 105.0, 99.0, 104.0), bar(104.0, 109.0, 103.0, 108.0), bar(108.0, 113.0, 107.0, 112.0)];
        assert!(three_white_soldiers(&klines) > 0);
    }

    #[test]
    fn scan_skips_abandoned_baby_in_crypto_mode() {
        let klines = vec![
            bar(100.0, 101.0, 90.0, 91.0),
            bar(80.0, 81.0, 79.5, 80.2),
            bar(95.0, 110.0, 94.0, 109.0),
        ];
        let crypto = scan(&klines, true);
        assert!(!crypto.iter().any(|p| p.name == "AbandonedBaby"));
    }

    #[test]
    fn scan_determinism() {
        let klines = vec![bar(100.0, 105.0, 99.0, 104.0), bar(104.0, 109.0, 103.0, 108.0), bar(108.0, 113.0, 107.0, 112.0)];
        let first: Vec<&str> = scan(&klines, true).iter().map(|p| p.name).collect();
        let second: Vec<&str> = scan(&klines, true).iter().map(|p| p.name).collect();
        assert_eq!(first, second);
    }
}
