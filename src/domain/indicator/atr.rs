//! Average True Range as a simple rolling mean of True Range.
//!
//! TR[0] = high - low (no previous close). ATR = mean of the last `period` TRs.
//! If the rolling window is incomplete or non-positive, the mean of whatever tail
//! is available is used instead, and if that is also unusable, `ATR_FLOOR`.

use crate::domain::candle::Candle;

/// Smallest ATR the engine will ever report.
pub const ATR_FLOOR: f64 = 0.0001;

pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 {
                c.high - c.low
            } else {
                c.true_range(candles[i - 1].close)
            }
        })
        .collect()
}

/// ATR of the whole window, ending at its last candle.
pub fn calculate_atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < 2 || period == 0 {
        return ATR_FLOOR;
    }

    let tr = true_ranges(candles);
    if tr.len() >= period {
        let rolling = mean(&tr[tr.len() - period..]);
        if is_usable(rolling) {
            return rolling;
        }
    }

    let tail = period.min(tr.len());
    let fallback = mean(&tr[tr.len() - tail..]);
    if is_usable(fallback) {
        fallback
    } else {
        ATR_FLOOR
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn is_usable(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
