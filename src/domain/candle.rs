//! Closed price candle representation.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A single OHLC candle. `time` is the candle's open time in broker-local time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    /// The instant this candle closes, given the timeframe.
    pub fn close_time(&self, timeframe: Duration) -> NaiveDateTime {
        self.time + timeframe
    }
}

/// Drop trailing candles that have not closed yet as of `now_local`.
///
/// Feeds that include the forming bar (as most broker APIs do) are trimmed here so
/// the core never evaluates a still-moving candle.
pub fn closed_only(candles: &[Candle], now_local: NaiveDateTime, timeframe: Duration) -> &[Candle] {
    let mut end = candles.len();
    while end > 0 && candles[end - 1].close_time(timeframe) > now_local {
        end -= 1;
    }
    &candles[..end]
}

/// Candles strictly after `marker`, in timestamp order. `None` yields only the latest candle.
pub fn unprocessed_since(candles: &[Candle], marker: Option<NaiveDateTime>) -> &[Candle] {
    match marker {
        None => {
            let start = candles.len().saturating_sub(1);
            &candles[start..]
        }
        Some(marker) => {
            let start = candles.partition_point(|c| c.time <= marker);
            &candles[start..]
        }
    }
}
