//! Indicator engine.
//!
//! Computes the confirm/fast/medium/slow/filter EMAs and ATR over a window of
//! closed candles. Pure function of the window; recomputed every evaluation.

pub mod atr;
pub mod ema;

use crate::domain::candle::Candle;
use crate::domain::error::CandlegateError;
use crate::domain::instrument::InstrumentConfig;
use serde::{Deserialize, Serialize};

/// Period of the confirm EMA, which tracks the close exactly.
pub const CONFIRM_PERIOD: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

/// EMA values at one candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmaLines {
    pub confirm: f64,
    pub fast: f64,
    pub medium: f64,
    pub slow: f64,
    pub filter: f64,
}

impl EmaLines {
    /// Fast, medium and slow, the lines a crossover is checked against.
    pub fn crossover_lines(&self) -> [f64; 3] {
        [self.fast, self.medium, self.slow]
    }

    pub fn trend(&self) -> Trend {
        if self.fast > self.medium && self.medium > self.slow {
            Trend::Bullish
        } else if self.fast < self.medium && self.medium < self.slow {
            Trend::Bearish
        } else {
            Trend::Sideways
        }
    }
}

/// Indicators at the latest closed candle, plus the values one candle earlier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSet {
    pub ema: EmaLines,
    pub previous_ema: EmaLines,
    pub atr: f64,
    pub previous_atr: f64,
    pub current_price: f64,
    pub trend: Trend,
}

pub fn compute_indicators(
    candles: &[Candle],
    config: &InstrumentConfig,
) -> Result<IndicatorSet, CandlegateError> {
    let minimum = config.min_bars();
    if candles.len() < minimum {
        return Err(CandlegateError::InsufficientData {
            symbol: config.symbol.clone(),
            bars: candles.len(),
            minimum,
        });
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let confirm = ema::calculate_ema(&closes, CONFIRM_PERIOD);
    let fast = ema::calculate_ema(&closes, config.ema.fast);
    let medium = ema::calculate_ema(&closes, config.ema.medium);
    let slow = ema::calculate_ema(&closes, config.ema.slow);
    let filter = ema::calculate_ema(&closes, config.ema.filter);

    let lines_at = |i: usize| EmaLines {
        confirm: confirm[i],
        fast: fast[i],
        medium: medium[i],
        slow: slow[i],
        filter: filter[i],
    };

    let last = candles.len() - 1;
    let current = lines_at(last);

    Ok(IndicatorSet {
        ema: current,
        previous_ema: lines_at(last - 1),
        atr: atr::calculate_atr(candles, config.atr_period),
        previous_atr: atr::calculate_atr(&candles[..last], config.atr_period),
        current_price: closes[last],
        trend: current.trend(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn config() -> InstrumentConfig {
        let ini = "[ema]\nfast = 3\nmedium = 5\nslow = 8\nfilter = 10\n[atr]\nperiod = 4\n";
        let adapter = FileConfigAdapter::from_string(ini).unwrap();
        InstrumentConfig::from_config("EURUSD", &adapter, 1.0).unwrap()
    }

    fn rising(n: usize) -> Vec<Candle> {
        let start = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap();
        (0..n)
            .map(|i| {
                let base = 1.1000 + i as f64 * 0.0005;
                Candle {
                    time: start + chrono::Duration::minutes(5 * i as i64),
                    open: base,
                    high: base + 0.0008,
                    low: base - 0.0002,
                    close: base + 0.0005,
                }
            })
            .collect()
    }

    #[test]
    fn insufficient_window_is_data_error() {
        let err = compute_indicators(&rising(5), &config()).unwrap_err();
        assert!(matches!(
            err,
            CandlegateError::InsufficientData { bars: 5, minimum: 10, .. }
        ));
        assert!(err.is_data_error());
    }

    #[test]
    fn confirm_line_is_close() {
        let candles = rising(30);
        let set = compute_indicators(&candles, &config()).unwrap();
        assert_eq!(set.ema.confirm, candles[29].close);
        assert_eq!(set.previous_ema.confirm, candles[28].close);
        assert_eq!(set.current_price, candles[29].close);
    }

    #[test]
    fn rising_market_is_bullish() {
        let set = compute_indicators(&rising(30), &config()).unwrap();
        assert_eq!(set.trend, Trend::Bullish);
        assert!(set.ema.fast > set.ema.slow);
    }

    #[test]
    fn atr_matches_steady_range() {
        // each TR = max(0.0010, |high - prev close|=0.0008, |low - prev close|=0.0002)
        let set = compute_indicators(&rising(30), &config()).unwrap();
        assert_relative_eq!(set.atr, 0.0010, epsilon = 1e-9);
        assert_relative_eq!(set.previous_atr, 0.0010, epsilon = 1e-9);
    }

    #[test]
    fn trend_classification() {
        let mk = |fast, medium, slow| EmaLines {
            confirm: 0.0,
            fast,
            medium,
            slow,
            filter: 0.0,
        };
        assert_eq!(mk(3.0, 2.0, 1.0).trend(), Trend::Bullish);
        assert_eq!(mk(1.0, 2.0, 3.0).trend(), Trend::Bearish);
        assert_eq!(mk(2.0, 2.0, 1.0).trend(), Trend::Sideways);
    }
}
