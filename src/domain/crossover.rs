//! Closed-candle EMA crossover detection.
//!
//! Bullish on a line: confirm[t] > line[t] && confirm[t-1] <= line[t-1].
//! Bearish mirrors it. Fast, medium and slow are ORed into one flag per side.

use crate::domain::candle::Candle;
use crate::domain::indicator::{EmaLines, IndicatorSet};
use crate::domain::state::{CrossoverData, StrategyState};
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, Utc};

/// Per-side count of crossed lines on one candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Crossings {
    pub bullish: usize,
    pub bearish: usize,
}

pub fn count_crossings(current: &EmaLines, previous: &EmaLines) -> Crossings {
    let mut crossings = Crossings::default();
    for (line, prev_line) in current
        .crossover_lines()
        .into_iter()
        .zip(previous.crossover_lines())
    {
        if current.confirm > line && previous.confirm <= prev_line {
            crossings.bullish += 1;
        }
        if current.confirm < line && previous.confirm >= prev_line {
            crossings.bearish += 1;
        }
    }
    crossings
}

/// Convert a broker-local naive timestamp to UTC.
pub fn broker_to_utc(local: NaiveDateTime, offset: FixedOffset) -> DateTime<Utc> {
    (local - Duration::seconds(offset.local_minus_utc() as i64)).and_utc()
}

/// Detects crossovers on the latest closed candle, once per candle timestamp.
#[derive(Debug, Clone)]
pub struct CrossoverDetector {
    started_at: DateTime<Utc>,
    broker_offset: FixedOffset,
}

impl CrossoverDetector {
    pub fn new(started_at: DateTime<Utc>, broker_offset: FixedOffset) -> Self {
        CrossoverDetector {
            started_at,
            broker_offset,
        }
    }

    /// A candle that opened before the process started carries a historical signal.
    pub fn is_stale(&self, candle: &Candle) -> bool {
        broker_to_utc(candle.time, self.broker_offset) < self.started_at
    }

    /// Check the latest candle. Records it in `last_crossover_check_candle` and returns
    /// `None` when it was already checked, nothing crossed, or the signal is stale.
    pub fn check(
        &self,
        state: &mut StrategyState,
        latest: &Candle,
        indicators: &IndicatorSet,
    ) -> Option<CrossoverData> {
        if state.last_crossover_check_candle == Some(latest.time) {
            return None;
        }
        state.last_crossover_check_candle = Some(latest.time);

        let crossings = count_crossings(&indicators.ema, &indicators.previous_ema);
        if crossings.bullish == 0 && crossings.bearish == 0 {
            return None;
        }

        if self.is_stale(latest) {
            tracing::debug!(candle = %latest.time, "discarding crossover from before startup");
            return None;
        }

        tracing::debug!(
            candle = %latest.time,
            bullish_lines = crossings.bullish,
            bearish_lines = crossings.bearish,
            "crossover detected"
        );

        Some(CrossoverData {
            bullish: crossings.bullish > 0,
            bearish: crossings.bearish > 0,
            candle_time: latest.time,
        })
    }
}
