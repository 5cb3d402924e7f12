//! Breakout window: a time-boxed, two-sided price channel opened after pullback.
//!
//! Bounds are fixed when the window opens and never recomputed while it is open.

use crate::domain::candle::Candle;
use crate::domain::direction::Direction;
use crate::domain::instrument::WindowConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakoutWindow {
    pub bar_start: u64,
    pub expiry_bar: u64,
    pub top_limit: f64,
    pub bottom_limit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WindowStatus {
    /// The time offset has not elapsed yet.
    Pending,
    /// Open, no boundary touched.
    Inside,
    Success,
    Failure,
    Expired,
}

impl fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WindowStatus::Pending => "PENDING",
            WindowStatus::Inside => "INSIDE",
            WindowStatus::Success => "SUCCESS",
            WindowStatus::Failure => "FAILURE",
            WindowStatus::Expired => "EXPIRED",
        };
        write!(f, "{label}")
    }
}

impl BreakoutWindow {
    /// Window opened at `current_bar` over a pullback candle range.
    pub fn open(
        current_bar: u64,
        pullback_count: u32,
        pullback_high: f64,
        pullback_low: f64,
        window_periods: u32,
        config: &WindowConfig,
    ) -> BreakoutWindow {
        let offset_bars = if config.use_time_offset {
            (pullback_count as f64 * config.offset_multiplier).max(0.0) as u64
        } else {
            0
        };
        let bar_start = current_bar + offset_bars;

        let price_offset = (pullback_high - pullback_low) * config.price_offset_multiplier;

        BreakoutWindow {
            bar_start,
            expiry_bar: bar_start + window_periods as u64,
            top_limit: pullback_high + price_offset,
            bottom_limit: pullback_low - price_offset,
        }
    }

    /// Classify one closed candle observed at bar index `bar`.
    pub fn monitor(&self, direction: Direction, bar: u64, candle: &Candle) -> WindowStatus {
        if bar < self.bar_start {
            return WindowStatus::Pending;
        }
        if bar > self.expiry_bar {
            return WindowStatus::Expired;
        }

        let broke_top = candle.high >= self.top_limit;
        let broke_bottom = candle.low <= self.bottom_limit;
        let (success, failure) = match direction {
            Direction::Long => (broke_top, broke_bottom),
            Direction::Short => (broke_bottom, broke_top),
        };

        if success {
            WindowStatus::Success
        } else if failure {
            WindowStatus::Failure
        } else {
            WindowStatus::Inside
        }
    }
}
