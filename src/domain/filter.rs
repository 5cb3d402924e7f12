//! Entry filter validation.
//!
//! Every filter is a pure predicate returning a typed outcome. Disabled filters pass.
//! `FilterOutcome::Error` (e.g. a non-finite indicator) blocks entry like a failure.

use crate::domain::candle::Candle;
use crate::domain::crossover::broker_to_utc;
use crate::domain::direction::Direction;
use crate::domain::indicator::IndicatorSet;
use crate::domain::instrument::{BandFilter, DirectionalConfig, TimeFilterConfig};
use chrono::{FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    AtrRange,
    AtrIncrement,
    AtrDecrement,
    Angle,
    PriceFilterEma,
    CandleDirection,
    EmaOrder,
    EmaPosition,
    TimeOfDay,
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterKind::AtrRange => "atr_range",
            FilterKind::AtrIncrement => "atr_increment",
            FilterKind::AtrDecrement => "atr_decrement",
            FilterKind::Angle => "angle",
            FilterKind::PriceFilterEma => "price_filter_ema",
            FilterKind::CandleDirection => "candle_direction",
            FilterKind::EmaOrder => "ema_order",
            FilterKind::EmaPosition => "ema_position",
            FilterKind::TimeOfDay => "time_of_day",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "lowercase")]
pub enum FilterOutcome {
    Pass,
    Fail(String),
    Error(String),
}

impl FilterOutcome {
    pub fn allows(&self) -> bool {
        matches!(self, FilterOutcome::Pass)
    }

    fn check(condition: bool, reason: impl FnOnce() -> String) -> FilterOutcome {
        if condition {
            FilterOutcome::Pass
        } else {
            FilterOutcome::Fail(reason())
        }
    }
}

impl fmt::Display for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOutcome::Pass => write!(f, "pass"),
            FilterOutcome::Fail(reason) => write!(f, "fail: {reason}"),
            FilterOutcome::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterVerdict {
    pub kind: FilterKind,
    pub outcome: FilterOutcome,
}

/// Verdicts of every filter that was evaluated for one decision.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterReport {
    pub verdicts: Vec<FilterVerdict>,
}

impl FilterReport {
    pub fn passed(&self) -> bool {
        self.verdicts.iter().all(|v| v.outcome.allows())
    }

    pub fn first_block(&self) -> Option<&FilterVerdict> {
        self.verdicts.iter().find(|v| !v.outcome.allows())
    }

    fn push(&mut self, kind: FilterKind, outcome: FilterOutcome) {
        self.verdicts.push(FilterVerdict { kind, outcome });
    }
}

/// Everything a filter may look at.
#[derive(Debug, Clone, Copy)]
pub struct FilterInput<'a> {
    pub direction: Direction,
    pub candle: &'a Candle,
    pub indicators: &'a IndicatorSet,
    /// ATR captured at arming; `None` falls back to the one-bar delta.
    pub baseline_atr: Option<f64>,
    pub config: &'a DirectionalConfig,
}

/// Full entry validation for a fresh signal. Time of day is checked separately at execution.
pub fn validate_entry(input: &FilterInput<'_>) -> FilterReport {
    let mut report = FilterReport::default();
    report.push(FilterKind::AtrRange, atr_range(input));
    let (kind, outcome) = atr_change(input);
    report.push(kind, outcome);
    report.push(FilterKind::Angle, angle(input));
    report.push(FilterKind::PriceFilterEma, price_filter_ema(input));
    report.push(FilterKind::CandleDirection, candle_direction(input));
    report.push(FilterKind::EmaOrder, ema_order(input));
    report.push(FilterKind::EmaPosition, ema_position(input));
    report
}

/// Re-validation on breakout: trend alignment only, not point-in-time volatility or slope.
pub fn validate_breakout(input: &FilterInput<'_>) -> FilterReport {
    let mut report = FilterReport::default();
    report.push(FilterKind::PriceFilterEma, price_filter_ema(input));
    report.push(FilterKind::EmaOrder, ema_order(input));
    report
}

fn non_finite(name: &str, value: f64) -> Option<FilterOutcome> {
    (!value.is_finite()).then(|| FilterOutcome::Error(format!("{name} is not finite")))
}

fn band(filter: &BandFilter, name: &str, value: f64) -> FilterOutcome {
    if !filter.enabled {
        return FilterOutcome::Pass;
    }
    if let Some(err) = non_finite(name, value) {
        return err;
    }
    FilterOutcome::check(filter.contains(value), || {
        format!("{name} {value:.6} outside [{}, {}]", filter.min, filter.max)
    })
}

pub fn atr_range(input: &FilterInput<'_>) -> FilterOutcome {
    band(&input.config.atr_range, "atr", input.indicators.atr)
}

/// Signed ATR change since arming. Increment band applies to a non-negative delta,
/// decrement band to a negative one.
pub fn atr_change(input: &FilterInput<'_>) -> (FilterKind, FilterOutcome) {
    if !input.config.atr_increment.enabled && !input.config.atr_decrement.enabled {
        return (FilterKind::AtrIncrement, FilterOutcome::Pass);
    }
    let baseline = input.baseline_atr.unwrap_or(input.indicators.previous_atr);
    let delta = input.indicators.atr - baseline;
    if let Some(err) = non_finite("atr delta", delta) {
        return (FilterKind::AtrIncrement, err);
    }
    if delta >= 0.0 {
        (
            FilterKind::AtrIncrement,
            band(&input.config.atr_increment, "atr increment", delta),
        )
    } else {
        (
            FilterKind::AtrDecrement,
            band(&input.config.atr_decrement, "atr decrement", delta),
        )
    }
}

/// Slope of the confirm EMA in degrees, positive in the trade direction.
pub fn ema_angle(indicators: &IndicatorSet, direction: Direction, scale_factor: f64) -> f64 {
    let slope = indicators.ema.confirm - indicators.previous_ema.confirm;
    (slope * scale_factor).atan().to_degrees() * direction.sign()
}

pub fn angle(input: &FilterInput<'_>) -> FilterOutcome {
    let cfg = &input.config.angle;
    if !cfg.enabled {
        return FilterOutcome::Pass;
    }
    let value = ema_angle(input.indicators, input.direction, cfg.scale_factor);
    if let Some(err) = non_finite("angle", value) {
        return err;
    }
    FilterOutcome::check(value >= cfg.min_angle && value <= cfg.max_angle, || {
        format!(
            "angle {value:.2} outside [{}, {}]",
            cfg.min_angle, cfg.max_angle
        )
    })
}

pub fn price_filter_ema(input: &FilterInput<'_>) -> FilterOutcome {
    if !input.config.use_price_filter_ema {
        return FilterOutcome::Pass;
    }
    let close = input.candle.close;
    let filter = input.indicators.ema.filter;
    if let Some(err) = non_finite("filter ema", filter) {
        return err;
    }
    let ok = match input.direction {
        Direction::Long => close > filter,
        Direction::Short => close < filter,
    };
    FilterOutcome::check(ok, || {
        format!("close {close} on wrong side of filter ema {filter:.6}")
    })
}

pub fn candle_direction(input: &FilterInput<'_>) -> FilterOutcome {
    if !input.config.use_candle_direction_filter {
        return FilterOutcome::Pass;
    }
    let ok = match input.direction {
        Direction::Long => input.candle.is_bullish(),
        Direction::Short => input.candle.is_bearish(),
    };
    FilterOutcome::check(ok, || {
        format!("reference candle does not confirm {}", input.direction)
    })
}

/// Confirm EMA beyond each of fast, medium and slow. Stacking among them is not required.
pub fn ema_order(input: &FilterInput<'_>) -> FilterOutcome {
    if !input.config.use_ema_order_condition {
        return FilterOutcome::Pass;
    }
    let ema = &input.indicators.ema;
    if let Some(err) = non_finite("confirm ema", ema.confirm) {
        return err;
    }
    let ok = ema.crossover_lines().iter().all(|&line| match input.direction {
        Direction::Long => ema.confirm > line,
        Direction::Short => ema.confirm < line,
    });
    FilterOutcome::check(ok, || {
        format!("confirm ema not beyond fast/medium/slow for {}", input.direction)
    })
}

/// Close beyond every one of fast, medium and slow on the trade side.
pub fn ema_position(input: &FilterInput<'_>) -> FilterOutcome {
    if !input.config.use_ema_position_filter {
        return FilterOutcome::Pass;
    }
    let close = input.candle.close;
    let ok = input
        .indicators
        .ema
        .crossover_lines()
        .iter()
        .all(|&line| match input.direction {
            Direction::Long => close > line,
            Direction::Short => close < line,
        });
    FilterOutcome::check(ok, || {
        format!("close {close} not beyond all emas for {}", input.direction)
    })
}

/// Trading-hours gate on a broker-local candle time.
pub fn time_of_day(
    candle_time: NaiveDateTime,
    broker_offset: FixedOffset,
    config: &TimeFilterConfig,
) -> FilterOutcome {
    if !config.enabled {
        return FilterOutcome::Pass;
    }
    let utc = broker_to_utc(candle_time, broker_offset);
    FilterOutcome::check(config.contains(utc.time()), || {
        format!(
            "{} UTC outside {:02}:{:02}-{:02}:{:02}",
            utc.format("%H:%M"),
            config.start_hour,
            config.start_minute,
            config.end_hour,
            config.end_minute
        )
    })
}
