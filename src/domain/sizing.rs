//! ATR-based, allocation-aware position sizing.
//!
//! allocated = balance * allocation, risk = allocated * risk_percent,
//! sl_distance = ATR * sl_multiplier, value_per_point = tick_value * point / tick_size,
//! lots = risk / (sl_distance / point * value_per_point), rounded to the volume step and
//! clamped to the broker's volume limits.

use crate::domain::direction::Direction;
use crate::domain::error::CandlegateError;
use crate::domain::instrument::InstrumentConfig;
use serde::{Deserialize, Serialize};

/// Broker contract specification of one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub point: f64,
    pub tick_size: f64,
    pub tick_value: f64,
    pub volume_min: f64,
    pub volume_max: f64,
    pub volume_step: f64,
    pub digits: u32,
}

impl SymbolSpec {
    /// Account-currency value of one point move for one lot.
    pub fn value_per_point(&self) -> f64 {
        if self.tick_size > 0.0 {
            self.tick_value * (self.point / self.tick_size)
        } else {
            self.tick_value
        }
    }
}

/// A fully specified order the gateway should submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub lots: f64,
}

/// Intermediate sizing figures, kept for logging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingBreakdown {
    pub allocated_capital: f64,
    pub risk_amount: f64,
    pub sl_distance: f64,
    pub sl_distance_points: f64,
    pub value_per_point: f64,
    pub raw_lots: f64,
    pub lots: f64,
}

pub fn round_to_digits(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// Round to the nearest multiple of `step`, trimming float noise to the step's precision.
pub fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    let rounded = (value / step).round() * step;
    let decimals = step_decimals(step);
    round_to_digits(rounded, decimals)
}

fn step_decimals(step: f64) -> u32 {
    let mut decimals = 0;
    let mut scaled = step;
    while decimals < 10 && (scaled - scaled.round()).abs() > 1e-9 {
        scaled *= 10.0;
        decimals += 1;
    }
    decimals
}

pub fn compute_lots(
    balance: f64,
    atr: f64,
    sl_multiplier: f64,
    config: &InstrumentConfig,
    spec: &SymbolSpec,
) -> Result<SizingBreakdown, CandlegateError> {
    let sizing_err = |reason: String| CandlegateError::Sizing {
        symbol: config.symbol.clone(),
        reason,
    };

    if !(atr.is_finite() && atr > 0.0) {
        return Err(sizing_err(format!("invalid ATR {atr}")));
    }
    if balance <= 0.0 {
        return Err(sizing_err(format!("non-positive balance {balance}")));
    }
    if spec.point <= 0.0 {
        return Err(sizing_err("symbol point must be positive".to_string()));
    }

    let allocated_capital = balance * config.allocation;
    let risk_amount = allocated_capital * config.risk.risk_percent;
    let sl_distance = atr * sl_multiplier;
    let sl_distance_points = sl_distance / spec.point;
    let value_per_point = spec.value_per_point();

    let denominator = sl_distance_points * value_per_point;
    if !(denominator.is_finite() && denominator > 0.0) {
        return Err(sizing_err(format!(
            "stop distance {sl_distance_points} points at {value_per_point} per point is unusable"
        )));
    }
    let raw_lots = risk_amount / denominator;

    let mut lots = round_to_step(raw_lots, spec.volume_step);
    lots = lots.min(spec.volume_max).max(spec.volume_min);
    if let Some(cap) = config.risk.max_lots {
        lots = lots.min(cap).max(spec.volume_min);
    }

    Ok(SizingBreakdown {
        allocated_capital,
        risk_amount,
        sl_distance,
        sl_distance_points,
        value_per_point,
        raw_lots,
        lots,
    })
}

/// Build the order for an entry at `entry_price`. SL/TP sit ATR multiples away, rounded to digits.
pub fn size_order(
    direction: Direction,
    entry_price: f64,
    atr: f64,
    balance: f64,
    config: &InstrumentConfig,
    spec: &SymbolSpec,
) -> Result<(OrderRequest, SizingBreakdown), CandlegateError> {
    let dir = config.direction(direction);
    let breakdown = compute_lots(balance, atr, dir.sl_multiplier, config, spec)?;

    let sign = direction.sign();
    let stop_loss = entry_price - sign * breakdown.sl_distance;
    let take_profit = entry_price + sign * atr * dir.tp_multiplier;

    let order = OrderRequest {
        symbol: config.symbol.clone(),
        direction,
        entry_price,
        stop_loss: round_to_digits(stop_loss, spec.digits),
        take_profit: round_to_digits(take_profit, spec.digits),
        lots: breakdown.lots,
    };
    Ok((order, breakdown))
}
