//! Per-instrument strategy state, the only mutable entity in the engine.

use crate::domain::candle::Candle;
use crate::domain::direction::Direction;
use crate::domain::window::BreakoutWindow;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Crossover flags of the latest closed candle, pending consumption by the phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossoverData {
    pub bullish: bool,
    pub bearish: bool,
    pub candle_time: NaiveDateTime,
}

/// A detected signal waiting for pullback confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmedSetup {
    pub direction: Direction,
    pub pullback_candle_count: u32,
    pub trigger_candle: Candle,
    pub last_pullback_high: Option<f64>,
    pub last_pullback_low: Option<f64>,
}

impl ArmedSetup {
    pub fn new(direction: Direction, trigger_candle: Candle) -> Self {
        ArmedSetup {
            direction,
            pullback_candle_count: 0,
            trigger_candle,
            last_pullback_high: None,
            last_pullback_low: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry_state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Scanning,
    Armed(ArmedSetup),
    WindowOpen {
        setup: ArmedSetup,
        window: BreakoutWindow,
    },
    InTrade {
        direction: Direction,
    },
}

impl Phase {
    pub fn armed_direction(&self) -> Option<Direction> {
        match self {
            Phase::Scanning => None,
            Phase::Armed(setup) => Some(setup.direction),
            Phase::WindowOpen { setup, .. } => Some(setup.direction),
            Phase::InTrade { direction } => Some(*direction),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Scanning => "SCANNING",
            Phase::Armed(ArmedSetup {
                direction: Direction::Long,
                ..
            }) => "ARMED_LONG",
            Phase::Armed(ArmedSetup {
                direction: Direction::Short,
                ..
            }) => "ARMED_SHORT",
            Phase::WindowOpen { .. } => "WINDOW_OPEN",
            Phase::InTrade { .. } => "IN_TRADE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyState {
    pub phase: Phase,
    /// Count of distinct closed-candle timestamps observed.
    pub current_bar: u64,
    pub last_candle_time: Option<NaiveDateTime>,
    pub last_pullback_check_candle: Option<NaiveDateTime>,
    pub last_crossover_check_candle: Option<NaiveDateTime>,
    pub crossover: Option<CrossoverData>,
    /// ATR captured at arming, baseline for the increment/decrement filters.
    pub signal_detection_atr: Option<f64>,
    pub digits: u32,
}

impl StrategyState {
    pub fn new(digits: u32) -> Self {
        StrategyState {
            phase: Phase::Scanning,
            current_bar: 0,
            last_candle_time: None,
            last_pullback_check_candle: None,
            last_crossover_check_candle: None,
            crossover: None,
            signal_detection_atr: None,
            digits,
        }
    }

    pub fn armed_direction(&self) -> Option<Direction> {
        self.phase.armed_direction()
    }

    pub fn window(&self) -> Option<&BreakoutWindow> {
        match &self.phase {
            Phase::WindowOpen { window, .. } => Some(window),
            _ => None,
        }
    }

    /// Back to SCANNING. Bar counter and dedupe markers survive so no candle is re-evaluated.
    pub fn reset(&mut self) {
        self.phase = Phase::Scanning;
        self.crossover = None;
        self.signal_detection_atr = None;
    }
}

/// A persisted state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub symbol: String,
    pub last_update: DateTime<Utc>,
    pub state: StrategyState,
}

impl StateSnapshot {
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.last_update > max_age
    }
}

/// Keep only records younger than `max_age`; stale instruments start fresh in SCANNING.
pub fn restore_states(
    records: Vec<StateSnapshot>,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Vec<StateSnapshot> {
    records
        .into_iter()
        .filter(|r| !r.is_stale(now, max_age))
        .collect()
}

/// Flattened, owned copy of one instrument's state for read-only consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateView {
    pub symbol: String,
    pub entry_state: String,
    pub armed_direction: Option<Direction>,
    pub pullback_candle_count: u32,
    pub current_bar: u64,
    pub last_candle_time: Option<NaiveDateTime>,
    pub window_active: bool,
    pub window_bar_start: Option<u64>,
    pub window_expiry_bar: Option<u64>,
    pub window_top_limit: Option<f64>,
    pub window_bottom_limit: Option<f64>,
    pub signal_detection_atr: Option<f64>,
    pub digits: u32,
    pub unconfigured: Option<String>,
}

impl StateView {
    pub fn from_state(symbol: &str, state: &StrategyState) -> Self {
        let pullback_candle_count = match &state.phase {
            Phase::Armed(setup) | Phase::WindowOpen { setup, .. } => setup.pullback_candle_count,
            _ => 0,
        };
        let window = state.window();
        StateView {
            symbol: symbol.to_string(),
            entry_state: state.phase.label().to_string(),
            armed_direction: state.armed_direction(),
            pullback_candle_count,
            current_bar: state.current_bar,
            last_candle_time: state.last_candle_time,
            window_active: window.is_some(),
            window_bar_start: window.map(|w| w.bar_start),
            window_expiry_bar: window.map(|w| w.expiry_bar),
            window_top_limit: window.map(|w| w.top_limit),
            window_bottom_limit: window.map(|w| w.bottom_limit),
            signal_detection_atr: state.signal_detection_atr,
            digits: state.digits,
            unconfigured: None,
        }
    }

    /// View of an instrument whose configuration failed to load.
    pub fn unconfigured(symbol: &str, reason: &str) -> Self {
        let mut view = StateView::from_state(symbol, &StrategyState::new(0));
        view.unconfigured = Some(reason.to_string());
        view
    }
}
