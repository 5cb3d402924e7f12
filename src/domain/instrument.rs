//! Per-instrument strategy parameters.
//!
//! Loaded once from an instrument INI file and never mutated by the engine.

use crate::domain::config_validation::validate_instrument_config;
use crate::domain::direction::Direction;
use crate::domain::error::CandlegateError;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveTime;
use chrono::Timelike;

pub const DEFAULT_EMA_FAST: usize = 18;
pub const DEFAULT_EMA_MEDIUM: usize = 18;
pub const DEFAULT_EMA_SLOW: usize = 24;
pub const DEFAULT_EMA_FILTER: usize = 100;
pub const DEFAULT_ATR_PERIOD: usize = 10;
pub const DEFAULT_PULLBACK_MAX_CANDLES: u32 = 2;
pub const DEFAULT_ENTRY_WINDOW_PERIODS: u32 = 7;
pub const DEFAULT_PRICE_OFFSET_MULTIPLIER: f64 = 0.5;
pub const DEFAULT_RISK_PERCENT: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    Forex,
    Metal,
}

impl AssetClass {
    pub fn parse(value: &str) -> Option<AssetClass> {
        match value.trim().to_lowercase().as_str() {
            "forex" | "fx" => Some(AssetClass::Forex),
            "metal" | "metals" => Some(AssetClass::Metal),
            _ => None,
        }
    }

    /// Slope-to-degrees scale; metal prices move ~1000x more per point than forex.
    pub fn default_angle_scale(self) -> f64 {
        match self {
            AssetClass::Forex => 10_000.0,
            AssetClass::Metal => 10.0,
        }
    }
}

/// An enable-able `[min, max]` band check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandFilter {
    pub enabled: bool,
    pub min: f64,
    pub max: f64,
}

impl BandFilter {
    pub fn disabled() -> Self {
        BandFilter {
            enabled: false,
            min: 0.0,
            max: 0.0,
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleFilter {
    pub enabled: bool,
    pub min_angle: f64,
    pub max_angle: f64,
    pub scale_factor: f64,
}

/// Parameters of one trade direction (`[long]` or `[short]`).
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalConfig {
    pub enabled: bool,
    pub sl_multiplier: f64,
    pub tp_multiplier: f64,
    pub atr_range: BandFilter,
    pub atr_increment: BandFilter,
    pub atr_decrement: BandFilter,
    pub angle: AngleFilter,
    pub use_price_filter_ema: bool,
    pub use_candle_direction_filter: bool,
    pub use_ema_order_condition: bool,
    pub use_ema_position_filter: bool,
    pub use_pullback_entry: bool,
    pub pullback_max_candles: u32,
    pub entry_window_periods: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmaPeriods {
    pub fast: usize,
    pub medium: usize,
    pub slow: usize,
    pub filter: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    pub use_time_offset: bool,
    pub offset_multiplier: f64,
    pub price_offset_multiplier: f64,
}

/// Trading hours in UTC. `start > end` describes an overnight range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFilterConfig {
    pub enabled: bool,
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
}

impl TimeFilterConfig {
    pub fn always_open() -> Self {
        TimeFilterConfig {
            enabled: false,
            start_hour: 0,
            start_minute: 0,
            end_hour: 23,
            end_minute: 59,
        }
    }

    /// Whether a UTC time of day lies inside the range, inclusive at both ends.
    pub fn contains(&self, utc: NaiveTime) -> bool {
        let now = utc.hour() * 60 + utc.minute();
        let start = self.start_hour * 60 + self.start_minute;
        let end = self.end_hour * 60 + self.end_minute;
        if start <= end {
            now >= start && now <= end
        } else {
            now >= start || now <= end
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskConfig {
    pub risk_percent: f64,
    pub max_lots: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentConfig {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub digits: u32,
    pub ema: EmaPeriods,
    pub atr_period: usize,
    pub long: DirectionalConfig,
    pub short: DirectionalConfig,
    pub window: WindowConfig,
    pub time_filter: TimeFilterConfig,
    pub risk: RiskConfig,
    /// Fraction of account balance allotted to this instrument.
    pub allocation: f64,
}

impl InstrumentConfig {
    /// Validate and build from an instrument INI file.
    pub fn from_config(
        symbol: &str,
        config: &dyn ConfigPort,
        allocation: f64,
    ) -> Result<Self, CandlegateError> {
        validate_instrument_config(config)?;

        let asset_class = config
            .get_string("instrument", "asset_class")
            .and_then(|s| AssetClass::parse(&s))
            .unwrap_or(AssetClass::Forex);

        let max_lots = config.get_double("risk", "max_lots", 0.0);

        Ok(InstrumentConfig {
            symbol: symbol.to_string(),
            asset_class,
            digits: config.get_int("instrument", "digits", 5) as u32,
            ema: EmaPeriods {
                fast: config.get_int("ema", "fast", DEFAULT_EMA_FAST as i64) as usize,
                medium: config.get_int("ema", "medium", DEFAULT_EMA_MEDIUM as i64) as usize,
                slow: config.get_int("ema", "slow", DEFAULT_EMA_SLOW as i64) as usize,
                filter: config.get_int("ema", "filter", DEFAULT_EMA_FILTER as i64) as usize,
            },
            atr_period: config.get_int("atr", "period", DEFAULT_ATR_PERIOD as i64) as usize,
            long: directional_from_config(config, Direction::Long, asset_class),
            short: directional_from_config(config, Direction::Short, asset_class),
            window: WindowConfig {
                use_time_offset: config.get_bool("window", "use_time_offset", true),
                offset_multiplier: config.get_double("window", "offset_multiplier", 1.0),
                price_offset_multiplier: config.get_double(
                    "window",
                    "price_offset_multiplier",
                    DEFAULT_PRICE_OFFSET_MULTIPLIER,
                ),
            },
            time_filter: TimeFilterConfig {
                enabled: config.get_bool("time_filter", "enabled", false),
                start_hour: config.get_int("time_filter", "start_hour", 0) as u32,
                start_minute: config.get_int("time_filter", "start_minute", 0) as u32,
                end_hour: config.get_int("time_filter", "end_hour", 23) as u32,
                end_minute: config.get_int("time_filter", "end_minute", 59) as u32,
            },
            risk: RiskConfig {
                risk_percent: config.get_double("risk", "risk_percent", DEFAULT_RISK_PERCENT),
                max_lots: (max_lots > 0.0).then_some(max_lots),
            },
            allocation,
        })
    }

    pub fn direction(&self, direction: Direction) -> &DirectionalConfig {
        match direction {
            Direction::Long => &self.long,
            Direction::Short => &self.short,
        }
    }

    /// Fewest closed candles needed to compute every indicator plus one previous value.
    pub fn min_bars(&self) -> usize {
        [
            self.ema.fast,
            self.ema.medium,
            self.ema.slow,
            self.ema.filter,
            self.atr_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(1)
        .max(2)
    }
}

fn directional_from_config(
    config: &dyn ConfigPort,
    direction: Direction,
    asset_class: AssetClass,
) -> DirectionalConfig {
    let s = direction.section();
    let band = |flag: &str, min_key: &str, max_key: &str| BandFilter {
        enabled: config.get_bool(s, flag, false),
        min: config.get_double(s, min_key, 0.0),
        max: config.get_double(s, max_key, 0.0),
    };

    DirectionalConfig {
        enabled: config.get_bool(s, "enabled", direction == Direction::Long),
        sl_multiplier: config.get_double(s, "atr_sl_multiplier", 1.5),
        tp_multiplier: config.get_double(s, "atr_tp_multiplier", 10.0),
        atr_range: band("use_atr_filter", "atr_min", "atr_max"),
        atr_increment: band(
            "use_atr_increment_filter",
            "atr_increment_min",
            "atr_increment_max",
        ),
        atr_decrement: band(
            "use_atr_decrement_filter",
            "atr_decrement_min",
            "atr_decrement_max",
        ),
        angle: AngleFilter {
            enabled: config.get_bool(s, "use_angle_filter", false),
            min_angle: config.get_double(s, "min_angle", 0.0),
            max_angle: config.get_double(s, "max_angle", 90.0),
            scale_factor: config.get_double(
                s,
                "angle_scale_factor",
                asset_class.default_angle_scale(),
            ),
        },
        use_price_filter_ema: config.get_bool(s, "use_price_filter_ema", false),
        use_candle_direction_filter: config.get_bool(s, "use_candle_direction_filter", false),
        use_ema_order_condition: config.get_bool(s, "use_ema_order_condition", false),
        use_ema_position_filter: config.get_bool(s, "use_ema_position_filter", false),
        use_pullback_entry: config.get_bool(s, "use_pullback_entry", true),
        pullback_max_candles: config.get_int(
            s,
            "pullback_max_candles",
            DEFAULT_PULLBACK_MAX_CANDLES as i64,
        ) as u32,
        entry_window_periods: config.get_int(
            s,
            "entry_window_periods",
            DEFAULT_ENTRY_WINDOW_PERIODS as i64,
        ) as u32,
    }
}
