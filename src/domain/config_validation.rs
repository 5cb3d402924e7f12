//! Configuration validation.
//!
//! Validates all config fields before the engine starts or an instrument is loaded.

use crate::domain::direction::Direction;
use crate::domain::error::CandlegateError;
use crate::domain::instrument::AssetClass;
use crate::ports::config_port::ConfigPort;

const ALLOCATION_TOLERANCE: f64 = 1e-6;

pub fn validate_engine_config(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    let symbols = validate_symbols(config)?;
    validate_strategies_dir(config)?;
    validate_positive_int(config, "engine", "timeframe_minutes", 5)?;
    validate_positive_int(config, "engine", "history_bars", 150)?;
    validate_positive_int(config, "engine", "poll_interval_seconds", 5)?;
    validate_positive_int(config, "engine", "state_staleness_minutes", 30)?;
    validate_grace(config)?;
    validate_broker_offset(config)?;
    validate_state_backend(config)?;
    validate_allocation(config, &symbols)?;
    Ok(())
}

pub fn validate_instrument_config(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    validate_asset_class(config)?;
    validate_digits(config)?;
    for key in ["fast", "medium", "slow", "filter"] {
        validate_positive_int(config, "ema", key, 1)?;
    }
    validate_positive_int(config, "atr", "period", 1)?;
    validate_direction(config, Direction::Long)?;
    validate_direction(config, Direction::Short)?;
    validate_window(config)?;
    validate_time_filter(config)?;
    validate_risk(config)?;
    Ok(())
}

/// Parse the comma separated `[engine] symbols` list.
pub fn parse_symbols(config: &dyn ConfigPort) -> Vec<String> {
    config
        .get_string("engine", "symbols")
        .map(|s| {
            s.split(',')
                .map(|sym| sym.trim().to_uppercase())
                .filter(|sym| !sym.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> CandlegateError {
    CandlegateError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn validate_symbols(config: &dyn ConfigPort) -> Result<Vec<String>, CandlegateError> {
    if config.get_string("engine", "symbols").is_none() {
        return Err(CandlegateError::ConfigMissing {
            section: "engine".to_string(),
            key: "symbols".to_string(),
        });
    }
    let symbols = parse_symbols(config);
    if symbols.is_empty() {
        return Err(invalid("engine", "symbols", "at least one symbol is required"));
    }
    Ok(symbols)
}

fn validate_strategies_dir(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    match config.get_string("engine", "strategies_dir") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(CandlegateError::ConfigMissing {
            section: "engine".to_string(),
            key: "strategies_dir".to_string(),
        }),
    }
}

fn validate_positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<(), CandlegateError> {
    let value = config.get_int(section, key, default);
    if value < 1 {
        return Err(invalid(section, key, format!("{key} must be at least 1")));
    }
    Ok(())
}

fn validate_grace(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    let grace = config.get_int("engine", "close_grace_seconds", 10);
    let timeframe = config.get_int("engine", "timeframe_minutes", 5);
    if grace < 0 || grace >= timeframe * 60 {
        return Err(invalid(
            "engine",
            "close_grace_seconds",
            "close_grace_seconds must be non-negative and shorter than the timeframe",
        ));
    }
    Ok(())
}

fn validate_broker_offset(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    let offset = config.get_int("engine", "broker_utc_offset_hours", 0);
    if !(-12..=14).contains(&offset) {
        return Err(invalid(
            "engine",
            "broker_utc_offset_hours",
            "broker_utc_offset_hours must be between -12 and 14",
        ));
    }
    Ok(())
}

fn validate_state_backend(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    match config.get_string("engine", "state_backend").as_deref() {
        None | Some("json") | Some("sqlite") => Ok(()),
        Some(other) => Err(invalid(
            "engine",
            "state_backend",
            format!("unknown state backend '{other}', expected json or sqlite"),
        )),
    }
}

fn validate_allocation(config: &dyn ConfigPort, symbols: &[String]) -> Result<(), CandlegateError> {
    let mut total = 0.0;
    for symbol in symbols {
        let fraction = config.get_double("allocation", symbol, 0.0);
        if fraction <= 0.0 || fraction > 1.0 {
            return Err(invalid(
                "allocation",
                symbol,
                "allocation must be in (0, 1]",
            ));
        }
        total += fraction;
    }
    if (total - 1.0).abs() > ALLOCATION_TOLERANCE {
        return Err(invalid(
            "allocation",
            "*",
            format!("allocations must sum to 1.0, got {total:.6}"),
        ));
    }
    Ok(())
}

fn validate_asset_class(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    match config.get_string("instrument", "asset_class") {
        None => Ok(()),
        Some(s) if AssetClass::parse(&s).is_some() => Ok(()),
        Some(s) => Err(invalid(
            "instrument",
            "asset_class",
            format!("unknown asset class '{s}', expected forex or metal"),
        )),
    }
}

fn validate_digits(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    let digits = config.get_int("instrument", "digits", 5);
    if !(0..=10).contains(&digits) {
        return Err(invalid("instrument", "digits", "digits must be between 0 and 10"));
    }
    Ok(())
}

fn validate_direction(config: &dyn ConfigPort, direction: Direction) -> Result<(), CandlegateError> {
    let s = direction.section();
    for key in ["atr_sl_multiplier", "atr_tp_multiplier"] {
        if config.get_double(s, key, 1.0) <= 0.0 {
            return Err(invalid(s, key, format!("{key} must be positive")));
        }
    }
    validate_band(config, s, "use_atr_filter", "atr_min", "atr_max")?;
    validate_band(
        config,
        s,
        "use_atr_increment_filter",
        "atr_increment_min",
        "atr_increment_max",
    )?;
    validate_band(
        config,
        s,
        "use_atr_decrement_filter",
        "atr_decrement_min",
        "atr_decrement_max",
    )?;
    validate_band(config, s, "use_angle_filter", "min_angle", "max_angle")?;
    if config.get_double(s, "angle_scale_factor", 1.0) <= 0.0 {
        return Err(invalid(s, "angle_scale_factor", "angle_scale_factor must be positive"));
    }
    validate_positive_int(config, s, "pullback_max_candles", 2)?;
    validate_positive_int(config, s, "entry_window_periods", 7)?;
    Ok(())
}

/// An enabled band needs both bounds present and ordered.
fn validate_band(
    config: &dyn ConfigPort,
    section: &str,
    flag: &str,
    min_key: &str,
    max_key: &str,
) -> Result<(), CandlegateError> {
    if !config.get_bool(section, flag, false) {
        return Ok(());
    }
    for key in [min_key, max_key] {
        if config.get_string(section, key).is_none() {
            return Err(CandlegateError::ConfigMissing {
                section: section.to_string(),
                key: key.to_string(),
            });
        }
    }
    let min = config.get_double(section, min_key, f64::NAN);
    let max = config.get_double(section, max_key, f64::NAN);
    if min.is_nan() || max.is_nan() {
        return Err(invalid(section, min_key, "band bounds must be numeric"));
    }
    if min > max {
        return Err(invalid(
            section,
            min_key,
            format!("{min_key} must not exceed {max_key}"),
        ));
    }
    Ok(())
}

fn validate_window(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    if config.get_double("window", "offset_multiplier", 1.0) < 0.0 {
        return Err(invalid(
            "window",
            "offset_multiplier",
            "offset_multiplier must be non-negative",
        ));
    }
    if config.get_double("window", "price_offset_multiplier", 0.5) < 0.0 {
        return Err(invalid(
            "window",
            "price_offset_multiplier",
            "price_offset_multiplier must be non-negative",
        ));
    }
    Ok(())
}

fn validate_time_filter(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    for (key, default, max) in [
        ("start_hour", 0, 23),
        ("end_hour", 23, 23),
        ("start_minute", 0, 59),
        ("end_minute", 59, 59),
    ] {
        let value = config.get_int("time_filter", key, default);
        if !(0..=max).contains(&value) {
            return Err(invalid(
                "time_filter",
                key,
                format!("{key} must be between 0 and {max}"),
            ));
        }
    }
    Ok(())
}

fn validate_risk(config: &dyn ConfigPort) -> Result<(), CandlegateError> {
    let risk = config.get_double("risk", "risk_percent", 0.005);
    if risk <= 0.0 || risk > 1.0 {
        return Err(invalid("risk", "risk_percent", "risk_percent must be in (0, 1]"));
    }
    if config.get_double("risk", "max_lots", 0.0) < 0.0 {
        return Err(invalid("risk", "max_lots", "max_lots must be non-negative"));
    }
    Ok(())
}
