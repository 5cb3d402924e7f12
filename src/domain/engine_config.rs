//! Engine-level configuration (`[engine]` and `[allocation]` sections).

use crate::domain::config_validation::{parse_symbols, validate_engine_config};
use crate::domain::engine::EngineSettings;
use crate::domain::error::CandlegateError;
use crate::ports::config_port::ConfigPort;
use chrono::{Duration, FixedOffset};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateBackend {
    Json,
    Sqlite,
}

/// Fixed per-instrument share of account capital.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllocationTable {
    fractions: HashMap<String, f64>,
}

impl AllocationTable {
    pub fn new(fractions: HashMap<String, f64>) -> Self {
        AllocationTable { fractions }
    }

    pub fn fraction(&self, symbol: &str) -> Option<f64> {
        self.fractions.get(symbol).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub symbols: Vec<String>,
    pub strategies_dir: PathBuf,
    pub timeframe_minutes: i64,
    pub history_bars: usize,
    pub poll_interval_seconds: i64,
    pub close_grace_seconds: i64,
    pub broker_utc_offset_hours: i32,
    pub state_staleness_minutes: i64,
    pub state_path: PathBuf,
    pub state_backend: StateBackend,
    pub event_log: Option<PathBuf>,
    pub allocation: AllocationTable,
}

impl EngineConfig {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, CandlegateError> {
        validate_engine_config(config)?;

        let symbols = parse_symbols(config);
        let allocation = AllocationTable::new(
            symbols
                .iter()
                .map(|s| (s.clone(), config.get_double("allocation", s, 0.0)))
                .collect(),
        );

        let state_backend = match config.get_string("engine", "state_backend").as_deref() {
            Some("sqlite") => StateBackend::Sqlite,
            _ => StateBackend::Json,
        };
        let default_state = match state_backend {
            StateBackend::Json => "candlegate_state.json",
            StateBackend::Sqlite => "candlegate_state.db",
        };

        Ok(EngineConfig {
            symbols,
            strategies_dir: PathBuf::from(
                config
                    .get_string("engine", "strategies_dir")
                    .unwrap_or_default(),
            ),
            timeframe_minutes: config.get_int("engine", "timeframe_minutes", 5),
            history_bars: config.get_int("engine", "history_bars", 150) as usize,
            poll_interval_seconds: config.get_int("engine", "poll_interval_seconds", 5),
            close_grace_seconds: config.get_int("engine", "close_grace_seconds", 10),
            broker_utc_offset_hours: config.get_int("engine", "broker_utc_offset_hours", 0) as i32,
            state_staleness_minutes: config.get_int("engine", "state_staleness_minutes", 30),
            state_path: PathBuf::from(
                config
                    .get_string("engine", "state_path")
                    .unwrap_or_else(|| default_state.to_string()),
            ),
            state_backend,
            event_log: config.get_string("engine", "event_log").map(PathBuf::from),
            allocation,
        })
    }

    /// Re-anchor relative file paths on `base`, the directory holding the engine config.
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |p: &PathBuf| if p.is_relative() { base.join(p) } else { p.clone() };
        self.strategies_dir = anchor(&self.strategies_dir);
        self.state_path = anchor(&self.state_path);
        self.event_log = self.event_log.as_ref().map(anchor);
    }

    pub fn broker_offset(&self) -> Result<FixedOffset, CandlegateError> {
        FixedOffset::east_opt(self.broker_utc_offset_hours * 3600).ok_or_else(|| {
            CandlegateError::ConfigInvalid {
                section: "engine".to_string(),
                key: "broker_utc_offset_hours".to_string(),
                reason: "offset out of range".to_string(),
            }
        })
    }

    pub fn settings(&self) -> Result<EngineSettings, CandlegateError> {
        Ok(EngineSettings {
            timeframe: Duration::minutes(self.timeframe_minutes),
            history_bars: self.history_bars,
            broker_offset: self.broker_offset()?,
            staleness: Duration::minutes(self.state_staleness_minutes),
        })
    }
}
