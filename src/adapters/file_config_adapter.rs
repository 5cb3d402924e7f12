//! INI file configuration adapters.

use crate::domain::engine_config::AllocationTable;
use crate::domain::error::CandlegateError;
use crate::domain::instrument::InstrumentConfig;
use crate::ports::config_port::{ConfigPort, ConfigStore};
use configparser::ini::Ini;
use std::path::{Path, PathBuf};

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CandlegateError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| CandlegateError::ConfigParse {
                file: path.display().to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    /// Trimmed value; blank values read as absent.
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config
            .get(section, key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_string(section, key)
            .and_then(|v| Self::parse_bool(&v))
            .unwrap_or(default)
    }
}

/// Loads `<strategies_dir>/<SYMBOL>.ini` for each instrument.
pub struct IniConfigStore {
    strategies_dir: PathBuf,
    allocation: AllocationTable,
}

impl IniConfigStore {
    pub fn new(strategies_dir: PathBuf, allocation: AllocationTable) -> Self {
        Self {
            strategies_dir,
            allocation,
        }
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.strategies_dir.join(format!("{}.ini", symbol))
    }
}

impl ConfigStore for IniConfigStore {
    fn load(&self, symbol: &str) -> Result<InstrumentConfig, CandlegateError> {
        let unconfigured = |reason: String| CandlegateError::Unconfigured {
            symbol: symbol.to_string(),
            reason,
        };
        let allocation = self
            .allocation
            .fraction(symbol)
            .ok_or_else(|| unconfigured("no allocation entry".to_string()))?;
        let file = FileConfigAdapter::from_file(self.path_for(symbol))
            .map_err(|e| unconfigured(e.to_string()))?;
        InstrumentConfig::from_config(symbol, &file, allocation).map_err(|e| unconfigured(e.to_string()))
    }
}
