//! Configuration access port traits.

use crate::domain::error::CandlegateError;
use crate::domain::instrument::InstrumentConfig;

/// Key/value access to one INI document.
pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;
}

/// Source of per-instrument strategy parameters.
///
/// Implementations report any parse or validation problem as
/// `CandlegateError::Unconfigured` so the caller can skip that instrument.
pub trait ConfigStore {
    fn load(&self, symbol: &str) -> Result<InstrumentConfig, CandlegateError>;
}
