//! JSON file state store.

use crate::domain::error::CandlegateError;
use crate::domain::state::StateSnapshot;
use crate::ports::state_port::StateStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateDocument {
    instruments: BTreeMap<String, StateSnapshot>,
}

/// Stores every instrument's snapshot in one JSON document keyed by symbol.
///
/// Writes go to a sibling temp file first and are renamed into place.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn persistence_error(&self, action: &str, e: impl std::fmt::Display) -> CandlegateError {
        CandlegateError::Persistence {
            reason: format!("failed to {} {}: {}", action, self.path.display(), e),
        }
    }
}

impl StateStore for JsonStateStore {
    fn save(&self, snapshots: &[StateSnapshot]) -> Result<(), CandlegateError> {
        let document = StateDocument {
            instruments: snapshots
                .iter()
                .map(|s| (s.symbol.clone(), s.clone()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| self.persistence_error("encode", e))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| self.persistence_error("write", e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.persistence_error("replace", e))?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<StateSnapshot>, CandlegateError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content =
            fs::read_to_string(&self.path).map_err(|e| self.persistence_error("read", e))?;
        let document: StateDocument =
            serde_json::from_str(&content).map_err(|e| self.persistence_error("decode", e))?;
        Ok(document.instruments.into_values().collect())
    }
}
