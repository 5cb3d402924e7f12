//! State persistence port trait.

use crate::domain::error::CandlegateError;
use crate::domain::state::StateSnapshot;

pub trait StateStore {
    /// Replace the stored records with `snapshots`.
    fn save(&self, snapshots: &[StateSnapshot]) -> Result<(), CandlegateError>;

    /// Every stored record. An absent store yields an empty list.
    fn load(&self) -> Result<Vec<StateSnapshot>, CandlegateError>;

    /// Remove one symbol's record, or all of them when `symbol` is `None`.
    fn clear(&self, symbol: Option<&str>) -> Result<(), CandlegateError> {
        let kept: Vec<StateSnapshot> = match symbol {
            Some(s) => self.load()?.into_iter().filter(|r| r.symbol != s).collect(),
            None => Vec::new(),
        };
        self.save(&kept)
    }
}

/// Keeps nothing. Used by dry replays that must not touch the live store.
pub struct NullStateStore;

impl StateStore for NullStateStore {
    fn save(&self, _snapshots: &[StateSnapshot]) -> Result<(), CandlegateError> {
        Ok(())
    }

    fn load(&self) -> Result<Vec<StateSnapshot>, CandlegateError> {
        Ok(Vec::new())
    }
}
