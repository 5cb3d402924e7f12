//! Market data port trait.

use crate::domain::candle::Candle;
use crate::domain::error::CandlegateError;

pub trait CandleFeed {
    /// Up to `count` most recent candles in ascending time order.
    ///
    /// The last element may still be forming; the engine trims it.
    fn closed_candles(&self, symbol: &str, count: usize) -> Result<Vec<Candle>, CandlegateError>;

    /// Re-establish the connection after a failed fetch.
    fn reconnect(&self) -> Result<(), CandlegateError> {
        Ok(())
    }
}
