//! candlegate: closed-candle EMA crossover signal engine.
//!
//! Each instrument walks SCANNING → ARMED → WINDOW_OPEN → IN_TRADE on closed candles only.
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`], command line in [`cli`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
