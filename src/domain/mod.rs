//! Core domain types and logic.

pub mod candle;
pub mod config_validation;
pub mod crossover;
pub mod direction;
pub mod engine;
pub mod engine_config;
pub mod error;
pub mod filter;
pub mod indicator;
pub mod instrument;
pub mod phase;
pub mod schedule;
pub mod sizing;
pub mod state;
pub mod window;
