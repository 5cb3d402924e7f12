//! Broker order port trait.

use crate::domain::error::CandlegateError;
use crate::domain::sizing::{OrderRequest, SymbolSpec};

pub type OrderId = u64;

pub trait OrderGateway {
    fn submit(&self, order: &OrderRequest) -> Result<OrderId, CandlegateError>;

    fn has_open_position(&self, symbol: &str) -> Result<bool, CandlegateError>;

    fn account_balance(&self) -> Result<f64, CandlegateError>;

    fn symbol_spec(&self, symbol: &str) -> Result<SymbolSpec, CandlegateError>;
}
