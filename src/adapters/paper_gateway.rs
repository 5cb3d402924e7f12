//! Simulated broker: fills orders at the requested price and settles them on SL/TP touches.

use crate::domain::candle::Candle;
use crate::domain::direction::Direction;
use crate::domain::error::CandlegateError;
use crate::domain::sizing::{OrderRequest, SymbolSpec};
use crate::ports::config_port::ConfigPort;
use crate::ports::order_port::{OrderGateway, OrderId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaperPosition {
    pub order_id: OrderId,
    pub order: OrderRequest,
}

impl PaperPosition {
    pub fn should_stop_loss(&self, candle: &Candle) -> bool {
        match self.order.direction {
            Direction::Long => candle.low <= self.order.stop_loss,
            Direction::Short => candle.high >= self.order.stop_loss,
        }
    }

    pub fn should_take_profit(&self, candle: &Candle) -> bool {
        match self.order.direction {
            Direction::Long => candle.high >= self.order.take_profit,
            Direction::Short => candle.low <= self.order.take_profit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedPaperTrade {
    pub order_id: OrderId,
    pub symbol: String,
    pub direction: Direction,
    pub lots: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
}

#[derive(Debug, Default)]
struct Book {
    balance: f64,
    next_id: OrderId,
    open: HashMap<String, PaperPosition>,
    orders: Vec<PaperPosition>,
    closed: Vec<ClosedPaperTrade>,
}

/// Cheap to clone; clones share one order book.
#[derive(Clone)]
pub struct PaperGateway {
    specs: HashMap<String, SymbolSpec>,
    book: Arc<Mutex<Book>>,
}

impl PaperGateway {
    pub fn new(balance: f64, specs: HashMap<String, SymbolSpec>) -> Self {
        Self {
            specs,
            book: Arc::new(Mutex::new(Book {
                balance,
                next_id: 1,
                ..Book::default()
            })),
        }
    }

    /// `[paper] balance` plus one optional `[spec.<symbol>]` section per instrument.
    /// Symbols without a section get a spec derived from `[paper] default_digits`.
    pub fn from_config(config: &dyn ConfigPort, symbols: &[String]) -> Self {
        let balance = config.get_double("paper", "balance", 10_000.0);
        let default_digits = config.get_int("paper", "default_digits", 5) as u32;

        let specs = symbols
            .iter()
            .map(|symbol| {
                let section = format!("spec.{}", symbol.to_lowercase());
                let digits = config.get_int(&section, "digits", default_digits as i64) as u32;
                let point = 10f64.powi(-(digits as i32));
                let spec = SymbolSpec {
                    point: config.get_double(&section, "point", point),
                    tick_size: config.get_double(&section, "tick_size", point),
                    tick_value: config.get_double(&section, "tick_value", 1.0),
                    volume_min: config.get_double(&section, "volume_min", 0.01),
                    volume_max: config.get_double(&section, "volume_max", 100.0),
                    volume_step: config.get_double(&section, "volume_step", 0.01),
                    digits,
                };
                (symbol.clone(), spec)
            })
            .collect();

        Self::new(balance, specs)
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        match self.book.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn open_positions(&self) -> Vec<PaperPosition> {
        let mut open: Vec<PaperPosition> = self.book().open.values().cloned().collect();
        open.sort_by_key(|p| p.order_id);
        open
    }

    /// Every accepted order, in submission order.
    pub fn order_log(&self) -> Vec<PaperPosition> {
        self.book().orders.clone()
    }

    pub fn closed_trades(&self) -> Vec<ClosedPaperTrade> {
        self.book().closed.clone()
    }

    /// Close `symbol`'s position at `price`, crediting P&L to the balance.
    pub fn close_position(&self, symbol: &str, price: f64) -> Option<ClosedPaperTrade> {
        let value_per_point = self.specs.get(symbol).map(|s| (s.point, s.value_per_point()));
        let mut book = self.book();
        let position = book.open.remove(symbol)?;
        let order = &position.order;

        let pnl = match value_per_point {
            Some((point, vpp)) if point > 0.0 => {
                (price - order.entry_price) * order.direction.sign() / point * vpp * order.lots
            }
            _ => 0.0,
        };
        book.balance += pnl;

        let trade = ClosedPaperTrade {
            order_id: position.order_id,
            symbol: symbol.to_string(),
            direction: order.direction,
            lots: order.lots,
            entry_price: order.entry_price,
            exit_price: price,
            pnl,
        };
        info!(%symbol, order_id = trade.order_id, exit = price, pnl, "paper position closed");
        book.closed.push(trade.clone());
        Some(trade)
    }

    /// Close the position if `candle` touched its stop loss or take profit.
    /// A candle touching both is settled at the stop loss.
    pub fn settle(&self, symbol: &str, candle: &Candle) -> Option<ClosedPaperTrade> {
        let exit = {
            let book = self.book();
            let position = book.open.get(symbol)?;
            if position.should_stop_loss(candle) {
                position.order.stop_loss
            } else if position.should_take_profit(candle) {
                position.order.take_profit
            } else {
                return None;
            }
        };
        self.close_position(symbol, exit)
    }
}

impl OrderGateway for PaperGateway {
    fn submit(&self, order: &OrderRequest) -> Result<OrderId, CandlegateError> {
        if order.lots.is_nan() || order.lots <= 0.0 {
            return Err(CandlegateError::OrderRejected {
                symbol: order.symbol.clone(),
                reason: format!("invalid volume {}", order.lots),
            });
        }
        let mut book = self.book();
        if book.open.contains_key(&order.symbol) {
            return Err(CandlegateError::DuplicatePosition {
                symbol: order.symbol.clone(),
            });
        }
        let order_id = book.next_id;
        book.next_id += 1;
        let position = PaperPosition {
            order_id,
            order: order.clone(),
        };
        book.orders.push(position.clone());
        book.open.insert(order.symbol.clone(), position);
        Ok(order_id)
    }

    fn has_open_position(&self, symbol: &str) -> Result<bool, CandlegateError> {
        Ok(self.book().open.contains_key(symbol))
    }

    fn account_balance(&self) -> Result<f64, CandlegateError> {
        Ok(self.book().balance)
    }

    fn symbol_spec(&self, symbol: &str) -> Result<SymbolSpec, CandlegateError> {
        self.specs
            .get(symbol)
            .copied()
            .ok_or_else(|| CandlegateError::OrderRejected {
                symbol: symbol.to_string(),
                reason: "unknown symbol".to_string(),
            })
    }
}
