//! Observability sink port.

use crate::domain::direction::Direction;
use crate::domain::filter::{FilterKind, FilterOutcome};
use crate::domain::window::WindowStatus;
use crate::ports::order_port::OrderId;
use chrono::NaiveDateTime;
use serde::Serialize;

/// Structured record of something the engine decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PhaseTransition {
        symbol: String,
        from: String,
        to: String,
        reason: String,
        candle_time: Option<NaiveDateTime>,
    },
    FilterVerdict {
        symbol: String,
        direction: Direction,
        filter: FilterKind,
        outcome: FilterOutcome,
    },
    WindowOpened {
        symbol: String,
        direction: Direction,
        bar_start: u64,
        expiry_bar: u64,
        top: f64,
        bottom: f64,
    },
    WindowResolved {
        symbol: String,
        direction: Direction,
        status: WindowStatus,
        bar: u64,
    },
    OrderSubmitted {
        symbol: String,
        direction: Direction,
        order_id: OrderId,
        lots: f64,
        entry: f64,
        stop_loss: f64,
        take_profit: f64,
    },
    OrderFailed {
        symbol: String,
        direction: Direction,
        reason: String,
    },
    CycleSkipped {
        symbol: String,
        reason: String,
    },
}

impl EngineEvent {
    pub fn symbol(&self) -> &str {
        match self {
            EngineEvent::PhaseTransition { symbol, .. }
            | EngineEvent::FilterVerdict { symbol, .. }
            | EngineEvent::WindowOpened { symbol, .. }
            | EngineEvent::WindowResolved { symbol, .. }
            | EngineEvent::OrderSubmitted { symbol, .. }
            | EngineEvent::OrderFailed { symbol, .. }
            | EngineEvent::CycleSkipped { symbol, .. } => symbol,
        }
    }
}

/// Receives engine events. Sinks must not fail the evaluation.
pub trait EventSink {
    fn emit(&self, event: &EngineEvent);
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &EngineEvent) {}
}

/// Fans each event out to several sinks.
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn EventSink>>) -> Self {
        FanoutSink { sinks }
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &EngineEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
