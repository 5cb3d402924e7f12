//! Event sinks: structured log lines and an append-only JSON lines file.

use crate::domain::error::CandlegateError;
use crate::ports::event_port::{EngineEvent, EventSink};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Logs every event through `tracing`; filter verdicts at debug level.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &EngineEvent) {
        match event {
            EngineEvent::PhaseTransition {
                symbol,
                from,
                to,
                reason,
                ..
            } => info!(%symbol, %from, %to, %reason, "phase transition"),
            EngineEvent::FilterVerdict {
                symbol,
                direction,
                filter,
                outcome,
            } => debug!(%symbol, %direction, %filter, ?outcome, "filter verdict"),
            EngineEvent::WindowOpened {
                symbol,
                direction,
                bar_start,
                expiry_bar,
                top,
                bottom,
            } => info!(
                %symbol, %direction, bar_start, expiry_bar, top, bottom,
                "breakout window opened"
            ),
            EngineEvent::WindowResolved {
                symbol,
                direction,
                status,
                bar,
            } => info!(%symbol, %direction, %status, bar, "breakout window resolved"),
            EngineEvent::OrderSubmitted {
                symbol,
                direction,
                order_id,
                lots,
                entry,
                stop_loss,
                take_profit,
            } => info!(
                %symbol, %direction, order_id, lots, entry, stop_loss, take_profit,
                "order submitted"
            ),
            EngineEvent::OrderFailed {
                symbol,
                direction,
                reason,
            } => warn!(%symbol, %direction, %reason, "order failed"),
            EngineEvent::CycleSkipped { symbol, reason } => {
                warn!(%symbol, %reason, "cycle skipped")
            }
        }
    }
}

/// Appends one JSON object per event to a file.
pub struct JsonLinesEventSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesEventSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CandlegateError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl EventSink for JsonLinesEventSink {
    fn emit(&self, event: &EngineEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "could not encode event");
                return;
            }
        };
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!(error = %e, "could not write event log");
        }
    }
}
