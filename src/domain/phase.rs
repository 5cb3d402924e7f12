//! Per-instrument phase state machine.
//!
//! SCANNING -> ARMED_{dir} -> WINDOW_OPEN -> IN_TRADE, driven once per batch of newly
//! closed candles. Every candle timestamp advances `current_bar` once and is fed to the
//! pullback/window logic at most once, in time order, even when several arrive together.

use crate::domain::candle::{unprocessed_since, Candle};
use crate::domain::crossover::CrossoverDetector;
use crate::domain::direction::Direction;
use crate::domain::error::CandlegateError;
use crate::domain::filter::{self, FilterInput, FilterReport};
use crate::domain::indicator::{compute_indicators, IndicatorSet};
use crate::domain::instrument::InstrumentConfig;
use crate::domain::sizing::size_order;
use crate::domain::state::{ArmedSetup, Phase, StrategyState};
use crate::domain::window::{BreakoutWindow, WindowStatus};
use crate::ports::event_port::{EngineEvent, EventSink};
use crate::ports::order_port::{OrderGateway, OrderId};
use chrono::{FixedOffset, NaiveDateTime};
use tracing::{debug, info, warn};

/// Collaborators for evaluating one instrument.
pub struct PhaseContext<'a> {
    pub config: &'a InstrumentConfig,
    pub gateway: &'a dyn OrderGateway,
    pub sink: &'a dyn EventSink,
    pub detector: &'a CrossoverDetector,
    pub broker_offset: FixedOffset,
}

/// What one evaluation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Evaluation {
    pub new_candles: usize,
    pub order: Option<OrderId>,
}

impl PhaseContext<'_> {
    fn symbol(&self) -> &str {
        &self.config.symbol
    }

    /// Evaluate `candles` (closed only, ascending) against `state`.
    ///
    /// Data errors are returned before `state` is touched.
    pub fn evaluate(
        &self,
        state: &mut StrategyState,
        candles: &[Candle],
    ) -> Result<Evaluation, CandlegateError> {
        let indicators = compute_indicators(candles, self.config)?;
        let Some(latest) = candles.last() else {
            return Err(CandlegateError::InsufficientData {
                symbol: self.symbol().to_string(),
                bars: 0,
                minimum: self.config.min_bars(),
            });
        };

        let new_candles = unprocessed_since(candles, state.last_candle_time).len();
        if new_candles == 0 {
            return Ok(Evaluation::default());
        }
        state.current_bar += new_candles as u64;
        state.last_candle_time = Some(latest.time);

        let mut evaluation = Evaluation {
            new_candles,
            order: None,
        };

        if let Phase::InTrade { .. } = state.phase {
            match self.gateway.has_open_position(self.symbol()) {
                Ok(true) => {
                    debug!(symbol = %self.symbol(), "position still open");
                    return Ok(evaluation);
                }
                Ok(false) => {
                    self.reset(state, "position closed", Some(latest.time));
                }
                Err(e) => {
                    warn!(symbol = %self.symbol(), error = %e, "position check failed, skipping");
                    self.sink.emit(&EngineEvent::CycleSkipped {
                        symbol: self.symbol().to_string(),
                        reason: e.to_string(),
                    });
                    return Ok(evaluation);
                }
            }
        }

        state.crossover = self.detector.check(state, latest, &indicators);

        if let Phase::Armed(setup) = state.phase {
            if setup.direction == Direction::Short && !self.config.short.enabled {
                self.reset(state, "short trading disabled", Some(latest.time));
            }
        }

        match state.phase {
            Phase::Scanning => {
                evaluation.order = self.scan(state, latest, &indicators);
            }
            Phase::Armed(_) | Phase::WindowOpen { .. } => {
                let fresh = state.crossover;
                evaluation.order = self.replay(state, candles, &indicators);
                // A setup that ended on this batch leaves the latest crossover unconsumed.
                if evaluation.order.is_none() && state.phase == Phase::Scanning {
                    state.crossover = fresh;
                    evaluation.order = self.scan(state, latest, &indicators);
                }
            }
            Phase::InTrade { .. } => {}
        }

        Ok(evaluation)
    }

    /// SCANNING: consume a fresh crossover.
    fn scan(
        &self,
        state: &mut StrategyState,
        latest: &Candle,
        indicators: &IndicatorSet,
    ) -> Option<OrderId> {
        let cross = state.crossover.take()?;
        let direction = if cross.bullish && self.config.long.enabled {
            Direction::Long
        } else if cross.bearish && self.config.short.enabled {
            Direction::Short
        } else {
            debug!(symbol = %self.symbol(), "crossover for a disabled direction ignored");
            return None;
        };

        let dir = self.config.direction(direction);
        let input = FilterInput {
            direction,
            candle: latest,
            indicators,
            baseline_atr: None,
            config: dir,
        };
        let report = filter::validate_entry(&input);
        self.emit_verdicts(direction, &report);
        if !report.passed() {
            if let Some(block) = report.first_block() {
                info!(
                    symbol = %self.symbol(),
                    %direction,
                    filter = %block.kind,
                    outcome = %block.outcome,
                    "signal rejected"
                );
            }
            return None;
        }

        if dir.use_pullback_entry {
            let from = state.phase.label();
            state.phase = Phase::Armed(ArmedSetup::new(direction, *latest));
            state.signal_detection_atr = Some(indicators.atr);
            state.last_pullback_check_candle = Some(latest.time);
            self.transition(from, state, "crossover passed filters", Some(latest.time));
            return None;
        }

        let time_ok = filter::time_of_day(latest.time, self.broker_offset, &self.config.time_filter);
        if !time_ok.allows() {
            info!(symbol = %self.symbol(), outcome = %time_ok, "outside trading hours");
            return None;
        }
        self.enter(state, direction, indicators)
    }

    /// ARMED / WINDOW_OPEN: walk every candle after the last checked one, in order.
    fn replay(
        &self,
        state: &mut StrategyState,
        candles: &[Candle],
        indicators: &IndicatorSet,
    ) -> Option<OrderId> {
        let pending = unprocessed_since(candles, state.last_pullback_check_candle);
        let first = candles.len() - pending.len();
        let last_bar = state.current_bar;

        for (offset, candle) in pending.iter().enumerate() {
            let bar = last_bar.saturating_sub((pending.len() - 1 - offset) as u64);
            state.last_pullback_check_candle = Some(candle.time);

            if self.invalidated(state, candle) {
                return None;
            }

            match state.phase {
                Phase::Armed(setup) => self.check_pullback(state, setup, candle, bar),
                Phase::WindowOpen { setup, window } => {
                    let status = window.monitor(setup.direction, bar, candle);
                    match status {
                        WindowStatus::Pending | WindowStatus::Inside => {}
                        WindowStatus::Success => {
                            self.resolve_window(setup.direction, status, bar);
                            let history = &candles[..=first + offset];
                            return self.breakout(state, setup.direction, candle, history, indicators);
                        }
                        WindowStatus::Failure | WindowStatus::Expired => {
                            self.resolve_window(setup.direction, status, bar);
                            let from = state.phase.label();
                            state.phase = Phase::Armed(ArmedSetup {
                                pullback_candle_count: 0,
                                last_pullback_high: None,
                                last_pullback_low: None,
                                ..setup
                            });
                            self.transition(from, state, &format!("window {status}"), Some(candle.time));
                        }
                    }
                }
                Phase::Scanning | Phase::InTrade { .. } => break,
            }
        }
        None
    }

    /// Global invalidation: an opposing crossover on `candle` cancels an ARMED setup.
    fn invalidated(&self, state: &mut StrategyState, candle: &Candle) -> bool {
        let (Phase::Armed(setup), Some(cross)) = (state.phase, state.crossover) else {
            return false;
        };
        if cross.candle_time != candle.time {
            return false;
        }
        let opposing = match setup.direction {
            Direction::Long => cross.bearish,
            Direction::Short => cross.bullish,
        };
        if opposing {
            self.reset(state, "opposing crossover", Some(cross.candle_time));
        }
        opposing
    }

    fn check_pullback(&self, state: &mut StrategyState, setup: ArmedSetup, candle: &Candle, bar: u64) {
        let is_pullback = match setup.direction {
            Direction::Long => candle.is_bearish(),
            Direction::Short => candle.is_bullish(),
        };
        if !is_pullback {
            self.reset(state, "non-pullback candle while armed", Some(candle.time));
            return;
        }

        let dir = self.config.direction(setup.direction);
        let count = setup.pullback_candle_count + 1;
        debug!(
            symbol = %self.symbol(),
            direction = %setup.direction,
            count,
            max = dir.pullback_max_candles,
            "pullback candle"
        );

        let updated = ArmedSetup {
            pullback_candle_count: count,
            last_pullback_high: Some(candle.high),
            last_pullback_low: Some(candle.low),
            ..setup
        };
        if count < dir.pullback_max_candles {
            state.phase = Phase::Armed(updated);
            return;
        }

        let window = BreakoutWindow::open(
            bar,
            count,
            candle.high,
            candle.low,
            dir.entry_window_periods,
            &self.config.window,
        );
        let from = state.phase.label();
        state.phase = Phase::WindowOpen {
            setup: updated,
            window,
        };
        self.sink.emit(&EngineEvent::WindowOpened {
            symbol: self.symbol().to_string(),
            direction: setup.direction,
            bar_start: window.bar_start,
            expiry_bar: window.expiry_bar,
            top: window.top_limit,
            bottom: window.bottom_limit,
        });
        self.transition(from, state, "pullback confirmed", Some(candle.time));
    }

    /// Window success: re-check trend alignment on the breakout candle, then trading hours.
    fn breakout(
        &self,
        state: &mut StrategyState,
        direction: Direction,
        candle: &Candle,
        history: &[Candle],
        latest: &IndicatorSet,
    ) -> Option<OrderId> {
        let at_breakout = match compute_indicators(history, self.config) {
            Ok(set) => set,
            Err(e) => {
                self.reset(state, &format!("breakout revalidation error: {e}"), Some(candle.time));
                return None;
            }
        };
        let input = FilterInput {
            direction,
            candle,
            indicators: &at_breakout,
            baseline_atr: state.signal_detection_atr,
            config: self.config.direction(direction),
        };
        let report = filter::validate_breakout(&input);
        self.emit_verdicts(direction, &report);
        if !report.passed() {
            self.reset(state, "breakout revalidation failed", Some(candle.time));
            return None;
        }

        let time_ok = filter::time_of_day(candle.time, self.broker_offset, &self.config.time_filter);
        if !time_ok.allows() {
            self.sink.emit(&EngineEvent::FilterVerdict {
                symbol: self.symbol().to_string(),
                direction,
                filter: filter::FilterKind::TimeOfDay,
                outcome: time_ok,
            });
            self.reset(state, "breakout outside trading hours", Some(candle.time));
            return None;
        }

        self.enter(state, direction, latest)
    }

    /// Size and submit an entry at the latest close. Any failure returns to SCANNING.
    fn enter(
        &self,
        state: &mut StrategyState,
        direction: Direction,
        indicators: &IndicatorSet,
    ) -> Option<OrderId> {
        match self.submit_entry(direction, indicators) {
            Ok(order_id) => {
                let from = state.phase.label();
                state.phase = Phase::InTrade { direction };
                state.crossover = None;
                self.transition(from, state, "order filled", state.last_candle_time);
                Some(order_id)
            }
            Err(e) => {
                warn!(symbol = %self.symbol(), %direction, error = %e, "entry failed");
                self.sink.emit(&EngineEvent::OrderFailed {
                    symbol: self.symbol().to_string(),
                    direction,
                    reason: e.to_string(),
                });
                let at = state.last_candle_time;
                self.reset(state, "order failed", at);
                None
            }
        }
    }

    fn submit_entry(
        &self,
        direction: Direction,
        indicators: &IndicatorSet,
    ) -> Result<OrderId, CandlegateError> {
        let symbol = self.symbol();
        if self.gateway.has_open_position(symbol)? {
            return Err(CandlegateError::DuplicatePosition {
                symbol: symbol.to_string(),
            });
        }
        let balance = self.gateway.account_balance()?;
        let spec = self.gateway.symbol_spec(symbol)?;
        let (order, breakdown) = size_order(
            direction,
            indicators.current_price,
            indicators.atr,
            balance,
            self.config,
            &spec,
        )?;
        debug!(
            symbol,
            risk = breakdown.risk_amount,
            sl_points = breakdown.sl_distance_points,
            raw_lots = breakdown.raw_lots,
            "sized entry"
        );

        let order_id = self.gateway.submit(&order)?;
        info!(
            symbol,
            %direction,
            order_id,
            lots = order.lots,
            entry = order.entry_price,
            sl = order.stop_loss,
            tp = order.take_profit,
            "order submitted"
        );
        self.sink.emit(&EngineEvent::OrderSubmitted {
            symbol: symbol.to_string(),
            direction,
            order_id,
            lots: order.lots,
            entry: order.entry_price,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
        });
        Ok(order_id)
    }

    fn reset(&self, state: &mut StrategyState, reason: &str, candle_time: Option<NaiveDateTime>) {
        let from = state.phase.label();
        state.reset();
        self.transition(from, state, reason, candle_time);
    }

    fn transition(
        &self,
        from: &str,
        state: &StrategyState,
        reason: &str,
        candle_time: Option<NaiveDateTime>,
    ) {
        let to = state.phase.label();
        info!(symbol = %self.symbol(), from, to, reason, "phase transition");
        self.sink.emit(&EngineEvent::PhaseTransition {
            symbol: self.symbol().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
            candle_time,
        });
    }

    fn resolve_window(&self, direction: Direction, status: WindowStatus, bar: u64) {
        info!(symbol = %self.symbol(), %direction, %status, bar, "window resolved");
        self.sink.emit(&EngineEvent::WindowResolved {
            symbol: self.symbol().to_string(),
            direction,
            status,
            bar,
        });
    }

    fn emit_verdicts(&self, direction: Direction, report: &FilterReport) {
        for verdict in &report.verdicts {
            self.sink.emit(&EngineEvent::FilterVerdict {
                symbol: self.symbol().to_string(),
                direction,
                filter: verdict.kind,
                outcome: verdict.outcome.clone(),
            });
        }
    }
}
