//! Engine driver: owns every instrument's state and runs candle-close cycles.

use crate::domain::candle::{closed_only, Candle};
use crate::domain::crossover::CrossoverDetector;
use crate::domain::error::CandlegateError;
use crate::domain::instrument::InstrumentConfig;
use crate::domain::phase::PhaseContext;
use crate::domain::schedule::Scheduler;
use crate::domain::state::{restore_states, StateSnapshot, StateView, StrategyState};
use crate::ports::candle_port::CandleFeed;
use crate::ports::config_port::ConfigStore;
use crate::ports::event_port::{EngineEvent, EventSink};
use crate::ports::order_port::{OrderGateway, OrderId};
use crate::ports::state_port::StateStore;
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub timeframe: Duration,
    pub history_bars: usize,
    pub broker_offset: FixedOffset,
    pub staleness: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            timeframe: Duration::minutes(5),
            history_bars: 150,
            broker_offset: Utc.fix(),
            staleness: Duration::minutes(30),
        }
    }
}

/// One instrument: its parameters (or why they failed to load) and its state.
pub struct InstrumentContext {
    pub symbol: String,
    pub config: Result<InstrumentConfig, String>,
    pub state: StrategyState,
}

impl InstrumentContext {
    pub fn view(&self) -> StateView {
        match &self.config {
            Ok(_) => StateView::from_state(&self.symbol, &self.state),
            Err(reason) => StateView::unconfigured(&self.symbol, reason),
        }
    }
}

/// Read-only copy-out of every instrument's state, refreshed after each cycle.
#[derive(Clone, Default)]
pub struct SnapshotBoard {
    inner: Arc<RwLock<Vec<StateView>>>,
}

impl SnapshotBoard {
    pub fn publish(&self, views: Vec<StateView>) {
        match self.inner.write() {
            Ok(mut guard) => *guard = views,
            Err(poisoned) => *poisoned.into_inner() = views,
        }
    }

    pub fn read(&self) -> Vec<StateView> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub evaluated: usize,
    pub skipped: usize,
    pub orders: Vec<(String, OrderId)>,
}

pub struct Engine {
    settings: EngineSettings,
    instruments: Vec<InstrumentContext>,
    feed: Box<dyn CandleFeed>,
    gateway: Box<dyn OrderGateway>,
    store: Box<dyn StateStore>,
    sink: Box<dyn EventSink>,
    detector: CrossoverDetector,
    board: SnapshotBoard,
}

impl Engine {
    /// Load every instrument's config and restore any fresh persisted state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: EngineSettings,
        symbols: &[String],
        configs: &dyn ConfigStore,
        feed: Box<dyn CandleFeed>,
        gateway: Box<dyn OrderGateway>,
        store: Box<dyn StateStore>,
        sink: Box<dyn EventSink>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let restored = match store.load() {
            Ok(records) => restore_states(records, started_at, settings.staleness),
            Err(e) => {
                warn!(error = %e, "could not load persisted state, starting fresh");
                Vec::new()
            }
        };

        let instruments = symbols
            .iter()
            .map(|symbol| {
                let config = configs.load(symbol).map_err(|e| {
                    error!(%symbol, error = %e, "instrument unconfigured");
                    e.to_string()
                });
                let digits = config.as_ref().map(|c| c.digits).unwrap_or(5);
                let state = match restored.iter().find(|r| &r.symbol == symbol) {
                    Some(record) => {
                        info!(%symbol, phase = %record.state.phase, "restored state");
                        record.state.clone()
                    }
                    None => StrategyState::new(digits),
                };
                InstrumentContext {
                    symbol: symbol.clone(),
                    config,
                    state,
                }
            })
            .collect();

        let detector = CrossoverDetector::new(started_at, settings.broker_offset);
        let engine = Engine {
            settings,
            instruments,
            feed,
            gateway,
            store,
            sink,
            detector,
            board: SnapshotBoard::default(),
        };
        engine.publish();
        engine
    }

    pub fn board(&self) -> SnapshotBoard {
        self.board.clone()
    }

    pub fn instruments(&self) -> &[InstrumentContext] {
        &self.instruments
    }

    pub fn gateway(&self) -> &dyn OrderGateway {
        self.gateway.as_ref()
    }

    /// Evaluate every instrument once, then publish and persist.
    pub fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();
        let now_local = now.naive_utc() + Duration::seconds(self.settings.broker_offset.local_minus_utc() as i64);

        for instrument in &mut self.instruments {
            let config = match &instrument.config {
                Ok(config) => config,
                Err(reason) => {
                    self.sink.emit(&EngineEvent::CycleSkipped {
                        symbol: instrument.symbol.clone(),
                        reason: format!("unconfigured: {reason}"),
                    });
                    report.skipped += 1;
                    continue;
                }
            };

            let candles = match fetch_with_retry(
                self.feed.as_ref(),
                &instrument.symbol,
                self.settings.history_bars + 1,
            ) {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(symbol = %instrument.symbol, error = %e, "no data this cycle");
                    self.sink.emit(&EngineEvent::CycleSkipped {
                        symbol: instrument.symbol.clone(),
                        reason: e.to_string(),
                    });
                    report.skipped += 1;
                    continue;
                }
            };
            let closed = closed_only(&candles, now_local, self.settings.timeframe);

            let ctx = PhaseContext {
                config,
                gateway: self.gateway.as_ref(),
                sink: self.sink.as_ref(),
                detector: &self.detector,
                broker_offset: self.settings.broker_offset,
            };
            match ctx.evaluate(&mut instrument.state, closed) {
                Ok(evaluation) => {
                    report.evaluated += 1;
                    debug!(
                        symbol = %instrument.symbol,
                        new_candles = evaluation.new_candles,
                        phase = %instrument.state.phase,
                        bar = instrument.state.current_bar,
                        "evaluated"
                    );
                    if let Some(order_id) = evaluation.order {
                        report.orders.push((instrument.symbol.clone(), order_id));
                    }
                }
                Err(e) => {
                    warn!(symbol = %instrument.symbol, error = %e, "skipping instrument");
                    self.sink.emit(&EngineEvent::CycleSkipped {
                        symbol: instrument.symbol.clone(),
                        reason: e.to_string(),
                    });
                    report.skipped += 1;
                }
            }
        }

        self.publish();
        if let Err(e) = self.persist(now) {
            error!(error = %e, "state persistence failed");
        }
        report
    }

    /// Drive cycles from the scheduler until `stop` is raised, then persist final state.
    pub fn run(&mut self, scheduler: &mut Scheduler, stop: &AtomicBool) -> Result<(), CandlegateError> {
        info!(instruments = self.instruments.len(), "engine started");
        while let Some(tick) = scheduler.next_tick(stop) {
            let report = self.run_cycle(tick.at);
            info!(
                boundary = %tick.boundary,
                evaluated = report.evaluated,
                skipped = report.skipped,
                orders = report.orders.len(),
                "cycle complete"
            );
        }
        self.shutdown(scheduler.clock().now())
    }

    pub fn shutdown(&self, now: DateTime<Utc>) -> Result<(), CandlegateError> {
        info!("engine stopping, persisting state");
        self.persist(now)
    }

    pub fn snapshots(&self, now: DateTime<Utc>) -> Vec<StateSnapshot> {
        self.instruments
            .iter()
            .filter(|i| i.config.is_ok())
            .map(|i| StateSnapshot {
                symbol: i.symbol.clone(),
                last_update: now,
                state: i.state.clone(),
            })
            .collect()
    }

    fn persist(&self, now: DateTime<Utc>) -> Result<(), CandlegateError> {
        let snapshots = self.snapshots(now);
        self.store.save(&snapshots)
    }

    fn publish(&self) {
        self.board
            .publish(self.instruments.iter().map(InstrumentContext::view).collect());
    }
}

/// One bounded reconnect-and-retry on a feed error.
fn fetch_with_retry(
    feed: &dyn CandleFeed,
    symbol: &str,
    count: usize,
) -> Result<Vec<Candle>, CandlegateError> {
    match feed.closed_candles(symbol, count) {
        Ok(candles) => Ok(candles),
        Err(first) => {
            warn!(%symbol, error = %first, "feed error, reconnecting");
            if let Err(e) = feed.reconnect() {
                warn!(%symbol, error = %e, "reconnect failed");
            }
            feed.closed_candles(symbol, count)
        }
    }
}
