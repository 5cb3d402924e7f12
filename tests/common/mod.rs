#![allow(dead_code)]

use candlegate::adapters::file_config_adapter::FileConfigAdapter;
use candlegate::domain::candle::Candle;
use candlegate::domain::crossover::CrossoverDetector;
use candlegate::domain::error::CandlegateError;
use candlegate::domain::instrument::InstrumentConfig;
use candlegate::domain::sizing::{OrderRequest, SymbolSpec};
use candlegate::domain::state::StateSnapshot;
use candlegate::ports::candle_port::CandleFeed;
use candlegate::ports::config_port::ConfigStore;
use candlegate::ports::event_port::{EngineEvent, EventSink};
use candlegate::ports::order_port::{OrderGateway, OrderId};
use candlegate::ports::state_port::StateStore;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

// --- candle builders ---

pub fn t(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 9, 2)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

pub fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, h, m, s).unwrap()
}

pub fn utc_offset() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

/// Candle whose wicks extend one pip past the body.
pub fn candle(time: NaiveDateTime, open: f64, close: f64) -> Candle {
    Candle {
        time,
        open,
        high: open.max(close) + 0.0001,
        low: open.min(close) - 0.0001,
        close,
    }
}

fn round5(v: f64) -> f64 {
    (v * 100_000.0).round() / 100_000.0
}

/// Five-minute candles from 08:00, each body moving by `step` from the previous close.
pub fn series_from(start: NaiveDateTime, first_open: f64, steps: &[f64]) -> Vec<Candle> {
    let mut open = first_open;
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let close = round5(open + step);
            let c = candle(start + Duration::minutes(5 * i as i64), open, close);
            open = close;
            c
        })
        .collect()
}

/// 14 falling candles, a bullish crossover candle (index 14), two bearish pullbacks
/// (15, 16), one inside candle (17) and a bullish breakout through the window top (18).
///
/// With `test_instrument` periods the pullbacks never cross back below the lines.
pub fn breakout_series() -> Vec<Candle> {
    let mut steps = vec![-0.0002; 14];
    steps.push(0.0030);
    steps.push(-0.0002);
    steps.push(-0.0002);
    steps.push(0.0001);
    steps.push(0.0008);
    series_from(t(8, 0), 1.1000, &steps)
}

pub const TRIGGER: usize = 14;
pub const SECOND_PULLBACK: usize = 16;
pub const BREAKOUT: usize = 18;

// --- configuration ---

/// Short EMA periods (fast 5, medium 8, slow 10, filter 12, ATR 5) so 12 candles suffice.
pub fn test_instrument(extra: &str) -> InstrumentConfig {
    let ini = format!(
        "[instrument]\ndigits = 5\n\n[ema]\nfast = 5\nmedium = 8\nslow = 10\nfilter = 12\n\n[atr]\nperiod = 5\n\n{extra}"
    );
    let adapter = FileConfigAdapter::from_string(&ini).unwrap();
    InstrumentConfig::from_config("EURUSD", &adapter, 1.0).unwrap()
}

pub fn eurusd_spec() -> SymbolSpec {
    SymbolSpec {
        point: 0.00001,
        tick_size: 0.00001,
        tick_value: 1.0,
        volume_min: 0.01,
        volume_max: 100.0,
        volume_step: 0.01,
        digits: 5,
    }
}

/// Detector whose process started at 07:00 UTC, before every test candle.
pub fn detector() -> CrossoverDetector {
    CrossoverDetector::new(utc(7, 0, 0), utc_offset())
}

pub struct StaticConfigStore {
    pub configs: HashMap<String, InstrumentConfig>,
}

impl StaticConfigStore {
    pub fn new() -> Self {
        Self {
            configs: HashMap::new(),
        }
    }

    pub fn with(mut self, symbol: &str, mut config: InstrumentConfig) -> Self {
        config.symbol = symbol.to_string();
        self.configs.insert(symbol.to_string(), config);
        self
    }
}

impl ConfigStore for StaticConfigStore {
    fn load(&self, symbol: &str) -> Result<InstrumentConfig, CandlegateError> {
        self.configs
            .get(symbol)
            .cloned()
            .ok_or_else(|| CandlegateError::Unconfigured {
                symbol: symbol.to_string(),
                reason: "no strategy file".to_string(),
            })
    }
}

// --- mock candle feed ---

#[derive(Default)]
struct FeedState {
    series: HashMap<String, Vec<Candle>>,
    failures: HashMap<String, u32>,
    reconnects: u32,
}

/// Shared-handle feed: clone it, hand one clone to the engine, drive it with the other.
#[derive(Clone, Default)]
pub struct MockCandleFeed {
    inner: Rc<RefCell<FeedState>>,
}

impl MockCandleFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, symbol: &str, candle: Candle) {
        self.inner
            .borrow_mut()
            .series
            .entry(symbol.to_string())
            .or_default()
            .push(candle);
    }

    pub fn extend(&self, symbol: &str, candles: &[Candle]) {
        for c in candles {
            self.push(symbol, *c);
        }
    }

    /// The next `times` fetches for `symbol` fail.
    pub fn fail(&self, symbol: &str, times: u32) {
        self.inner
            .borrow_mut()
            .failures
            .insert(symbol.to_string(), times);
    }

    pub fn reconnects(&self) -> u32 {
        self.inner.borrow().reconnects
    }
}

impl CandleFeed for MockCandleFeed {
    fn closed_candles(&self, symbol: &str, count: usize) -> Result<Vec<Candle>, CandlegateError> {
        let mut state = self.inner.borrow_mut();
        if let Some(remaining) = state.failures.get_mut(symbol) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CandlegateError::Feed {
                    symbol: symbol.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
        }
        let series = state.series.get(symbol).cloned().unwrap_or_default();
        let start = series.len().saturating_sub(count);
        Ok(series[start..].to_vec())
    }

    fn reconnect(&self) -> Result<(), CandlegateError> {
        self.inner.borrow_mut().reconnects += 1;
        Ok(())
    }
}

// --- mock order gateway ---

struct GatewayState {
    balance: f64,
    specs: HashMap<String, SymbolSpec>,
    open: HashSet<String>,
    submitted: Vec<OrderRequest>,
    reject: Option<String>,
    position_check_fails: bool,
}

#[derive(Clone)]
pub struct MockOrderGateway {
    inner: Rc<RefCell<GatewayState>>,
}

impl MockOrderGateway {
    pub fn new(balance: f64) -> Self {
        let mut specs = HashMap::new();
        specs.insert("EURUSD".to_string(), eurusd_spec());
        specs.insert("GBPUSD".to_string(), eurusd_spec());
        Self {
            inner: Rc::new(RefCell::new(GatewayState {
                balance,
                specs,
                open: HashSet::new(),
                submitted: Vec::new(),
                reject: None,
                position_check_fails: false,
            })),
        }
    }

    pub fn reject_with(&self, reason: &str) {
        self.inner.borrow_mut().reject = Some(reason.to_string());
    }

    pub fn fail_position_checks(&self) {
        self.inner.borrow_mut().position_check_fails = true;
    }

    pub fn open(&self, symbol: &str) {
        self.inner.borrow_mut().open.insert(symbol.to_string());
    }

    pub fn close(&self, symbol: &str) {
        self.inner.borrow_mut().open.remove(symbol);
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.inner.borrow().submitted.clone()
    }
}

impl OrderGateway for MockOrderGateway {
    fn submit(&self, order: &OrderRequest) -> Result<OrderId, CandlegateError> {
        let mut state = self.inner.borrow_mut();
        if let Some(reason) = &state.reject {
            return Err(CandlegateError::OrderRejected {
                symbol: order.symbol.clone(),
                reason: reason.clone(),
            });
        }
        state.submitted.push(order.clone());
        state.open.insert(order.symbol.clone());
        Ok(state.submitted.len() as OrderId)
    }

    fn has_open_position(&self, symbol: &str) -> Result<bool, CandlegateError> {
        let state = self.inner.borrow();
        if state.position_check_fails {
            return Err(CandlegateError::OrderRejected {
                symbol: symbol.to_string(),
                reason: "terminal disconnected".to_string(),
            });
        }
        Ok(state.open.contains(symbol))
    }

    fn account_balance(&self) -> Result<f64, CandlegateError> {
        Ok(self.inner.borrow().balance)
    }

    fn symbol_spec(&self, symbol: &str) -> Result<SymbolSpec, CandlegateError> {
        self.inner
            .borrow()
            .specs
            .get(symbol)
            .copied()
            .ok_or_else(|| CandlegateError::OrderRejected {
                symbol: symbol.to_string(),
                reason: "unknown symbol".to_string(),
            })
    }
}

// --- recording sink ---

#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<EngineEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.borrow().clone()
    }

    /// `(from, to)` of every phase transition, in order.
    pub fn transitions(&self) -> Vec<(String, String)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                EngineEvent::PhaseTransition { from, to, .. } => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &EngineEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

// --- in-memory state store ---

#[derive(Clone, Default)]
pub struct MemoryStateStore {
    records: Rc<RefCell<Vec<StateSnapshot>>>,
    saves: Rc<RefCell<u32>>,
    fail_saves: Rc<RefCell<bool>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<StateSnapshot>) -> Self {
        let store = Self::default();
        *store.records.borrow_mut() = records;
        store
    }

    pub fn records(&self) -> Vec<StateSnapshot> {
        self.records.borrow().clone()
    }

    pub fn saves(&self) -> u32 {
        *self.saves.borrow()
    }

    pub fn fail_saves(&self) {
        *self.fail_saves.borrow_mut() = true;
    }
}

impl StateStore for MemoryStateStore {
    fn save(&self, snapshots: &[StateSnapshot]) -> Result<(), CandlegateError> {
        if *self.fail_saves.borrow() {
            return Err(CandlegateError::Persistence {
                reason: "disk full".to_string(),
            });
        }
        *self.saves.borrow_mut() += 1;
        *self.records.borrow_mut() = snapshots.to_vec();
        Ok(())
    }

    fn load(&self) -> Result<Vec<StateSnapshot>, CandlegateError> {
        Ok(self.records.borrow().clone())
    }
}
