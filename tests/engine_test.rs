//! Engine driver tests: fetching, trimming, isolation, persistence and the run loop.

mod common;

use candlegate::domain::candle::Candle;
use candlegate::domain::direction::Direction;
use candlegate::domain::engine::{Engine, EngineSettings};
use candlegate::domain::schedule::{CandleCloseSchedule, Clock, Scheduler, SimulatedClock};
use candlegate::domain::state::{ArmedSetup, Phase, StateSnapshot, StrategyState};
use candlegate::ports::event_port::{EngineEvent, EventSink};
use chrono::{DateTime, Duration, Utc};
use common::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const FIRST: usize = 11;

struct Rig {
    feed: MockCandleFeed,
    gateway: MockOrderGateway,
    sink: RecordingSink,
    store: MemoryStateStore,
}

impl Rig {
    fn new() -> Self {
        Self {
            feed: MockCandleFeed::new(),
            gateway: MockOrderGateway::new(20_000.0),
            sink: RecordingSink::new(),
            store: MemoryStateStore::new(),
        }
    }

    fn engine(&self, symbols: &[&str], configs: &StaticConfigStore) -> Engine {
        let symbols: Vec<String> = symbols.iter().map(|s| s.to_string()).collect();
        Engine::new(
            EngineSettings::default(),
            &symbols,
            configs,
            Box::new(self.feed.clone()),
            Box::new(self.gateway.clone()),
            Box::new(self.store.clone()),
            Box::new(self.sink.clone()),
            utc(7, 0, 0),
        )
    }
}

fn eurusd_only() -> StaticConfigStore {
    StaticConfigStore::new().with("EURUSD", test_instrument(""))
}

/// One second after `candle` closes.
fn after_close(candle: &Candle) -> DateTime<Utc> {
    (candle.time + Duration::minutes(5) + Duration::seconds(1)).and_utc()
}

fn state_of(engine: &Engine, symbol: &str) -> StrategyState {
    engine
        .instruments()
        .iter()
        .find(|i| i.symbol == symbol)
        .map(|i| i.state.clone())
        .unwrap()
}

mod cycles {
    use super::*;

    #[test]
    fn candle_by_candle_reaches_in_trade() {
        let candles = breakout_series();
        let rig = Rig::new();
        let mut engine = rig.engine(&["EURUSD"], &eurusd_only());

        rig.feed.extend("EURUSD", &candles[..FIRST]);
        for i in FIRST..=BREAKOUT {
            rig.feed.push("EURUSD", candles[i]);
            let report = engine.run_cycle(after_close(&candles[i]));
            assert_eq!(report.evaluated, 1);
            if i == BREAKOUT {
                assert_eq!(report.orders, vec![("EURUSD".to_string(), 1)]);
            } else {
                assert!(report.orders.is_empty());
            }
        }

        let state = state_of(&engine, "EURUSD");
        assert_eq!(state.phase, Phase::InTrade { direction: Direction::Long });
        assert_eq!(state.current_bar, (BREAKOUT - FIRST + 1) as u64);
        assert_eq!(rig.gateway.submitted().len(), 1);
    }

    #[test]
    fn forming_candle_is_not_evaluated() {
        let candles = breakout_series();
        let rig = Rig::new();
        let mut engine = rig.engine(&["EURUSD"], &eurusd_only());
        rig.feed.extend("EURUSD", &candles[..=FIRST + 1]);

        // candles[FIRST + 1] opened at 09:00 and is still forming at 09:02.
        engine.run_cycle(utc(9, 2, 0));
        let state = state_of(&engine, "EURUSD");
        assert_eq!(state.current_bar, 1);
        assert_eq!(state.last_candle_time, Some(candles[FIRST].time));
    }

    #[test]
    fn repeated_cycle_without_new_candle_changes_nothing() {
        let candles = breakout_series();
        let rig = Rig::new();
        let mut engine = rig.engine(&["EURUSD"], &eurusd_only());
        rig.feed.extend("EURUSD", &candles[..=TRIGGER]);

        engine.run_cycle(after_close(&candles[TRIGGER]));
        let before = state_of(&engine, "EURUSD");
        engine.run_cycle(after_close(&candles[TRIGGER]) + Duration::seconds(30));
        assert_eq!(state_of(&engine, "EURUSD"), before);
        assert_eq!(before.phase.label(), "ARMED_LONG");
    }

    #[test]
    fn too_little_history_skips_the_instrument() {
        let candles = breakout_series();
        let rig = Rig::new();
        let mut engine = rig.engine(&["EURUSD"], &eurusd_only());
        rig.feed.extend("EURUSD", &candles[..4]);

        let report = engine.run_cycle(after_close(&candles[3]));
        assert_eq!(report.skipped, 1);
        assert_eq!(state_of(&engine, "EURUSD"), StrategyState::new(5));
    }
}

mod feed_errors {
    use super::*;

    #[test]
    fn single_failure_recovers_after_reconnect() {
        let candles = breakout_series();
        let rig = Rig::new();
        let mut engine = rig.engine(&["EURUSD"], &eurusd_only());
        rig.feed.extend("EURUSD", &candles[..=FIRST]);
        rig.feed.fail("EURUSD", 1);

        let report = engine.run_cycle(after_close(&candles[FIRST]));
        assert_eq!(report.evaluated, 1);
        assert_eq!(rig.feed.reconnects(), 1);
    }

    #[test]
    fn repeated_failure_skips_the_cycle() {
        let candles = breakout_series();
        let rig = Rig::new();
        let mut engine = rig.engine(&["EURUSD"], &eurusd_only());
        rig.feed.extend("EURUSD", &candles[..=FIRST]);
        rig.feed.fail("EURUSD", 2);

        let report = engine.run_cycle(after_close(&candles[FIRST]));
        assert_eq!(report.evaluated, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            rig.sink
                .count(|e| matches!(e, EngineEvent::CycleSkipped { .. })),
            1
        );
        assert_eq!(state_of(&engine, "EURUSD").current_bar, 0);

        let report = engine.run_cycle(after_close(&candles[FIRST]) + Duration::seconds(10));
        assert_eq!(report.evaluated, 1);
    }
}

mod isolation {
    use super::*;

    #[test]
    fn unconfigured_instrument_does_not_block_others() {
        let candles = breakout_series();
        let rig = Rig::new();
        let mut engine = rig.engine(&["EURUSD", "GBPUSD"], &eurusd_only());
        rig.feed.extend("EURUSD", &candles[..=FIRST]);
        rig.feed.extend("GBPUSD", &candles[..=FIRST]);

        let report = engine.run_cycle(after_close(&candles[FIRST]));
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.skipped, 1);

        let views = engine.board().read();
        let gbp = views.iter().find(|v| v.symbol == "GBPUSD").unwrap();
        assert!(gbp.unconfigured.is_some());
        let eur = views.iter().find(|v| v.symbol == "EURUSD").unwrap();
        assert_eq!(eur.current_bar, 1);
    }

    #[test]
    fn instruments_keep_separate_state() {
        let candles = breakout_series();
        let rig = Rig::new();
        let configs = eurusd_only().with("GBPUSD", test_instrument(""));
        let mut engine = rig.engine(&["EURUSD", "GBPUSD"], &configs);
        rig.feed.extend("EURUSD", &candles[..=TRIGGER]);
        rig.feed.extend("GBPUSD", &candles[..=FIRST]);

        engine.run_cycle(after_close(&candles[TRIGGER]));
        assert_eq!(state_of(&engine, "EURUSD").phase.label(), "ARMED_LONG");
        assert_eq!(state_of(&engine, "GBPUSD").phase, Phase::Scanning);
    }
}

mod persistence {
    use super::*;

    fn armed_record(age_minutes: i64) -> StateSnapshot {
        let candles = breakout_series();
        let mut state = StrategyState::new(5);
        state.phase = Phase::Armed(ArmedSetup::new(Direction::Long, candles[TRIGGER]));
        state.current_bar = 4;
        state.last_candle_time = Some(candles[TRIGGER].time);
        StateSnapshot {
            symbol: "EURUSD".to_string(),
            last_update: utc(7, 0, 0) - Duration::minutes(age_minutes),
            state,
        }
    }

    #[test]
    fn fresh_record_is_restored() {
        let mut rig = Rig::new();
        rig.store = MemoryStateStore::with_records(vec![armed_record(10)]);
        let engine = rig.engine(&["EURUSD"], &eurusd_only());
        let state = state_of(&engine, "EURUSD");
        assert_eq!(state.phase.label(), "ARMED_LONG");
        assert_eq!(state.current_bar, 4);
    }

    #[test]
    fn stale_record_is_discarded() {
        let mut rig = Rig::new();
        rig.store = MemoryStateStore::with_records(vec![armed_record(45)]);
        let engine = rig.engine(&["EURUSD"], &eurusd_only());
        assert_eq!(state_of(&engine, "EURUSD"), StrategyState::new(5));
    }

    #[test]
    fn every_cycle_saves_a_snapshot() {
        let candles = breakout_series();
        let rig = Rig::new();
        let mut engine = rig.engine(&["EURUSD"], &eurusd_only());
        rig.feed.extend("EURUSD", &candles[..=TRIGGER]);

        let now = after_close(&candles[TRIGGER]);
        engine.run_cycle(now);
        assert_eq!(rig.store.saves(), 1);
        let records = rig.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].last_update, now);
        assert_eq!(records[0].state.phase.label(), "ARMED_LONG");
    }

    #[test]
    fn save_failure_does_not_stop_the_cycle() {
        let candles = breakout_series();
        let rig = Rig::new();
        rig.store.fail_saves();
        let mut engine = rig.engine(&["EURUSD"], &eurusd_only());
        rig.feed.extend("EURUSD", &candles[..=TRIGGER]);

        let report = engine.run_cycle(after_close(&candles[TRIGGER]));
        assert_eq!(report.evaluated, 1);
        assert_eq!(state_of(&engine, "EURUSD").phase.label(), "ARMED_LONG");
        assert!(engine.shutdown(utc(10, 0, 0)).is_err());
    }

    #[test]
    fn unconfigured_instruments_are_not_persisted() {
        let rig = Rig::new();
        let engine = rig.engine(&["EURUSD", "GBPUSD"], &eurusd_only());
        let snapshots = engine.snapshots(utc(9, 0, 0));
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].symbol, "EURUSD");
    }
}

mod run_loop {
    use super::*;

    /// Simulated clock that raises `stop` once time passes `limit`.
    struct BoundedClock {
        inner: SimulatedClock,
        stop: Arc<AtomicBool>,
        limit: DateTime<Utc>,
    }

    impl Clock for BoundedClock {
        fn now(&self) -> DateTime<Utc> {
            self.inner.now()
        }

        fn sleep(&self, duration: Duration) {
            self.inner.sleep(duration);
            if self.inner.now() > self.limit {
                self.stop.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Records events and raises `stop` when an instrument enters a trade.
    #[derive(Clone)]
    struct StopOnTrade {
        stop: Arc<AtomicBool>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl EventSink for StopOnTrade {
        fn emit(&self, event: &EngineEvent) {
            if let EngineEvent::PhaseTransition { to, .. } = event {
                self.seen.lock().unwrap().push(to.clone());
                if to == "IN_TRADE" {
                    self.stop.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    #[test]
    fn scheduled_cycles_run_until_stopped() {
        let candles = breakout_series();
        let stop = Arc::new(AtomicBool::new(false));
        let sink = StopOnTrade {
            stop: Arc::clone(&stop),
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let feed = MockCandleFeed::new();
        feed.extend("EURUSD", &candles);
        let store = MemoryStateStore::new();

        let mut engine = Engine::new(
            EngineSettings::default(),
            &["EURUSD".to_string()],
            &eurusd_only(),
            Box::new(feed),
            Box::new(MockOrderGateway::new(20_000.0)),
            Box::new(store.clone()),
            Box::new(sink.clone()),
            utc(7, 0, 0),
        );

        let clock = Arc::new(BoundedClock {
            inner: SimulatedClock::new(utc(8, 59, 58)),
            stop: Arc::clone(&stop),
            limit: utc(11, 0, 0),
        });
        let mut scheduler = Scheduler::new(
            CandleCloseSchedule {
                timeframe: Duration::minutes(5),
                grace: Duration::seconds(10),
            },
            clock,
            Duration::seconds(5),
        );

        engine.run(&mut scheduler, &stop).unwrap();

        let state = state_of(&engine, "EURUSD");
        assert_eq!(state.phase.label(), "IN_TRADE");
        assert_eq!(state.current_bar, (BREAKOUT - FIRST + 1) as u64);
        assert_eq!(
            *sink.seen.lock().unwrap(),
            vec!["ARMED_LONG", "WINDOW_OPEN", "IN_TRADE"]
        );
        // One save per cycle plus the final one on shutdown.
        assert_eq!(store.saves() as usize, BREAKOUT - FIRST + 2);
    }
}
