//! CLI definition and dispatch.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::adapters::csv_adapter::CsvCandleFeed;
use crate::adapters::file_config_adapter::{FileConfigAdapter, IniConfigStore};
use crate::adapters::json_state_adapter::JsonStateStore;
use crate::adapters::paper_gateway::{ClosedPaperTrade, PaperGateway, PaperPosition};
use crate::adapters::tracing_sink::{JsonLinesEventSink, TracingEventSink};
use crate::domain::candle::closed_only;
use crate::domain::crossover::broker_to_utc;
use crate::domain::engine::{Engine, EngineSettings};
use crate::domain::engine_config::{EngineConfig, StateBackend};
use crate::domain::error::CandlegateError;
use crate::domain::schedule::{CandleCloseSchedule, Clock, Scheduler, SimulatedClock, SystemClock};
use crate::domain::state::StateView;
use crate::ports::candle_port::CandleFeed;
use crate::ports::config_port::ConfigStore;
use crate::ports::event_port::{EventSink, FanoutSink};
use crate::ports::order_port::OrderGateway;
use crate::ports::state_port::{NullStateStore, StateStore};

#[derive(Parser, Debug)]
#[command(name = "candlegate", about = "Closed-candle EMA crossover signal engine")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the engine on the wall clock against CSV candle files
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
    },
    /// Replay recorded CSV candles through the engine with a paper broker
    Replay {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data: PathBuf,
        /// Stop at this UTC time (e.g. 2024-09-02T18:00:00)
        #[arg(long)]
        until: Option<NaiveDateTime>,
        /// Save state to the configured store
        #[arg(long)]
        persist: bool,
    },
    /// Validate the engine config and every instrument config
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the persisted state of every instrument
    Status {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Wipe persisted state back to SCANNING
    Reset {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Run { config, data } => run_live(&config, &data),
        Command::Replay {
            config,
            data,
            until,
            persist,
        } => replay(&config, &data, until.map(|t| t.and_utc()), persist)
            .map(|summary| print_json(&summary)),
        Command::Validate { config } => run_validate(&config),
        Command::Status { config } => status(&config, Utc::now()).map(|lines| print_json(&lines)),
        Command::Reset { config, symbol } => reset(&config, symbol.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        warn!("tracing subscriber already installed");
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("error: could not encode output: {e}"),
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, CandlegateError> {
    FileConfigAdapter::from_file(path)
}

/// Parse and validate the engine config, anchoring relative paths on the config file's directory.
pub fn load_engine_config(path: &Path) -> Result<(FileConfigAdapter, EngineConfig), CandlegateError> {
    let adapter = load_config(path)?;
    let mut config = EngineConfig::from_config(&adapter)?;
    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }
    Ok((adapter, config))
}

pub fn open_state_store(config: &EngineConfig) -> Result<Box<dyn StateStore>, CandlegateError> {
    match config.state_backend {
        StateBackend::Json => Ok(Box::new(JsonStateStore::new(config.state_path.clone()))),
        #[cfg(feature = "sqlite")]
        StateBackend::Sqlite => Ok(Box::new(
            crate::adapters::sqlite_state_adapter::SqliteStateStore::open(&config.state_path)?,
        )),
        #[cfg(not(feature = "sqlite"))]
        StateBackend::Sqlite => Err(CandlegateError::ConfigInvalid {
            section: "engine".into(),
            key: "state_backend".into(),
            reason: "sqlite feature is not enabled".into(),
        }),
    }
}

fn build_sink(config: &EngineConfig) -> Result<Box<dyn EventSink>, CandlegateError> {
    let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(TracingEventSink)];
    if let Some(path) = &config.event_log {
        sinks.push(Box::new(JsonLinesEventSink::open(path)?));
    }
    Ok(Box::new(FanoutSink::new(sinks)))
}

fn schedule(config: &EngineConfig, settings: &EngineSettings) -> CandleCloseSchedule {
    CandleCloseSchedule {
        timeframe: settings.timeframe,
        grace: Duration::seconds(config.close_grace_seconds),
    }
}

fn run_live(config_path: &Path, data_dir: &Path) -> Result<(), CandlegateError> {
    let (adapter, config) = load_engine_config(config_path)?;
    let settings = config.settings()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let started_at = clock.now();

    let feed = CsvCandleFeed::new(data_dir.to_path_buf(), Arc::clone(&clock), settings.broker_offset);
    let gateway = PaperGateway::from_config(&adapter, &config.symbols);
    let configs = IniConfigStore::new(config.strategies_dir.clone(), config.allocation.clone());

    let mut engine = Engine::new(
        settings,
        &config.symbols,
        &configs,
        Box::new(feed),
        Box::new(gateway),
        open_state_store(&config)?,
        build_sink(&config)?,
        started_at,
    );
    let mut scheduler = Scheduler::new(
        schedule(&config, &settings),
        clock,
        Duration::seconds(config.poll_interval_seconds),
    );
    let stop = install_stop_handler()?;
    engine.run(&mut scheduler, &stop)
}

/// Flag raised by Ctrl-C or SIGTERM. May be installed once per process.
pub fn install_stop_handler() -> Result<Arc<AtomicBool>, CandlegateError> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        info!("stop requested");
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CandlegateError::Io(std::io::Error::other(e.to_string())))?;
    Ok(stop)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cycles: usize,
    pub orders: Vec<PaperPosition>,
    pub closed_trades: Vec<ClosedPaperTrade>,
    pub final_balance: f64,
    pub instruments: Vec<StateView>,
}

/// Step a simulated clock through every candle close in the CSV files.
///
/// Open paper positions are settled against each newly closed candle before the engine
/// evaluates it, so a position can never close on the candle that opened it.
pub fn replay(
    config_path: &Path,
    data_dir: &Path,
    until: Option<DateTime<Utc>>,
    persist: bool,
) -> Result<ReplaySummary, CandlegateError> {
    let (adapter, config) = load_engine_config(config_path)?;
    let settings = config.settings()?;
    let offset = settings.broker_offset;

    let (first, last) = data_range(data_dir, &config.symbols, &settings)?;
    let start = broker_to_utc(first, offset);
    let end = until.unwrap_or_else(|| broker_to_utc(last + settings.timeframe, offset));
    info!(%start, %end, "replaying");

    let clock = Arc::new(SimulatedClock::new(start));
    let shared: Arc<dyn Clock> = clock.clone();
    let feed = CsvCandleFeed::new(data_dir.to_path_buf(), Arc::clone(&shared), offset);
    let settle_feed = CsvCandleFeed::new(data_dir.to_path_buf(), Arc::clone(&shared), offset);
    let gateway = PaperGateway::from_config(&adapter, &config.symbols);
    let configs = IniConfigStore::new(config.strategies_dir.clone(), config.allocation.clone());
    let store: Box<dyn StateStore> = if persist {
        open_state_store(&config)?
    } else {
        Box::new(NullStateStore)
    };

    let mut engine = Engine::new(
        settings,
        &config.symbols,
        &configs,
        Box::new(feed),
        Box::new(gateway.clone()),
        store,
        build_sink(&config)?,
        start,
    );
    let mut scheduler = Scheduler::new(
        schedule(&config, &settings),
        shared,
        Duration::seconds(config.poll_interval_seconds),
    );

    let stop = AtomicBool::new(false);
    let mut cycles = 0;
    while let Some(tick) = scheduler.next_tick(&stop) {
        if tick.at > end {
            break;
        }
        settle_positions(&gateway, &settle_feed, &config.symbols, tick.at, &settings);
        engine.run_cycle(tick.at);
        cycles += 1;
    }
    engine.shutdown(clock.now())?;

    Ok(ReplaySummary {
        start,
        end,
        cycles,
        orders: gateway.order_log(),
        closed_trades: gateway.closed_trades(),
        final_balance: gateway.account_balance().unwrap_or_default(),
        instruments: engine.board().read(),
    })
}

fn data_range(
    data_dir: &Path,
    symbols: &[String],
    settings: &EngineSettings,
) -> Result<(NaiveDateTime, NaiveDateTime), CandlegateError> {
    let reader = CsvCandleFeed::new(
        data_dir.to_path_buf(),
        Arc::new(SystemClock),
        settings.broker_offset,
    );
    let mut range: Option<(NaiveDateTime, NaiveDateTime)> = None;
    for symbol in symbols {
        let candles = match reader.load_all(symbol) {
            Ok(candles) => candles,
            Err(e) => {
                warn!(%symbol, error = %e, "no replay data");
                continue;
            }
        };
        if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
            range = Some(match range {
                Some((lo, hi)) => (lo.min(first.time), hi.max(last.time)),
                None => (first.time, last.time),
            });
        }
    }
    range.ok_or_else(|| CandlegateError::Feed {
        symbol: symbols.join(","),
        reason: format!("no candle data in {}", data_dir.display()),
    })
}

fn settle_positions(
    gateway: &PaperGateway,
    feed: &CsvCandleFeed,
    symbols: &[String],
    now: DateTime<Utc>,
    settings: &EngineSettings,
) {
    let now_local = now.naive_utc() + Duration::seconds(settings.broker_offset.local_minus_utc() as i64);
    for symbol in symbols {
        let candles = match feed.closed_candles(symbol, 2) {
            Ok(candles) => candles,
            Err(_) => continue,
        };
        if let Some(candle) = closed_only(&candles, now_local, settings.timeframe).last() {
            gateway.settle(symbol, candle);
        }
    }
}

pub fn run_validate(config_path: &Path) -> Result<(), CandlegateError> {
    let (_, config) = load_engine_config(config_path)?;
    let configs = IniConfigStore::new(config.strategies_dir.clone(), config.allocation.clone());

    let mut first_error = None;
    for symbol in &config.symbols {
        match configs.load(symbol) {
            Ok(instrument) => println!(
                "{symbol}: ok (long {}, short {}, min bars {})",
                if instrument.long.enabled { "on" } else { "off" },
                if instrument.short.enabled { "on" } else { "off" },
                instrument.min_bars()
            ),
            Err(e) => {
                println!("{symbol}: {e}");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusLine {
    pub last_update: DateTime<Utc>,
    pub stale: bool,
    #[serde(flatten)]
    pub view: StateView,
}

/// Persisted snapshots as views, flagged stale against `now`.
pub fn status(config_path: &Path, now: DateTime<Utc>) -> Result<Vec<StatusLine>, CandlegateError> {
    let (_, config) = load_engine_config(config_path)?;
    let settings = config.settings()?;
    let store = open_state_store(&config)?;
    Ok(store
        .load()?
        .into_iter()
        .map(|snapshot| StatusLine {
            last_update: snapshot.last_update,
            stale: snapshot.is_stale(now, settings.staleness),
            view: StateView::from_state(&snapshot.symbol, &snapshot.state),
        })
        .collect())
}

pub fn reset(config_path: &Path, symbol: Option<&str>) -> Result<(), CandlegateError> {
    let (_, config) = load_engine_config(config_path)?;
    let symbol = symbol.map(str::to_uppercase);
    if let Some(s) = &symbol {
        if !config.symbols.contains(s) {
            return Err(CandlegateError::ConfigInvalid {
                section: "engine".into(),
                key: "symbols".into(),
                reason: format!("{s} is not a configured symbol"),
            });
        }
    }
    open_state_store(&config)?.clear(symbol.as_deref())?;
    info!(symbol = symbol.as_deref().unwrap_or("*"), "state reset to SCANNING");
    Ok(())
}
