//! CSV candle feed for replaying recorded broker history.

use crate::domain::candle::Candle;
use crate::domain::error::CandlegateError;
use crate::domain::schedule::Clock;
use crate::ports::candle_port::CandleFeed;
use chrono::{Duration, FixedOffset, NaiveDateTime};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

const TIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Reads `<base_path>/<SYMBOL>.csv` (`time,open,high,low,close`, broker-local times)
/// and reveals only candles that have opened by the clock's current broker time.
///
/// Parsed files are cached until their modification time changes; `reconnect` drops the cache.
pub struct CsvCandleFeed {
    base_path: PathBuf,
    clock: Arc<dyn Clock>,
    broker_offset: FixedOffset,
    cache: Mutex<HashMap<String, CachedFile>>,
}

struct CachedFile {
    modified: Option<SystemTime>,
    candles: Arc<Vec<Candle>>,
}

impl CsvCandleFeed {
    pub fn new(base_path: PathBuf, clock: Arc<dyn Clock>, broker_offset: FixedOffset) -> Self {
        Self {
            base_path,
            clock,
            broker_offset,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", symbol))
    }

    /// Every candle in the file, sorted by open time.
    pub fn load_all(&self, symbol: &str) -> Result<Vec<Candle>, CandlegateError> {
        let feed_error = |reason: String| CandlegateError::Feed {
            symbol: symbol.to_string(),
            reason,
        };

        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path)
            .map_err(|e| feed_error(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut candles = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| feed_error(format!("CSV parse error: {}", e)))?;

            let time_str = record
                .get(0)
                .ok_or_else(|| feed_error("missing time column".into()))?;
            let time = parse_time(time_str.trim())
                .ok_or_else(|| feed_error(format!("invalid time: {}", time_str)))?;

            let field = |idx: usize, name: &str| -> Result<f64, CandlegateError> {
                record
                    .get(idx)
                    .ok_or_else(|| feed_error(format!("missing {} column", name)))?
                    .trim()
                    .parse()
                    .map_err(|e| feed_error(format!("invalid {} value: {}", name, e)))
            };

            candles.push(Candle {
                time,
                open: field(1, "open")?,
                high: field(2, "high")?,
                low: field(3, "low")?,
                close: field(4, "close")?,
            });
        }

        candles.sort_by_key(|c| c.time);
        candles.dedup_by_key(|c| c.time);
        Ok(candles)
    }

    fn cached(&self, symbol: &str) -> Result<Arc<Vec<Candle>>, CandlegateError> {
        let modified = fs::metadata(self.csv_path(symbol))
            .and_then(|m| m.modified())
            .ok();
        if let Ok(cache) = self.cache.lock() {
            if let Some(file) = cache.get(symbol) {
                if file.modified.is_some() && file.modified == modified {
                    return Ok(Arc::clone(&file.candles));
                }
            }
        }
        let candles = Arc::new(self.load_all(symbol)?);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                symbol.to_string(),
                CachedFile {
                    modified,
                    candles: Arc::clone(&candles),
                },
            );
        }
        Ok(candles)
    }

    fn broker_now(&self) -> NaiveDateTime {
        self.clock.now().naive_utc()
            + Duration::seconds(self.broker_offset.local_minus_utc() as i64)
    }
}

fn parse_time(value: &str) -> Option<NaiveDateTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

impl CandleFeed for CsvCandleFeed {
    fn closed_candles(&self, symbol: &str, count: usize) -> Result<Vec<Candle>, CandlegateError> {
        let now = self.broker_now();
        let candles = self.cached(symbol)?;
        let visible = candles.partition_point(|c| c.time <= now);
        let start = visible.saturating_sub(count);
        Ok(candles[start..visible].to_vec())
    }

    fn reconnect(&self) -> Result<(), CandlegateError> {
        match self.cache.lock() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        Ok(())
    }
}
