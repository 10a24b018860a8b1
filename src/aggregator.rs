//! Candle aggregation from raw bars.
//!
//! [`CandleAggregator`] buckets bars into fixed-timeframe OHLCV candles per
//! symbol. Each symbol has at most one building candle; when a bar lands in a
//! later bucket the building candle is finalized, stored in a bounded ring of
//! completed candles and handed back to the caller.
//!
//! Bars are deduplicated on their whole-second timestamp. The seen-set is
//! capped and sheds its oldest fifth on overflow, which is approximate rather
//! than a strict LRU.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::Result;
use crate::models::{Bar, Candle, Timeframe};

/// Completed candles kept per symbol unless configured otherwise.
pub const DEFAULT_MAX_CANDLES: usize = 500;

/// Deduplication keys kept per symbol before eviction.
const SEEN_CAPACITY: usize = 10_000;

/// Keys dropped (oldest first) when the seen-set overflows.
const SEEN_EVICTION: usize = SEEN_CAPACITY / 5;

/// Aggregation state for one symbol.
struct SymbolCandles {
    completed: VecDeque<Candle>,
    building: Option<Candle>,
    seen: HashSet<i64>,
    /// Start of the newest completed candle, live or backfilled.
    last_closed_start: Option<i64>,
}

impl SymbolCandles {
    fn new(capacity: usize) -> Self {
        Self {
            completed: VecDeque::with_capacity(capacity.min(1024)),
            building: None,
            seen: HashSet::new(),
            last_closed_start: None,
        }
    }

    fn push_completed(&mut self, candle: Candle, capacity: usize) {
        self.last_closed_start = Some(candle.start_time);
        self.completed.push_back(candle);
        while self.completed.len() > capacity {
            self.completed.pop_front();
        }
    }

    fn evict_seen(&mut self) {
        if self.seen.len() <= SEEN_CAPACITY {
            return;
        }
        let mut keys: Vec<i64> = self.seen.iter().copied().collect();
        keys.sort_unstable();
        for key in keys.into_iter().take(SEEN_EVICTION) {
            self.seen.remove(&key);
        }
    }
}

struct AggregatorState {
    timeframe: Timeframe,
    symbols: HashMap<String, SymbolCandles>,
}

/// Thread-safe bar → candle aggregator.
///
/// Every public method takes the same internal lock, so calls from the feed
/// tasks and from control code never interleave.
pub struct CandleAggregator {
    max_candles: usize,
    state: Mutex<AggregatorState>,
}

impl CandleAggregator {
    pub fn new(timeframe: Timeframe, max_candles: usize) -> Self {
        Self {
            max_candles: max_candles.max(1),
            state: Mutex::new(AggregatorState {
                timeframe,
                symbols: HashMap::new(),
            }),
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.state.lock().timeframe
    }

    /// Switches timeframe and drops every symbol's candles.
    ///
    /// Only call while the orchestrator is fully stopped.
    pub fn change_timeframe(&self, timeframe: Timeframe) {
        let mut state = self.state.lock();
        state.timeframe = timeframe;
        state.symbols.clear();
        info!(timeframe = %timeframe, "Aggregator timeframe changed");
    }

    /// Creates empty state for `symbol` if none exists yet.
    pub fn init_symbol(&self, symbol: &str) {
        let mut state = self.state.lock();
        let capacity = self.max_candles;
        state
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolCandles::new(capacity));
    }

    /// Removes all state for `symbol`.
    pub fn clear_symbol(&self, symbol: &str) {
        if self.state.lock().symbols.remove(symbol).is_some() {
            debug!(symbol, "Cleared candle state");
        }
    }

    /// Feeds one bar into the symbol's building candle.
    ///
    /// Returns the finalized candle when the bar opened a new bucket, `None`
    /// otherwise (including for duplicate and stale bars).
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Validation`](crate::SignalGenError::Validation)
    /// for non-positive prices, inconsistent high/low, negative volume, or a
    /// timestamp outside the supported epoch range.
    /// Rejected bars leave the state untouched.
    pub fn add_bar(&self, bar: &Bar) -> Result<Option<Candle>> {
        bar.validate()?;

        let mut state = self.state.lock();
        let timeframe = state.timeframe;
        let capacity = self.max_candles;
        let entry = state
            .symbols
            .entry(bar.symbol.clone())
            .or_insert_with(|| SymbolCandles::new(capacity));

        let second = bar.second();
        if !entry.seen.insert(second) {
            debug!(symbol = %bar.symbol, second, "Skipping duplicate bar");
            return Ok(None);
        }
        entry.evict_seen();

        let start = timeframe.bucket_start(bar.timestamp);
        let building_start = entry.building.as_ref().map(|c| c.start_time);

        match building_start {
            None => {
                if entry.last_closed_start.is_some_and(|last| start <= last) {
                    debug!(symbol = %bar.symbol, start, "Dropping bar for an already closed bucket");
                    return Ok(None);
                }
                entry.building = Some(open_candle(bar, start, timeframe));
                debug!(symbol = %bar.symbol, start, "Started candle");
                Ok(None)
            }
            Some(current) if start > current => {
                let fresh = open_candle(bar, start, timeframe);
                let mut finished = match entry.building.replace(fresh) {
                    Some(candle) => candle,
                    None => return Ok(None),
                };
                finished.is_building = false;
                entry.push_completed(finished.clone(), capacity);
                debug!(
                    symbol = %finished.symbol,
                    open = finished.open,
                    high = finished.high,
                    low = finished.low,
                    close = finished.close,
                    volume = finished.volume,
                    start = finished.start_time,
                    "Completed candle"
                );
                Ok(Some(finished))
            }
            Some(current) if start < current => {
                debug!(symbol = %bar.symbol, start, current, "Dropping out-of-order bar");
                Ok(None)
            }
            Some(_) => {
                if let Some(candle) = entry.building.as_mut() {
                    candle.high = candle.high.max(bar.high);
                    candle.low = candle.low.min(bar.low);
                    candle.close = bar.close;
                    candle.volume += bar.volume;
                }
                Ok(None)
            }
        }
    }

    /// Seeds completed candles from a historical backfill.
    ///
    /// Candles are re-stamped with `symbol` and must arrive oldest first;
    /// candles that are invalid or not newer than what is already stored are
    /// skipped. Returns the number of candles kept.
    pub fn load_history(&self, symbol: &str, candles: &[Candle]) -> usize {
        let mut state = self.state.lock();
        let capacity = self.max_candles;
        let entry = state
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolCandles::new(capacity));
        let building_start = entry.building.as_ref().map(|c| c.start_time);

        let mut loaded = 0;
        for candle in candles {
            if candle.validate().is_err() {
                continue;
            }
            if entry
                .last_closed_start
                .is_some_and(|last| candle.start_time <= last)
            {
                continue;
            }
            if building_start.is_some_and(|building| candle.start_time >= building) {
                continue;
            }
            let mut candle = candle.clone();
            candle.symbol = symbol.to_string();
            candle.is_building = false;
            entry.push_completed(candle, capacity);
            loaded += 1;
        }
        loaded
    }

    /// Completed candles, oldest first. `count` keeps only the newest `count`.
    pub fn get_completed_candles(&self, symbol: &str, count: Option<usize>) -> Vec<Candle> {
        let state = self.state.lock();
        let Some(entry) = state.symbols.get(symbol) else {
            return Vec::new();
        };
        let skip = match count {
            Some(n) if n > 0 => entry.completed.len().saturating_sub(n),
            _ => 0,
        };
        entry.completed.iter().skip(skip).cloned().collect()
    }

    /// The candle still receiving bars, flagged `is_building`.
    pub fn current_candle(&self, symbol: &str) -> Option<Candle> {
        self.state
            .lock()
            .symbols
            .get(symbol)
            .and_then(|entry| entry.building.clone())
    }

    pub fn candle_count(&self, symbol: &str) -> usize {
        self.state
            .lock()
            .symbols
            .get(symbol)
            .map_or(0, |entry| entry.completed.len())
    }
}

fn open_candle(bar: &Bar, start: i64, timeframe: Timeframe) -> Candle {
    Candle {
        symbol: bar.symbol.clone(),
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
        start_time: start,
        close_time: start + timeframe.seconds(),
        is_building: true,
    }
}
