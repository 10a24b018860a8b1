//! Rolling technical indicators per symbol.
//!
//! The [`IndicatorEngine`] keeps a bounded history of completed candles for
//! each symbol and recomputes the full indicator set whenever a candle
//! closes. Each value carries the one computed on the previous close, which
//! is what crossover conditions compare against.

pub mod config;
pub mod math;

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Candle;

pub use config::{BollingerConfig, IndicatorConfig, MacdConfig};

/// Default number of candles retained per symbol.
pub const DEFAULT_HISTORY_CAPACITY: usize = 250;

/// Indicator names that are not period-parameterized.
const FIXED_INDICATORS: [&str; 11] = [
    "PRICE",
    "PREV_CLOSE",
    "PREV_OPEN",
    "MACD",
    "MACD_SIGNAL",
    "MACD_HIST",
    "BB_MIDDLE",
    "BB_UPPER",
    "BB_LOWER",
    "BB_WIDTH",
    "PRICE_EMA20_DIFF_PCT",
];

/// Period-parameterized families, matched as `PREFIX{digits}`.
const INDICATOR_FAMILIES: [&str; 5] = ["MA", "EMA", "RSI", "ADX", "REL_VOLUME_"];

/// Whether `name` is an indicator the engine can produce.
///
/// Period families match any positive period (`EMA50`), even when that
/// period is not configured; such a reference fails at evaluation time.
pub fn is_known_indicator(name: &str) -> bool {
    if FIXED_INDICATORS.contains(&name) {
        return true;
    }
    INDICATOR_FAMILIES.iter().any(|prefix| {
        name.strip_prefix(prefix).is_some_and(|digits| {
            !digits.is_empty()
                && digits.bytes().all(|b| b.is_ascii_digit())
                && digits.parse::<usize>().is_ok_and(|p| p > 0)
        })
    })
}

/// One indicator value and the value it had on the previous candle close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorValue {
    pub current: f64,
    pub previous: Option<f64>,
}

/// Indicator name → `{current, previous}` for one symbol.
///
/// Replaced wholesale on every candle close.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorSnapshot(BTreeMap<String, IndicatorValue>);

impl IndicatorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, current: f64, previous: Option<f64>) {
        self.0
            .insert(name.into(), IndicatorValue { current, previous });
    }

    pub fn get(&self, name: &str) -> Option<&IndicatorValue> {
        self.0.get(name)
    }

    pub fn current(&self, name: &str) -> Option<f64> {
        self.0.get(name).map(|v| v.current)
    }

    pub fn previous(&self, name: &str) -> Option<f64> {
        self.0.get(name).and_then(|v| v.previous)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndicatorValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<S: Into<String>> FromIterator<(S, IndicatorValue)> for IndicatorSnapshot {
    fn from_iter<I: IntoIterator<Item = (S, IndicatorValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[derive(Default)]
struct SymbolIndicators {
    history: VecDeque<Candle>,
    snapshot: IndicatorSnapshot,
}

/// Computes indicator snapshots from completed candles.
pub struct IndicatorEngine {
    config: IndicatorConfig,
    capacity: usize,
    symbols: RwLock<HashMap<String, SymbolIndicators>>,
}

impl IndicatorEngine {
    /// `history_capacity` is raised to the configured indicators' requirement
    /// when it is smaller.
    pub fn new(config: IndicatorConfig, history_capacity: usize) -> Self {
        let capacity = history_capacity.max(config.required_history());
        Self {
            config,
            capacity,
            symbols: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Candles a symbol needs before it is ready for rule evaluation.
    pub fn required_history(&self) -> usize {
        self.config.required_history()
    }

    /// Appends a completed candle and returns the recomputed snapshot.
    pub fn update(&self, symbol: &str, candle: &Candle) -> IndicatorSnapshot {
        let mut symbols = self.symbols.write();
        let state = symbols.entry(symbol.to_string()).or_default();
        self.push(state, candle);
        debug!(
            symbol,
            history = state.history.len(),
            indicators = state.snapshot.len(),
            "Indicators updated"
        );
        state.snapshot.clone()
    }

    /// Bulk-loads backfilled candles, oldest first.
    ///
    /// The snapshot is recomputed after each candle so the previous values
    /// are meaningful when the first live candle closes.
    pub fn load_history(&self, symbol: &str, candles: &[Candle]) {
        let mut symbols = self.symbols.write();
        let state = symbols.entry(symbol.to_string()).or_default();
        for candle in candles {
            self.push(state, candle);
        }
        debug!(
            symbol,
            loaded = candles.len(),
            history = state.history.len(),
            "Indicator history loaded"
        );
    }

    fn push(&self, state: &mut SymbolIndicators, candle: &Candle) {
        state.history.push_back(candle.clone());
        while state.history.len() > self.capacity {
            state.history.pop_front();
        }
        let previous = std::mem::take(&mut state.snapshot);
        state.snapshot = self.compute(&state.history, &previous);
    }

    fn compute(&self, history: &VecDeque<Candle>, previous: &IndicatorSnapshot) -> IndicatorSnapshot {
        let mut values: Vec<(String, f64)> = Vec::new();
        let Some(last) = history.back() else {
            return IndicatorSnapshot::new();
        };

        let closes: Vec<f64> = history.iter().map(|c| c.close).collect();
        values.push(("PRICE".into(), last.close));
        if history.len() >= 2 {
            let prior = &history[history.len() - 2];
            values.push(("PREV_CLOSE".into(), prior.close));
            values.push(("PREV_OPEN".into(), prior.open));
        }

        for &period in &self.config.sma {
            if let Some(v) = math::sma(&closes, period) {
                values.push((format!("MA{period}"), v));
            }
        }
        for &period in &self.config.ema {
            if let Some(v) = math::ema(&closes, period) {
                values.push((format!("EMA{period}"), v));
            }
        }

        let macd = self.config.macd;
        if let Some((line, signal, hist)) = math::macd(&closes, macd.fast, macd.slow, macd.signal) {
            values.push(("MACD".into(), line));
            values.push(("MACD_SIGNAL".into(), signal));
            values.push(("MACD_HIST".into(), hist));
        }

        for &period in &self.config.rsi {
            if let Some(v) = math::rsi(&closes, period) {
                values.push((format!("RSI{period}"), v));
            }
        }

        if !self.config.adx.is_empty() {
            let highs: Vec<f64> = history.iter().map(|c| c.high).collect();
            let lows: Vec<f64> = history.iter().map(|c| c.low).collect();
            for &period in &self.config.adx {
                if let Some(v) = math::adx(&highs, &lows, &closes, period) {
                    values.push((format!("ADX{period}"), v));
                }
            }
        }

        let bb = self.config.bollinger;
        if let Some((middle, upper, lower, width)) = math::bollinger(&closes, bb.period, bb.std_dev) {
            values.push(("BB_MIDDLE".into(), middle));
            values.push(("BB_UPPER".into(), upper));
            values.push(("BB_LOWER".into(), lower));
            values.push(("BB_WIDTH".into(), width));
        }

        if !self.config.rel_volume.is_empty() {
            let volumes: Vec<f64> = history.iter().map(|c| c.volume).collect();
            for &period in &self.config.rel_volume {
                if let Some(v) = math::relative_volume(&volumes, period) {
                    values.push((format!("REL_VOLUME_{period}"), v));
                }
            }
        }

        if let Some(ema20) = values
            .iter()
            .find(|(name, _)| name == "EMA20")
            .map(|(_, v)| *v)
            .filter(|v| *v != 0.0)
        {
            let diff = (last.close - ema20).abs() / ema20;
            if diff.is_finite() {
                values.push(("PRICE_EMA20_DIFF_PCT".into(), diff));
            }
        }

        values
            .into_iter()
            .map(|(name, current)| {
                let prev = previous.current(&name);
                (
                    name,
                    IndicatorValue {
                        current,
                        previous: prev,
                    },
                )
            })
            .collect()
    }

    /// Latest snapshot, or `None` for an unknown symbol.
    pub fn snapshot(&self, symbol: &str) -> Option<IndicatorSnapshot> {
        self.symbols
            .read()
            .get(symbol)
            .map(|state| state.snapshot.clone())
    }

    pub fn history_len(&self, symbol: &str) -> usize {
        self.symbols
            .read()
            .get(symbol)
            .map_or(0, |state| state.history.len())
    }

    /// Enough history for every configured indicator.
    pub fn is_ready(&self, symbol: &str) -> bool {
        self.history_len(symbol) >= self.required_history()
    }

    pub fn clear_symbol(&self, symbol: &str) {
        self.symbols.write().remove(symbol);
    }

    pub fn clear_all(&self) {
        self.symbols.write().clear();
    }
}
