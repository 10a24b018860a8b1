//! Application configuration.
//!
//! Process-level settings come from environment variables:
//! - `SIGNALGEN_FEED` - `kraken` (default) or `yahoo`
//! - `KRAKEN_WEBSOCKET_URL` / `KRAKEN_REST_URL` - Kraken endpoint overrides
//! - `YAHOO_CHART_URL` - chart API host override
//! - `SIGNALGEN_ENGINE_CONFIG` - path to an [`EngineConfig`] JSON file
//! - `SIGNALGEN_RULES` - path to a JSON array of rule definitions
//! - `SIGNALGEN_SYMBOLS` - comma-separated watchlist
//! - `SIGNALGEN_RULE_ID` - rule to activate on start
//!
//! Pipeline tuning lives in the [`EngineConfig`] file; every field is
//! optional and falls back to its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::feed::FeedKind;
use crate::feed::kraken::{DEFAULT_REST_URL, DEFAULT_WEBSOCKET_URL};
use crate::feed::yahoo::DEFAULT_CHART_URL;
use crate::indicators::{DEFAULT_HISTORY_CAPACITY, IndicatorConfig};
use crate::models::Timeframe;
use crate::orchestrator::ReconnectPolicy;
use crate::rules::DEFAULT_RULE_ID;
use crate::{Result, SignalGenError};

/// Symbols watched when `SIGNALGEN_SYMBOLS` is unset.
const DEFAULT_SYMBOLS: &[&str] = &["BTC/USD", "ETH/USD"];

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub feed: FeedKind,
    pub kraken: KrakenConfig,
    pub yahoo: YahooConfig,
    pub engine_config: Option<PathBuf>,
    pub rules: Option<PathBuf>,
    pub symbols: Vec<String>,
    pub rule_id: i64,
}

/// Kraken-specific configuration values.
#[derive(Debug)]
pub struct KrakenConfig {
    pub websocket_url: String,
    pub rest_url: String,
}

#[derive(Debug)]
pub struct YahooConfig {
    pub chart_url: String,
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`SignalGenError::Config`] for an unknown feed name or a
/// non-numeric `SIGNALGEN_RULE_ID`.
pub fn fetch_config() -> Result<AppConfig> {
    let feed = match non_empty_var("SIGNALGEN_FEED") {
        Some(raw) => raw.parse()?,
        None => FeedKind::default(),
    };

    let websocket_url = non_empty_var("KRAKEN_WEBSOCKET_URL")
        .unwrap_or_else(|| DEFAULT_WEBSOCKET_URL.to_string());
    let rest_url =
        non_empty_var("KRAKEN_REST_URL").unwrap_or_else(|| DEFAULT_REST_URL.to_string());
    let chart_url =
        non_empty_var("YAHOO_CHART_URL").unwrap_or_else(|| DEFAULT_CHART_URL.to_string());

    let symbols = match non_empty_var("SIGNALGEN_SYMBOLS") {
        Some(raw) => parse_symbols(&raw),
        None => DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
    };

    let rule_id = match non_empty_var("SIGNALGEN_RULE_ID") {
        Some(raw) => raw.trim().parse().map_err(|_| {
            SignalGenError::Config(format!("SIGNALGEN_RULE_ID must be an integer, got '{raw}'"))
        })?,
        None => DEFAULT_RULE_ID,
    };

    Ok(AppConfig {
        feed,
        kraken: KrakenConfig {
            websocket_url,
            rest_url,
        },
        yahoo: YahooConfig { chart_url },
        engine_config: non_empty_var("SIGNALGEN_ENGINE_CONFIG").map(PathBuf::from),
        rules: non_empty_var("SIGNALGEN_RULES").map(PathBuf::from),
        symbols,
        rule_id,
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Splits a comma-separated watchlist, trimming and uppercasing entries and
/// dropping blanks and repeats.
fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

/// Upper bound on concurrently subscribed symbols.
pub const MAX_SYMBOLS: usize = 5;

/// Pipeline tuning loaded from `SIGNALGEN_ENGINE_CONFIG`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeframe: Timeframe,
    /// Subscription capacity, at most [`MAX_SYMBOLS`].
    pub max_symbols: usize,
    /// Completed candles kept per symbol by the aggregator.
    pub max_candles: usize,
    /// Candles kept per symbol by the indicator engine.
    pub history_capacity: usize,
    /// Candles requested from the provider when a symbol is subscribed.
    pub backfill_candles: usize,
    pub indicators: IndicatorConfig,
    pub reconnect: ReconnectPolicy,
    /// Polling period of the delayed (Yahoo) feed.
    pub poll_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M1,
            max_symbols: MAX_SYMBOLS,
            max_candles: crate::aggregator::DEFAULT_MAX_CANDLES,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            backfill_candles: 300,
            indicators: IndicatorConfig::default(),
            reconnect: ReconnectPolicy::default(),
            poll_interval_secs: 15,
        }
    }
}

impl EngineConfig {
    /// Loads engine configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if a value
    /// is out of range.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SignalGenError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`SignalGenError::Config`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.max_symbols == 0 || self.max_symbols > MAX_SYMBOLS {
            return Err(SignalGenError::Config(format!(
                "max_symbols must be between 1 and {MAX_SYMBOLS}, got {}",
                self.max_symbols
            )));
        }
        if self.max_candles == 0 {
            return Err(SignalGenError::Config("max_candles must be at least 1".into()));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(SignalGenError::Config(
                "reconnect.base_delay_ms exceeds reconnect.max_delay_ms".into(),
            ));
        }
        self.indicators.validate()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
