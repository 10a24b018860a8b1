//! OHLCV candles and the Kraken `ohlc` channel wire models.

use serde::{Deserialize, Serialize};

use crate::{Result, SignalGenError};

/// A fixed-timeframe OHLCV aggregate of one or more bars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Bucket start, epoch seconds, aligned to the timeframe.
    pub start_time: i64,
    /// `start_time + timeframe_seconds`.
    pub close_time: i64,
    /// `true` only for the candle still receiving bars.
    #[serde(default)]
    pub is_building: bool,
}

impl Candle {
    /// Checks the OHLC invariant `high >= max(open, close) >= min(open, close) >= low > 0`.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Validation`] when the invariant is broken.
    pub fn validate(&self) -> Result<()> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(SignalGenError::Validation(format!(
                "{}: candle at {} has non-positive prices",
                self.symbol, self.start_time
            )));
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(SignalGenError::Validation(format!(
                "{}: candle at {} has high/low outside open/close",
                self.symbol, self.start_time
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(SignalGenError::Validation(format!(
                "{}: candle at {} has negative volume",
                self.symbol, self.start_time
            )));
        }
        if self.close_time <= self.start_time {
            return Err(SignalGenError::Validation(format!(
                "{}: candle closes before it starts ({} <= {})",
                self.symbol, self.close_time, self.start_time
            )));
        }
        Ok(())
    }
}

/// An update message from the Kraken `ohlc` (candles) channel.
#[derive(Debug, Clone, Deserialize)]
pub struct CandleUpdateResponse {
    pub channel: String,
    #[serde(rename = "type")]
    pub tpe: String,
    pub timestamp: String,
    pub data: Vec<CandleData>,
}

/// A single OHLC candlestick as streamed by Kraken. Repeated updates for the
/// same `interval_begin` carry the running state of that candle.
#[derive(Debug, Clone, Deserialize)]
pub struct CandleData {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Volume-weighted average price for this candle.
    pub vwap: f64,
    pub trades: u64,
    pub volume: f64,
    /// Start timestamp of this candle's time window.
    pub interval_begin: String,
    /// Candle duration in minutes.
    pub interval: u64,
    pub timestamp: String,
}
