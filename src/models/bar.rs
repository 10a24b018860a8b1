//! Raw price bars as delivered by a data feed.

use serde::{Deserialize, Serialize};

use crate::{Result, SignalGenError};

/// Latest accepted bar timestamp, 9999-12-31T23:59:59Z.
pub const MAX_TIMESTAMP: f64 = 253_402_300_799.0;

/// A single raw OHLCV bar for one symbol.
///
/// `timestamp` is epoch seconds and may carry a fractional part; the
/// aggregator truncates it to whole seconds for deduplication and bucketing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp: f64,
}

impl Bar {
    pub fn new(
        symbol: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        timestamp: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            open,
            high,
            low,
            close,
            volume,
            timestamp,
        }
    }

    /// A bar whose four prices are all `price`.
    pub fn flat(symbol: impl Into<String>, price: f64, volume: f64, timestamp: f64) -> Self {
        Self::new(symbol, price, price, price, price, volume, timestamp)
    }

    /// Checks that prices are positive and finite, that high/low bound the
    /// open and close, and that volume and timestamp are usable.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(SignalGenError::Validation("bar symbol is empty".into()));
        }
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SignalGenError::Validation(format!(
                    "{}: {field} must be positive, got {value}",
                    self.symbol
                )));
            }
        }
        if self.high < self.open.max(self.close) || self.low > self.open.min(self.close) {
            return Err(SignalGenError::Validation(format!(
                "{}: high/low do not bound open/close (O={} H={} L={} C={})",
                self.symbol, self.open, self.high, self.low, self.close
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(SignalGenError::Validation(format!(
                "{}: volume must be non-negative, got {}",
                self.symbol, self.volume
            )));
        }
        if !(0.0..=MAX_TIMESTAMP).contains(&self.timestamp) {
            return Err(SignalGenError::Validation(format!(
                "{}: timestamp {} is outside the supported epoch range",
                self.symbol, self.timestamp
            )));
        }
        Ok(())
    }

    /// Whole-second timestamp used as the deduplication key.
    pub fn second(&self) -> i64 {
        self.timestamp.floor() as i64
    }
}
