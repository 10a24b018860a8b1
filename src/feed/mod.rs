//! Market data providers.
//!
//! A [`DataFeed`] delivers live bars per symbol as a [`BarStream`] and serves
//! historical candles for backfill. A live stream that ends means the
//! provider lost its connection; the orchestrator reacts by reconnecting.

pub mod kraken;
pub mod yahoo;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::mpsc;

use crate::models::{Bar, Candle, Timeframe};
use crate::{Result, SignalGenError};

pub use kraken::KrakenFeed;
pub use yahoo::YahooFeed;

/// Live bars for one symbol.
pub type BarStream = BoxStream<'static, Bar>;

/// A source of live bars and historical candles.
#[async_trait]
pub trait DataFeed: Send + Sync {
    fn name(&self) -> &str;

    /// Opens (or re-opens) the provider connection.
    async fn connect(&self) -> Result<()>;

    /// Starts streaming live bars for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Connection`] when not connected.
    async fn subscribe(&self, symbol: &str) -> Result<BarStream>;

    async fn unsubscribe(&self, symbol: &str) -> Result<()>;

    /// Completed candles in `[start, end)`, oldest first.
    async fn fetch_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Result<Vec<Candle>>;

    /// Closes the connection. Every open [`BarStream`] ends.
    async fn disconnect(&self) -> Result<()>;
}

/// Adapts a channel receiver into a [`BarStream`] that ends when every sender
/// is dropped.
pub fn channel_stream(rx: mpsc::UnboundedReceiver<Bar>) -> BarStream {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|bar| (bar, rx)) }).boxed()
}

/// Provider selection for the binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedKind {
    #[default]
    Kraken,
    Yahoo,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Kraken => "kraken",
            FeedKind::Yahoo => "yahoo",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedKind {
    type Err = SignalGenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kraken" => Ok(FeedKind::Kraken),
            "yahoo" => Ok(FeedKind::Yahoo),
            other => Err(SignalGenError::Config(format!(
                "unknown feed '{other}', expected kraken or yahoo"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_stream_ends_with_senders() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut bars = channel_stream(rx);
        tx.send(Bar::flat("AAPL", 1.0, 1.0, 0.0)).unwrap();
        drop(tx);
        assert_eq!(bars.next().await.unwrap().symbol, "AAPL");
        assert!(bars.next().await.is_none());
    }

    #[test]
    fn feed_kind_parsing() {
        assert_eq!("Yahoo".parse::<FeedKind>().unwrap(), FeedKind::Yahoo);
        assert_eq!("kraken".parse::<FeedKind>().unwrap(), FeedKind::Kraken);
        assert!("ibkr".parse::<FeedKind>().is_err());
    }
}
