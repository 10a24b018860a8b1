//! Delayed feed backed by the Yahoo Finance chart API.
//!
//! There is no push channel: each subscribed symbol gets a polling task that
//! asks for recent one-minute bars and forwards those whose minute has fully
//! elapsed. History is served from the same endpoint; timeframes Yahoo does
//! not offer (4h) are rebuilt from hourly bars.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BarStream, DataFeed, channel_stream};
use crate::aggregator::CandleAggregator;
use crate::models::{Bar, Candle, Timeframe};
use crate::{Result, SignalGenError};

/// Default chart API host.
pub const DEFAULT_CHART_URL: &str = "https://query1.finance.yahoo.com";

/// Default delay between polls of a symbol.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Consecutive failed polls after which the stream is ended.
const MAX_POLL_FAILURES: u32 = 3;

/// How far back the first poll looks.
const INITIAL_LOOKBACK_SECS: i64 = 10 * 60;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Decodes a chart API body into bars stamped with their interval start.
/// Rows with a missing price are skipped; a missing volume counts as zero.
///
/// # Errors
///
/// Returns [`SignalGenError::MalformedMessage`] when Yahoo reports an error
/// and [`SignalGenError::Json`] when the body does not match the chart shape.
pub fn parse_chart_response(symbol: &str, body: &str) -> Result<Vec<Bar>> {
    let response: ChartResponse = serde_json::from_str(body)?;
    if let Some(error) = response.chart.error {
        return Err(SignalGenError::MalformedMessage(format!(
            "Yahoo chart error for {symbol}: {} ({})",
            error.description, error.code
        )));
    }
    let Some(result) = response.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let Some(quote) = result.indicators.quote.into_iter().next() else {
        return Ok(Vec::new());
    };

    fn value(series: &[Option<f64>], i: usize) -> Option<f64> {
        series.get(i).copied().flatten()
    }
    let bars = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            Some(Bar::new(
                symbol,
                value(&quote.open, i)?,
                value(&quote.high, i)?,
                value(&quote.low, i)?,
                value(&quote.close, i)?,
                value(&quote.volume, i).unwrap_or(0.0),
                ts as f64,
            ))
        })
        .collect();
    Ok(bars)
}

/// Chart API interval used to build candles of `timeframe`.
fn chart_interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::H1 | Timeframe::H4 => "60m",
        Timeframe::D1 => "1d",
    }
}

/// Buckets provider bars into `timeframe` candles fully inside `[start, end)`.
pub fn bars_to_candles(
    symbol: &str,
    bars: &[Bar],
    timeframe: Timeframe,
    start: i64,
    end: i64,
) -> Vec<Candle> {
    let scratch = CandleAggregator::new(timeframe, usize::MAX);
    for bar in bars {
        if let Err(e) = scratch.add_bar(bar) {
            debug!(symbol, "Skipping chart row: {e}");
        }
    }
    let mut candles = scratch.get_completed_candles(symbol, None);
    if let Some(mut last) = scratch.current_candle(symbol) {
        last.is_building = false;
        candles.push(last);
    }
    candles.retain(|c| c.start_time >= start && c.close_time <= end);
    candles
}

#[derive(Clone)]
struct ChartClient {
    base_url: String,
    http: reqwest::Client,
}

impl ChartClient {
    async fn fetch_bars(&self, symbol: &str, period1: i64, period2: i64, interval: &str) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/v8/finance/chart/{symbol}",
            self.base_url.trim_end_matches('/')
        );
        let query = [
            ("interval", interval.to_string()),
            ("period1", period1.to_string()),
            ("period2", period2.to_string()),
        ];
        let body = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_chart_response(symbol, &body)
    }
}

pub struct YahooFeed {
    client: ChartClient,
    poll_interval: Duration,
    connected: AtomicBool,
    pollers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl YahooFeed {
    /// # Errors
    ///
    /// Returns [`SignalGenError::Http`] if the HTTP client cannot be built.
    pub fn new(chart_url: impl Into<String>, poll_interval: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("Mozilla/5.0 (compatible; signalgen/", env!("CARGO_PKG_VERSION"), ")"))
            .build()?;
        Ok(Self {
            client: ChartClient {
                base_url: chart_url.into(),
                http,
            },
            poll_interval: poll_interval.max(Duration::from_secs(1)),
            connected: AtomicBool::new(false),
            pollers: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl DataFeed for YahooFeed {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %self.client.base_url, "Yahoo chart feed ready");
        Ok(())
    }

    async fn subscribe(&self, symbol: &str) -> Result<BarStream> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SignalGenError::Connection("Yahoo feed is not connected".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(poll_loop(
            self.client.clone(),
            symbol.to_string(),
            self.poll_interval,
            tx,
        ));
        if let Some(previous) = self.pollers.lock().insert(symbol.to_string(), handle) {
            previous.abort();
        }
        info!(symbol, "Polling Yahoo chart API");
        Ok(channel_stream(rx))
    }

    async fn unsubscribe(&self, symbol: &str) -> Result<()> {
        if let Some(handle) = self.pollers.lock().remove(symbol) {
            handle.abort();
            info!(symbol, "Stopped polling");
        }
        Ok(())
    }

    async fn fetch_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> Result<Vec<Candle>> {
        let bars = self
            .client
            .fetch_bars(
                symbol,
                start.timestamp(),
                end.timestamp(),
                chart_interval(timeframe),
            )
            .await?;
        Ok(bars_to_candles(
            symbol,
            &bars,
            timeframe,
            start.timestamp(),
            end.timestamp(),
        ))
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        for (_, handle) in self.pollers.lock().drain() {
            handle.abort();
        }
        info!("Yahoo feed disconnected");
        Ok(())
    }
}

/// Polls one symbol until the receiver goes away or polls keep failing.
async fn poll_loop(
    client: ChartClient,
    symbol: String,
    interval: Duration,
    tx: mpsc::UnboundedSender<Bar>,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut last_emitted: Option<i64> = None;
    let mut failures = 0;

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            return;
        }
        let now = Utc::now().timestamp();
        let from = last_emitted.map_or(now - INITIAL_LOOKBACK_SECS, |t| t + 60);

        match client.fetch_bars(&symbol, from, now, "1m").await {
            Ok(bars) => {
                failures = 0;
                for bar in completed_bars(bars, now, last_emitted) {
                    last_emitted = Some(bar.second());
                    if tx.send(bar).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                failures += 1;
                warn!(symbol = %symbol, failures, "Yahoo poll failed: {e}");
                if failures >= MAX_POLL_FAILURES {
                    warn!(symbol = %symbol, "Giving up on Yahoo polling");
                    return;
                }
            }
        }
    }
}

/// Bars whose minute has closed by `now` and that are newer than `after`,
/// oldest first.
fn completed_bars(mut bars: Vec<Bar>, now: i64, after: Option<i64>) -> Vec<Bar> {
    bars.retain(|bar| {
        let ts = bar.second();
        ts + 60 <= now && after.is_none_or(|last| ts > last)
    });
    bars.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    bars
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "AAPL"},
                "timestamp": [1714570200, 1714570260, 1714570320],
                "indicators": {"quote": [{
                    "open":   [170.0, null, 170.4],
                    "high":   [170.5, 170.6, 170.9],
                    "low":    [169.8, 170.0, 170.3],
                    "close":  [170.2, 170.4, 170.8],
                    "volume": [1200, 900, null]
                }]}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn parses_chart_and_skips_null_prices() {
        let bars = parse_chart_response("AAPL", BODY).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].timestamp, 1_714_570_200.0);
        assert_eq!(bars[1].close, 170.8);
        assert_eq!(bars[1].volume, 0.0);
    }

    #[test]
    fn chart_error_is_reported() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let err = parse_chart_response("ZZZZ", body).unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn completed_bars_skip_open_minute_and_seen() {
        let bars = vec![
            Bar::flat("AAPL", 1.0, 1.0, 180.0),
            Bar::flat("AAPL", 1.0, 1.0, 60.0),
            Bar::flat("AAPL", 1.0, 1.0, 120.0),
        ];
        let out = completed_bars(bars, 200, Some(60));
        let stamps: Vec<f64> = out.iter().map(|b| b.timestamp).collect();
        assert_eq!(stamps, vec![120.0]);
    }

    #[test]
    fn hourly_bars_rebucket_into_four_hours() {
        let bars: Vec<Bar> = (0..8)
            .map(|h| Bar::new("AAPL", 10.0, 10.0 + h as f64, 9.0, 10.0, 5.0, (h * 3_600) as f64))
            .collect();
        let candles = bars_to_candles("AAPL", &bars, Timeframe::H4, 0, 8 * 3_600);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].start_time, 0);
        assert_eq!(candles[0].high, 13.0);
        assert_eq!(candles[0].volume, 20.0);
        assert_eq!(candles[1].start_time, 14_400);
        assert!(!candles[1].is_building);
    }

    #[test]
    fn trailing_partial_candle_is_dropped() {
        let bars: Vec<Bar> = (0..6)
            .map(|h| Bar::flat("AAPL", 10.0, 1.0, (h * 3_600) as f64))
            .collect();
        let candles = bars_to_candles("AAPL", &bars, Timeframe::H4, 0, 6 * 3_600);
        assert_eq!(candles.len(), 1);
    }
}
