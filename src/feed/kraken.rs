//! Kraken feed: live bars from the WebSocket V2 `ohlc` channel and history
//! from the public REST OHLC endpoint.
//!
//! The `ohlc` channel streams the running state of the current one-minute
//! candle. A candle is treated as finished when an update for a later
//! `interval_begin` arrives, and only then is it forwarded as a [`Bar`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tungstenite::Message;

use super::{BarStream, DataFeed, channel_stream};
use crate::models::candle::CandleData;
use crate::models::{Bar, Candle, Channel, Timeframe};
use crate::websocket::{self, FeedMessage, WsReader, WsWriter, parse_message};
use crate::{Result, SignalGenError};

/// Default public WebSocket endpoint.
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://ws.kraken.com/v2";

/// Default public REST endpoint.
pub const DEFAULT_REST_URL: &str = "https://api.kraken.com";

/// Live candles are requested at one minute and re-aggregated locally.
const LIVE_INTERVAL_MINUTES: u32 = 1;

/// Per-symbol delivery state.
struct Route {
    tx: tokio::sync::mpsc::UnboundedSender<Bar>,
    /// Latest state of the candle still in progress.
    running: Option<CandleData>,
}

type Routes = Arc<Mutex<HashMap<String, Route>>>;

pub struct KrakenFeed {
    websocket_url: String,
    rest_url: String,
    http: reqwest::Client,
    writer: Arc<tokio::sync::Mutex<Option<WsWriter>>>,
    routes: Routes,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl KrakenFeed {
    /// # Errors
    ///
    /// Returns [`SignalGenError::Http`] if the HTTP client cannot be built.
    pub fn new(websocket_url: impl Into<String>, rest_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("signalgen/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            websocket_url: websocket_url.into(),
            rest_url: rest_url.into(),
            http,
            writer: Arc::new(tokio::sync::Mutex::new(None)),
            routes: Arc::new(Mutex::new(HashMap::new())),
            reader: Mutex::new(None),
        })
    }

    async fn close_connection(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
        let writer = self.writer.lock().await.take();
        if let Some(mut write) = writer {
            if let Err(e) = write.close().await {
                debug!("Error closing WebSocket: {e}");
            }
        }
        // Dropping the senders ends every live stream.
        self.routes.lock().clear();
    }
}

#[async_trait]
impl DataFeed for KrakenFeed {
    fn name(&self) -> &str {
        "kraken"
    }

    async fn connect(&self) -> Result<()> {
        self.close_connection().await;

        info!(url = %self.websocket_url, "Connecting to WebSocket");
        let (mut write, read) = websocket::connect(&self.websocket_url)
            .await
            .map_err(|e| SignalGenError::Connection(e.to_string()))?;
        websocket::ping(&mut write).await?;
        *self.writer.lock().await = Some(write);

        let handle = tokio::spawn(read_loop(
            read,
            Arc::clone(&self.routes),
            Arc::clone(&self.writer),
        ));
        if let Some(previous) = self.reader.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn subscribe(&self, symbol: &str) -> Result<BarStream> {
        let mut guard = self.writer.lock().await;
        let write = guard
            .as_mut()
            .ok_or_else(|| SignalGenError::Connection("not connected to Kraken".into()))?;

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.routes
            .lock()
            .insert(symbol.to_string(), Route { tx, running: None });

        let symbols = [symbol.to_string()];
        if let Err(e) =
            websocket::subscribe(write, &Channel::Candles, &symbols, Some(LIVE_INTERVAL_MINUTES))
                .await
        {
            self.routes.lock().remove(symbol);
            return Err(e);
        }
        Ok(channel_stream(rx))
    }

    async fn unsubscribe(&self, symbol: &str) -> Result<()> {
        self.routes.lock().remove(symbol);
        let mut guard = self.writer.lock().await;
        if let Some(write) = guard.as_mut() {
            let symbols = [symbol.to_string()];
            websocket::unsubscribe(write, &Channel::Candles, &symbols, Some(LIVE_INTERVAL_MINUTES))
                .await?;
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
        let url = format!("{}/0/public/OHLC", self.rest_url.trim_end_matches('/'));
        let query = [
            ("pair", rest_pair(symbol)),
            ("interval", timeframe.minutes().to_string()),
            ("since", (start.timestamp() - 1).to_string()),
        ];
        debug!(symbol, %timeframe, %start, %end, "Fetching Kraken OHLC history");
        let response: Value = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_ohlc_response(
            symbol,
            &response,
            timeframe,
            start.timestamp(),
            end.timestamp(),
        )
    }

    async fn disconnect(&self) -> Result<()> {
        self.close_connection().await;
        info!("Disconnected from Kraken");
        Ok(())
    }
}

/// Reads frames until the connection ends, then drops every route so the
/// open bar streams terminate.
async fn read_loop(
    mut read: WsReader,
    routes: Routes,
    writer: Arc<tokio::sync::Mutex<Option<WsWriter>>>,
) {
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => match parse_message(&text) {
                Ok(Some(FeedMessage::Candles { snapshot, data })) => {
                    route_candles(&mut routes.lock(), snapshot, data);
                }
                Ok(Some(FeedMessage::Subscription(ack))) if !ack.success => {
                    warn!(method = %ack.method, error = ?ack.error, "Subscription request rejected");
                }
                Ok(Some(FeedMessage::Status(status))) => {
                    for data in status.data {
                        info!(
                            system = %data.system,
                            api_version = %data.api_version,
                            connection_id = data.connection_id,
                            "Kraken status"
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to parse message: {e}"),
            },
            Ok(Message::Close(frame)) => {
                info!(?frame, "WebSocket closed by server");
                break;
            }
            Ok(_) => {} // Binary/Ping/Pong frames
            Err(e) => {
                warn!("WebSocket error: {e}");
                break;
            }
        }
    }

    warn!("WebSocket stream ended");
    *writer.lock().await = None;
    routes.lock().clear();
}

/// Tracks the running candle per symbol and forwards finished ones as bars.
fn route_candles(routes: &mut HashMap<String, Route>, snapshot: bool, data: Vec<CandleData>) {
    let mut closed = Vec::new();

    for candle in data {
        let Some(route) = routes.get_mut(&candle.symbol) else {
            continue;
        };
        let Some(begin) = parse_time(&candle.interval_begin) else {
            warn!(symbol = %candle.symbol, interval_begin = %candle.interval_begin, "Unparseable candle start");
            continue;
        };
        let running_begin = route
            .running
            .as_ref()
            .and_then(|running| parse_time(&running.interval_begin));

        match running_begin {
            Some(current) if begin < current => {}
            Some(current) if begin > current && !snapshot => {
                if let Some(finished) = route.running.replace(candle) {
                    let bar = Bar::new(
                        finished.symbol.clone(),
                        finished.open,
                        finished.high,
                        finished.low,
                        finished.close,
                        finished.volume,
                        current as f64,
                    );
                    if route.tx.send(bar).is_err() {
                        closed.push(finished.symbol);
                    }
                }
            }
            _ => route.running = Some(candle),
        }
    }

    for symbol in closed {
        debug!(%symbol, "Bar receiver dropped, removing route");
        routes.remove(&symbol);
    }
}

fn parse_time(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.timestamp())
}

/// REST pair name for a WebSocket symbol (`BTC/USD` → `BTCUSD`).
fn rest_pair(symbol: &str) -> String {
    symbol.replace('/', "")
}

/// Parses a Kraken REST `OHLC` response into candles inside `[start, end)`.
///
/// Each row is `[time, open, high, low, close, vwap, volume, count]` with
/// prices encoded as strings. The newest row is the still-open candle and
/// falls outside `end` when `end` is the present.
///
/// # Errors
///
/// Returns [`SignalGenError::MalformedMessage`] when Kraken reports an error
/// or the payload has no candle array.
pub fn parse_ohlc_response(
    symbol: &str,
    response: &Value,
    timeframe: Timeframe,
    start: i64,
    end: i64,
) -> Result<Vec<Candle>> {
    if let Some(errors) = response.get("error").and_then(Value::as_array) {
        if !errors.is_empty() {
            return Err(SignalGenError::MalformedMessage(format!(
                "Kraken OHLC error for {symbol}: {errors:?}"
            )));
        }
    }
    let rows = response
        .get("result")
        .and_then(Value::as_object)
        .and_then(|result| {
            result
                .iter()
                .find(|(key, _)| key.as_str() != "last")
                .and_then(|(_, rows)| rows.as_array())
        })
        .ok_or_else(|| {
            SignalGenError::MalformedMessage(format!("Kraken OHLC response for {symbol} has no data"))
        })?;

    let seconds = timeframe.seconds();
    let mut candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| parse_ohlc_row(symbol, row, seconds))
        .filter(|c| c.start_time >= start && c.close_time <= end)
        .collect();
    candles.sort_by_key(|c| c.start_time);
    Ok(candles)
}

fn parse_ohlc_row(symbol: &str, row: &Value, seconds: i64) -> Option<Candle> {
    let row = row.as_array()?;
    let number = |i: usize| {
        row.get(i).and_then(|v| {
            v.as_str()
                .and_then(|s| s.parse::<f64>().ok())
                .or_else(|| v.as_f64())
        })
    };
    let start_time = row.first()?.as_i64()?;
    Some(Candle {
        symbol: symbol.to_string(),
        open: number(1)?,
        high: number(2)?,
        low: number(3)?,
        close: number(4)?,
        volume: number(6)?,
        start_time,
        close_time: start_time + seconds,
        is_building: false,
    })
}
