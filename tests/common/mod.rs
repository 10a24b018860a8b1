//! Shared test utilities: a scriptable in-memory feed, a recording sink and
//! candle/rule builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use signalgen::config::EngineConfig;
use signalgen::feed::{BarStream, DataFeed, channel_stream};
use signalgen::models::{Bar, Candle, ConditionDefinition, RuleDefinition, Signal, Timeframe};
use signalgen::orchestrator::{FeedOrchestrator, ReconnectPolicy};
use signalgen::rules::MemoryRulesStore;
use signalgen::sink::SignalSink;
use signalgen::{Result, SignalGenError};
use tokio::sync::mpsc;

/// Kraken WebSocket V2 public endpoint URL.
pub const KRAKEN_WS_URL: &str = "wss://ws.kraken.com/v2";

/// Kraken REST endpoint URL.
pub const KRAKEN_REST_URL: &str = "https://api.kraken.com";

/// Minute-aligned epoch second used as the start of test history.
pub const BASE: i64 = 1_700_000_040;

/// Rule id of [`breakout_rule`].
pub const BREAKOUT_RULE_ID: i64 = 7;

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// In-memory [`DataFeed`] whose live streams are driven by the test.
#[derive(Default)]
pub struct MockFeed {
    streams: Mutex<HashMap<String, mpsc::UnboundedSender<Bar>>>,
    history: Mutex<HashMap<String, Vec<Candle>>>,
    failing_connects: AtomicU32,
    refuse_all: AtomicBool,
    pub connects: AtomicU32,
    pub disconnects: AtomicU32,
    pub subscribes: Mutex<Vec<String>>,
    pub unsubscribes: Mutex<Vec<String>>,
}

impl MockFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_history(&self, symbol: &str, candles: Vec<Candle>) {
        self.history.lock().insert(symbol.to_string(), candles);
    }

    /// The next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Every connect attempt fails until reset.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_all.store(refuse, Ordering::SeqCst);
    }

    pub fn has_stream(&self, symbol: &str) -> bool {
        self.streams.lock().contains_key(symbol)
    }

    /// Sends a live bar. Returns `false` when the symbol has no open stream.
    pub fn push(&self, bar: Bar) -> bool {
        let streams = self.streams.lock();
        match streams.get(&bar.symbol) {
            Some(tx) => tx.send(bar).is_ok(),
            None => false,
        }
    }

    /// Ends every live stream as if the connection dropped.
    pub fn drop_connection(&self) {
        self.streams.lock().clear();
    }

    /// Polls until `symbol` has an open live stream.
    pub async fn wait_for_stream(&self, symbol: &str) {
        wait_until(|| self.has_stream(symbol)).await;
    }
}

#[async_trait]
impl DataFeed for MockFeed {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<()> {
        if self.refuse_all.load(Ordering::SeqCst) {
            return Err(SignalGenError::Connection("connection refused".into()));
        }
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(SignalGenError::Connection("scripted connect failure".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, symbol: &str) -> Result<BarStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().insert(symbol.to_string(), tx);
        self.subscribes.lock().push(symbol.to_string());
        Ok(channel_stream(rx))
    }

    async fn unsubscribe(&self, symbol: &str) -> Result<()> {
        self.streams.lock().remove(symbol);
        self.unsubscribes.lock().push(symbol.to_string());
        Ok(())
    }

    async fn fetch_historical(
        &self,
        symbol: &str,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _timeframe: Timeframe,
    ) -> Result<Vec<Candle>> {
        Ok(self.history.lock().get(symbol).cloned().unwrap_or_default())
    }

    async fn disconnect(&self) -> Result<()> {
        self.streams.lock().clear();
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that keeps every signal it sees.
#[derive(Default)]
pub struct RecordingSink {
    pub persisted: Mutex<Vec<Signal>>,
    pub published: Mutex<Vec<Signal>>,
    fail_persist: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_persist(&self, fail: bool) {
        self.fail_persist.store(fail, Ordering::SeqCst);
    }

    pub fn published_count(&self) -> usize {
        self.published.lock().len()
    }
}

#[async_trait]
impl SignalSink for RecordingSink {
    async fn persist(&self, signal: &Signal) -> Result<i64> {
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(SignalGenError::Connection("store unavailable".into()));
        }
        let mut persisted = self.persisted.lock();
        persisted.push(signal.clone());
        Ok(persisted.len() as i64)
    }

    async fn publish(&self, signal: &Signal) -> Result<()> {
        self.published.lock().push(signal.clone());
        Ok(())
    }
}

/// `PRICE > MA5` with a five-minute cooldown.
pub fn breakout_rule() -> RuleDefinition {
    RuleDefinition {
        id: Some(BREAKOUT_RULE_ID),
        name: Some("Breakout".into()),
        kind: Some("BUY".into()),
        logic: Some("AND".into()),
        conditions: Some(vec![ConditionDefinition::new("PRICE", ">", "MA5")]),
        cooldown_sec: Some(300),
        is_system: false,
    }
}

pub fn rules_store() -> Arc<MemoryRulesStore> {
    let store = MemoryRulesStore::with_default_rule();
    store.insert(breakout_rule());
    Arc::new(store)
}

/// Engine config with fast reconnects.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        reconnect: ReconnectPolicy {
            enabled: true,
            base_delay_ms: 100,
            max_delay_ms: 400,
            max_attempts: 3,
        },
        ..EngineConfig::default()
    }
}

pub fn orchestrator(
    feed: &Arc<MockFeed>,
    sink: &Arc<RecordingSink>,
    config: EngineConfig,
) -> FeedOrchestrator {
    FeedOrchestrator::new(feed.clone(), rules_store(), sink.clone(), config)
}

/// `count` one-minute candles from [`BASE`], closing at 100, 101, 102, ...
pub fn rising_history(symbol: &str, count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| {
            let close = 100.0 + i as f64;
            let start_time = BASE + 60 * i as i64;
            Candle {
                symbol: symbol.to_string(),
                open: close - 0.5,
                high: close + 0.5,
                low: close - 1.0,
                close,
                volume: 10.0,
                start_time,
                close_time: start_time + 60,
                is_building: false,
            }
        })
        .collect()
}

/// A flat bar at minute `minute` after [`BASE`].
pub fn bar_at(symbol: &str, minute: i64, price: f64) -> Bar {
    Bar::flat(symbol, price, 10.0, (BASE + 60 * minute) as f64)
}

/// Polls `condition` every 10ms for up to five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
