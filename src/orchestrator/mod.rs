//! Pipeline orchestration.
//!
//! [`FeedOrchestrator`] owns the engine lifecycle and wires a [`DataFeed`]
//! through the aggregator, indicator engine, rule evaluator and cooldown gate
//! to a [`SignalSink`].
//!
//! Every subscribed symbol gets its own task: it backfills history, then
//! drains the live [`BarStream`](crate::feed::BarStream) into
//! [`FeedOrchestrator::on_bar`]. Bars for one symbol are processed strictly
//! in order through a per-symbol lane; different symbols run concurrently.
//! When a live stream ends while the engine is running, a supervisor task
//! reconnects with exponential backoff and resubscribes every symbol.

pub mod reconnect;
pub mod status;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::CandleAggregator;
use crate::config::{EngineConfig, MAX_SYMBOLS};
use crate::cooldown::CooldownGate;
use crate::feed::DataFeed;
use crate::indicators::IndicatorEngine;
use crate::models::{Bar, Rule, Signal, Timeframe};
use crate::rules::{RuleEvaluator, RulesStore};
use crate::sink::SignalSink;
use crate::{Result, SignalGenError};

pub use reconnect::ReconnectPolicy;
pub use status::{ActiveRuleSummary, EngineState, StatusReport, StatusReporter, SymbolReadiness};

/// Notifications from symbol tasks to the supervisor.
#[derive(Debug)]
enum FeedEvent {
    StreamClosed { symbol: String, generation: u64 },
}

struct Subscription {
    task: JoinHandle<()>,
    /// Distinguishes the current task from ones replaced by a resubscribe.
    generation: u64,
    /// Live stream ended while nobody was supervising it.
    ended: bool,
}

struct Shared {
    state: EngineState,
    active_rule: Option<Rule>,
    subscriptions: HashMap<String, Subscription>,
    reconnect_enabled: bool,
    reconnect_attempts: u32,
    last_error: Option<String>,
    generation: u64,
    events: Option<mpsc::UnboundedSender<FeedEvent>>,
    supervisor: Option<JoinHandle<()>>,
}

struct Inner {
    feed: Arc<dyn DataFeed>,
    rules: Arc<dyn RulesStore>,
    sink: Arc<dyn SignalSink>,
    config: EngineConfig,
    aggregator: CandleAggregator,
    indicators: IndicatorEngine,
    evaluator: RuleEvaluator,
    cooldown: CooldownGate,
    shared: Mutex<Shared>,
    /// One in-flight bar per symbol.
    lanes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    shutdown: watch::Sender<bool>,
}

/// Drives the signal pipeline for a set of symbols.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct FeedOrchestrator {
    inner: Arc<Inner>,
}

impl FeedOrchestrator {
    pub fn new(
        feed: Arc<dyn DataFeed>,
        rules: Arc<dyn RulesStore>,
        sink: Arc<dyn SignalSink>,
        config: EngineConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let inner = Inner {
            aggregator: CandleAggregator::new(config.timeframe, config.max_candles),
            indicators: IndicatorEngine::new(config.indicators.clone(), config.history_capacity),
            evaluator: RuleEvaluator::new(),
            cooldown: CooldownGate::new(),
            shared: Mutex::new(Shared {
                state: EngineState::Disconnected,
                active_rule: None,
                subscriptions: HashMap::new(),
                reconnect_enabled: config.reconnect.enabled,
                reconnect_attempts: 0,
                last_error: None,
                generation: 0,
                events: None,
                supervisor: None,
            }),
            lanes: Mutex::new(HashMap::new()),
            shutdown,
            feed,
            rules,
            sink,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn state(&self) -> EngineState {
        self.inner.shared.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn timeframe(&self) -> Timeframe {
        self.inner.aggregator.timeframe()
    }

    pub fn active_rule(&self) -> Option<Rule> {
        self.inner.shared.lock().active_rule.clone()
    }

    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.inner.shared.lock().subscriptions.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn aggregator(&self) -> &CandleAggregator {
        &self.inner.aggregator
    }

    pub fn indicators(&self) -> &IndicatorEngine {
        &self.inner.indicators
    }

    /// Connects to the feed.
    ///
    /// A no-op when already connected.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Conflict`] if a connection attempt is already
    /// in flight, or the feed's error if the connection fails.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                EngineState::Disconnected | EngineState::Failed => {
                    shared.state = EngineState::Connecting;
                }
                EngineState::ConnectedIdle | EngineState::Running => return Ok(()),
                EngineState::Connecting | EngineState::Reconnecting => {
                    return Err(SignalGenError::Conflict("connection already in progress".into()));
                }
                EngineState::Stopping => {
                    return Err(SignalGenError::InvalidState("engine is stopping".into()));
                }
            }
        }

        let feed = self.inner.feed.name().to_string();
        match self.inner.feed.connect().await {
            Ok(()) => {
                let mut shared = self.inner.shared.lock();
                shared.state = EngineState::ConnectedIdle;
                shared.last_error = None;
                shared.reconnect_attempts = 0;
                shared.reconnect_enabled = self.inner.config.reconnect.enabled;
                let symbols: Vec<String> = shared.subscriptions.keys().cloned().collect();
                for symbol in &symbols {
                    spawn_symbol(&self.inner, &mut shared, symbol);
                }
                info!(feed = %feed, "Connected to market data feed");
                Ok(())
            }
            Err(e) => {
                let mut shared = self.inner.shared.lock();
                shared.state = EngineState::Disconnected;
                shared.last_error = Some(e.to_string());
                error!(feed = %feed, "Failed to connect: {e}");
                Err(e)
            }
        }
    }

    /// Loads, validates and activates rule `rule_id`.
    ///
    /// # Errors
    ///
    /// - [`SignalGenError::InvalidState`] while the engine is running
    /// - [`SignalGenError::RuleNotFound`] if the store has no such rule
    /// - [`SignalGenError::Validation`] if the rule is malformed
    pub fn set_active_rule(&self, rule_id: i64) -> Result<()> {
        if self.is_running() {
            return Err(SignalGenError::InvalidState(
                "cannot change the active rule while running".into(),
            ));
        }
        let definition = self
            .inner
            .rules
            .get_rule(rule_id)
            .ok_or(SignalGenError::RuleNotFound(rule_id))?;
        let rule = self.inner.evaluator.validate(&definition)?;

        info!(
            rule_id = rule.id,
            name = %rule.name,
            conditions = rule.conditions.len(),
            cooldown_sec = rule.cooldown_sec,
            "Active rule set"
        );
        self.inner.shared.lock().active_rule = Some(rule);
        Ok(())
    }

    /// Switches the candle timeframe, discarding all candle and indicator
    /// history.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::InvalidState`] while running or while any
    /// symbol is subscribed.
    pub fn change_timeframe(&self, timeframe: Timeframe) -> Result<()> {
        let shared = self.inner.shared.lock();
        if shared.state == EngineState::Running {
            return Err(SignalGenError::InvalidState(
                "cannot change timeframe while running".into(),
            ));
        }
        if !shared.subscriptions.is_empty() {
            return Err(SignalGenError::InvalidState(
                "cannot change timeframe with active subscriptions".into(),
            ));
        }
        self.inner.aggregator.change_timeframe(timeframe);
        self.inner.indicators.clear_all();
        info!(%timeframe, "Timeframe changed");
        Ok(())
    }

    /// Starts rule evaluation, connecting first if needed.
    ///
    /// # Errors
    ///
    /// - [`SignalGenError::Conflict`] if already running
    /// - [`SignalGenError::InvalidState`] if no rule is active
    /// - the feed's error if connecting fails
    pub async fn start(&self) -> Result<()> {
        {
            let shared = self.inner.shared.lock();
            if shared.state == EngineState::Running {
                return Err(SignalGenError::Conflict("engine is already running".into()));
            }
            if shared.active_rule.is_none() {
                return Err(SignalGenError::InvalidState("no active rule".into()));
            }
        }
        if !self.is_connected() {
            self.connect().await?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                EngineState::ConnectedIdle => {}
                EngineState::Running => {
                    return Err(SignalGenError::Conflict("engine is already running".into()));
                }
                other => {
                    return Err(SignalGenError::InvalidState(format!("cannot start while {other}")));
                }
            }
            let ended: Vec<String> = shared
                .subscriptions
                .iter()
                .filter(|(_, subscription)| subscription.ended)
                .map(|(symbol, _)| symbol.clone())
                .collect();
            for symbol in &ended {
                spawn_symbol(&self.inner, &mut shared, symbol);
            }
            if !ended.is_empty() {
                info!(symbols = ?ended, "Reopened streams that ended while idle");
            }

            self.inner.shutdown.send_replace(false);
            shared.state = EngineState::Running;
            shared.reconnect_enabled = self.inner.config.reconnect.enabled;
            shared.reconnect_attempts = 0;
            shared.events = Some(events_tx);
            let supervisor = tokio::spawn(supervise(
                Arc::clone(&self.inner),
                events_rx,
                self.inner.shutdown.subscribe(),
            ));
            if let Some(previous) = shared.supervisor.replace(supervisor) {
                previous.abort();
            }
        }

        info!(feed = self.inner.feed.name(), "Engine started");
        Ok(())
    }

    /// Activates `rule_id`, starts the engine and subscribes `symbols`.
    ///
    /// Any failure after the engine left the idle state stops it again.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Conflict`] if already running, otherwise the
    /// first error from [`set_active_rule`](Self::set_active_rule),
    /// [`start`](Self::start) or [`subscribe`](Self::subscribe).
    pub async fn start_with(&self, symbols: &[String], rule_id: i64) -> Result<()> {
        if self.is_running() {
            return Err(SignalGenError::Conflict("engine is already running".into()));
        }
        let result = async {
            self.set_active_rule(rule_id)?;
            self.start().await?;
            self.subscribe(symbols).await
        }
        .await;

        if let Err(e) = result {
            warn!("Start failed, stopping engine: {e}");
            self.stop().await?;
            return Err(e);
        }
        Ok(())
    }

    /// Stops the engine: cancels any reconnection wait, unsubscribes every
    /// symbol, clears cooldowns and disconnects.
    ///
    /// Calling it on a stopped engine is a no-op.
    ///
    /// # Errors
    ///
    /// Never fails today; feed errors during shutdown are logged.
    pub async fn stop(&self) -> Result<()> {
        let (symbols, supervisor) = {
            let mut shared = self.inner.shared.lock();
            if matches!(shared.state, EngineState::Disconnected | EngineState::Stopping)
                && shared.subscriptions.is_empty()
            {
                return Ok(());
            }
            shared.state = EngineState::Stopping;
            shared.events = None;
            let symbols: Vec<String> = shared.subscriptions.keys().cloned().collect();
            (symbols, shared.supervisor.take())
        };

        self.inner.shutdown.send_replace(true);
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }

        self.inner.remove_symbols(&symbols).await;
        self.inner.cooldown.clear_all();
        if let Err(e) = self.inner.feed.disconnect().await {
            warn!("Error while disconnecting feed: {e}");
        }

        {
            let mut shared = self.inner.shared.lock();
            shared.state = EngineState::Disconnected;
            shared.reconnect_attempts = 0;
        }
        info!("Engine stopped");
        Ok(())
    }

    /// Subscribes `symbols`, backfilling each before live bars flow.
    ///
    /// Symbols already subscribed are skipped.
    ///
    /// # Errors
    ///
    /// - [`SignalGenError::Validation`] for an empty symbol
    /// - [`SignalGenError::Connection`] when not connected
    /// - [`SignalGenError::InvalidState`] during reconnection
    /// - [`SignalGenError::CapacityExceeded`] if the total would exceed the
    ///   configured maximum; nothing is subscribed in that case
    pub async fn subscribe(&self, symbols: &[String]) -> Result<()> {
        let mut requested: Vec<String> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let symbol = symbol.trim();
            if symbol.is_empty() {
                return Err(SignalGenError::Validation("symbol must not be empty".into()));
            }
            if !requested.iter().any(|s| s == symbol) {
                requested.push(symbol.to_string());
            }
        }

        let added = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                EngineState::ConnectedIdle | EngineState::Running => {}
                EngineState::Reconnecting => {
                    return Err(SignalGenError::InvalidState("reconnection in progress".into()));
                }
                _ => return Err(SignalGenError::Connection("not connected".into())),
            }

            let added: Vec<String> = requested
                .into_iter()
                .filter(|s| !shared.subscriptions.contains_key(s))
                .collect();
            let total = shared.subscriptions.len() + added.len();
            let max = self.inner.config.max_symbols.min(MAX_SYMBOLS);
            if total > max {
                return Err(SignalGenError::CapacityExceeded {
                    requested: total,
                    max,
                });
            }
            for symbol in &added {
                spawn_symbol(&self.inner, &mut shared, symbol);
            }
            added
        };

        if !added.is_empty() {
            info!(symbols = ?added, "Subscribed");
        }
        Ok(())
    }

    /// Unsubscribes `symbols` and drops their candle, indicator and cooldown
    /// state. Unknown symbols are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::InvalidState`] during reconnection.
    pub async fn unsubscribe(&self, symbols: &[String]) -> Result<()> {
        if self.state() == EngineState::Reconnecting {
            return Err(SignalGenError::InvalidState("reconnection in progress".into()));
        }
        let removed = self.inner.remove_symbols(symbols).await;
        if !removed.is_empty() {
            info!(symbols = ?removed, "Unsubscribed");
        }
        Ok(())
    }

    /// Feeds one bar through the pipeline.
    ///
    /// Returns the emitted signal, if any. Bars for unsubscribed symbols are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SignalGenError::Validation`] for a malformed bar. Rule
    /// evaluation and sink failures are logged, not returned.
    pub async fn on_bar(&self, bar: Bar) -> Result<Option<Signal>> {
        self.inner.on_bar(bar).await
    }
}

impl StatusReporter for FeedOrchestrator {
    fn status(&self) -> StatusReport {
        let (mut report, symbols) = {
            let shared = self.inner.shared.lock();
            let mut symbols: Vec<String> = shared.subscriptions.keys().cloned().collect();
            symbols.sort();
            let report = StatusReport {
                state: shared.state,
                running: shared.state == EngineState::Running,
                connected: shared.state.is_connected(),
                active_symbols: symbols.clone(),
                active_rule: shared.active_rule.as_ref().map(|rule| ActiveRuleSummary {
                    id: rule.id,
                    name: rule.name.clone(),
                    cooldown_sec: rule.cooldown_sec,
                }),
                reconnect_enabled: shared.reconnect_enabled,
                reconnect_attempts: shared.reconnect_attempts,
                timeframe: self.inner.aggregator.timeframe(),
                readiness: BTreeMap::new(),
                last_error: shared.last_error.clone(),
            };
            (report, symbols)
        };

        let required = self.inner.indicators.required_history();
        for symbol in symbols {
            let candles = self.inner.indicators.history_len(&symbol);
            report.readiness.insert(
                symbol,
                SymbolReadiness {
                    ready: candles >= required,
                    candles,
                    required,
                },
            );
        }
        report
    }
}

impl Inner {
    async fn on_bar(&self, bar: Bar) -> Result<Option<Signal>> {
        let lane = self.lanes.lock().get(&bar.symbol).cloned();
        let Some(lane) = lane else {
            debug!(symbol = %bar.symbol, "Bar for unsubscribed symbol ignored");
            return Ok(None);
        };
        let _pass = lane.lock().await;

        let Some(candle) = self.aggregator.add_bar(&bar)? else {
            return Ok(None);
        };
        let symbol = bar.symbol.as_str();
        let snapshot = self.indicators.update(symbol, &candle);
        debug!(symbol, close = candle.close, start = candle.start_time, "Candle closed");

        let rule = {
            let shared = self.shared.lock();
            if shared.state != EngineState::Running {
                return Ok(None);
            }
            match &shared.active_rule {
                Some(rule) => rule.clone(),
                None => return Ok(None),
            }
        };
        if !self.indicators.is_ready(symbol) {
            debug!(
                symbol,
                candles = self.indicators.history_len(symbol),
                required = self.indicators.required_history(),
                "Warming up"
            );
            return Ok(None);
        }

        let fired = match self.evaluator.evaluate(&rule, &snapshot) {
            Ok(fired) => fired,
            Err(e) => {
                debug!(symbol, rule_id = rule.id, "Rule not evaluated: {e}");
                return Ok(None);
            }
        };
        if !fired {
            return Ok(None);
        }

        let now = bar.second();
        let timestamp = DateTime::from_timestamp(now, 0).ok_or_else(|| {
            SignalGenError::Validation(format!("{symbol}: bar timestamp {now} is out of range"))
        })?;
        if !self.cooldown.can_fire(symbol, now) {
            debug!(
                symbol,
                remaining_sec = self.cooldown.remaining(symbol, now),
                "Signal suppressed by cooldown"
            );
            return Ok(None);
        }
        self.cooldown.start_cooldown(symbol, now, rule.cooldown_sec);

        let signal = Signal {
            symbol: symbol.to_string(),
            signal_type: rule.kind.clone(),
            price: snapshot.current("PRICE").unwrap_or(candle.close),
            rule_id: rule.id,
            timestamp,
            indicators: snapshot,
        };

        match self.sink.persist(&signal).await {
            Ok(id) => info!(id, symbol, rule_id = rule.id, price = signal.price, "Signal persisted"),
            Err(e) => error!(symbol, "Failed to persist signal: {e}"),
        }
        if let Err(e) = self.sink.publish(&signal).await {
            error!(symbol, "Failed to publish signal: {e}");
        }
        Ok(Some(signal))
    }

    /// Loads recent candles for `symbol` into the aggregator and indicators.
    async fn backfill(&self, symbol: &str) {
        let timeframe = self.aggregator.timeframe();
        let candles = self.config.backfill_candles;
        if candles == 0 {
            return;
        }
        let span = timeframe.seconds().saturating_mul(candles as i64);
        let end = Utc::now();
        let start = end - TimeDelta::try_seconds(span).unwrap_or(TimeDelta::zero());

        let history = match self
            .feed
            .fetch_historical(symbol, start, end, timeframe)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                warn!(symbol, "Backfill failed, warming up from live data: {e}");
                return;
            }
        };

        let Some(lane) = self.lanes.lock().get(symbol).cloned() else {
            return;
        };
        let _pass = lane.lock().await;
        let loaded = self.aggregator.load_history(symbol, &history);
        if loaded > 0 {
            let accepted = self.aggregator.get_completed_candles(symbol, Some(loaded));
            self.indicators.load_history(symbol, &accepted);
        }
        info!(
            symbol,
            fetched = history.len(),
            loaded,
            ready = self.indicators.is_ready(symbol),
            "Backfill complete"
        );
    }

    /// Removes subscriptions and all per-symbol state. Returns the symbols
    /// that were subscribed.
    async fn remove_symbols(&self, symbols: &[String]) -> Vec<String> {
        let removed: Vec<String> = {
            let mut shared = self.shared.lock();
            symbols
                .iter()
                .filter_map(|symbol| {
                    shared.subscriptions.remove(symbol).map(|subscription| {
                        subscription.task.abort();
                        symbol.clone()
                    })
                })
                .collect()
        };

        for symbol in &removed {
            if let Err(e) = self.feed.unsubscribe(symbol).await {
                warn!(symbol = %symbol, "Feed unsubscribe failed: {e}");
            }
            self.lanes.lock().remove(symbol);
            self.aggregator.clear_symbol(symbol);
            self.indicators.clear_symbol(symbol);
            self.cooldown.clear(symbol);
        }
        removed
    }
}

/// Resets state for `symbol` and spawns its backfill-then-stream task.
///
/// Cooldowns are left alone so a resubscribe cannot re-fire early.
fn spawn_symbol(inner: &Arc<Inner>, shared: &mut Shared, symbol: &str) {
    inner.aggregator.clear_symbol(symbol);
    inner.aggregator.init_symbol(symbol);
    inner.indicators.clear_symbol(symbol);
    inner
        .lanes
        .lock()
        .entry(symbol.to_string())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));

    shared.generation += 1;
    let generation = shared.generation;
    let task = tokio::spawn(run_symbol(Arc::clone(inner), symbol.to_string(), generation));
    if let Some(previous) = shared
        .subscriptions
        .insert(
            symbol.to_string(),
            Subscription {
                task,
                generation,
                ended: false,
            },
        )
    {
        previous.task.abort();
    }
}

async fn run_symbol(inner: Arc<Inner>, symbol: String, generation: u64) {
    inner.backfill(&symbol).await;

    match inner.feed.subscribe(&symbol).await {
        Ok(mut bars) => {
            info!(symbol = %symbol, "Live stream open");
            while let Some(bar) = bars.next().await {
                if let Err(e) = inner.on_bar(bar).await {
                    warn!(symbol = %symbol, "Bar rejected: {e}");
                }
            }
            warn!(symbol = %symbol, "Live stream ended");
        }
        Err(e) => error!(symbol = %symbol, "Live subscribe failed: {e}"),
    }

    let mut shared = inner.shared.lock();
    match shared.events.clone() {
        Some(events) => {
            let _ = events.send(FeedEvent::StreamClosed { symbol, generation });
        }
        None => {
            if let Some(subscription) = shared
                .subscriptions
                .get_mut(&symbol)
                .filter(|s| s.generation == generation)
            {
                subscription.ended = true;
            }
        }
    }
}

async fn supervise(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<FeedEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(FeedEvent::StreamClosed { symbol, generation }) => {
                    handle_stream_closed(&inner, &symbol, generation, &mut shutdown).await;
                }
                None => return,
            },
            () = stopped(&mut shutdown) => return,
        }
    }
}

/// Resolves once `stop()` has been signalled.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

async fn handle_stream_closed(
    inner: &Arc<Inner>,
    symbol: &str,
    generation: u64,
    shutdown: &mut watch::Receiver<bool>,
) {
    {
        let mut shared = inner.shared.lock();
        let current = shared.subscriptions.get(symbol).map(|s| s.generation);
        if current != Some(generation) || shared.state != EngineState::Running {
            debug!(symbol, generation, "Stale stream-closed event ignored");
            return;
        }
        if !shared.reconnect_enabled {
            shared.state = EngineState::Failed;
            shared.last_error = Some(format!("live stream for {symbol} ended"));
            error!(symbol, "Feed connection lost and reconnection is disabled");
            return;
        }
        shared.state = EngineState::Reconnecting;
        shared.reconnect_attempts = 0;
    }
    warn!(symbol, "Feed connection lost, reconnecting");

    let policy = inner.config.reconnect;
    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay(attempt);
        {
            let mut shared = inner.shared.lock();
            if shared.state != EngineState::Reconnecting {
                return;
            }
            shared.reconnect_attempts = attempt;
        }
        info!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = stopped(shutdown) => {
                info!("Reconnection cancelled");
                return;
            }
        }

        match inner.feed.connect().await {
            Ok(()) => {
                let mut shared = inner.shared.lock();
                if shared.state != EngineState::Reconnecting {
                    return;
                }
                shared.state = EngineState::Running;
                shared.reconnect_attempts = 0;
                shared.last_error = None;
                let symbols: Vec<String> = shared.subscriptions.keys().cloned().collect();
                for symbol in &symbols {
                    spawn_symbol(inner, &mut shared, symbol);
                }
                info!(attempt, symbols = ?symbols, "Reconnected and resubscribed");
                return;
            }
            Err(e) => {
                warn!(attempt, "Reconnect attempt failed: {e}");
                inner.shared.lock().last_error = Some(e.to_string());
            }
        }
    }

    let mut shared = inner.shared.lock();
    if shared.state == EngineState::Reconnecting {
        shared.state = EngineState::Failed;
        shared.reconnect_enabled = false;
        shared.last_error = Some(format!(
            "reconnection failed after {} attempts",
            policy.max_attempts
        ));
        error!(attempts = policy.max_attempts, "Reconnection exhausted");
    }
}
