use std::sync::Arc;
use std::time::Duration;

use signalgen::SignalGenError;
use signalgen::config::{EngineConfig, fetch_config};
use signalgen::feed::{DataFeed, FeedKind, KrakenFeed, YahooFeed};
use signalgen::orchestrator::{FeedOrchestrator, StatusReporter};
use signalgen::rules::MemoryRulesStore;
use signalgen::sink::TracingSink;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), SignalGenError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tungstenite=warn,reqwest=warn")),
        )
        .init();

    let app_config = fetch_config()?;

    let engine_config = match &app_config.engine_config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let rules = match &app_config.rules {
        Some(path) => MemoryRulesStore::load(path)?,
        None => MemoryRulesStore::with_default_rule(),
    };

    let feed: Arc<dyn DataFeed> = match app_config.feed {
        FeedKind::Kraken => Arc::new(KrakenFeed::new(
            &app_config.kraken.websocket_url,
            &app_config.kraken.rest_url,
        )?),
        FeedKind::Yahoo => Arc::new(YahooFeed::new(
            &app_config.yahoo.chart_url,
            engine_config.poll_interval(),
        )?),
    };

    info!(
        feed = %app_config.feed,
        symbols = ?app_config.symbols,
        rule_id = app_config.rule_id,
        timeframe = %engine_config.timeframe,
        "Starting signal engine"
    );

    let orchestrator = FeedOrchestrator::new(
        feed,
        Arc::new(rules),
        Arc::new(TracingSink::new()),
        engine_config,
    );
    orchestrator
        .start_with(&app_config.symbols, app_config.rule_id)
        .await?;

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let status = orchestrator.status();
                match serde_json::to_string(&status) {
                    Ok(json) => info!(status = %json, "Engine status"),
                    Err(e) => warn!("Failed to serialize status: {e}"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for shutdown signal: {e}");
                }
                break;
            }
        }
    }

    info!("Shutting down");
    orchestrator.stop().await
}
