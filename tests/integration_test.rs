//! Real API integration tests for the Kraken feed.
//!
//! These tests connect to the live Kraken APIs and require network access.
//! Run with: `cargo test --features integration-tests`

#![cfg(feature = "integration-tests")]

mod common;

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use futures_util::StreamExt;
use signalgen::feed::{DataFeed, KrakenFeed};
use signalgen::models::{Channel, Timeframe};
use signalgen::websocket::{FeedMessage, connect, parse_message, ping, subscribe, unsubscribe};

use common::{KRAKEN_REST_URL, KRAKEN_WS_URL};

#[tokio::test]
async fn test_connect_to_kraken_websocket() {
    let result = connect(KRAKEN_WS_URL).await;
    assert!(result.is_ok(), "Failed to connect to Kraken WebSocket");
}

#[tokio::test]
async fn test_ping_pong() {
    let (mut write, mut read) = connect(KRAKEN_WS_URL).await.expect("Failed to connect");

    ping(&mut write).await.expect("Failed to send ping");

    let timeout = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = read.next().await {
            if let Ok(tungstenite::Message::Text(text)) = msg {
                if let Ok(Some(FeedMessage::Pong)) = parse_message(&text) {
                    return true;
                }
            }
        }
        false
    });

    let received_pong = timeout.await.expect("Timeout waiting for pong");
    assert!(received_pong, "Did not receive pong response");
}

#[tokio::test]
async fn test_subscribe_and_receive_ohlc_snapshot() {
    let (mut write, mut read) = connect(KRAKEN_WS_URL).await.expect("Failed to connect");

    let symbols = vec!["BTC/USD".to_string()];

    subscribe(&mut write, &Channel::Candles, &symbols, Some(1))
        .await
        .expect("Failed to subscribe to ohlc");

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(msg) = read.next().await {
            if let Ok(tungstenite::Message::Text(text)) = msg {
                if let Ok(Some(FeedMessage::Candles { data, .. })) = parse_message(&text) {
                    return data.iter().any(|c| c.symbol == "BTC/USD");
                }
            }
        }
        false
    });

    let received = timeout.await.expect("Timeout waiting for ohlc");
    assert!(received, "Did not receive ohlc message");

    unsubscribe(&mut write, &Channel::Candles, &symbols, Some(1))
        .await
        .expect("Failed to unsubscribe from ohlc");
}

#[tokio::test]
async fn test_fetch_historical_candles() {
    let feed = KrakenFeed::new(KRAKEN_WS_URL, KRAKEN_REST_URL).expect("Failed to build feed");

    let end = Utc::now();
    let start = end - TimeDelta::hours(2);
    let candles = feed
        .fetch_historical("BTC/USD", start, end, Timeframe::M5)
        .await
        .expect("Failed to fetch history");

    assert!(!candles.is_empty(), "Expected recent BTC/USD candles");
    assert!(candles.iter().all(|c| c.validate().is_ok()));
    assert!(candles.iter().all(|c| c.start_time % 300 == 0));
    assert!(candles.windows(2).all(|w| w[0].start_time < w[1].start_time));
}

#[tokio::test]
async fn test_kraken_feed_streams_bars() {
    let feed = KrakenFeed::new(KRAKEN_WS_URL, KRAKEN_REST_URL).expect("Failed to build feed");
    feed.connect().await.expect("Failed to connect");

    let mut bars = feed.subscribe("BTC/USD").await.expect("Failed to subscribe");

    // A bar is emitted when the minute rolls over.
    let bar = tokio::time::timeout(Duration::from_secs(75), bars.next())
        .await
        .expect("Timeout waiting for bar")
        .expect("Stream ended early");
    assert_eq!(bar.symbol, "BTC/USD");
    assert!(bar.validate().is_ok());
    assert_eq!(bar.second() % 60, 0);

    feed.disconnect().await.expect("Failed to disconnect");
}
