//! Shared models for the signal pipeline.
//!
//! Domain types (bars, candles, timeframes, rules, signals) live in their own
//! submodules. The Kraken WebSocket V2 protocol messages used by the live
//! feed (subscription requests, ping/pong, heartbeat, status) are defined
//! here.

pub mod bar;
pub mod candle;
pub mod rule;
pub mod signal;
pub mod timeframe;

pub use bar::Bar;
pub use candle::Candle;
pub use rule::{Condition, ConditionDefinition, Logic, Operand, Operator, Rule, RuleDefinition};
pub use signal::Signal;
pub use timeframe::Timeframe;

use serde::{Deserialize, Serialize};

/// Kraken WebSocket V2 channels used by the live feed.
pub enum Channel {
    /// OHLC candlestick data (wire name: `"ohlc"`).
    Candles,
}

impl Channel {
    /// Returns the wire-format channel name expected by the Kraken API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Candles => "ohlc",
        }
    }
}

/// A `subscribe` request sent to the Kraken WebSocket API.
#[derive(Serialize)]
pub struct SubscribeRequest {
    pub method: String,
    pub params: Params,
}

impl SubscribeRequest {
    /// Builds a subscription for `symbols` on `channel`. `interval` (minutes)
    /// is only meaningful for the OHLC channel.
    pub fn new(channel: &Channel, symbols: &[String], interval: Option<u32>) -> Self {
        Self {
            method: "subscribe".to_string(),
            params: Params::new(channel, symbols, interval),
        }
    }
}

/// An `unsubscribe` request sent to the Kraken WebSocket API.
#[derive(Serialize)]
pub struct UnsubscribeRequest {
    pub method: String,
    pub params: Params,
}

impl UnsubscribeRequest {
    pub fn new(channel: &Channel, symbols: &[String], interval: Option<u32>) -> Self {
        Self {
            method: "unsubscribe".to_string(),
            params: Params::new(channel, symbols, interval),
        }
    }
}

/// Channel and symbol parameters used in subscribe/unsubscribe requests.
#[derive(Serialize)]
pub struct Params {
    pub channel: String,
    pub symbol: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
}

impl Params {
    fn new(channel: &Channel, symbols: &[String], interval: Option<u32>) -> Self {
        Self {
            channel: channel.as_str().to_string(),
            symbol: symbols.to_vec(),
            interval,
        }
    }
}

/// A `ping` request used to test connection liveness.
#[derive(Serialize)]
pub struct PingRequest {
    pub method: String,
}

impl PingRequest {
    pub fn new() -> Self {
        Self {
            method: "ping".to_string(),
        }
    }
}

impl Default for PingRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Server response to a [`PingRequest`].
#[derive(Debug, Deserialize)]
pub struct PongResponse {
    pub method: String,
    pub time_in: String,
    pub time_out: String,
}

/// System status update broadcast on the `status` channel.
#[derive(Debug, Deserialize)]
pub struct StatusUpdateResponse {
    pub channel: String,
    #[serde(rename = "type")]
    pub tpe: String,
    pub data: Vec<StatusData>,
}

/// Detailed system status information.
#[derive(Debug, Deserialize)]
pub struct StatusData {
    pub api_version: String,
    pub connection_id: u64,
    pub system: String,
    pub version: String,
}

/// Acknowledgement of a `subscribe`/`unsubscribe` request.
#[derive(Debug, Deserialize)]
pub struct SubscriptionResponse {
    pub method: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}
