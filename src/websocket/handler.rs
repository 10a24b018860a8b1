//! Incoming WebSocket message parsing.
//!
//! Raw text frames are routed on their `method` (RPC acknowledgements) or
//! `channel` (streamed data) field and decoded into a [`FeedMessage`].
//! Messages for channels the feed never subscribes to are ignored.

use tracing::debug;

use crate::models::candle::{CandleData, CandleUpdateResponse};
use crate::models::{PongResponse, StatusUpdateResponse, SubscriptionResponse};
use crate::{Result, SignalGenError};

/// A decoded message from the Kraken WebSocket.
#[derive(Debug)]
pub enum FeedMessage {
    /// OHLC state for one or more symbols. `snapshot` is set for the initial
    /// message sent right after subscribing.
    Candles {
        snapshot: bool,
        data: Vec<CandleData>,
    },
    Heartbeat,
    Status(StatusUpdateResponse),
    Pong,
    Subscription(SubscriptionResponse),
}

/// Parses one text frame.
///
/// Returns `Ok(None)` for well-formed messages the feed does not act on.
///
/// # Errors
///
/// Returns [`SignalGenError::MalformedMessage`] if the frame is not JSON, and
/// [`SignalGenError::Json`] if a routed message does not match its model.
pub fn parse_message(text: &str) -> Result<Option<FeedMessage>> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| SignalGenError::MalformedMessage(e.to_string()))?;

    // Extract routing fields as owned strings to avoid borrow conflicts
    let method = value
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let channel = value
        .get("channel")
        .and_then(|c| c.as_str())
        .map(String::from);
    let msg_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(String::from);

    if let Some(method) = method {
        return match method.as_str() {
            "pong" => {
                let response: PongResponse = serde_json::from_value(value)?;
                debug!(time_in = response.time_in, time_out = response.time_out, "Received pong");
                Ok(Some(FeedMessage::Pong))
            }
            "subscribe" | "unsubscribe" => {
                Ok(Some(FeedMessage::Subscription(serde_json::from_value(value)?)))
            }
            _ => Ok(None),
        };
    }

    match channel.as_deref() {
        Some("heartbeat") => Ok(Some(FeedMessage::Heartbeat)),
        Some("status") => {
            let response: StatusUpdateResponse = serde_json::from_value(value)?;
            Ok(Some(FeedMessage::Status(response)))
        }
        Some("ohlc") => {
            let response: CandleUpdateResponse = serde_json::from_value(value)?;
            Ok(Some(FeedMessage::Candles {
                snapshot: msg_type.as_deref() == Some("snapshot"),
                data: response.data,
            }))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ohlc_update() {
        let text = r#"{
            "channel": "ohlc",
            "type": "update",
            "timestamp": "2024-05-01T10:00:05.000000Z",
            "data": [{
                "symbol": "BTC/USD",
                "open": 60000.0, "high": 60010.5, "low": 59990.1, "close": 60005.0,
                "vwap": 60001.2, "trades": 12, "volume": 1.25,
                "interval_begin": "2024-05-01T10:00:00.000000000Z",
                "interval": 1,
                "timestamp": "2024-05-01T10:01:00.000000Z"
            }]
        }"#;
        match parse_message(text).unwrap() {
            Some(FeedMessage::Candles { snapshot, data }) => {
                assert!(!snapshot);
                assert_eq!(data.len(), 1);
                assert_eq!(data[0].symbol, "BTC/USD");
                assert_eq!(data[0].interval, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_subscription_failure() {
        let text = r#"{"method":"subscribe","success":false,"error":"Currency pair not supported FOO/BAR","time_in":"x","time_out":"y"}"#;
        match parse_message(text).unwrap() {
            Some(FeedMessage::Subscription(ack)) => {
                assert!(!ack.success);
                assert!(ack.error.unwrap().contains("FOO/BAR"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn heartbeat_and_unknown_channels() {
        assert!(matches!(
            parse_message(r#"{"channel":"heartbeat"}"#).unwrap(),
            Some(FeedMessage::Heartbeat)
        ));
        assert!(parse_message(r#"{"channel":"book","type":"update","data":[]}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_message("not json"),
            Err(SignalGenError::MalformedMessage(_))
        ));
    }
}
