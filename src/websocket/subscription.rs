//! Channel subscription and unsubscription requests.

use futures_util::SinkExt;
use tracing::{debug, info};
use tungstenite::Message;

use super::WsWriter;
use crate::Result;
use crate::models::{Channel, SubscribeRequest, UnsubscribeRequest};

/// Subscribes to a symbol-based channel. `interval` is the candle length in
/// minutes and only applies to the `ohlc` channel.
///
/// # Errors
///
/// Returns a [`SignalGenError`](crate::SignalGenError) if sending the
/// subscription message fails.
pub async fn subscribe(
    write: &mut WsWriter,
    channel: &Channel,
    symbols: &[String],
    interval: Option<u32>,
) -> Result<()> {
    let request = SubscribeRequest::new(channel, symbols, interval);
    let json = serde_json::to_string(&request)?;
    debug!("Sending subscribe request: {}", json);
    write.send(Message::Text(json.into())).await?;
    info!(
        channel = channel.as_str(),
        ?symbols,
        ?interval,
        "Subscribed to channel"
    );

    Ok(())
}

/// Unsubscribes from a symbol-based channel.
///
/// # Errors
///
/// Returns a [`SignalGenError`](crate::SignalGenError) if sending the
/// unsubscribe message fails.
pub async fn unsubscribe(
    write: &mut WsWriter,
    channel: &Channel,
    symbols: &[String],
    interval: Option<u32>,
) -> Result<()> {
    let request = UnsubscribeRequest::new(channel, symbols, interval);
    let json = serde_json::to_string(&request)?;
    write.send(Message::Text(json.into())).await?;
    info!(channel = channel.as_str(), ?symbols, "Unsubscribed from channel");

    Ok(())
}
