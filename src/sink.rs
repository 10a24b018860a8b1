//! Where emitted signals go.
//!
//! The orchestrator hands every signal to a [`SignalSink`] twice: once to
//! persist it and once to publish it to whoever is listening. Either step may
//! fail without affecting the other.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::Result;
use crate::models::Signal;

/// Persistence and broadcast collaborator for emitted signals.
#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Stores the signal and returns its assigned id.
    async fn persist(&self, signal: &Signal) -> Result<i64>;

    /// Pushes the signal to live consumers.
    async fn publish(&self, signal: &Signal) -> Result<()>;
}

/// Logs signals and numbers them sequentially. Used by the binary when no
/// external store is attached.
#[derive(Debug, Default)]
pub struct TracingSink {
    next_id: AtomicI64,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalSink for TracingSink {
    async fn persist(&self, signal: &Signal) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(id, symbol = %signal.symbol, rule_id = signal.rule_id, "Signal recorded");
        Ok(id)
    }

    async fn publish(&self, signal: &Signal) -> Result<()> {
        info!(
            symbol = %signal.symbol,
            signal_type = %signal.signal_type,
            price = signal.price,
            rule_id = signal.rule_id,
            timestamp = %signal.timestamp,
            "Signal"
        );
        Ok(())
    }
}

/// Fans signals out over a tokio broadcast channel.
///
/// Surrounding layers (a WebSocket push server, a notifier) call
/// [`subscribe`](Self::subscribe) to receive every published signal.
#[derive(Debug)]
pub struct BroadcastSink {
    next_id: AtomicI64,
    tx: broadcast::Sender<Signal>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            next_id: AtomicI64::new(0),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl SignalSink for BroadcastSink {
    async fn persist(&self, _signal: &Signal) -> Result<i64> {
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn publish(&self, signal: &Signal) -> Result<()> {
        match self.tx.send(signal.clone()) {
            Ok(receivers) => debug!(symbol = %signal.symbol, receivers, "Signal broadcast"),
            Err(_) => debug!(symbol = %signal.symbol, "No signal listeners"),
        }
        Ok(())
    }
}
