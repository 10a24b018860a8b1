//! Trading signals emitted when the active rule fires.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::indicators::IndicatorSnapshot;

/// An immutable record of a rule firing for one symbol.
///
/// Built only by the orchestrator; ownership passes to the signal sink.
#[derive(Debug, Clone, Serialize)]
pub struct Signal {
    pub symbol: String,
    /// Taken from the rule's `type` field (e.g. `"BUY"`, `"system"`).
    pub signal_type: String,
    pub price: f64,
    pub rule_id: i64,
    pub timestamp: DateTime<Utc>,
    /// Full indicator snapshot at trigger time.
    pub indicators: IndicatorSnapshot,
}
