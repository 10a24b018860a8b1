//! Crate-level error types.
//!
//! [`SignalGenError`] unifies every failure the pipeline can surface
//! (malformed input, rule evaluation, feed connectivity, lifecycle
//! preconditions) behind a single enum so callers can match on the variant
//! they care about while still using the `?` operator for propagation.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SignalGenError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum SignalGenError {
    /// A rule, bar or candle was malformed and rejected before any state
    /// was touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A rule could not be evaluated against the current indicators
    /// (missing operand, missing previous value).
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The market data feed could not be reached or dropped the connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A subscription request would exceed the symbol capacity.
    #[error("capacity exceeded: {requested} symbols requested, at most {max} allowed")]
    CapacityExceeded { requested: usize, max: usize },

    /// The requested operation duplicates one already in progress.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The orchestrator is not in a state that allows the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The rules store has no rule with the requested id.
    #[error("rule {0} not found")]
    RuleNotFound(i64),

    /// A configuration value could not be found, read, or deserialized.
    #[error("configuration error: {0}")]
    Config(String),

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// An HTTP request to a historical data provider failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A provider response was well-formed JSON but not the expected shape.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_both_counts() {
        let err = SignalGenError::CapacityExceeded {
            requested: 6,
            max: 5,
        };
        assert_eq!(
            err.to_string(),
            "capacity exceeded: 6 symbols requested, at most 5 allowed"
        );
    }
}
