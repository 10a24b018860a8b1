//! Engine lifecycle states and the status report exposed to callers.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::models::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Disconnected,
    Connecting,
    /// Connected to the feed, not evaluating rules.
    ConnectedIdle,
    Running,
    /// Feed lost while running; retrying with backoff.
    Reconnecting,
    Stopping,
    /// Reconnection attempts exhausted. `connect()` or `start()` recovers.
    Failed,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Disconnected => "disconnected",
            EngineState::Connecting => "connecting",
            EngineState::ConnectedIdle => "connected_idle",
            EngineState::Running => "running",
            EngineState::Reconnecting => "reconnecting",
            EngineState::Stopping => "stopping",
            EngineState::Failed => "failed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, EngineState::ConnectedIdle | EngineState::Running)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a symbol has enough history for rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolReadiness {
    pub ready: bool,
    pub candles: usize,
    pub required: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveRuleSummary {
    pub id: i64,
    pub name: String,
    pub cooldown_sec: u64,
}

/// Point-in-time view of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub state: EngineState,
    pub running: bool,
    pub connected: bool,
    pub active_symbols: Vec<String>,
    pub active_rule: Option<ActiveRuleSummary>,
    pub reconnect_enabled: bool,
    pub reconnect_attempts: u32,
    pub timeframe: Timeframe,
    pub readiness: BTreeMap<String, SymbolReadiness>,
    pub last_error: Option<String>,
}

/// Anything that can describe its current status.
pub trait StatusReporter {
    fn status(&self) -> StatusReport;
}
