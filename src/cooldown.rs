//! Per-symbol signal cooldowns.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Blocks repeat signals for a symbol until its cooldown has elapsed.
///
/// Timestamps are epoch seconds. Symbols never seen are always allowed to
/// fire.
#[derive(Debug, Default)]
pub struct CooldownGate {
    next_allowed: Mutex<HashMap<String, i64>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_fire(&self, symbol: &str, now: i64) -> bool {
        self.next_allowed
            .lock()
            .get(symbol)
            .is_none_or(|&next| now >= next)
    }

    /// Blocks `symbol` until `now + duration_secs`.
    pub fn start_cooldown(&self, symbol: &str, now: i64, duration_secs: u64) {
        let until = now.saturating_add(i64::try_from(duration_secs).unwrap_or(i64::MAX));
        self.next_allowed.lock().insert(symbol.to_string(), until);
    }

    /// Seconds left before `symbol` may fire again; zero when allowed.
    pub fn remaining(&self, symbol: &str, now: i64) -> u64 {
        self.next_allowed
            .lock()
            .get(symbol)
            .map_or(0, |&next| u64::try_from(next - now).unwrap_or(0))
    }

    pub fn clear(&self, symbol: &str) {
        self.next_allowed.lock().remove(symbol);
    }

    pub fn clear_all(&self) {
        self.next_allowed.lock().clear();
    }
}
