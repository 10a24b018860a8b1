//! Reconnection policy: exponential backoff with a cap and an attempt limit.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Wait before the first attempt.
    pub base_delay_ms: u64,
    /// Upper bound for any single wait.
    pub max_delay_ms: u64,
    /// Attempts before giving up and entering the failed state.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Wait before attempt `attempt` (1-based): `min(base × 2^(attempt−1), cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = 1u64 << exponent;
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let policy = ReconnectPolicy::default();
        let secs: Vec<u64> = (1..=6).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(secs, vec![5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn delays_never_decrease() {
        let policy = ReconnectPolicy {
            base_delay_ms: 7,
            max_delay_ms: 1_000,
            ..Default::default()
        };
        let delays: Vec<Duration> = (1..=80).map(|n| policy.delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(1));
    }
}
