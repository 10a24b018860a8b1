//! Indicator periods, deserialized from the `indicators` section of the
//! engine configuration.

use serde::{Deserialize, Serialize};

use crate::{Result, SignalGenError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// `MA{n}` simple moving averages.
    pub sma: Vec<usize>,
    /// `EMA{n}` exponential moving averages.
    pub ema: Vec<usize>,
    pub macd: MacdConfig,
    /// `RSI{n}` periods.
    pub rsi: Vec<usize>,
    /// `ADX{n}` periods.
    pub adx: Vec<usize>,
    pub bollinger: BollingerConfig,
    /// `REL_VOLUME_{n}` lookbacks.
    pub rel_volume: Vec<usize>,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma: vec![5, 10, 20],
            ema: vec![6, 10, 20],
            macd: MacdConfig::default(),
            rsi: vec![14],
            adx: vec![5],
            bollinger: BollingerConfig::default(),
            rel_volume: vec![20],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacdConfig {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdConfig {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BollingerConfig {
    pub period: usize,
    pub std_dev: f64,
}

impl Default for BollingerConfig {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev: 2.0,
        }
    }
}

impl IndicatorConfig {
    /// Rejects zero periods and a MACD whose fast period is not below its slow one.
    pub fn validate(&self) -> Result<()> {
        let families = [
            ("sma", &self.sma),
            ("ema", &self.ema),
            ("rsi", &self.rsi),
            ("adx", &self.adx),
            ("rel_volume", &self.rel_volume),
        ];
        for (name, periods) in families {
            if periods.contains(&0) {
                return Err(SignalGenError::Config(format!(
                    "indicators.{name} contains a zero period"
                )));
            }
        }
        let macd = self.macd;
        if macd.fast == 0 || macd.signal == 0 || macd.fast >= macd.slow {
            return Err(SignalGenError::Config(format!(
                "indicators.macd needs 0 < fast < slow and signal > 0, got {}/{}/{}",
                macd.fast, macd.slow, macd.signal
            )));
        }
        if self.bollinger.period == 0
            || !self.bollinger.std_dev.is_finite()
            || self.bollinger.std_dev <= 0.0
        {
            return Err(SignalGenError::Config(
                "indicators.bollinger needs a positive period and std_dev".into(),
            ));
        }
        Ok(())
    }

    /// Candles needed before every configured indicator can be computed.
    pub fn required_history(&self) -> usize {
        let max_of = |periods: &[usize], f: fn(usize) -> usize| {
            periods.iter().copied().map(f).max().unwrap_or(0)
        };
        [
            // PREV_CLOSE / PREV_OPEN
            2,
            max_of(&self.sma, |p| p),
            max_of(&self.ema, |p| p),
            self.macd.slow + self.macd.signal,
            max_of(&self.rsi, |p| p + 1),
            max_of(&self.adx, |p| 2 * p),
            self.bollinger.period,
            max_of(&self.rel_volume, |p| p + 1),
        ]
        .into_iter()
        .max()
        .unwrap_or(2)
    }
}
