//! Rolling indicator math over oldest-first price series.
//!
//! Every function returns the value for the newest element only, or `None`
//! when the series is too short or the result is not finite. Callers treat
//! `None` as "indicator absent" rather than as an error.

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    finite(window.iter().sum::<f64>() / period as f64)
}

/// Full EMA series, seeded with the SMA of the first `period` values.
///
/// The returned vector is aligned with `values[period - 1..]`.
pub fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for value in &values[period..] {
        prev = alpha * value + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Exponential moving average of the whole series.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied().and_then(finite)
}

/// MACD line, signal line and histogram.
///
/// Requires `slow + signal` values so the signal EMA has a full seed window.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> Option<(f64, f64, f64)> {
    if fast == 0 || signal == 0 || fast >= slow || values.len() < slow + signal {
        return None;
    }
    let fast_series = ema_series(values, fast);
    let slow_series = ema_series(values, slow);
    // Slow series starts `slow - fast` elements later.
    let offset = slow - fast;
    let line: Vec<f64> = slow_series
        .iter()
        .zip(fast_series.iter().skip(offset))
        .map(|(slow, fast)| fast - slow)
        .collect();

    let macd_line = *line.last()?;
    let signal_line = ema(&line, signal)?;
    let hist = macd_line - signal_line;
    Some((finite(macd_line)?, finite(signal_line)?, finite(hist)?))
}

/// Relative Strength Index with Wilder smoothing of average gain and loss.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period + 1 {
        return None;
    }
    let changes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    let mut avg_gain = changes[..period].iter().map(|c| c.max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss =
        changes[..period].iter().map(|c| (-c).max(0.0)).sum::<f64>() / period as f64;

    let n = period as f64;
    for change in &changes[period..] {
        avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
    }
    finite(rsi_value(avg_gain, avg_loss))
}

#[inline]
fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        if avg_gain == 0.0 { 50.0 } else { 100.0 }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Average Directional Index, Wilder-smoothed.
///
/// Needs `2 * period` candles: `period` movements to seed the smoothed true
/// range and directional movement, then `period` DX values to seed the ADX.
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let len = closes.len();
    if period == 0 || highs.len() != len || lows.len() != len || len < 2 * period {
        return None;
    }

    let mut tr = Vec::with_capacity(len - 1);
    let mut plus_dm = Vec::with_capacity(len - 1);
    let mut minus_dm = Vec::with_capacity(len - 1);
    for i in 1..len {
        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(
            (highs[i] - lows[i])
                .max((highs[i] - closes[i - 1]).abs())
                .max((lows[i] - closes[i - 1]).abs()),
        );
    }

    let n = period as f64;
    let mut sm_tr: f64 = tr[..period].iter().sum();
    let mut sm_plus: f64 = plus_dm[..period].iter().sum();
    let mut sm_minus: f64 = minus_dm[..period].iter().sum();

    let mut dx = Vec::with_capacity(tr.len() - period + 1);
    dx.push(dx_value(sm_tr, sm_plus, sm_minus));
    for i in period..tr.len() {
        sm_tr = sm_tr - sm_tr / n + tr[i];
        sm_plus = sm_plus - sm_plus / n + plus_dm[i];
        sm_minus = sm_minus - sm_minus / n + minus_dm[i];
        dx.push(dx_value(sm_tr, sm_plus, sm_minus));
    }

    let mut adx = dx[..period].iter().sum::<f64>() / n;
    for value in &dx[period..] {
        adx = (adx * (n - 1.0) + value) / n;
    }
    finite(adx)
}

fn dx_value(tr: f64, plus_dm: f64, minus_dm: f64) -> f64 {
    if tr <= 0.0 {
        return 0.0;
    }
    let plus_di = 100.0 * plus_dm / tr;
    let minus_di = 100.0 * minus_dm / tr;
    let sum = plus_di + minus_di;
    if sum == 0.0 {
        0.0
    } else {
        100.0 * (plus_di - minus_di).abs() / sum
    }
}

/// Bollinger bands over the last `period` values using population standard
/// deviation. Returns `(middle, upper, lower, width)` where width is
/// `upper - lower`.
pub fn bollinger(values: &[f64], period: usize, k: f64) -> Option<(f64, f64, f64, f64)> {
    let middle = sma(values, period)?;
    let window = &values[values.len() - period..];
    let variance = window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / period as f64;
    let std = variance.sqrt();
    let upper = middle + k * std;
    let lower = middle - k * std;
    Some((middle, finite(upper)?, finite(lower)?, finite(upper - lower)?))
}

/// Latest volume divided by the mean volume of the `period` values before it.
pub fn relative_volume(volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || volumes.len() < period + 1 {
        return None;
    }
    let last = volumes.len() - 1;
    let mean = volumes[last - period..last].iter().sum::<f64>() / period as f64;
    if mean <= 0.0 {
        return None;
    }
    finite(volumes[last] / mean)
}

#[inline]
fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
