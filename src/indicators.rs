//! Pure indicator functions and the per-analysis [`IndicatorSeries`]
//!
//! Every function returns a new column aligned with its input. Bars that
//! cannot be computed (warm-up, NaN input, degenerate division) are `NaN`.
//! Recursive indicators (EMA, Wilder smoothing) carry their state across a
//! NaN input and emit `NaN` for that bar only.

use crate::params::TrendConfig;
use crate::window::PriceWindow;

// ============================================================
// MOVING AVERAGES
// ============================================================

/// Simple moving average of the trailing `period` values.
///
/// `NaN` until `period` values are available or when the window holds a
/// non-finite value.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    for i in period.saturating_sub(1)..values.len() {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| v.is_finite()) {
            out[i] = window.iter().sum::<f64>() / period as f64;
        }
    }
    out
}

/// Exponential smoothing with factor `alpha`, seeded by the mean of the
/// first `period` finite values
fn smooth(values: &[f64], period: usize, alpha: f64) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    let mut seed_sum = 0.0;
    let mut seen = 0usize;
    let mut state: Option<f64> = None;

    for (i, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            continue;
        }
        match state {
            Some(prev) => {
                let next = alpha * v + (1.0 - alpha) * prev;
                state = Some(next);
                out[i] = next;
            }
            None => {
                seed_sum += v;
                seen += 1;
                if seen == period {
                    let seed = seed_sum / period as f64;
                    state = Some(seed);
                    out[i] = seed;
                }
            }
        }
    }
    out
}

/// Exponential moving average, `alpha = 2 / (period + 1)`
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    smooth(values, period, 2.0 / (period as f64 + 1.0))
}

/// Wilder's smoothing, `alpha = 1 / period`
pub fn wilder(values: &[f64], period: usize) -> Vec<f64> {
    smooth(values, period, 1.0 / period.max(1) as f64)
}

/// Percent change over `lookback` bars: `(v[i] - v[i-lb]) / |v[i-lb]| * 100`
pub fn percent_change(values: &[f64], lookback: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if lookback == 0 {
        return out;
    }
    for i in lookback..values.len() {
        let (prev, cur) = (values[i - lookback], values[i]);
        if prev.is_finite() && cur.is_finite() && prev != 0.0 {
            out[i] = (cur - prev) / prev.abs() * 100.0;
        }
    }
    out
}

/// Percentage separation `(fast - slow) / slow * 100`
pub fn separation_pct(fast: &[f64], slow: &[f64]) -> Vec<f64> {
    fast.iter()
        .zip(slow)
        .map(|(&f, &s)| {
            if f.is_finite() && s.is_finite() && s != 0.0 {
                (f - s) / s * 100.0
            } else {
                f64::NAN
            }
        })
        .collect()
}

// ============================================================
// OSCILLATORS
// ============================================================

/// Wilder RSI.
///
/// A flat average loss yields 100 (or 50 when gains are flat too).
pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let n = close.len();
    let mut gains = vec![f64::NAN; n];
    let mut losses = vec![f64::NAN; n];
    for i in 1..n {
        let delta = close[i] - close[i - 1];
        if delta.is_finite() {
            gains[i] = delta.max(0.0);
            losses[i] = (-delta).max(0.0);
        }
    }
    let avg_gain = wilder(&gains, period);
    let avg_loss = wilder(&losses, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(&g, &l)| {
            if !g.is_finite() || !l.is_finite() {
                f64::NAN
            } else if l == 0.0 {
                if g == 0.0 {
                    50.0
                } else {
                    100.0
                }
            } else {
                100.0 - 100.0 / (1.0 + g / l)
            }
        })
        .collect()
}

/// MACD line, signal line and histogram
#[derive(Debug, Clone, PartialEq)]
pub struct MacdSeries {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> MacdSeries {
    let fast_ema = ema(close, fast);
    let slow_ema = ema(close, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema(&line, signal);
    let histogram = line.iter().zip(&signal_line).map(|(m, s)| m - s).collect();
    MacdSeries {
        macd: line,
        signal: signal_line,
        histogram,
    }
}

// ============================================================
// VOLATILITY / TREND STRENGTH
// ============================================================

pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..high.len())
        .map(|i| {
            let hl = high[i] - low[i];
            if i == 0 {
                return hl;
            }
            let pc = close[i - 1];
            hl.max((high[i] - pc).abs()).max((low[i] - pc).abs())
        })
        .collect()
}

/// Average true range (Wilder)
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    wilder(&true_range(high, low, close), period)
}

/// ADX with its directional indicators
#[derive(Debug, Clone, PartialEq)]
pub struct AdxSeries {
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
}

pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> AdxSeries {
    let n = high.len();
    let mut plus_dm = vec![f64::NAN; n];
    let mut minus_dm = vec![f64::NAN; n];
    let mut tr = vec![f64::NAN; n];
    let full_tr = true_range(high, low, close);
    for i in 1..n {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if !up.is_finite() || !down.is_finite() {
            continue;
        }
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
        tr[i] = full_tr[i];
    }

    let s_plus = wilder(&plus_dm, period);
    let s_minus = wilder(&minus_dm, period);
    let s_tr = wilder(&tr, period);

    let di = |dm: &[f64]| -> Vec<f64> {
        dm.iter()
            .zip(&s_tr)
            .map(|(&d, &t)| if t > 0.0 { 100.0 * d / t } else { f64::NAN })
            .collect()
    };
    let plus_di = di(&s_plus);
    let minus_di = di(&s_minus);

    let dx: Vec<f64> = plus_di
        .iter()
        .zip(&minus_di)
        .map(|(&p, &m)| {
            let sum = p + m;
            if !sum.is_finite() {
                f64::NAN
            } else if sum == 0.0 {
                0.0
            } else {
                100.0 * (p - m).abs() / sum
            }
        })
        .collect();

    AdxSeries {
        adx: wilder(&dx, period),
        plus_di,
        minus_di,
    }
}

// ============================================================
// AROON
// ============================================================

/// Aroon up/down and oscillator
#[derive(Debug, Clone, PartialEq)]
pub struct AroonSeries {
    pub up: Vec<f64>,
    pub down: Vec<f64>,
    pub oscillator: Vec<f64>,
}

/// Aroon over a lookback of `period + 1` bars; the most recent extreme wins ties
pub fn aroon(high: &[f64], low: &[f64], period: usize) -> AroonSeries {
    let n = high.len();
    let mut up = vec![f64::NAN; n];
    let mut down = vec![f64::NAN; n];
    if period > 0 {
        for i in period..n {
            let start = i - period;
            let since_high = bars_since_extreme(&high[start..=i], |a, b| a >= b);
            let since_low = bars_since_extreme(&low[start..=i], |a, b| a <= b);
            if let (Some(h), Some(l)) = (since_high, since_low) {
                up[i] = 100.0 * (period - h) as f64 / period as f64;
                down[i] = 100.0 * (period - l) as f64 / period as f64;
            }
        }
    }
    let oscillator = up.iter().zip(&down).map(|(u, d)| u - d).collect();
    AroonSeries { up, down, oscillator }
}

/// Bars between the end of `window` and its extreme (per `better`)
fn bars_since_extreme(window: &[f64], better: impl Fn(f64, f64) -> bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in window.iter().enumerate() {
        if !v.is_finite() {
            continue;
        }
        match best {
            Some((_, b)) if !better(v, b) => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| window.len() - 1 - i)
}

// ============================================================
// INDICATOR SERIES
// ============================================================

/// Periods needed to compute an [`IndicatorSeries`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub slope_lookback: usize,
    pub rsi: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub atr: usize,
    pub adx: usize,
    pub aroon: usize,
    pub volume_ma: usize,
}

impl From<&TrendConfig> for IndicatorParams {
    fn from(c: &TrendConfig) -> Self {
        Self {
            ema_fast: c.ema_fast_period.get(),
            ema_slow: c.ema_slow_period.get(),
            slope_lookback: c.ema_slope_lookback.get(),
            rsi: c.rsi_period.get(),
            macd_fast: c.macd_fast.get(),
            macd_slow: c.macd_slow.get(),
            macd_signal: c.macd_signal.get(),
            atr: c.atr_period.get(),
            adx: c.adx_period.get(),
            aroon: c.aroon_period.get(),
            volume_ma: c.volume_ma_period.get(),
        }
    }
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self::from(&TrendConfig::default())
    }
}

/// Derived columns for one window, computed once per analysis
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    pub ema_fast: Vec<f64>,
    pub ema_slow: Vec<f64>,
    pub ema_fast_slope: Vec<f64>,
    pub ema_slow_slope: Vec<f64>,
    pub ema_separation: Vec<f64>,
    pub rsi: Vec<f64>,
    pub macd: Vec<f64>,
    pub macd_signal: Vec<f64>,
    pub macd_histogram: Vec<f64>,
    pub atr: Vec<f64>,
    pub adx: Vec<f64>,
    pub plus_di: Vec<f64>,
    pub minus_di: Vec<f64>,
    pub aroon_up: Vec<f64>,
    pub aroon_down: Vec<f64>,
    pub aroon_oscillator: Vec<f64>,
    pub volume_ma: Vec<f64>,
}

impl IndicatorSeries {
    pub fn compute(window: &PriceWindow, p: &IndicatorParams) -> Self {
        let (high, low, close) = (window.high(), window.low(), window.close());
        let ema_fast = ema(close, p.ema_fast);
        let ema_slow = ema(close, p.ema_slow);
        let m = macd(close, p.macd_fast, p.macd_slow, p.macd_signal);
        let a = adx(high, low, close, p.adx);
        let ar = aroon(high, low, p.aroon);
        Self {
            ema_fast_slope: percent_change(&ema_fast, p.slope_lookback),
            ema_slow_slope: percent_change(&ema_slow, p.slope_lookback),
            ema_separation: separation_pct(&ema_fast, &ema_slow),
            ema_fast,
            ema_slow,
            rsi: rsi(close, p.rsi),
            macd: m.macd,
            macd_signal: m.signal,
            macd_histogram: m.histogram,
            atr: atr(high, low, close, p.atr),
            adx: a.adx,
            plus_di: a.plus_di,
            minus_di: a.minus_di,
            aroon_up: ar.up,
            aroon_down: ar.down,
            aroon_oscillator: ar.oscillator,
            volume_ma: sma(window.volume(), p.volume_ma),
        }
    }

    pub fn len(&self) -> usize {
        self.ema_fast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ema_fast.is_empty()
    }

    /// Final value of a column, `None` when it is not finite
    pub fn latest(column: &[f64]) -> Option<f64> {
        column.last().copied().filter(|v| v.is_finite())
    }

    /// Value of a column at `index`, `None` when out of range or not finite
    pub fn value_at(column: &[f64], index: usize) -> Option<f64> {
        column.get(index).copied().filter(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PriceBar;

    fn close_enough(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_sma() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(out[0].is_nan());
        assert!(close_enough(out[1], 1.5));
        assert!(close_enough(out[3], 3.5));

        let out = sma(&[1.0, f64::NAN, 3.0, 4.0], 2);
        assert!(out[1].is_nan() && out[2].is_nan());
        assert!(close_enough(out[3], 3.5));
    }

    #[test]
    fn test_ema_seed_and_recursion() {
        let out = ema(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!(out[0].is_nan() && out[1].is_nan());
        assert!(close_enough(out[2], 2.0));
        // alpha = 0.5
        assert!(close_enough(out[3], 3.0));
    }

    #[test]
    fn test_ema_carries_state_across_nan() {
        let out = ema(&[1.0, 2.0, 3.0, f64::NAN, 4.0], 3);
        assert!(out[3].is_nan());
        assert!(close_enough(out[4], 3.0));
    }

    #[test]
    fn test_ema_constant_series() {
        let out = ema(&[5.0; 30], 10);
        assert!(out[9..].iter().all(|v| close_enough(*v, 5.0)));
    }

    #[test]
    fn test_rsi_extremes() {
        let up: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let out = rsi(&up, 14);
        assert!(out[13].is_nan());
        assert!(close_enough(out[14], 100.0));

        let flat = vec![10.0; 30];
        assert!(close_enough(rsi(&flat, 14)[29], 50.0));

        let down: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert!(close_enough(rsi(&down, 14)[29], 0.0));
    }

    #[test]
    fn test_macd_sign_follows_trend() {
        let up: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let m = macd(&up, 12, 26, 9);
        assert!(m.macd[59] > 0.0);
        assert!(m.signal[59].is_finite());
        assert!(m.macd[20].is_nan());
    }

    #[test]
    fn test_true_range_uses_prior_close() {
        let tr = true_range(&[10.0, 12.0], &[9.0, 11.0], &[9.5, 11.5]);
        assert!(close_enough(tr[0], 1.0));
        assert!(close_enough(tr[1], 2.5));
    }

    #[test]
    fn test_adx_strong_trend() {
        let n = 80;
        let high: Vec<f64> = (0..n).map(|i| 101.0 + i as f64).collect();
        let low: Vec<f64> = (0..n).map(|i| 99.0 + i as f64).collect();
        let close: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        let a = adx(&high, &low, &close, 14);
        assert!(a.adx[n - 1] > 90.0);
        assert!(a.plus_di[n - 1] > a.minus_di[n - 1]);
    }

    #[test]
    fn test_aroon_rising_series() {
        let high: Vec<f64> = (0..40).map(|i| 10.0 + i as f64).collect();
        let low: Vec<f64> = (0..40).map(|i| 9.0 + i as f64).collect();
        let a = aroon(&high, &low, 25);
        assert!(a.up[24].is_nan());
        assert!(close_enough(a.up[39], 100.0));
        assert!(close_enough(a.down[39], 0.0));
        assert!(close_enough(a.oscillator[39], 100.0));
    }

    #[test]
    fn test_aroon_recent_extreme_wins_ties() {
        let high = vec![5.0, 9.0, 1.0, 9.0, 2.0];
        let low = vec![1.0; 5];
        let a = aroon(&high, &low, 4);
        // highs tie at index 1 and 3; index 3 is one bar back
        assert!(close_enough(a.up[4], 75.0));
        assert!(close_enough(a.down[4], 100.0));
    }

    #[test]
    fn test_percent_change_and_separation() {
        let pc = percent_change(&[100.0, 101.0, 102.0], 2);
        assert!(close_enough(pc[2], 2.0));
        let sep = separation_pct(&[101.0, f64::NAN], &[100.0, 100.0]);
        assert!(close_enough(sep[0], 1.0));
        assert!(sep[1].is_nan());
    }

    #[test]
    fn test_indicator_series_compute() {
        let bars: Vec<PriceBar> = (0..60)
            .map(|i| {
                let c = 100.0 + i as f64;
                PriceBar::new(i, c, c + 1.0, c - 1.0, c, 1000.0)
            })
            .collect();
        let window = PriceWindow::from_bars(&bars).unwrap();
        let s = IndicatorSeries::compute(&window, &IndicatorParams::default());
        assert_eq!(s.len(), 60);
        assert!(IndicatorSeries::latest(&s.ema_separation).unwrap() > 0.0);
        assert!(IndicatorSeries::latest(&s.macd_histogram).is_some());
        assert_eq!(IndicatorSeries::latest(&s.volume_ma), Some(1000.0));
        assert_eq!(IndicatorSeries::value_at(&s.ema_fast, 0), None);
        assert_eq!(IndicatorSeries::value_at(&s.ema_fast, 600), None);
    }
}
