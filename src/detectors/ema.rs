//! EMA momentum analyzer
//!
//! Classifies the fast/slow EMA relationship on the final bar, treats both
//! EMAs as dynamic support/resistance and reports breaks and retests of
//! those levels.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use super::helpers::clamp01;
use super::volume::VolumeAnalyzer;
use crate::{
    indicators::{ema, percent_change, separation_pct},
    params::{get_factor, get_period, get_ratio, validate_values, ParamMeta, ParameterizedDetector},
    DetectorId, Direction, Period, PriceWindow, Result, Signal, SignalKind, SignalSource,
    TrendConfig, TrendDetector, TrendError,
};

impl_with_defaults!(EmaMomentumAnalyzer);

/// |separation| below this (percent) is consolidation
pub const CONSOLIDATION_BAND_PCT: f64 = 0.2;
/// |separation| below this (percent) is a weak trend
pub const WEAK_BAND_PCT: f64 = 0.5;
/// |separation| at or above this (percent) can be a strong trend
pub const STRONG_BAND_PCT: f64 = 1.0;

/// Touches at which a level reaches full strength
const FULL_STRENGTH_TOUCHES: f64 = 5.0;

// ============================================================
// TYPES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaSignalType {
    BullishCross,
    BearishCross,
    StrongBullishCross,
    StrongBearishCross,
    StrongBullishTrend,
    ModerateBullishTrend,
    StrongBearishTrend,
    ModerateBearishTrend,
    WeakBullish,
    WeakBearish,
    Consolidation,
}

impl EmaSignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            EmaSignalType::BullishCross => "bullish_cross",
            EmaSignalType::BearishCross => "bearish_cross",
            EmaSignalType::StrongBullishCross => "strong_bullish_cross",
            EmaSignalType::StrongBearishCross => "strong_bearish_cross",
            EmaSignalType::StrongBullishTrend => "strong_bullish_trend",
            EmaSignalType::ModerateBullishTrend => "moderate_bullish_trend",
            EmaSignalType::StrongBearishTrend => "strong_bearish_trend",
            EmaSignalType::ModerateBearishTrend => "moderate_bearish_trend",
            EmaSignalType::WeakBullish => "weak_bullish",
            EmaSignalType::WeakBearish => "weak_bearish",
            EmaSignalType::Consolidation => "consolidation",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            EmaSignalType::BullishCross
            | EmaSignalType::StrongBullishCross
            | EmaSignalType::StrongBullishTrend
            | EmaSignalType::ModerateBullishTrend
            | EmaSignalType::WeakBullish => Direction::Bullish,
            EmaSignalType::BearishCross
            | EmaSignalType::StrongBearishCross
            | EmaSignalType::StrongBearishTrend
            | EmaSignalType::ModerateBearishTrend
            | EmaSignalType::WeakBearish => Direction::Bearish,
            EmaSignalType::Consolidation => Direction::Neutral,
        }
    }

    pub fn is_crossover(self) -> bool {
        matches!(
            self,
            EmaSignalType::BullishCross
                | EmaSignalType::BearishCross
                | EmaSignalType::StrongBullishCross
                | EmaSignalType::StrongBearishCross
        )
    }

    fn base_strength(self) -> f64 {
        match self {
            EmaSignalType::StrongBullishTrend | EmaSignalType::StrongBearishTrend => 0.75,
            EmaSignalType::StrongBullishCross | EmaSignalType::StrongBearishCross => 0.7,
            EmaSignalType::ModerateBullishTrend | EmaSignalType::ModerateBearishTrend => 0.55,
            EmaSignalType::BullishCross | EmaSignalType::BearishCross => 0.5,
            EmaSignalType::WeakBullish | EmaSignalType::WeakBearish => 0.35,
            EmaSignalType::Consolidation => 0.2,
        }
    }
}

/// Fast/slow EMA columns with slopes (percent) and separation (percent)
#[derive(Debug, Clone, PartialEq)]
pub struct EmaFrame {
    pub fast: Vec<f64>,
    pub slow: Vec<f64>,
    pub fast_slope: Vec<f64>,
    pub slow_slope: Vec<f64>,
    pub separation_pct: Vec<f64>,
}

impl EmaFrame {
    pub fn len(&self) -> usize {
        self.fast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fast.is_empty()
    }
}

/// Classification of the final bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmaSignal {
    pub signal_type: EmaSignalType,
    pub direction: Direction,
    pub strength: f64,
    pub fast_ema: f64,
    pub slow_ema: f64,
    pub separation_pct: f64,
    pub fast_slope: f64,
    pub slow_slope: f64,
    /// The EMAs crossed on the final bar, even if the cross was too shallow
    /// to classify as one
    pub crossover: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachType {
    SupportBreak,
    ResistanceBreak,
    SupportRetest,
    ResistanceRetest,
}

impl BreachType {
    pub fn as_str(self) -> &'static str {
        match self {
            BreachType::SupportBreak => "ema_support_break",
            BreachType::ResistanceBreak => "ema_resistance_break",
            BreachType::SupportRetest => "ema_support_retest",
            BreachType::ResistanceRetest => "ema_resistance_retest",
        }
    }

    /// A broken support retested from below stays bearish; a broken
    /// resistance retested from above stays bullish.
    pub fn direction(self) -> Direction {
        match self {
            BreachType::SupportBreak | BreachType::SupportRetest => Direction::Bearish,
            BreachType::ResistanceBreak | BreachType::ResistanceRetest => Direction::Bullish,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmaBreachResult {
    pub breach_type: BreachType,
    pub ema_period: usize,
    pub breach_level: f64,
    pub current_price: f64,
    /// `|current_price - breach_level| / breach_level`
    pub breach_magnitude: f64,
    pub volume_confirmed: bool,
    pub volume_ratio: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelType {
    Support,
    Resistance,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmaSupportResistance {
    pub level_type: LevelType,
    pub ema_period: usize,
    pub price_level: f64,
    pub strength: f64,
    pub touches: usize,
    pub active: bool,
}

/// Everything the analyzer reports for one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmaReport {
    pub signal: Option<EmaSignal>,
    pub levels: Vec<EmaSupportResistance>,
    pub breaches: Vec<EmaBreachResult>,
}

impl SignalSource for EmaReport {
    fn signals(&self) -> Vec<Signal> {
        let mut out = Vec::new();
        if let Some(s) = &self.signal {
            let mut signal = Signal::new(
                DetectorId::EmaMomentum,
                SignalKind::Ema(s.signal_type),
                s.direction,
                s.strength,
            )
            .with_factor(format!("separation {:.3}%", s.separation_pct))
            .with_factor(format!("fast slope {:.3}%", s.fast_slope));
            if s.crossover {
                signal = signal.with_factor("ema crossover on final bar");
            }
            out.push(signal);
        }
        for b in &self.breaches {
            let mut signal = Signal::new(
                DetectorId::EmaMomentum,
                SignalKind::EmaBreach(b.breach_type),
                b.breach_type.direction(),
                b.confidence,
            )
            .with_factor(format!("ema{} at {:.5}", b.ema_period, b.breach_level))
            .with_factor(format!("magnitude {:.4}", b.breach_magnitude));
            if b.volume_confirmed {
                signal = signal.with_factor(format!("volume {:.2}x", b.volume_ratio));
            }
            out.push(signal);
        }
        out
    }
}

// ============================================================
// ANALYZER
// ============================================================

static EMA_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("ema_fast_period", 9.0, (2.0, 100.0, 1.0), "Fast EMA period"),
    ParamMeta::period("ema_slow_period", 21.0, (3.0, 400.0, 1.0), "Slow EMA period"),
    ParamMeta::period(
        "ema_slope_lookback",
        3.0,
        (1.0, 20.0, 1.0),
        "Bars over which EMA slope is measured",
    ),
    ParamMeta::ratio(
        "ema_breach_threshold",
        0.002,
        (0.0001, 0.05, 0.0005),
        "Relative distance past an EMA that counts as a break",
    ),
    ParamMeta::factor(
        "ema_min_volume_confirmation",
        1.5,
        (1.0, 5.0, 0.1),
        "Volume multiple that confirms a breach",
    ),
    ParamMeta::ratio(
        "ema_retest_tolerance",
        0.003,
        (0.0001, 0.05, 0.0005),
        "Relative distance to an EMA that counts as a touch or retest",
    ),
    ParamMeta::period(
        "ema_touch_lookback",
        50.0,
        (5.0, 500.0, 5.0),
        "Bars scanned for touches of an EMA level",
    ),
    ParamMeta::period(
        "ema_breach_lookback",
        10.0,
        (2.0, 100.0, 1.0),
        "Bars scanned for a prior break when looking for a retest",
    ),
    ParamMeta::ratio(
        "ema_active_distance",
        0.03,
        (0.001, 0.2, 0.005),
        "Relative distance within which a touched level is active",
    ),
    ParamMeta::factor(
        "trend_detection_sensitivity",
        1.0,
        (0.1, 5.0, 0.1),
        "Divides the separation bands; higher is more sensitive",
    ),
];

#[derive(Debug, Clone)]
pub struct EmaMomentumAnalyzer {
    pub fast_period: Period,
    pub slow_period: Period,
    pub slope_lookback: Period,
    pub breach_threshold: f64,
    pub min_volume_confirmation: f64,
    pub retest_tolerance: f64,
    pub touch_lookback: Period,
    pub breach_lookback: Period,
    pub active_distance: f64,
    pub sensitivity: f64,
    volume: Option<VolumeAnalyzer>,
}

impl Default for EmaMomentumAnalyzer {
    fn default() -> Self {
        Self::from_config(&TrendConfig::default())
    }
}

impl EmaMomentumAnalyzer {
    pub fn from_config(c: &TrendConfig) -> Self {
        Self {
            fast_period: c.ema_fast_period,
            slow_period: c.ema_slow_period,
            slope_lookback: c.ema_slope_lookback,
            breach_threshold: c.ema_breach_threshold.get(),
            min_volume_confirmation: c.ema_min_volume_confirmation,
            retest_tolerance: c.ema_retest_tolerance.get(),
            touch_lookback: c.ema_touch_lookback,
            breach_lookback: c.ema_breach_lookback,
            active_distance: c.ema_active_distance.get(),
            sensitivity: c.trend_detection_sensitivity,
            volume: None,
        }
    }

    /// Confirm breaches with this volume analyzer when evaluated as a detector
    pub fn with_volume_confirmation(mut self, volume: VolumeAnalyzer) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Fast/slow EMAs with slopes and separation; `None` with fewer than
    /// `slow_period` bars
    pub fn calculate_emas(&self, window: &PriceWindow) -> Option<EmaFrame> {
        if window.len() < self.slow_period.get() {
            return None;
        }
        let fast = ema(window.close(), self.fast_period.get());
        let slow = ema(window.close(), self.slow_period.get());
        Some(EmaFrame {
            fast_slope: percent_change(&fast, self.slope_lookback.get()),
            slow_slope: percent_change(&slow, self.slope_lookback.get()),
            separation_pct: separation_pct(&fast, &slow),
            fast,
            slow,
        })
    }

    /// Classify the final bar
    pub fn get_ema_signal(&self, window: &PriceWindow) -> Option<EmaSignal> {
        let frame = self.calculate_emas(window)?;
        self.classify(window, &frame)
    }

    /// Each EMA as a support or resistance level
    pub fn identify_ema_support_resistance(&self, window: &PriceWindow) -> Vec<EmaSupportResistance> {
        match self.calculate_emas(window) {
            Some(frame) => self.levels(window, &frame),
            None => Vec::new(),
        }
    }

    /// Breaks and retests of either EMA on the final bar
    pub fn detect_ema_breaches(
        &self,
        window: &PriceWindow,
        volume: Option<&VolumeAnalyzer>,
    ) -> Vec<EmaBreachResult> {
        match self.calculate_emas(window) {
            Some(frame) => self.breaches(window, &frame, volume),
            None => Vec::new(),
        }
    }

    // ===========================================
    // Internal helpers
    // ===========================================

    fn classify(&self, window: &PriceWindow, frame: &EmaFrame) -> Option<EmaSignal> {
        let i = frame.len().checked_sub(1)?;
        let (fast, slow, sep) = (frame.fast[i], frame.slow[i], frame.separation_pct[i]);
        let close = window.close()[i];
        if !(fast.is_finite() && slow.is_finite() && sep.is_finite() && close.is_finite()) {
            return None;
        }
        let prev_sep = if i > 0 { frame.separation_pct[i - 1] } else { f64::NAN };
        let fast_slope = finite_or_zero(frame.fast_slope[i]);
        let slow_slope = finite_or_zero(frame.slow_slope[i]);

        let scale = 1.0 / self.sensitivity.max(f64::EPSILON);
        let consolidation = CONSOLIDATION_BAND_PCT * scale;
        let weak = WEAK_BAND_PCT * scale;
        let strong = STRONG_BAND_PCT * scale;

        let crossed_up = prev_sep < 0.0 && sep > 0.0;
        let crossed_down = prev_sep > 0.0 && sep < 0.0;
        let magnitude = sep.abs();

        let signal_type = if magnitude < consolidation {
            EmaSignalType::Consolidation
        } else if crossed_up {
            if close > fast && close > slow && fast_slope > 0.0 {
                EmaSignalType::StrongBullishCross
            } else {
                EmaSignalType::BullishCross
            }
        } else if crossed_down {
            if close < fast && close < slow && fast_slope < 0.0 {
                EmaSignalType::StrongBearishCross
            } else {
                EmaSignalType::BearishCross
            }
        } else if magnitude < weak {
            if sep > 0.0 {
                EmaSignalType::WeakBullish
            } else {
                EmaSignalType::WeakBearish
            }
        } else if sep > 0.0 {
            if magnitude >= strong && fast_slope > 0.0 {
                EmaSignalType::StrongBullishTrend
            } else {
                EmaSignalType::ModerateBullishTrend
            }
        } else if magnitude >= strong && fast_slope < 0.0 {
            EmaSignalType::StrongBearishTrend
        } else {
            EmaSignalType::ModerateBearishTrend
        };

        let strength = clamp01(signal_type.base_strength() + 0.25 * (magnitude / (2.0 * strong)).min(1.0));
        trace!(
            signal = signal_type.as_str(),
            separation_pct = sep,
            fast_slope,
            "ema classification"
        );

        Some(EmaSignal {
            signal_type,
            direction: signal_type.direction(),
            strength,
            fast_ema: fast,
            slow_ema: slow,
            separation_pct: sep,
            fast_slope,
            slow_slope,
            crossover: crossed_up || crossed_down,
        })
    }

    fn columns<'a>(&self, frame: &'a EmaFrame) -> [(usize, &'a [f64]); 2] {
        [
            (self.fast_period.get(), frame.fast.as_slice()),
            (self.slow_period.get(), frame.slow.as_slice()),
        ]
    }

    fn levels(&self, window: &PriceWindow, frame: &EmaFrame) -> Vec<EmaSupportResistance> {
        let n = frame.len();
        let Some(close) = window.last_close() else {
            return Vec::new();
        };
        let (high, low, closes) = (window.high(), window.low(), window.close());
        let tol = self.retest_tolerance;
        let start = n.saturating_sub(self.touch_lookback.get());

        let mut out = Vec::new();
        for (period, col) in self.columns(frame) {
            let level = col[n - 1];
            if !level.is_finite() || level <= 0.0 {
                continue;
            }
            let level_type = if close >= level {
                LevelType::Support
            } else {
                LevelType::Resistance
            };
            let touches = (start..n)
                .filter(|&i| {
                    let e = col[i];
                    if !e.is_finite() || e <= 0.0 || !closes[i].is_finite() {
                        return false;
                    }
                    match level_type {
                        LevelType::Support => (low[i] - e).abs() / e <= tol && closes[i] >= e,
                        LevelType::Resistance => (high[i] - e).abs() / e <= tol && closes[i] <= e,
                    }
                })
                .count();
            let active = touches > 0 && (close - level).abs() / level <= self.active_distance;
            out.push(EmaSupportResistance {
                level_type,
                ema_period: period,
                price_level: level,
                strength: (touches as f64 / FULL_STRENGTH_TOUCHES).min(1.0),
                touches,
                active,
            });
        }
        out
    }

    fn breaches(
        &self,
        window: &PriceWindow,
        frame: &EmaFrame,
        volume: Option<&VolumeAnalyzer>,
    ) -> Vec<EmaBreachResult> {
        let n = frame.len();
        if n < 2 {
            return Vec::new();
        }
        let i = n - 1;
        let closes = window.close();
        let close = closes[i];
        if !close.is_finite() {
            return Vec::new();
        }

        let volume_ratio = volume
            .and_then(|v| v.volume_ratio_at(window, i))
            .filter(|r| *r > 0.0);
        let volume_confirmed = volume_ratio.is_some_and(|r| r >= self.min_volume_confirmation);
        let volume_ratio = volume_ratio.unwrap_or(1.0);

        let thr = self.breach_threshold;
        let mut out = Vec::new();
        for (period, col) in self.columns(frame) {
            let (level, prev_level, prev_close) = (col[i], col[i - 1], closes[i - 1]);
            if !level.is_finite() || level <= 0.0 {
                continue;
            }
            let held = prev_level.is_finite() && prev_close.is_finite();

            let found = if held && prev_close >= prev_level * (1.0 - thr) && close < level * (1.0 - thr) {
                Some(BreachType::SupportBreak)
            } else if held && prev_close <= prev_level * (1.0 + thr) && close > level * (1.0 + thr) {
                Some(BreachType::ResistanceBreak)
            } else {
                self.retest(closes, col, i)
            };
            let Some(breach_type) = found else {
                continue;
            };

            let magnitude = (close - level).abs() / level;
            let base = match breach_type {
                BreachType::SupportBreak | BreachType::ResistanceBreak => {
                    0.45 + 0.35 * (magnitude / (5.0 * thr)).min(1.0)
                }
                BreachType::SupportRetest | BreachType::ResistanceRetest => {
                    0.4 + 0.3 * (1.0 - magnitude / self.retest_tolerance).max(0.0)
                }
            };
            let confidence = clamp01(base + if volume_confirmed { 0.2 } else { 0.0 });

            trace!(
                breach = breach_type.as_str(),
                ema_period = period,
                magnitude,
                volume_ratio,
                "ema breach"
            );
            out.push(EmaBreachResult {
                breach_type,
                ema_period: period,
                breach_level: level,
                current_price: close,
                breach_magnitude: magnitude,
                volume_confirmed,
                volume_ratio,
                confidence,
            });
        }
        out
    }

    /// Retest of a level broken inside the trailing breach lookback
    fn retest(&self, closes: &[f64], col: &[f64], i: usize) -> Option<BreachType> {
        let thr = self.breach_threshold;
        let first = i.saturating_sub(self.breach_lookback.get()).max(1);
        let broken = (first..i).rev().find_map(|j| {
            let (c, e, pc, pe) = (closes[j], col[j], closes[j - 1], col[j - 1]);
            if !(c.is_finite() && e.is_finite() && pc.is_finite() && pe.is_finite()) {
                return None;
            }
            if pc >= pe * (1.0 - thr) && c < e * (1.0 - thr) {
                Some(BreachType::SupportRetest)
            } else if pc <= pe * (1.0 + thr) && c > e * (1.0 + thr) {
                Some(BreachType::ResistanceRetest)
            } else {
                None
            }
        })?;

        let (close, level) = (closes[i], col[i]);
        let distance = (close - level).abs() / level;
        let holds = match broken {
            BreachType::SupportRetest => close <= level,
            _ => close >= level,
        };
        (holds && distance <= self.retest_tolerance).then_some(broken)
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

impl TrendDetector for EmaMomentumAnalyzer {
    type Output = EmaReport;

    fn id(&self) -> DetectorId {
        DetectorId::EmaMomentum
    }

    fn min_bars(&self) -> usize {
        self.slow_period.get()
    }

    fn evaluate(&self, window: &PriceWindow) -> Option<EmaReport> {
        let frame = self.calculate_emas(window)?;
        Some(EmaReport {
            signal: self.classify(window, &frame),
            levels: self.levels(window, &frame),
            breaches: self.breaches(window, &frame, self.volume.as_ref()),
        })
    }

    fn validate_config(&self) -> Result<()> {
        validate_values(
            EMA_PARAMS,
            &[
                ("ema_fast_period", self.fast_period.get() as f64),
                ("ema_slow_period", self.slow_period.get() as f64),
                ("ema_slope_lookback", self.slope_lookback.get() as f64),
                ("ema_breach_threshold", self.breach_threshold),
                ("ema_min_volume_confirmation", self.min_volume_confirmation),
                ("ema_retest_tolerance", self.retest_tolerance),
                ("ema_touch_lookback", self.touch_lookback.get() as f64),
                ("ema_breach_lookback", self.breach_lookback.get() as f64),
                ("ema_active_distance", self.active_distance),
                ("trend_detection_sensitivity", self.sensitivity),
            ],
        )?;
        if self.fast_period >= self.slow_period {
            return Err(TrendError::InvalidConfig(
                "fast EMA period must be shorter than slow EMA period".into(),
            ));
        }
        Ok(())
    }
}

impl ParameterizedDetector for EmaMomentumAnalyzer {
    fn param_meta() -> &'static [ParamMeta] {
        EMA_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let d = TrendConfig::default();
        let analyzer = Self {
            fast_period: get_period(params, "ema_fast_period", d.ema_fast_period.get())?,
            slow_period: get_period(params, "ema_slow_period", d.ema_slow_period.get())?,
            slope_lookback: get_period(params, "ema_slope_lookback", d.ema_slope_lookback.get())?,
            breach_threshold: get_ratio(params, "ema_breach_threshold", d.ema_breach_threshold.get())?
                .get(),
            min_volume_confirmation: get_factor(
                params,
                "ema_min_volume_confirmation",
                d.ema_min_volume_confirmation,
            )?,
            retest_tolerance: get_ratio(params, "ema_retest_tolerance", d.ema_retest_tolerance.get())?
                .get(),
            touch_lookback: get_period(params, "ema_touch_lookback", d.ema_touch_lookback.get())?,
            breach_lookback: get_period(params, "ema_breach_lookback", d.ema_breach_lookback.get())?,
            active_distance: get_ratio(params, "ema_active_distance", d.ema_active_distance.get())?
                .get(),
            sensitivity: get_factor(
                params,
                "trend_detection_sensitivity",
                d.trend_detection_sensitivity,
            )?,
            volume: None,
        };
        analyzer.validate_config()?;
        Ok(analyzer)
    }

    fn detector_id_str() -> &'static str {
        "ema_momentum"
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PriceBar;

    fn window(closes: &[f64]) -> PriceWindow {
        let bars: Vec<PriceBar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar::new(i as i64, c, c + 0.1, c - 0.1, c, 1000.0))
            .collect();
        PriceWindow::from_bars(&bars).unwrap()
    }

    fn analyzer(fast: usize, slow: usize) -> EmaMomentumAnalyzer {
        let mut params = HashMap::new();
        params.insert("ema_fast_period", fast as f64);
        params.insert("ema_slow_period", slow as f64);
        EmaMomentumAnalyzer::with_params(&params).unwrap()
    }

    #[test]
    fn test_too_few_bars() {
        let a = analyzer(10, 20);
        let w = window(&[100.0; 15]);
        assert!(a.calculate_emas(&w).is_none());
        assert!(a.get_ema_signal(&w).is_none());
        assert!(a.identify_ema_support_resistance(&w).is_empty());
        assert!(a.detect_ema_breaches(&w, None).is_empty());
    }

    #[test]
    fn test_frame_columns() {
        let a = analyzer(10, 20);
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let frame = a.calculate_emas(&window(&closes)).unwrap();
        assert_eq!(frame.len(), 40);
        assert!(frame.slow[18].is_nan());
        assert!(frame.slow[19].is_finite());
        assert!(frame.separation_pct[39] > 0.0);
        assert!(frame.fast_slope[39] > 0.0);
    }

    #[test]
    fn test_strong_bullish_trend() {
        let a = analyzer(10, 20);
        let closes: Vec<f64> = (0..150).map(|i| 100.0 + i as f64 * 0.5).collect();
        let s = a.get_ema_signal(&window(&closes)).unwrap();
        assert_eq!(s.signal_type, EmaSignalType::StrongBullishTrend);
        assert_eq!(s.direction, Direction::Bullish);
        assert!(s.strength > 0.75 && s.strength <= 1.0);
        assert!(!s.crossover);
    }

    #[test]
    fn test_strong_bearish_trend() {
        let a = analyzer(10, 20);
        let closes: Vec<f64> = (0..150).map(|i| 200.0 - i as f64 * 0.5).collect();
        let s = a.get_ema_signal(&window(&closes)).unwrap();
        assert_eq!(s.signal_type, EmaSignalType::StrongBearishTrend);
    }

    #[test]
    fn test_flat_is_consolidation() {
        let a = analyzer(10, 20);
        let s = a.get_ema_signal(&window(&[100.0; 60])).unwrap();
        assert_eq!(s.signal_type, EmaSignalType::Consolidation);
        assert_eq!(s.direction, Direction::Neutral);
    }

    #[test]
    fn test_sensitivity_widens_classification() {
        // separation settles near 0.31%: weak at 1.0, moderate at 2.0
        let closes: Vec<f64> = (0..200).map(|i| 100.0 + i as f64 * 0.07).collect();
        let w = window(&closes);
        let normal = analyzer(10, 20).get_ema_signal(&w).unwrap();
        assert_eq!(normal.signal_type, EmaSignalType::WeakBullish);

        let mut sensitive = analyzer(10, 20);
        sensitive.sensitivity = 2.0;
        let s = sensitive.get_ema_signal(&w).unwrap();
        assert_eq!(s.signal_type, EmaSignalType::ModerateBullishTrend);
    }

    #[test]
    fn test_bullish_crossover() {
        let a = analyzer(3, 6);
        let mut closes = vec![100.0; 6];
        closes.extend([99.0, 98.0, 97.0, 96.0, 105.0]);
        let s = a.get_ema_signal(&window(&closes)).unwrap();
        assert!(s.crossover);
        assert_eq!(s.signal_type, EmaSignalType::StrongBullishCross);
        assert!(s.signal_type.is_crossover());
    }

    #[test]
    fn test_support_level_below_close() {
        let a = analyzer(10, 20);
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64 * 0.3).collect();
        let levels = a.identify_ema_support_resistance(&window(&closes));
        assert_eq!(levels.len(), 2);
        let close = *closes.last().unwrap();
        for l in &levels {
            assert_eq!(l.level_type, LevelType::Support);
            assert!(l.price_level <= close);
            assert!((0.0..=1.0).contains(&l.strength));
            assert!((l.strength - (l.touches as f64 / 5.0).min(1.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_resistance_level_above_close() {
        let a = analyzer(10, 20);
        let closes: Vec<f64> = (0..80).map(|i| 200.0 - i as f64 * 0.3).collect();
        let levels = a.identify_ema_support_resistance(&window(&closes));
        assert_eq!(levels.len(), 2);
        let close = *closes.last().unwrap();
        for l in &levels {
            assert_eq!(l.level_type, LevelType::Resistance);
            assert!(l.price_level > close);
            assert!(l.price_level >= close * 0.99);
            assert!((0.0..=1.0).contains(&l.strength));
        }
        let periods: Vec<usize> = levels.iter().map(|l| l.ema_period).collect();
        assert_eq!(periods, vec![10, 20]);
        // the slower EMA lags further above a falling close
        assert!(levels[1].price_level > levels[0].price_level);
    }

    #[test]
    fn test_touches_counted() {
        // flat closes with wicks reaching the EMA from above
        let bars: Vec<PriceBar> = (0..60)
            .map(|i| PriceBar::new(i, 100.0, 100.2, 99.9, 100.0, 1000.0))
            .collect();
        let w = PriceWindow::from_bars(&bars).unwrap();
        let levels = analyzer(10, 20).identify_ema_support_resistance(&w);
        assert_eq!(levels.len(), 2);
        for l in &levels {
            assert!(l.touches >= 5);
            assert_eq!(l.strength, 1.0);
            assert!(l.active);
        }
    }

    #[test]
    fn test_support_break_and_volume_confirmation() {
        let a = analyzer(5, 10);
        let mut bars: Vec<PriceBar> = (0..30)
            .map(|i| PriceBar::new(i, 100.0, 100.5, 99.5, 100.0, 1000.0))
            .collect();
        bars.push(PriceBar::new(30, 100.0, 100.0, 96.0, 97.0, 1000.0));
        let w = PriceWindow::from_bars(&bars).unwrap();

        let plain = a.detect_ema_breaches(&w, None);
        assert_eq!(plain.len(), 2);
        for b in &plain {
            assert_eq!(b.breach_type, BreachType::SupportBreak);
            assert!(b.current_price < b.breach_level);
            assert!(!b.volume_confirmed);
            assert_eq!(b.volume_ratio, 1.0);
            assert!(b.breach_magnitude >= 0.0);
            assert!((0.0..=1.0).contains(&b.confidence));
        }

        bars[30].volume = 3000.0;
        let w = PriceWindow::from_bars(&bars).unwrap();
        let volume = VolumeAnalyzer::default();
        let confirmed = a.detect_ema_breaches(&w, Some(&volume));
        assert_eq!(confirmed.len(), 2);
        for (c, p) in confirmed.iter().zip(&plain) {
            assert!(c.volume_confirmed);
            assert!(c.volume_ratio > 1.5);
            assert!(c.confidence > p.confidence);
        }
    }

    #[test]
    fn test_resistance_retest() {
        let a = analyzer(5, 10);
        let mut closes = vec![100.0; 20];
        // break above, then drift back onto the level
        closes.push(103.0);
        closes.push(101.0);
        closes.push(100.9);
        let w = window(&closes);
        let frame = a.calculate_emas(&w).unwrap();
        let fast_level = frame.fast[22];

        // put the final close on the fast EMA, just above it
        let mut adjusted = closes.clone();
        adjusted[22] = fast_level * 1.001;
        let w = window(&adjusted);
        let breaches = a.detect_ema_breaches(&w, None);
        assert!(breaches
            .iter()
            .any(|b| b.breach_type == BreachType::ResistanceRetest && b.ema_period == 5));
    }

    #[test]
    fn test_evaluate_signals() {
        let a = analyzer(10, 20);
        let closes: Vec<f64> = (0..150).map(|i| 100.0 + i as f64 * 0.5).collect();
        let report = a.evaluate(&window(&closes)).unwrap();
        let signals = report.signals();
        assert!(!signals.is_empty());
        assert_eq!(signals[0].name(), "strong_bullish_trend");
        assert!(signals.iter().all(|s| s.source == DetectorId::EmaMomentum));
    }

    #[test]
    fn test_with_params_validation() {
        let mut params = HashMap::new();
        params.insert("ema_fast_period", 30.0);
        params.insert("ema_slow_period", 20.0);
        assert!(EmaMomentumAnalyzer::with_params(&params).is_err());
        assert_eq!(EmaMomentumAnalyzer::param_meta().len(), 10);
        assert_eq!(EmaMomentumAnalyzer::detector_id_str(), "ema_momentum");
    }
}
