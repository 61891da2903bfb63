//! Volume analyzer
//!
//! Volume spikes against a rolling baseline: climactic exhaustion,
//! breakout confirmation, volume/price divergence and the volume filter the
//! engine applies to other detectors' signals.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use super::helpers::{clamp01, max_finite, mean_finite, min_finite};
use crate::{
    indicators::atr,
    params::{get_factor, get_period, get_ratio, validate_values, ParamMeta, ParameterizedDetector},
    DetectorId, Direction, OHLCVExt, Period, PriceWindow, Result, Signal, SignalKind, SignalSource,
    TrendConfig, TrendDetector,
};

impl_with_defaults!(VolumeAnalyzer);

/// Spike multiple below which exhaustion is never reported
pub const MIN_EXHAUSTION_MULTIPLE: f64 = 2.0;

/// Bars inspected for the move into a spike
const APPROACH_BARS: usize = 5;

// ============================================================
// TYPES
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeClass {
    Climactic,
    High,
    Normal,
    Low,
}

/// Volume of the final bar against its baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeConfirmation {
    pub volume_spike: bool,
    pub volume_ratio: f64,
    pub strength: f64,
    pub classification: VolumeClass,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ExhaustionVolume {
    pub detected: bool,
    pub spike_index: Option<usize>,
    pub volume_ratio: f64,
    /// Net close-to-close move over the follow bars, as a fraction of the
    /// larger of the spike bar's range and ATR
    pub follow_through: f64,
    pub direction: Direction,
    pub strength: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BreakoutVolume {
    pub confirmed: bool,
    pub strength: f64,
    pub volume_ratio: f64,
}

/// A close beyond the prior lookback range with its volume check
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BreakoutSetup {
    pub direction: Direction,
    pub level: f64,
    pub volume: BreakoutVolume,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VolumePriceDivergence {
    pub detected: bool,
    pub divergence_type: Option<Direction>,
    pub strength: f64,
}

/// Everything the analyzer reports for one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeReport {
    pub confirmation: Option<VolumeConfirmation>,
    pub exhaustion: ExhaustionVolume,
    pub breakout: Option<BreakoutSetup>,
    pub divergence: VolumePriceDivergence,
}

impl SignalSource for VolumeReport {
    fn signals(&self) -> Vec<Signal> {
        let mut out = Vec::new();
        let e = &self.exhaustion;
        if e.detected {
            out.push(
                Signal::new(
                    DetectorId::Volume,
                    SignalKind::VolumeExhaustion(e.direction),
                    e.direction,
                    e.strength,
                )
                .with_factor(format!("spike {:.2}x baseline", e.volume_ratio)),
            );
        }
        if let Some(b) = &self.breakout {
            if b.volume.confirmed {
                out.push(
                    Signal::new(
                        DetectorId::Volume,
                        SignalKind::VolumeBreakout(b.direction),
                        b.direction,
                        0.5 + 0.5 * b.volume.strength,
                    )
                    .with_factor(format!("breakout through {:.5}", b.level))
                    .with_factor(format!("volume {:.2}x baseline", b.volume.volume_ratio)),
                );
            }
        }
        let d = &self.divergence;
        if let (true, Some(direction)) = (d.detected, d.divergence_type) {
            out.push(
                Signal::new(
                    DetectorId::Volume,
                    SignalKind::VolumePriceDivergence(direction),
                    direction,
                    d.strength,
                )
                .with_factor("price extreme on declining volume"),
            );
        }
        out
    }
}

// ============================================================
// ANALYZER
// ============================================================

static VOLUME_PARAMS: &[ParamMeta] = &[
    ParamMeta::period(
        "volume_ma_period",
        20.0,
        (2.0, 200.0, 1.0),
        "Bars in the rolling volume baseline",
    ),
    ParamMeta::factor(
        "min_volume_ma",
        0.0,
        (0.0, 1e12, 100.0),
        "Baseline below which volume analysis is unavailable",
    ),
    ParamMeta::period(
        "volume_lookback",
        20.0,
        (4.0, 200.0, 1.0),
        "Bars scanned for spikes, breakouts and divergence",
    ),
    ParamMeta::factor(
        "exhaustion_spike_multiple",
        2.0,
        (2.0, 10.0, 0.5),
        "Volume multiple of the baseline that marks a spike",
    ),
    ParamMeta::period(
        "exhaustion_follow_bars",
        3.0,
        (1.0, 20.0, 1.0),
        "Bars after a spike that must stay quiet",
    ),
    ParamMeta::ratio(
        "exhaustion_follow_ratio",
        0.3,
        (0.05, 1.0, 0.05),
        "Largest follow-through, as a fraction of the spike range or ATR",
    ),
    ParamMeta::factor(
        "breakout_volume_multiple",
        1.3,
        (1.0, 5.0, 0.1),
        "Volume multiple that confirms a breakout",
    ),
    ParamMeta::ratio(
        "volume_filter_threshold",
        0.3,
        (0.0, 1.0, 0.05),
        "Volume score a signal needs to survive the filter",
    ),
];

#[derive(Debug, Clone)]
pub struct VolumeAnalyzer {
    pub ma_period: Period,
    pub min_volume_ma: f64,
    pub lookback: Period,
    pub spike_multiple: f64,
    pub follow_bars: Period,
    pub follow_ratio: f64,
    pub atr_period: Period,
    pub breakout_multiple: f64,
    pub filter_enabled: bool,
    pub filter_threshold: f64,
}

impl Default for VolumeAnalyzer {
    fn default() -> Self {
        Self::from_config(&TrendConfig::default())
    }
}

impl VolumeAnalyzer {
    pub fn from_config(c: &TrendConfig) -> Self {
        Self {
            ma_period: c.volume_ma_period,
            min_volume_ma: c.min_volume_ma,
            lookback: c.volume_lookback,
            spike_multiple: c.exhaustion_spike_multiple,
            follow_bars: c.exhaustion_follow_bars,
            follow_ratio: c.exhaustion_follow_ratio.get(),
            atr_period: c.atr_period,
            breakout_multiple: c.breakout_volume_multiple,
            filter_enabled: c.volume_filter_enabled,
            filter_threshold: c.volume_filter_threshold.get(),
        }
    }

    /// Mean volume of up to `period` bars before `index`; `None` below
    /// `min_volume_ma` or without data
    fn baseline(&self, window: &PriceWindow, index: usize, period: usize) -> Option<f64> {
        let start = index.saturating_sub(period);
        if start >= index || index > window.len() {
            return None;
        }
        mean_finite(&window.volume()[start..index]).filter(|m| *m > 0.0 && *m >= self.min_volume_ma)
    }

    /// Volume at `index` over the `volume_ma_period` baseline before it
    pub fn volume_ratio_at(&self, window: &PriceWindow, index: usize) -> Option<f64> {
        let v = *window.volume().get(index)?;
        if !v.is_finite() {
            return None;
        }
        Some(v / self.baseline(window, index, self.ma_period.get())?)
    }

    /// Classify the final bar's volume
    pub fn volume_confirmation(&self, window: &PriceWindow) -> Option<VolumeConfirmation> {
        let ratio = self.volume_ratio_at(window, window.len().checked_sub(1)?)?;
        if ratio <= 0.0 {
            return None;
        }
        let classification = if ratio >= self.spike_multiple * 1.5 {
            VolumeClass::Climactic
        } else if ratio >= self.breakout_multiple {
            VolumeClass::High
        } else if ratio < 0.7 {
            VolumeClass::Low
        } else {
            VolumeClass::Normal
        };
        Some(VolumeConfirmation {
            volume_spike: ratio >= self.spike_multiple,
            volume_ratio: ratio,
            strength: clamp01(ratio / (self.spike_multiple * 1.5)),
            classification,
        })
    }

    /// Most recent spike in the trailing `lookback` bars that still has
    /// `exhaustion_follow_bars` bars after it, and whether price stalled
    /// after it
    pub fn detect_exhaustion_volume(&self, window: &PriceWindow, lookback: usize) -> ExhaustionVolume {
        let n = window.len();
        let f = self.follow_bars.get();
        if n < f + 2 {
            return ExhaustionVolume::default();
        }
        let last = n - 1 - f;
        let first = n.saturating_sub(lookback).max(1);
        if first > last {
            return ExhaustionVolume::default();
        }
        let threshold = self.spike_multiple.max(MIN_EXHAUSTION_MULTIPLE);

        let spike = (first..=last).rev().find_map(|s| {
            self.volume_ratio_at(window, s)
                .filter(|r| *r >= threshold)
                .map(|r| (s, r))
        });
        let Some((s, ratio)) = spike else {
            return ExhaustionVolume::default();
        };
        let Some(bar) = window.bar(s) else {
            return ExhaustionVolume::default();
        };

        let close = window.close();
        let atr_at_spike = atr(window.high(), window.low(), close, self.atr_period.get())
            .get(s)
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);
        // narrow absorption bars are measured against ATR
        let scale = bar.range().max(atr_at_spike);
        let moved = (close[s + f] - close[s]).abs();
        let limit = self.follow_ratio * scale;
        let follow_through = if scale > 0.0 { moved / scale } else { 0.0 };
        let detected = scale > 0.0 && moved.is_finite() && moved < limit;

        let back = APPROACH_BARS.min(s);
        let approach = close[s] - close[s - back];
        let direction = if approach < 0.0 || (approach == 0.0 && bar.is_bearish()) {
            Direction::Bullish
        } else if approach > 0.0 || bar.is_bullish() {
            Direction::Bearish
        } else {
            Direction::Neutral
        };

        let strength = if detected {
            clamp01((1.0 - 1.0 / ratio) * (0.5 + 0.5 * (1.0 - moved / limit)))
        } else {
            0.0
        };
        trace!(spike_index = s, volume_ratio = ratio, detected, "volume spike");

        ExhaustionVolume {
            detected,
            spike_index: Some(s),
            volume_ratio: ratio,
            follow_through,
            direction,
            strength,
        }
    }

    /// Volume of the final bar against the `lookback` bars before it, for a
    /// close past `breakout_price`
    pub fn confirm_breakout_volume(
        &self,
        window: &PriceWindow,
        breakout_price: f64,
        direction: Direction,
        lookback: usize,
    ) -> BreakoutVolume {
        let Some(i) = window.len().checked_sub(1) else {
            return BreakoutVolume::default();
        };
        let v = window.volume()[i];
        let Some(base) = self.baseline(window, i, lookback).filter(|_| v.is_finite()) else {
            return BreakoutVolume::default();
        };
        let ratio = v / base;
        let close = window.close()[i];
        let past = match direction {
            Direction::Bullish => close > breakout_price,
            Direction::Bearish => close < breakout_price,
            Direction::Neutral => false,
        };
        BreakoutVolume {
            confirmed: past && ratio >= self.breakout_multiple,
            strength: clamp01((ratio - 1.0) / 2.0),
            volume_ratio: ratio,
        }
    }

    /// Price extreme in the second half of the lookback on lower volume
    /// than the first half. `Direction::Neutral` checks both sides.
    pub fn detect_volume_price_divergence(
        &self,
        window: &PriceWindow,
        direction: Direction,
        lookback: usize,
    ) -> VolumePriceDivergence {
        let n = window.len();
        let lb = lookback.min(n);
        if lb < 4 {
            return VolumePriceDivergence::default();
        }
        let mid = n - lb / 2;
        let (first, second) = (n - lb..mid, mid..n);
        let volume = window.volume();
        let (Some(v1), Some(v2)) = (
            mean_finite(&volume[first.clone()]),
            mean_finite(&volume[second.clone()]),
        ) else {
            return VolumePriceDivergence::default();
        };
        if v1 <= 0.0 || v2 >= v1 || v1 < self.min_volume_ma {
            return VolumePriceDivergence::default();
        }
        let decline = 1.0 - v2 / v1;

        let score = |move_beyond: Option<f64>| -> f64 {
            match move_beyond {
                Some(m) if m > 0.0 => {
                    clamp01(0.5 * (decline / 0.5).min(1.0) + 0.5 * (m / 0.02).min(1.0))
                }
                _ => 0.0,
            }
        };
        let (low, high) = (window.low(), window.high());
        let bullish = match (min_finite(&low[first.clone()]), min_finite(&low[second.clone()])) {
            (Some(a), Some(b)) if a > 0.0 => score(Some((a - b) / a)),
            _ => 0.0,
        };
        let bearish = match (max_finite(&high[first]), max_finite(&high[second])) {
            (Some(a), Some(b)) if a > 0.0 => score(Some((b - a) / a)),
            _ => 0.0,
        };

        let pick = match direction {
            Direction::Bullish => (Direction::Bullish, bullish),
            Direction::Bearish => (Direction::Bearish, bearish),
            Direction::Neutral if bearish > bullish => (Direction::Bearish, bearish),
            Direction::Neutral => (Direction::Bullish, bullish),
        };
        if pick.1 <= 0.0 {
            return VolumePriceDivergence::default();
        }
        VolumePriceDivergence {
            detected: true,
            divergence_type: Some(pick.0),
            strength: pick.1,
        }
    }

    /// Volume score of the final bar, 0..=1. Unknown volume scores 1.
    pub fn volume_score(&self, window: &PriceWindow) -> f64 {
        match window.len().checked_sub(1).and_then(|i| self.volume_ratio_at(window, i)) {
            Some(ratio) => clamp01(ratio / 2.0),
            None => 1.0,
        }
    }

    /// Keep signals whose volume score reaches `threshold`.
    ///
    /// Volume signals carry their own confirmation and always score 1.
    /// Identity when the filter is disabled.
    pub fn filter_signals_by_volume(
        &self,
        signals: &[Signal],
        window: &PriceWindow,
        threshold: f64,
    ) -> Vec<Signal> {
        if !self.filter_enabled {
            return signals.to_vec();
        }
        let score = self.volume_score(window);
        signals
            .iter()
            .filter(|s| {
                let own = if s.source == DetectorId::Volume { 1.0 } else { score };
                own >= threshold
            })
            .cloned()
            .collect()
    }

    fn breakout(&self, window: &PriceWindow) -> Option<BreakoutSetup> {
        let n = window.len();
        let lb = self.lookback.get();
        if n < lb + 1 {
            return None;
        }
        let close = window.last_close()?;
        let prior = n - 1 - lb..n - 1;
        let resistance = max_finite(&window.high()[prior.clone()])?;
        let support = min_finite(&window.low()[prior])?;
        let (direction, level) = if close > resistance {
            (Direction::Bullish, resistance)
        } else if close < support {
            (Direction::Bearish, support)
        } else {
            return None;
        };
        Some(BreakoutSetup {
            direction,
            level,
            volume: self.confirm_breakout_volume(window, level, direction, lb),
        })
    }
}

impl TrendDetector for VolumeAnalyzer {
    type Output = VolumeReport;

    fn id(&self) -> DetectorId {
        DetectorId::Volume
    }

    fn min_bars(&self) -> usize {
        self.ma_period.get() + 1
    }

    fn evaluate(&self, window: &PriceWindow) -> Option<VolumeReport> {
        let lb = self.lookback.get();
        Some(VolumeReport {
            confirmation: self.volume_confirmation(window),
            exhaustion: self.detect_exhaustion_volume(window, lb),
            breakout: self.breakout(window),
            divergence: self.detect_volume_price_divergence(window, Direction::Neutral, lb),
        })
    }

    fn validate_config(&self) -> Result<()> {
        validate_values(
            VOLUME_PARAMS,
            &[
                ("volume_ma_period", self.ma_period.get() as f64),
                ("min_volume_ma", self.min_volume_ma),
                ("volume_lookback", self.lookback.get() as f64),
                ("exhaustion_spike_multiple", self.spike_multiple),
                ("exhaustion_follow_bars", self.follow_bars.get() as f64),
                ("exhaustion_follow_ratio", self.follow_ratio),
                ("breakout_volume_multiple", self.breakout_multiple),
                ("volume_filter_threshold", self.filter_threshold),
            ],
        )
    }
}

impl ParameterizedDetector for VolumeAnalyzer {
    fn param_meta() -> &'static [ParamMeta] {
        VOLUME_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let d = TrendConfig::default();
        let analyzer = Self {
            ma_period: get_period(params, "volume_ma_period", d.volume_ma_period.get())?,
            min_volume_ma: get_factor(params, "min_volume_ma", d.min_volume_ma)?,
            lookback: get_period(params, "volume_lookback", d.volume_lookback.get())?,
            spike_multiple: get_factor(params, "exhaustion_spike_multiple", d.exhaustion_spike_multiple)?,
            follow_bars: get_period(params, "exhaustion_follow_bars", d.exhaustion_follow_bars.get())?,
            follow_ratio: get_ratio(params, "exhaustion_follow_ratio", d.exhaustion_follow_ratio.get())?
                .get(),
            atr_period: get_period(params, "atr_period", d.atr_period.get())?,
            breakout_multiple: get_factor(params, "breakout_volume_multiple", d.breakout_volume_multiple)?,
            filter_enabled: d.volume_filter_enabled,
            filter_threshold: get_ratio(params, "volume_filter_threshold", d.volume_filter_threshold.get())?
                .get(),
        };
        analyzer.validate_config()?;
        Ok(analyzer)
    }

    fn detector_id_str() -> &'static str {
        "volume"
    }
}

// ============================================================
// TESTS
// ============================================================
