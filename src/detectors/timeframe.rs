//! Multi-timeframe alignment
//!
//! Each timeframe gets a [`TimeframeVerdict`] from the same EMA
//! classification the primary detector uses, plus MACD momentum and
//! ADX/ATR context. The alignment score weighs direction, separation and
//! momentum agreement.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use super::ema::{EmaMomentumAnalyzer, EmaSignalType};
use super::helpers::clamp01;
use crate::{
    indicators::{adx, atr, macd, IndicatorParams, IndicatorSeries},
    params::{get_period, get_ratio, validate_values, MtfComponentWeights, ParamMeta, ParameterizedDetector},
    Direction, PriceWindow, Result, TradeSide, TrendConfig, TrendDetector,
};

impl_with_defaults!(MultiTimeframeAnalyzer);

/// Share of the alignment threshold a contradicting score may reach
const CONTRADICTION_CAP: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationLevel {
    None,
    Weak,
    Moderate,
    Strong,
}

/// One timeframe's read of the trend
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeframeVerdict {
    pub direction: Direction,
    pub ema_signal_type: EmaSignalType,
    pub separation_pct: f64,
    /// Latest MACD histogram, 0 while warming up
    pub momentum: f64,
    /// Latest ADX
    pub trend_strength: Option<f64>,
    /// Latest ATR as a percentage of the close
    pub volatility_pct: Option<f64>,
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeframeAlignmentResult {
    pub primary_signal: TimeframeVerdict,
    pub higher_signal: TimeframeVerdict,
    pub alignment_score: f64,
    pub confirmation_level: ConfirmationLevel,
    pub factors: Vec<String>,
    /// The two timeframes point in opposite directions
    pub contradiction: bool,
}

static MTF_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "mtf_alignment_threshold",
        0.6,
        (0.1, 1.0, 0.05),
        "Alignment score at which the higher timeframe confirms (Moderate)",
    ),
    ParamMeta::ratio(
        "mtf_contradiction_penalty",
        0.5,
        (0.0, 1.0, 0.05),
        "Score reduction when the timeframes point in opposite directions",
    ),
    ParamMeta::period("atr_period", 14.0, (2.0, 100.0, 1.0), "ATR period for timeframe context"),
    ParamMeta::period("adx_period", 14.0, (2.0, 100.0, 1.0), "ADX period for timeframe context"),
];

#[derive(Debug, Clone)]
pub struct MultiTimeframeAnalyzer {
    pub ema: EmaMomentumAnalyzer,
    pub indicator_params: IndicatorParams,
    pub weights: MtfComponentWeights,
    pub alignment_threshold: f64,
    pub contradiction_penalty: f64,
}

impl Default for MultiTimeframeAnalyzer {
    fn default() -> Self {
        Self::from_config(&TrendConfig::default())
    }
}

impl MultiTimeframeAnalyzer {
    pub fn from_config(c: &TrendConfig) -> Self {
        Self {
            ema: EmaMomentumAnalyzer::from_config(c),
            indicator_params: IndicatorParams::from(c),
            weights: c.mtf_component_weights,
            alignment_threshold: c.mtf_alignment_threshold.get(),
            contradiction_penalty: c.mtf_contradiction_penalty.get(),
        }
    }

    /// Trend read of one window; `None` while the slow EMA is warming up
    pub fn verdict(&self, window: &PriceWindow) -> Option<TimeframeVerdict> {
        let signal = self.ema.get_ema_signal(window)?;
        let p = &self.indicator_params;
        let (high, low, close) = (window.high(), window.low(), window.close());
        let histogram = macd(close, p.macd_fast, p.macd_slow, p.macd_signal).histogram;
        let trend = adx(high, low, close, p.adx).adx;
        let volatility_pct = IndicatorSeries::latest(&atr(high, low, close, p.atr))
            .zip(window.last_close())
            .filter(|(_, close)| *close != 0.0)
            .map(|(atr, close)| atr / close.abs() * 100.0);

        Some(TimeframeVerdict {
            direction: signal.direction,
            ema_signal_type: signal.signal_type,
            separation_pct: signal.separation_pct,
            momentum: IndicatorSeries::latest(&histogram).unwrap_or(0.0),
            trend_strength: IndicatorSeries::latest(&trend),
            volatility_pct,
            strength: signal.strength,
        })
    }

    /// Score how well `higher` supports `primary`
    pub fn analyze_timeframe_alignment(
        &self,
        primary: &PriceWindow,
        higher: &PriceWindow,
    ) -> Option<TimeframeAlignmentResult> {
        let p = self.verdict(primary)?;
        let h = self.verdict(higher)?;

        let mut factors = vec![format!(
            "higher timeframe {} ({})",
            h.direction.as_str(),
            h.ema_signal_type.as_str()
        )];
        if sign_agreement(p.momentum, h.momentum) >= 1.0 {
            factors.push("momentum agrees".to_string());
        }
        if let Some(adx) = h.trend_strength {
            factors.push(format!("higher timeframe ADX {adx:.1}"));
        }

        let contradiction = p.direction.is_opposite(h.direction);
        if contradiction {
            factors.push("timeframes contradict".to_string());
        }
        let alignment_score = self.score(&p, &h);
        let confirmation_level = self.level(alignment_score);
        trace!(
            alignment_score,
            level = ?confirmation_level,
            contradiction,
            "timeframe alignment"
        );

        Some(TimeframeAlignmentResult {
            primary_signal: p,
            higher_signal: h,
            alignment_score,
            confirmation_level,
            factors,
            contradiction,
        })
    }

    /// Alignment of the higher timeframe with `direction` instead of the
    /// primary EMA read. The primary separation and momentum keep their
    /// magnitudes but take the sign of `direction`.
    pub fn alignment_score_for(&self, result: &TimeframeAlignmentResult, direction: Direction) -> f64 {
        let p = &result.primary_signal;
        if p.direction == direction {
            return result.alignment_score;
        }
        let sign = match direction {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
            Direction::Neutral => 0.0,
        };
        let oriented = TimeframeVerdict {
            direction,
            separation_pct: sign * p.separation_pct.abs(),
            momentum: sign * p.momentum.abs(),
            ..*p
        };
        self.score(&oriented, &result.higher_signal)
    }

    /// The higher timeframe does not oppose `side` and confirms at least weakly
    pub fn should_confirm_signal(&self, result: &TimeframeAlignmentResult, side: TradeSide) -> bool {
        !result.higher_signal.direction.is_opposite(side.direction())
            && result.confirmation_level >= ConfirmationLevel::Weak
    }

    pub fn validate_config(&self) -> Result<()> {
        self.ema.validate_config()?;
        self.weights.validate()?;
        validate_values(
            MTF_PARAMS,
            &[
                ("mtf_alignment_threshold", self.alignment_threshold),
                ("mtf_contradiction_penalty", self.contradiction_penalty),
                ("atr_period", self.indicator_params.atr as f64),
                ("adx_period", self.indicator_params.adx as f64),
            ],
        )
    }

    /// Weighted component agreement, penalized and capped on contradiction
    fn score(&self, p: &TimeframeVerdict, h: &TimeframeVerdict) -> f64 {
        let verdict = direction_agreement(p.direction, h.direction);
        let separation = separation_agreement(p.separation_pct, h.separation_pct);
        let momentum = sign_agreement(p.momentum, h.momentum);

        let w = &self.weights;
        let mut score = (w.verdict * verdict + w.separation * separation + w.momentum * momentum) / w.total();
        if p.direction.is_opposite(h.direction) {
            score *= 1.0 - self.contradiction_penalty;
            score = score.min(self.alignment_threshold * CONTRADICTION_CAP);
        }
        clamp01(score)
    }

    fn level(&self, score: f64) -> ConfirmationLevel {
        let thr = self.alignment_threshold;
        if score >= thr + (1.0 - thr) / 2.0 {
            ConfirmationLevel::Strong
        } else if score >= thr {
            ConfirmationLevel::Moderate
        } else if score >= thr / 2.0 {
            ConfirmationLevel::Weak
        } else {
            ConfirmationLevel::None
        }
    }
}

fn direction_agreement(a: Direction, b: Direction) -> f64 {
    if a == Direction::Neutral || b == Direction::Neutral {
        0.5
    } else if a == b {
        1.0
    } else {
        0.0
    }
}

/// Same-sign separations score by how close their magnitudes are
fn separation_agreement(a: f64, b: f64) -> f64 {
    let product = a * b;
    if product > 0.0 {
        let (lo, hi) = (a.abs().min(b.abs()), a.abs().max(b.abs()));
        0.5 + 0.5 * lo / hi
    } else if product < 0.0 {
        0.0
    } else {
        0.5
    }
}

fn sign_agreement(a: f64, b: f64) -> f64 {
    let product = a * b;
    if product > 0.0 {
        1.0
    } else if product < 0.0 {
        0.0
    } else {
        0.5
    }
}

impl ParameterizedDetector for MultiTimeframeAnalyzer {
    fn param_meta() -> &'static [ParamMeta] {
        MTF_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let d = TrendConfig::default();
        let mut analyzer = Self::from_config(&d);
        analyzer.alignment_threshold =
            get_ratio(params, "mtf_alignment_threshold", d.mtf_alignment_threshold.get())?.get();
        analyzer.contradiction_penalty =
            get_ratio(params, "mtf_contradiction_penalty", d.mtf_contradiction_penalty.get())?.get();
        analyzer.indicator_params.atr = get_period(params, "atr_period", d.atr_period.get())?.get();
        analyzer.indicator_params.adx = get_period(params, "adx_period", d.adx_period.get())?.get();
        analyzer.validate_config()?;
        Ok(analyzer)
    }

    fn detector_id_str() -> &'static str {
        "timeframe"
    }
}
