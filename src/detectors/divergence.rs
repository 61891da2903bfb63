//! RSI / MACD divergence detector
//!
//! Price swings are paired with indicator swings of the same kind. A
//! divergence is a pair of consecutive matches where price makes a higher
//! high (lower low) while the indicator makes a lower high (higher low).

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use super::helpers::{clamp01, find_swing_points, SwingKind, SwingPoint};
use crate::{
    indicators::{macd, rsi},
    params::{get_period, get_ratio, validate_values, ParamMeta, ParameterizedDetector},
    DetectorId, Direction, Period, PriceWindow, Result, Signal, SignalKind, SignalSource,
    TrendConfig, TrendDetector,
};

impl_with_defaults!(DivergenceDetector);

/// Confidence multiplier for a divergence that has not been validated
const UNVALIDATED_DISCOUNT: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Rsi,
    Macd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceType {
    BullishRsi,
    BearishRsi,
    BullishMacd,
    BearishMacd,
}

impl DivergenceType {
    fn of(indicator: IndicatorKind, kind: SwingKind) -> Self {
        match (indicator, kind) {
            (IndicatorKind::Rsi, SwingKind::Low) => DivergenceType::BullishRsi,
            (IndicatorKind::Rsi, SwingKind::High) => DivergenceType::BearishRsi,
            (IndicatorKind::Macd, SwingKind::Low) => DivergenceType::BullishMacd,
            (IndicatorKind::Macd, SwingKind::High) => DivergenceType::BearishMacd,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DivergenceType::BullishRsi => "bullish_rsi",
            DivergenceType::BearishRsi => "bearish_rsi",
            DivergenceType::BullishMacd => "bullish_macd",
            DivergenceType::BearishMacd => "bearish_macd",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            DivergenceType::BullishRsi | DivergenceType::BullishMacd => Direction::Bullish,
            DivergenceType::BearishRsi | DivergenceType::BearishMacd => Direction::Bearish,
        }
    }

    pub fn indicator(self) -> IndicatorKind {
        match self {
            DivergenceType::BullishRsi | DivergenceType::BearishRsi => IndicatorKind::Rsi,
            DivergenceType::BullishMacd | DivergenceType::BearishMacd => IndicatorKind::Macd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DivergenceResult {
    pub divergence_type: DivergenceType,
    pub indicator: IndicatorKind,
    /// Matched price swings, oldest first
    pub price_points: Vec<SwingPoint>,
    /// Indicator swings matched to `price_points`, index for index
    pub indicator_points: Vec<SwingPoint>,
    pub strength: f64,
    pub validated: bool,
    /// Consecutive diverging swing pairs ending at the latest swing
    pub confirming_pairs: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DivergenceReport {
    pub divergences: Vec<DivergenceResult>,
}

impl SignalSource for DivergenceReport {
    fn signals(&self) -> Vec<Signal> {
        self.divergences
            .iter()
            .map(|d| {
                let discount = if d.validated { 1.0 } else { UNVALIDATED_DISCOUNT };
                Signal::new(
                    DetectorId::Divergence,
                    SignalKind::Divergence(d.divergence_type),
                    d.divergence_type.direction(),
                    d.strength * discount,
                )
                .with_factor(format!("{} diverging swing pair(s)", d.confirming_pairs))
            })
            .collect()
    }
}

static DIVERGENCE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period(
        "divergence_swing_strength",
        3.0,
        (1.0, 20.0, 1.0),
        "Swing window for price and indicator swings; also the matching tolerance",
    ),
    ParamMeta::period(
        "min_swing_separation",
        3.0,
        (1.0, 50.0, 1.0),
        "Minimum bars between consecutive swings of the same kind",
    ),
    ParamMeta::ratio(
        "divergence_threshold",
        0.02,
        (0.0, 0.5, 0.005),
        "Combined relative disagreement a swing pair must exceed",
    ),
    ParamMeta::period(
        "validation_swings",
        2.0,
        (2.0, 10.0, 1.0),
        "Diverging swing pairs required to validate",
    ),
    ParamMeta::period("rsi_period", 14.0, (2.0, 100.0, 1.0), "RSI period"),
    ParamMeta::period("macd_fast", 12.0, (2.0, 100.0, 1.0), "MACD fast EMA period"),
    ParamMeta::period("macd_slow", 26.0, (3.0, 200.0, 1.0), "MACD slow EMA period"),
    ParamMeta::period("macd_signal", 9.0, (2.0, 100.0, 1.0), "MACD signal EMA period"),
];

#[derive(Debug, Clone)]
pub struct DivergenceDetector {
    pub swing_strength: Period,
    pub min_separation: Period,
    pub threshold: f64,
    pub validation_swings: Period,
    pub rsi_period: Period,
    pub macd_fast: Period,
    pub macd_slow: Period,
    pub macd_signal: Period,
}

impl Default for DivergenceDetector {
    fn default() -> Self {
        Self::from_config(&TrendConfig::default())
    }
}

impl DivergenceDetector {
    pub fn from_config(c: &TrendConfig) -> Self {
        Self {
            swing_strength: c.divergence_swing_strength,
            min_separation: c.min_swing_separation,
            threshold: c.divergence_threshold.get(),
            validation_swings: c.validation_swings,
            rsi_period: c.rsi_period,
            macd_fast: c.macd_fast,
            macd_slow: c.macd_slow,
            macd_signal: c.macd_signal,
        }
    }

    pub fn detect_rsi_divergence(&self, window: &PriceWindow) -> Option<DivergenceResult> {
        let series = rsi(window.close(), self.rsi_period.get());
        self.detect_against(window, &series, IndicatorKind::Rsi)
    }

    /// Divergence against the MACD line
    pub fn detect_macd_divergence(&self, window: &PriceWindow) -> Option<DivergenceResult> {
        let series = macd(
            window.close(),
            self.macd_fast.get(),
            self.macd_slow.get(),
            self.macd_signal.get(),
        );
        self.detect_against(window, &series.macd, IndicatorKind::Macd)
    }

    /// RSI then MACD divergence, whichever are present
    pub fn detect_all(&self, window: &PriceWindow) -> Vec<DivergenceResult> {
        [
            self.detect_rsi_divergence(window),
            self.detect_macd_divergence(window),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// At least `max(validation_swings, 2)` consecutive diverging pairs
    pub fn validate_divergence(&self, result: &DivergenceResult) -> bool {
        result.confirming_pairs >= self.validation_swings.get().max(2)
    }

    // ===========================================
    // Internal helpers
    // ===========================================

    fn detect_against(
        &self,
        window: &PriceWindow,
        indicator: &[f64],
        kind: IndicatorKind,
    ) -> Option<DivergenceResult> {
        let bearish = self.divergence_in(window.high(), indicator, SwingKind::High, kind);
        let bullish = self.divergence_in(window.low(), indicator, SwingKind::Low, kind);

        let picked = match (bearish, bullish) {
            (Some(s), Some(b)) => {
                let (s_last, b_last) = (last_index(&s), last_index(&b));
                if b_last > s_last || (b_last == s_last && b.strength > s.strength) {
                    Some(b)
                } else {
                    Some(s)
                }
            }
            (s, b) => s.or(b),
        };
        if let Some(d) = &picked {
            trace!(
                divergence = d.divergence_type.as_str(),
                strength = d.strength,
                pairs = d.confirming_pairs,
                "divergence"
            );
        }
        picked
    }

    fn divergence_in(
        &self,
        price: &[f64],
        indicator: &[f64],
        kind: SwingKind,
        indicator_kind: IndicatorKind,
    ) -> Option<DivergenceResult> {
        let w = self.swing_strength.get();
        let sep = self.min_separation.get();
        let price_swings = find_swing_points(price, kind, w, sep);
        let indicator_swings = find_swing_points(indicator, kind, w, sep);
        let pairs = match_swings(&price_swings, &indicator_swings, w);
        if pairs.len() < 2 {
            return None;
        }

        let diverging = |a: &(SwingPoint, SwingPoint), b: &(SwingPoint, SwingPoint)| {
            self.disagreement(a, b, kind, indicator_kind)
                .filter(|d| *d > self.threshold)
        };

        let last = pairs.len() - 1;
        let latest = diverging(&pairs[last - 1], &pairs[last])?;
        let mut confirming = 1;
        while confirming < last && diverging(&pairs[last - confirming - 1], &pairs[last - confirming]).is_some() {
            confirming += 1;
        }

        let chain = &pairs[last - confirming..];
        let mut result = DivergenceResult {
            divergence_type: DivergenceType::of(indicator_kind, kind),
            indicator: indicator_kind,
            price_points: chain.iter().map(|(p, _)| *p).collect(),
            indicator_points: chain.iter().map(|(_, q)| *q).collect(),
            strength: clamp01(latest / (5.0 * self.threshold.max(1e-4))),
            validated: false,
            confirming_pairs: confirming,
        };
        result.validated = self.validate_divergence(&result);
        Some(result)
    }

    /// Combined relative disagreement of two consecutive matches, `None`
    /// when price and indicator move the same way
    fn disagreement(
        &self,
        (p1, q1): &(SwingPoint, SwingPoint),
        (p2, q2): &(SwingPoint, SwingPoint),
        kind: SwingKind,
        indicator_kind: IndicatorKind,
    ) -> Option<f64> {
        // price extends, indicator fails to
        if !kind.beyond(p2.price, p1.price) || !kind.beyond(q1.price, q2.price) {
            return None;
        }
        if p1.price == 0.0 {
            return None;
        }
        let price_rel = (p2.price - p1.price).abs() / p1.price.abs();
        let indicator_delta = (q2.price - q1.price).abs();
        let indicator_rel = match indicator_kind {
            IndicatorKind::Rsi => indicator_delta / 100.0,
            IndicatorKind::Macd => {
                let scale = q1.price.abs() + q2.price.abs();
                if scale > 0.0 {
                    indicator_delta / scale
                } else {
                    0.0
                }
            }
        };
        Some(price_rel + indicator_rel)
    }
}

/// Pair each price swing with the nearest indicator swing within
/// `tolerance` bars; matched indicator indices strictly increase
fn match_swings(
    price: &[SwingPoint],
    indicator: &[SwingPoint],
    tolerance: usize,
) -> Vec<(SwingPoint, SwingPoint)> {
    let mut pairs: Vec<(SwingPoint, SwingPoint)> = Vec::new();
    for p in price {
        let floor = pairs.last().map(|(_, q)| q.index);
        let nearest = indicator
            .iter()
            .filter(|q| floor.map_or(true, |f| q.index > f))
            .filter(|q| q.index.abs_diff(p.index) <= tolerance)
            .min_by_key(|q| q.index.abs_diff(p.index));
        if let Some(q) = nearest {
            pairs.push((*p, *q));
        }
    }
    pairs
}

fn last_index(d: &DivergenceResult) -> usize {
    d.price_points.last().map_or(0, |p| p.index)
}

impl TrendDetector for DivergenceDetector {
    type Output = DivergenceReport;

    fn id(&self) -> DetectorId {
        DetectorId::Divergence
    }

    fn min_bars(&self) -> usize {
        (self.rsi_period.get() + 1)
            .max(self.macd_slow.get() + self.macd_signal.get())
            .max(2 * self.swing_strength.get() + 1)
    }

    fn evaluate(&self, window: &PriceWindow) -> Option<DivergenceReport> {
        let divergences = self.detect_all(window);
        (!divergences.is_empty()).then_some(DivergenceReport { divergences })
    }

    fn validate_config(&self) -> Result<()> {
        validate_values(
            DIVERGENCE_PARAMS,
            &[
                ("divergence_swing_strength", self.swing_strength.get() as f64),
                ("min_swing_separation", self.min_separation.get() as f64),
                ("divergence_threshold", self.threshold),
                ("validation_swings", self.validation_swings.get() as f64),
                ("rsi_period", self.rsi_period.get() as f64),
                ("macd_fast", self.macd_fast.get() as f64),
                ("macd_slow", self.macd_slow.get() as f64),
                ("macd_signal", self.macd_signal.get() as f64),
            ],
        )
    }
}

impl ParameterizedDetector for DivergenceDetector {
    fn param_meta() -> &'static [ParamMeta] {
        DIVERGENCE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let d = TrendConfig::default();
        let detector = Self {
            swing_strength: get_period(
                params,
                "divergence_swing_strength",
                d.divergence_swing_strength.get(),
            )?,
            min_separation: get_period(params, "min_swing_separation", d.min_swing_separation.get())?,
            threshold: get_ratio(params, "divergence_threshold", d.divergence_threshold.get())?.get(),
            validation_swings: get_period(params, "validation_swings", d.validation_swings.get())?,
            rsi_period: get_period(params, "rsi_period", d.rsi_period.get())?,
            macd_fast: get_period(params, "macd_fast", d.macd_fast.get())?,
            macd_slow: get_period(params, "macd_slow", d.macd_slow.get())?,
            macd_signal: get_period(params, "macd_signal", d.macd_signal.get())?,
        };
        detector.validate_config()?;
        Ok(detector)
    }

    fn detector_id_str() -> &'static str {
        "divergence"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PriceBar;

    fn detector(strength: usize) -> DivergenceDetector {
        DivergenceDetector {
            swing_strength: Period::new(strength).unwrap(),
            min_separation: Period::new(1).unwrap(),
            ..DivergenceDetector::default()
        }
    }

    #[test]
    fn test_bearish_divergence_validated() {
        let price = [1.0, 3.0, 1.0, 4.0, 1.0, 5.0, 1.0];
        let rsi = [10.0, 60.0, 10.0, 50.0, 10.0, 40.0, 10.0];
        let d = detector(1)
            .divergence_in(&price, &rsi, SwingKind::High, IndicatorKind::Rsi)
            .unwrap();
        assert_eq!(d.divergence_type, DivergenceType::BearishRsi);
        assert_eq!(d.confirming_pairs, 2);
        assert!(d.validated);
        assert_eq!(d.price_points.len(), 3);
        assert_eq!(d.indicator_points.len(), 3);
        // (5 - 4) / 4 + 10 / 100 over 5 * 0.02
        assert_eq!(d.strength, 1.0);
    }

    #[test]
    fn test_single_pair_never_validates() {
        let price = [1.0, 3.0, 1.0, 4.0, 1.0];
        let rsi = [10.0, 60.0, 10.0, 50.0, 10.0];
        let d = detector(1)
            .divergence_in(&price, &rsi, SwingKind::High, IndicatorKind::Rsi)
            .unwrap();
        assert_eq!(d.confirming_pairs, 1);
        assert!(!d.validated);
        assert_eq!(d.price_points.len(), 2);

        let signals = DivergenceReport { divergences: vec![d.clone()] }.signals();
        assert!((signals[0].confidence - d.strength * UNVALIDATED_DISCOUNT).abs() < 1e-12);
    }

    #[test]
    fn test_only_latest_chain_counts() {
        // first pair agrees, last two diverge
        let price = [1.0, 3.0, 1.0, 4.0, 1.0, 5.0, 1.0, 6.0, 1.0];
        let rsi = [10.0, 40.0, 10.0, 60.0, 10.0, 50.0, 10.0, 45.0, 10.0];
        let d = detector(1)
            .divergence_in(&price, &rsi, SwingKind::High, IndicatorKind::Rsi)
            .unwrap();
        assert_eq!(d.confirming_pairs, 2);
        assert_eq!(d.price_points[0].index, 3);
    }

    #[test]
    fn test_bullish_macd_divergence() {
        let price = [5.0, 3.0, 5.0, 2.0, 5.0];
        let line = [0.0, -2.0, 0.0, -1.0, 0.0];
        let d = detector(1)
            .divergence_in(&price, &line, SwingKind::Low, IndicatorKind::Macd)
            .unwrap();
        assert_eq!(d.divergence_type, DivergenceType::BullishMacd);
        assert_eq!(d.divergence_type.direction(), Direction::Bullish);
        assert_eq!(d.indicator, IndicatorKind::Macd);
    }

    #[test]
    fn test_agreement_is_not_divergence() {
        let price = [1.0, 3.0, 1.0, 4.0, 1.0, 5.0, 1.0];
        let rsi = [10.0, 40.0, 10.0, 50.0, 10.0, 60.0, 10.0];
        assert!(detector(1)
            .divergence_in(&price, &rsi, SwingKind::High, IndicatorKind::Rsi)
            .is_none());
    }

    #[test]
    fn test_threshold_gates_divergence() {
        let price = [100.0, 101.0, 100.0, 101.1, 100.0];
        // 0.1 / 101 + 3 / 100
        let rsi = [50.0, 60.0, 50.0, 57.0, 50.0];
        let mut d = detector(1);
        assert!(d.divergence_in(&price, &rsi, SwingKind::High, IndicatorKind::Rsi).is_some());
        d.threshold = 0.05;
        assert!(d.divergence_in(&price, &rsi, SwingKind::High, IndicatorKind::Rsi).is_none());
    }

    #[test]
    fn test_unmatched_swings_are_skipped() {
        // indicator peaks two bars away from the price peaks
        let price = [1.0, 3.0, 1.0, 1.0, 1.0, 4.0, 1.0, 1.0, 1.0];
        let rsi = [10.0, 10.0, 10.0, 60.0, 10.0, 10.0, 10.0, 50.0, 10.0];
        assert!(detector(1)
            .divergence_in(&price, &rsi, SwingKind::High, IndicatorKind::Rsi)
            .is_none());
    }

    #[test]
    fn test_validate_divergence_floor() {
        let point = SwingPoint { index: 0, price: 1.0, kind: SwingKind::High, strength: 1 };
        let mut result = DivergenceResult {
            divergence_type: DivergenceType::BearishRsi,
            indicator: IndicatorKind::Rsi,
            price_points: vec![point, point],
            indicator_points: vec![point, point],
            strength: 0.5,
            validated: false,
            confirming_pairs: 1,
        };
        let mut d = DivergenceDetector::default();
        assert!(!d.validate_divergence(&result));
        result.confirming_pairs = 2;
        assert!(d.validate_divergence(&result));
        d.validation_swings = Period::new(3).unwrap();
        assert!(!d.validate_divergence(&result));
    }

    #[test]
    fn test_monotonic_window_has_no_divergence() {
        let bars: Vec<PriceBar> = (0..80)
            .map(|i| {
                let c = 100.0 + i as f64;
                PriceBar::new(i, c, c + 0.5, c - 0.5, c, 1000.0)
            })
            .collect();
        let w = PriceWindow::from_bars(&bars).unwrap();
        let d = DivergenceDetector::default();
        assert!(d.detect_all(&w).is_empty());
        assert!(d.evaluate(&w).is_none());
    }

    #[test]
    fn test_min_bars_covers_macd_warmup() {
        assert_eq!(DivergenceDetector::default().min_bars(), 35);
    }
}
