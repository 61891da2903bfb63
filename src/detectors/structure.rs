//! Market structure analyzer
//!
//! Swing highs and lows of the window, the HH/HL or LH/LL sequence they
//! form, and breaks of the prior swing.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use super::helpers::{self, clamp01, SwingKind, SwingPoint};
use crate::{
    params::{get_period, get_ratio, validate_values, ParamMeta, ParameterizedDetector},
    DetectorId, Direction, Period, PriceWindow, Result, Signal, SignalKind, SignalSource,
    TrendConfig, TrendDetector,
};

impl_with_defaults!(MarketStructureAnalyzer);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureTrend {
    Uptrend,
    Downtrend,
    Ranging,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StructureBreakResult {
    pub direction: Direction,
    pub broken_swing: SwingPoint,
    pub breaking_swing: SwingPoint,
    /// Relative distance of the breaking swing beyond the broken one
    pub magnitude: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MarketStructure {
    pub trend: StructureTrend,
    pub last_swing_high: Option<SwingPoint>,
    pub last_swing_low: Option<SwingPoint>,
    pub structure_break: Option<StructureBreakResult>,
}

impl SignalSource for MarketStructure {
    fn signals(&self) -> Vec<Signal> {
        self.structure_break
            .iter()
            .map(|b| {
                Signal::new(
                    DetectorId::MarketStructure,
                    SignalKind::StructureBreak(b.direction),
                    b.direction,
                    b.confidence,
                )
                .with_factor(format!(
                    "swing at bar {} broke bar {} by {:.4}",
                    b.breaking_swing.index, b.broken_swing.index, b.magnitude
                ))
            })
            .collect()
    }
}

static STRUCTURE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period(
        "min_swing_strength",
        3.0,
        (1.0, 20.0, 1.0),
        "Bars on each side a swing must exceed",
    ),
    ParamMeta::period(
        "min_swing_separation",
        3.0,
        (1.0, 50.0, 1.0),
        "Minimum bars between consecutive swings of the same kind",
    ),
    ParamMeta::ratio(
        "structure_break_threshold",
        0.001,
        (0.0, 0.05, 0.0005),
        "Relative distance beyond the prior swing that counts as a break",
    ),
];

#[derive(Debug, Clone)]
pub struct MarketStructureAnalyzer {
    pub swing_strength: Period,
    pub min_separation: Period,
    pub break_threshold: f64,
}

impl Default for MarketStructureAnalyzer {
    fn default() -> Self {
        Self::from_config(&TrendConfig::default())
    }
}

impl MarketStructureAnalyzer {
    pub fn from_config(c: &TrendConfig) -> Self {
        Self {
            swing_strength: c.min_swing_strength,
            min_separation: c.min_swing_separation,
            break_threshold: c.structure_break_threshold.get(),
        }
    }

    /// Swing highs (on the high column) or lows (on the low column)
    pub fn find_swing_points(&self, window: &PriceWindow, kind: SwingKind) -> Vec<SwingPoint> {
        let values = match kind {
            SwingKind::High => window.high(),
            SwingKind::Low => window.low(),
        };
        helpers::find_swing_points(
            values,
            kind,
            self.swing_strength.get(),
            self.min_separation.get(),
        )
    }

    /// Break of the prior swing by the latest one
    pub fn detect_structure_break(&self, window: &PriceWindow) -> Option<StructureBreakResult> {
        let highs = self.find_swing_points(window, SwingKind::High);
        let lows = self.find_swing_points(window, SwingKind::Low);
        self.break_of(&highs, &lows)
    }

    /// Trend classification plus the latest break
    pub fn analyze_structure(&self, window: &PriceWindow) -> Option<MarketStructure> {
        let highs = self.find_swing_points(window, SwingKind::High);
        let lows = self.find_swing_points(window, SwingKind::Low);
        if highs.is_empty() && lows.is_empty() {
            return None;
        }

        let trend = match (last_two(&highs), last_two(&lows)) {
            (Some((h1, h2)), Some((l1, l2))) => {
                if h2.price > h1.price && l2.price > l1.price {
                    StructureTrend::Uptrend
                } else if h2.price < h1.price && l2.price < l1.price {
                    StructureTrend::Downtrend
                } else {
                    StructureTrend::Ranging
                }
            }
            _ => StructureTrend::Ranging,
        };
        let structure_break = self.break_of(&highs, &lows);
        trace!(
            trend = ?trend,
            swing_highs = highs.len(),
            swing_lows = lows.len(),
            has_break = structure_break.is_some(),
            "market structure"
        );

        Some(MarketStructure {
            trend,
            last_swing_high: highs.last().copied(),
            last_swing_low: lows.last().copied(),
            structure_break,
        })
    }

    fn break_of(&self, highs: &[SwingPoint], lows: &[SwingPoint]) -> Option<StructureBreakResult> {
        let thr = self.break_threshold;
        let bullish = last_two(highs).and_then(|(prev, last)| {
            let magnitude = (last.price - prev.price) / prev.price;
            (prev.price > 0.0 && magnitude > thr).then(|| self.result(Direction::Bullish, prev, last, magnitude))
        });
        let bearish = last_two(lows).and_then(|(prev, last)| {
            let magnitude = (prev.price - last.price) / prev.price;
            (prev.price > 0.0 && magnitude > thr).then(|| self.result(Direction::Bearish, prev, last, magnitude))
        });

        match (bullish, bearish) {
            (Some(b), Some(s)) => {
                let pick_bull = match b.breaking_swing.index.cmp(&s.breaking_swing.index) {
                    std::cmp::Ordering::Greater => true,
                    std::cmp::Ordering::Less => false,
                    std::cmp::Ordering::Equal => b.magnitude >= s.magnitude,
                };
                Some(if pick_bull { b } else { s })
            }
            (b, s) => b.or(s),
        }
    }

    fn result(
        &self,
        direction: Direction,
        broken: SwingPoint,
        breaking: SwingPoint,
        magnitude: f64,
    ) -> StructureBreakResult {
        let scale = (10.0 * self.break_threshold).max(0.01);
        let max_strength = (2 * self.swing_strength.get()) as f64;
        let confidence = clamp01(
            0.5 + 0.3 * (magnitude / scale).min(1.0) + 0.2 * (breaking.strength as f64 / max_strength).min(1.0),
        );
        StructureBreakResult {
            direction,
            broken_swing: broken,
            breaking_swing: breaking,
            magnitude,
            confidence,
        }
    }
}

fn last_two(swings: &[SwingPoint]) -> Option<(SwingPoint, SwingPoint)> {
    match swings {
        [.., a, b] => Some((*a, *b)),
        _ => None,
    }
}

impl TrendDetector for MarketStructureAnalyzer {
    type Output = MarketStructure;

    fn id(&self) -> DetectorId {
        DetectorId::MarketStructure
    }

    fn min_bars(&self) -> usize {
        2 * self.swing_strength.get() + 1
    }

    fn evaluate(&self, window: &PriceWindow) -> Option<MarketStructure> {
        self.analyze_structure(window)
    }

    fn validate_config(&self) -> Result<()> {
        validate_values(
            STRUCTURE_PARAMS,
            &[
                ("min_swing_strength", self.swing_strength.get() as f64),
                ("min_swing_separation", self.min_separation.get() as f64),
                ("structure_break_threshold", self.break_threshold),
            ],
        )
    }
}

impl ParameterizedDetector for MarketStructureAnalyzer {
    fn param_meta() -> &'static [ParamMeta] {
        STRUCTURE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let d = TrendConfig::default();
        let analyzer = Self {
            swing_strength: get_period(params, "min_swing_strength", d.min_swing_strength.get())?,
            min_separation: get_period(params, "min_swing_separation", d.min_swing_separation.get())?,
            break_threshold: get_ratio(
                params,
                "structure_break_threshold",
                d.structure_break_threshold.get(),
            )?
            .get(),
        };
        analyzer.validate_config()?;
        Ok(analyzer)
    }

    fn detector_id_str() -> &'static str {
        "market_structure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PriceBar;

    /// Zig-zag closes through the given turning points, one bar per unit step
    fn zigzag(points: &[f64], step: f64) -> PriceWindow {
        let mut closes = vec![points[0]];
        for pair in points.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let steps = ((to - from).abs() / step).round() as usize;
            for k in 1..=steps {
                closes.push(from + (to - from) * k as f64 / steps as f64);
            }
        }
        let bars: Vec<PriceBar> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar::new(i as i64, c, c + 0.1, c - 0.1, c, 1000.0))
            .collect();
        PriceWindow::from_bars(&bars).unwrap()
    }

    #[test]
    fn test_uptrend_structure_and_bullish_break() {
        let w = zigzag(&[100.0, 110.0, 104.0, 115.0, 108.0, 120.0, 112.0], 1.0);
        let a = MarketStructureAnalyzer::default();
        let s = a.analyze_structure(&w).unwrap();
        assert_eq!(s.trend, StructureTrend::Uptrend);

        let b = s.structure_break.unwrap();
        assert_eq!(b.direction, Direction::Bullish);
        assert!((b.broken_swing.price - 115.1).abs() < 1e-9);
        assert!((b.breaking_swing.price - 120.1).abs() < 1e-9);
        assert!(b.magnitude > 0.04);
        assert!(b.confidence > 0.5 && b.confidence <= 1.0);
        assert_eq!(a.detect_structure_break(&w), Some(b));
    }

    #[test]
    fn test_downtrend_structure_and_bearish_break() {
        let w = zigzag(&[120.0, 110.0, 116.0, 105.0, 112.0, 100.0, 108.0], 1.0);
        let s = MarketStructureAnalyzer::default().analyze_structure(&w).unwrap();
        assert_eq!(s.trend, StructureTrend::Downtrend);
        let b = s.structure_break.unwrap();
        assert_eq!(b.direction, Direction::Bearish);
        assert_eq!(s.signals()[0].name(), "bearish_structure_break");
    }

    #[test]
    fn test_recent_break_wins() {
        // higher high first, then a lower low later
        let w = zigzag(&[100.0, 110.0, 104.0, 115.0, 102.0, 108.0], 1.0);
        let b = MarketStructureAnalyzer::default().detect_structure_break(&w).unwrap();
        assert_eq!(b.direction, Direction::Bearish);
    }

    #[test]
    fn test_break_threshold() {
        let w = zigzag(&[100.0, 110.0, 104.0, 110.5, 105.0], 0.5);
        let mut a = MarketStructureAnalyzer::default();
        assert!(a.detect_structure_break(&w).is_some());
        a.break_threshold = 0.01;
        assert!(a.detect_structure_break(&w).is_none());
    }

    #[test]
    fn test_no_swings() {
        let w = zigzag(&[100.0, 130.0], 1.0);
        let a = MarketStructureAnalyzer::default();
        assert!(a.analyze_structure(&w).is_none());
        assert!(a.detect_structure_break(&w).is_none());
    }

    #[test]
    fn test_swings_respect_separation() {
        let w = zigzag(&[100.0, 110.0, 104.0, 115.0, 108.0, 120.0, 112.0], 1.0);
        let a = MarketStructureAnalyzer::default();
        for kind in [SwingKind::High, SwingKind::Low] {
            let swings = a.find_swing_points(&w, kind);
            assert!(swings.len() >= 2);
            for pair in swings.windows(2) {
                assert!(pair[1].index - pair[0].index >= a.min_separation.get());
            }
        }
    }
}
