//! Aroon indicator detector
//!
//! Measures how recently the window made its highest high and lowest low.

use std::collections::HashMap;

use serde::Serialize;

use crate::{
    indicators::{aroon, AroonSeries},
    params::{get_factor, get_period, validate_values, ParamMeta, ParameterizedDetector},
    DetectorId, Direction, Period, PriceWindow, Result, Signal, SignalKind, SignalSource,
    TrendConfig, TrendDetector,
};

impl_with_defaults!(AroonIndicator);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AroonSignalType {
    StrongUptrend,
    StrongDowntrend,
    BullishCrossover,
    BearishCrossover,
    Consolidation,
    Neutral,
}

impl AroonSignalType {
    pub fn as_str(self) -> &'static str {
        match self {
            AroonSignalType::StrongUptrend => "aroon_strong_uptrend",
            AroonSignalType::StrongDowntrend => "aroon_strong_downtrend",
            AroonSignalType::BullishCrossover => "aroon_bullish_crossover",
            AroonSignalType::BearishCrossover => "aroon_bearish_crossover",
            AroonSignalType::Consolidation => "aroon_consolidation",
            AroonSignalType::Neutral => "aroon_neutral",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            AroonSignalType::StrongUptrend | AroonSignalType::BullishCrossover => Direction::Bullish,
            AroonSignalType::StrongDowntrend | AroonSignalType::BearishCrossover => Direction::Bearish,
            AroonSignalType::Consolidation | AroonSignalType::Neutral => Direction::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AroonSignal {
    pub signal_type: AroonSignalType,
    pub aroon_up: f64,
    pub aroon_down: f64,
    pub oscillator: f64,
    pub strength: f64,
}

impl SignalSource for AroonSignal {
    fn signals(&self) -> Vec<Signal> {
        vec![Signal::new(
            DetectorId::Aroon,
            SignalKind::Aroon(self.signal_type),
            self.signal_type.direction(),
            self.strength,
        )
        .with_factor(format!("up {:.0} / down {:.0}", self.aroon_up, self.aroon_down))]
    }
}

static AROON_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("aroon_period", 25.0, (5.0, 200.0, 1.0), "Aroon lookback period"),
    ParamMeta::factor(
        "aroon_threshold",
        70.0,
        (50.0, 100.0, 5.0),
        "Aroon level (0-100) that marks a strong trend",
    ),
];

#[derive(Debug, Clone)]
pub struct AroonIndicator {
    pub period: Period,
    /// 0-100 scale
    pub threshold: f64,
}

impl Default for AroonIndicator {
    fn default() -> Self {
        Self::from_config(&TrendConfig::default())
    }
}

impl AroonIndicator {
    pub fn from_config(c: &TrendConfig) -> Self {
        Self {
            period: c.aroon_period,
            threshold: c.aroon_threshold,
        }
    }

    /// Aroon columns over `period` bars. The signal uses `self.period`.
    pub fn calculate_aroon(&self, window: &PriceWindow, period: usize) -> AroonSeries {
        aroon(window.high(), window.low(), period)
    }

    /// Classify the final bar; `None` with fewer than `period + 1` bars
    pub fn get_aroon_signal(&self, window: &PriceWindow) -> Option<AroonSignal> {
        let period = self.period.get();
        let n = window.len();
        if n < period + 1 {
            return None;
        }
        let series = self.calculate_aroon(window, period);
        let (up, down) = (series.up[n - 1], series.down[n - 1]);
        if !up.is_finite() || !down.is_finite() {
            return None;
        }
        let (prev_up, prev_down) = if n >= 2 {
            (series.up[n - 2], series.down[n - 2])
        } else {
            (f64::NAN, f64::NAN)
        };

        let thr = self.threshold;
        let signal_type = if up > thr && down < 100.0 - thr {
            AroonSignalType::StrongUptrend
        } else if down > thr && up < 100.0 - thr {
            AroonSignalType::StrongDowntrend
        } else if prev_up <= prev_down && up > down {
            AroonSignalType::BullishCrossover
        } else if prev_up >= prev_down && up < down {
            AroonSignalType::BearishCrossover
        } else if up < 50.0 && down < 50.0 {
            AroonSignalType::Consolidation
        } else {
            AroonSignalType::Neutral
        };

        let oscillator = up - down;
        Some(AroonSignal {
            signal_type,
            aroon_up: up,
            aroon_down: down,
            oscillator,
            strength: oscillator.abs() / 100.0,
        })
    }
}

impl TrendDetector for AroonIndicator {
    type Output = AroonSignal;

    fn id(&self) -> DetectorId {
        DetectorId::Aroon
    }

    fn min_bars(&self) -> usize {
        self.period.get() + 1
    }

    fn evaluate(&self, window: &PriceWindow) -> Option<AroonSignal> {
        self.get_aroon_signal(window)
    }

    fn validate_config(&self) -> Result<()> {
        validate_values(
            AROON_PARAMS,
            &[
                ("aroon_period", self.period.get() as f64),
                ("aroon_threshold", self.threshold),
            ],
        )
    }
}

impl ParameterizedDetector for AroonIndicator {
    fn param_meta() -> &'static [ParamMeta] {
        AROON_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let d = TrendConfig::default();
        let indicator = Self {
            period: get_period(params, "aroon_period", d.aroon_period.get())?,
            threshold: get_factor(params, "aroon_threshold", d.aroon_threshold)?,
        };
        indicator.validate_config()?;
        Ok(indicator)
    }

    fn detector_id_str() -> &'static str {
        "aroon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PriceBar;

    fn window(highs: &[f64], lows: &[f64]) -> PriceWindow {
        let bars: Vec<PriceBar> = highs
            .iter()
            .zip(lows)
            .enumerate()
            .map(|(i, (&h, &l))| {
                let c = (h + l) / 2.0;
                PriceBar::new(i as i64, c, h, l, c, 100.0)
            })
            .collect();
        PriceWindow::from_bars(&bars).unwrap()
    }

    fn indicator(period: usize) -> AroonIndicator {
        AroonIndicator {
            period: Period::new(period).unwrap(),
            threshold: 70.0,
        }
    }

    #[test]
    fn test_calculate_aroon_explicit_period() {
        let highs = [1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0, 2.0];
        let w = window(&highs, &[0.5; 8]);
        let a = indicator(25);

        let four = a.calculate_aroon(&w, 4);
        assert!(four.up[3].is_nan());
        assert_eq!(four.up[7], 25.0);
        assert_eq!(four.down[7], 100.0);
        assert_eq!(four.oscillator[7], -75.0);

        let two = a.calculate_aroon(&w, 2);
        assert!(two.up[1].is_nan());
        assert_eq!(two.up[7], 0.0);
    }

    #[test]
    fn test_insufficient_bars() {
        let highs = vec![10.0; 25];
        let lows = vec![9.0; 25];
        assert!(AroonIndicator::default().get_aroon_signal(&window(&highs, &lows)).is_none());
    }

    #[test]
    fn test_strong_uptrend() {
        let highs: Vec<f64> = (0..40).map(|i| 10.0 + i as f64).collect();
        let lows: Vec<f64> = (0..40).map(|i| 9.0 + i as f64).collect();
        let s = AroonIndicator::default().get_aroon_signal(&window(&highs, &lows)).unwrap();
        assert_eq!(s.signal_type, AroonSignalType::StrongUptrend);
        assert_eq!(s.aroon_up, 100.0);
        assert_eq!(s.aroon_down, 0.0);
        assert_eq!(s.oscillator, 100.0);
        assert_eq!(s.strength, 1.0);
    }

    #[test]
    fn test_strong_downtrend() {
        let highs: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        let lows: Vec<f64> = (0..40).map(|i| 99.0 - i as f64).collect();
        let s = AroonIndicator::default().get_aroon_signal(&window(&highs, &lows)).unwrap();
        assert_eq!(s.signal_type, AroonSignalType::StrongDowntrend);
        assert_eq!(s.oscillator, -100.0);
    }

    #[test]
    fn test_consolidation() {
        // both extremes well inside the lookback
        let mut highs = vec![10.0; 11];
        let mut lows = vec![9.0; 11];
        highs[4] = 12.0;
        lows[5] = 8.0;
        let s = indicator(10).get_aroon_signal(&window(&highs, &lows)).unwrap();
        // high 6 bars back, low 5 bars back
        assert_eq!(s.aroon_up, 40.0);
        assert_eq!(s.aroon_down, 50.0);
        assert_eq!(s.signal_type, AroonSignalType::Neutral);

        lows[5] = 9.0;
        lows[3] = 8.0;
        let s = indicator(10).get_aroon_signal(&window(&highs, &lows)).unwrap();
        assert_eq!(s.aroon_down, 30.0);
        assert_eq!(s.signal_type, AroonSignalType::Consolidation);
    }

    #[test]
    fn test_bullish_crossover() {
        // low 2 bars back; new high on the final bar after a high 8 bars back
        let mut highs = vec![10.0; 12];
        let mut lows = vec![9.0; 12];
        highs[3] = 11.0;
        lows[9] = 8.0;
        highs[11] = 10.5;
        let s = indicator(10).get_aroon_signal(&window(&highs, &lows)).unwrap();
        // up: highest high (11.0 at 3) is 8 bars back => 20; down: 2 bars back => 80
        assert_eq!(s.signal_type, AroonSignalType::StrongDowntrend);

        highs[11] = 12.0;
        let s = indicator(10).get_aroon_signal(&window(&highs, &lows)).unwrap();
        assert_eq!(s.aroon_up, 100.0);
        assert_eq!(s.aroon_down, 80.0);
        assert_eq!(s.signal_type, AroonSignalType::BullishCrossover);
    }

    #[test]
    fn test_signal_envelope() {
        let highs: Vec<f64> = (0..40).map(|i| 10.0 + i as f64).collect();
        let lows: Vec<f64> = (0..40).map(|i| 9.0 + i as f64).collect();
        let s = AroonIndicator::default().evaluate(&window(&highs, &lows)).unwrap();
        let signals = s.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].direction, Direction::Bullish);
        assert_eq!(signals[0].name(), "aroon_strong_uptrend");
    }

    #[test]
    fn test_with_params() {
        let mut params = HashMap::new();
        params.insert("aroon_period", 14.0);
        let a = AroonIndicator::with_params(&params).unwrap();
        assert_eq!(a.period.get(), 14);
        assert_eq!(a.min_bars(), 15);

        params.insert("aroon_threshold", 40.0);
        assert!(AroonIndicator::with_params(&params).is_err());
    }
}
