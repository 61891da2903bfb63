//! Engine configuration and parameter metadata
//!
//! [`TrendConfig`] is the immutable snapshot every detector is built from.
//! Each detector also publishes its tunable parameters as [`ParamMeta`],
//! enabling:
//! - Threshold sweeps via [`ParamMeta::generate_grid`]
//! - Range validation of configuration values
//! - Construction from named overrides ([`TrendConfig::from_params`])
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use yatde::prelude::*;
//!
//! let mut overrides = HashMap::new();
//! overrides.insert("ema_fast_period", 10.0);
//! overrides.insert("ema_slow_period", 20.0);
//!
//! let config = TrendConfig::from_params(&overrides).unwrap();
//! assert_eq!(config.ema_fast_period.get(), 10);
//!
//! for param in TrendConfig::param_meta() {
//!     println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::detectors::{
  AroonIndicator, DivergenceDetector, EmaMomentumAnalyzer, MarketStructureAnalyzer,
  MultiTimeframeAnalyzer, VolumeAnalyzer,
};
use crate::{DetectorId, Period, Ratio, Result, TrendError};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Ratio value (0.0..=1.0)
  Ratio,
  /// Period value (positive integer)
  Period,
  /// Non-negative real (multiples, thresholds on a 0-100 scale, milliseconds)
  Factor,
}

/// Metadata for a single configuration parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name, identical to the `TrendConfig` field
  pub name: &'static str,
  /// Parameter type
  pub param_type: ParamType,
  /// Default value
  pub default: f64,
  /// Valid range and sweep step: (min, max, step)
  pub range: (f64, f64, f64),
  /// Human-readable description
  pub description: &'static str,
}

impl ParamMeta {
  /// Create a new ParamMeta for a Ratio parameter
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  /// Create a new ParamMeta for a Period parameter
  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  /// Create a new ParamMeta for a Factor parameter
  pub const fn factor(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Factor, default, range, description }
  }

  /// Generate all values for a sweep, from `min` to `max` in `step` increments
  pub fn generate_grid(&self) -> Vec<f64> {
    let (min, max, step) = self.range;
    if step <= 0.0 {
      return vec![min];
    }
    let count = ((max - min) / step + 1e-9).floor() as usize;
    (0..=count).map(|k| min + step * k as f64).collect()
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    if !value.is_finite() {
      return Err(TrendError::InvalidValue("parameter must be finite"));
    }
    let (min, max, _) = self.range;
    if value < min || value > max {
      return Err(TrendError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(TrendError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
      ParamType::Factor => {
        if value < 0.0 {
          return Err(TrendError::InvalidValue("Factor must be non-negative"));
        }
        Ok(())
      },
    }
  }
}

/// Validate named values against a metadata table.
///
/// Names missing from `meta` are a programming error and reported as
/// `InvalidConfig`.
pub fn validate_values(meta: &[ParamMeta], values: &[(&str, f64)]) -> Result<()> {
  for (name, value) in values {
    let param = meta
      .iter()
      .find(|m| m.name == *name)
      .ok_or_else(|| TrendError::InvalidConfig(format!("unknown parameter '{name}'")))?;
    param.validate(*value)?;
  }
  Ok(())
}

// ============================================================
// PARAMETERIZED DETECTOR TRAIT
// ============================================================

/// Trait for detectors that support parameterization
///
/// Implementing this trait enables:
/// - Discovery of available parameters
/// - Creation of detectors with custom parameter values
/// - Threshold sweeps
pub trait ParameterizedDetector: Sized {
  /// Returns metadata for all configurable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Creates a detector with parameters from a HashMap
  ///
  /// Missing parameters use their default values.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;

  /// Returns the detector ID string
  fn detector_id_str() -> &'static str;
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a Ratio from params with default fallback
pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(value)
}

/// Helper to get a Period from params with default fallback
pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  if !value.is_finite() || value < 1.0 || value.fract() != 0.0 {
    return Err(TrendError::InvalidValue("Period must be a positive integer"));
  }
  Period::new(value as usize)
}

/// Helper to get a non-negative finite factor from params with default fallback
pub fn get_factor(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<f64> {
  let value = params.get(key).copied().unwrap_or(default);
  if !value.is_finite() || value < 0.0 {
    return Err(TrendError::InvalidValue("Factor must be finite and non-negative"));
  }
  Ok(value)
}

// ============================================================
// WEIGHTS
// ============================================================

/// Per-detector weight in the confidence vote
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorWeights {
  pub ema: f64,
  pub structure: f64,
  pub aroon: f64,
  pub divergence: f64,
  pub volume: f64,
}

impl Default for DetectorWeights {
  fn default() -> Self {
    Self { ema: 0.30, structure: 0.20, aroon: 0.15, divergence: 0.20, volume: 0.15 }
  }
}

impl DetectorWeights {
  pub fn weight(&self, id: DetectorId) -> f64 {
    match id {
      DetectorId::EmaMomentum => self.ema,
      DetectorId::MarketStructure => self.structure,
      DetectorId::Aroon => self.aroon,
      DetectorId::Divergence => self.divergence,
      DetectorId::Volume => self.volume,
    }
  }

  pub fn total(&self) -> f64 {
    DetectorId::ALL.iter().map(|id| self.weight(*id)).sum()
  }

  pub fn validate(&self) -> Result<()> {
    for id in DetectorId::ALL {
      let w = self.weight(id);
      if !w.is_finite() || w < 0.0 {
        return Err(TrendError::InvalidConfig(format!(
          "weight for {} must be finite and non-negative",
          id.as_str()
        )));
      }
    }
    if self.total() <= 0.0 {
      return Err(TrendError::InvalidConfig("detector weights sum to zero".into()));
    }
    Ok(())
  }
}

/// Weights of the three multi-timeframe agreement components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MtfComponentWeights {
  pub verdict: f64,
  pub separation: f64,
  pub momentum: f64,
}

impl Default for MtfComponentWeights {
  fn default() -> Self {
    Self { verdict: 0.5, separation: 0.25, momentum: 0.25 }
  }
}

impl MtfComponentWeights {
  pub fn total(&self) -> f64 {
    self.verdict + self.separation + self.momentum
  }

  pub fn validate(&self) -> Result<()> {
    let all = [self.verdict, self.separation, self.momentum];
    if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
      return Err(TrendError::InvalidConfig(
        "timeframe component weights must be finite and non-negative".into(),
      ));
    }
    if self.total() <= 0.0 {
      return Err(TrendError::InvalidConfig("timeframe component weights sum to zero".into()));
    }
    Ok(())
  }
}

// ============================================================
// TREND CONFIG
// ============================================================

/// Engine-level parameters that belong to no single detector
static ENGINE_PARAMS: &[ParamMeta] = &[
  ParamMeta::ratio(
    "mtf_weight",
    0.3,
    (0.0, 1.0, 0.05),
    "Blend weight of the timeframe alignment score in the final confidence",
  ),
  ParamMeta::ratio(
    "min_trend_confidence",
    0.6,
    (0.0, 1.0, 0.05),
    "Confidence required before should_trade_trend approves a side",
  ),
  ParamMeta::ratio(
    "volume_rejection_penalty",
    0.25,
    (0.0, 1.0, 0.05),
    "Confidence reduction when the dominant signal fails the volume filter",
  ),
  ParamMeta::factor(
    "max_analysis_time_ms",
    100.0,
    (1.0, 60_000.0, 50.0),
    "Soft time budget per analysis; overruns are logged only",
  ),
];

/// Immutable configuration snapshot for the engine and its detectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendConfig {
  // EMA momentum
  pub ema_fast_period: Period,
  pub ema_slow_period: Period,
  pub ema_slope_lookback: Period,
  pub ema_breach_threshold: Ratio,
  pub ema_min_volume_confirmation: f64,
  pub ema_retest_tolerance: Ratio,
  pub ema_touch_lookback: Period,
  pub ema_breach_lookback: Period,
  pub ema_active_distance: Ratio,
  pub trend_detection_sensitivity: f64,

  // Aroon
  pub aroon_period: Period,
  pub aroon_threshold: f64,

  // Divergence
  pub divergence_swing_strength: Period,
  pub min_swing_separation: Period,
  pub divergence_threshold: Ratio,
  pub validation_swings: Period,
  pub rsi_period: Period,
  pub macd_fast: Period,
  pub macd_slow: Period,
  pub macd_signal: Period,

  // Market structure
  pub structure_break_threshold: Ratio,
  pub min_swing_strength: Period,

  // Volume
  pub volume_ma_period: Period,
  pub min_volume_ma: f64,
  pub volume_lookback: Period,
  pub exhaustion_spike_multiple: f64,
  pub exhaustion_follow_bars: Period,
  pub exhaustion_follow_ratio: Ratio,
  pub breakout_volume_multiple: f64,
  pub volume_filter_enabled: bool,
  pub volume_filter_threshold: Ratio,
  pub volume_rejection_penalty: Ratio,

  // Multi-timeframe
  pub use_mtf: bool,
  pub mtf_weight: Ratio,
  pub mtf_alignment_threshold: Ratio,
  pub mtf_contradiction_penalty: Ratio,
  pub mtf_component_weights: MtfComponentWeights,
  pub atr_period: Period,
  pub adx_period: Period,

  // Engine
  pub use_trend_detection: bool,
  pub min_trend_confidence: Ratio,
  pub max_analysis_time_ms: u64,
  pub detector_weights: DetectorWeights,
}

impl Default for TrendConfig {
  fn default() -> Self {
    Self {
      ema_fast_period: Period::new_const(9),
      ema_slow_period: Period::new_const(21),
      ema_slope_lookback: Period::new_const(3),
      ema_breach_threshold: Ratio::new_const(0.002),
      ema_min_volume_confirmation: 1.5,
      ema_retest_tolerance: Ratio::new_const(0.003),
      ema_touch_lookback: Period::new_const(50),
      ema_breach_lookback: Period::new_const(10),
      ema_active_distance: Ratio::new_const(0.03),
      trend_detection_sensitivity: 1.0,

      aroon_period: Period::new_const(25),
      aroon_threshold: 70.0,

      divergence_swing_strength: Period::new_const(3),
      min_swing_separation: Period::new_const(3),
      divergence_threshold: Ratio::new_const(0.02),
      validation_swings: Period::new_const(2),
      rsi_period: Period::new_const(14),
      macd_fast: Period::new_const(12),
      macd_slow: Period::new_const(26),
      macd_signal: Period::new_const(9),

      structure_break_threshold: Ratio::new_const(0.001),
      min_swing_strength: Period::new_const(3),

      volume_ma_period: Period::new_const(20),
      min_volume_ma: 0.0,
      volume_lookback: Period::new_const(20),
      exhaustion_spike_multiple: 2.0,
      exhaustion_follow_bars: Period::new_const(3),
      exhaustion_follow_ratio: Ratio::new_const(0.3),
      breakout_volume_multiple: 1.3,
      volume_filter_enabled: true,
      volume_filter_threshold: Ratio::new_const(0.3),
      volume_rejection_penalty: Ratio::new_const(0.25),

      use_mtf: true,
      mtf_weight: Ratio::new_const(0.3),
      mtf_alignment_threshold: Ratio::new_const(0.6),
      mtf_contradiction_penalty: Ratio::new_const(0.5),
      mtf_component_weights: MtfComponentWeights::default(),
      atr_period: Period::new_const(14),
      adx_period: Period::new_const(14),

      use_trend_detection: true,
      min_trend_confidence: Ratio::new_const(0.6),
      max_analysis_time_ms: 100,
      detector_weights: DetectorWeights::default(),
    }
  }
}

impl TrendConfig {
  /// Metadata for every numeric option, detector tables first.
  ///
  /// Options shared by two detectors (`min_swing_separation`) appear once.
  pub fn param_meta() -> Vec<&'static ParamMeta> {
    let tables = [
      EmaMomentumAnalyzer::param_meta(),
      MarketStructureAnalyzer::param_meta(),
      AroonIndicator::param_meta(),
      DivergenceDetector::param_meta(),
      VolumeAnalyzer::param_meta(),
      MultiTimeframeAnalyzer::param_meta(),
      ENGINE_PARAMS,
    ];
    let mut out: Vec<&'static ParamMeta> = Vec::new();
    for meta in tables.into_iter().flatten() {
      if !out.iter().any(|m| m.name == meta.name) {
        out.push(meta);
      }
    }
    out
  }

  /// Build a config from named overrides; missing names keep their defaults
  pub fn from_params(params: &HashMap<&str, f64>) -> Result<Self> {
    let d = Self::default();
    let config = Self {
      ema_fast_period: get_period(params, "ema_fast_period", d.ema_fast_period.get())?,
      ema_slow_period: get_period(params, "ema_slow_period", d.ema_slow_period.get())?,
      ema_slope_lookback: get_period(params, "ema_slope_lookback", d.ema_slope_lookback.get())?,
      ema_breach_threshold: get_ratio(params, "ema_breach_threshold", d.ema_breach_threshold.get())?,
      ema_min_volume_confirmation: get_factor(
        params,
        "ema_min_volume_confirmation",
        d.ema_min_volume_confirmation,
      )?,
      ema_retest_tolerance: get_ratio(params, "ema_retest_tolerance", d.ema_retest_tolerance.get())?,
      ema_touch_lookback: get_period(params, "ema_touch_lookback", d.ema_touch_lookback.get())?,
      ema_breach_lookback: get_period(params, "ema_breach_lookback", d.ema_breach_lookback.get())?,
      ema_active_distance: get_ratio(params, "ema_active_distance", d.ema_active_distance.get())?,
      trend_detection_sensitivity: get_factor(
        params,
        "trend_detection_sensitivity",
        d.trend_detection_sensitivity,
      )?,

      aroon_period: get_period(params, "aroon_period", d.aroon_period.get())?,
      aroon_threshold: get_factor(params, "aroon_threshold", d.aroon_threshold)?,

      divergence_swing_strength: get_period(
        params,
        "divergence_swing_strength",
        d.divergence_swing_strength.get(),
      )?,
      min_swing_separation: get_period(params, "min_swing_separation", d.min_swing_separation.get())?,
      divergence_threshold: get_ratio(params, "divergence_threshold", d.divergence_threshold.get())?,
      validation_swings: get_period(params, "validation_swings", d.validation_swings.get())?,
      rsi_period: get_period(params, "rsi_period", d.rsi_period.get())?,
      macd_fast: get_period(params, "macd_fast", d.macd_fast.get())?,
      macd_slow: get_period(params, "macd_slow", d.macd_slow.get())?,
      macd_signal: get_period(params, "macd_signal", d.macd_signal.get())?,

      structure_break_threshold: get_ratio(
        params,
        "structure_break_threshold",
        d.structure_break_threshold.get(),
      )?,
      min_swing_strength: get_period(params, "min_swing_strength", d.min_swing_strength.get())?,

      volume_ma_period: get_period(params, "volume_ma_period", d.volume_ma_period.get())?,
      min_volume_ma: get_factor(params, "min_volume_ma", d.min_volume_ma)?,
      volume_lookback: get_period(params, "volume_lookback", d.volume_lookback.get())?,
      exhaustion_spike_multiple: get_factor(
        params,
        "exhaustion_spike_multiple",
        d.exhaustion_spike_multiple,
      )?,
      exhaustion_follow_bars: get_period(
        params,
        "exhaustion_follow_bars",
        d.exhaustion_follow_bars.get(),
      )?,
      exhaustion_follow_ratio: get_ratio(
        params,
        "exhaustion_follow_ratio",
        d.exhaustion_follow_ratio.get(),
      )?,
      breakout_volume_multiple: get_factor(
        params,
        "breakout_volume_multiple",
        d.breakout_volume_multiple,
      )?,
      volume_filter_threshold: get_ratio(
        params,
        "volume_filter_threshold",
        d.volume_filter_threshold.get(),
      )?,
      volume_rejection_penalty: get_ratio(
        params,
        "volume_rejection_penalty",
        d.volume_rejection_penalty.get(),
      )?,

      mtf_weight: get_ratio(params, "mtf_weight", d.mtf_weight.get())?,
      mtf_alignment_threshold: get_ratio(
        params,
        "mtf_alignment_threshold",
        d.mtf_alignment_threshold.get(),
      )?,
      mtf_contradiction_penalty: get_ratio(
        params,
        "mtf_contradiction_penalty",
        d.mtf_contradiction_penalty.get(),
      )?,
      atr_period: get_period(params, "atr_period", d.atr_period.get())?,
      adx_period: get_period(params, "adx_period", d.adx_period.get())?,

      min_trend_confidence: get_ratio(params, "min_trend_confidence", d.min_trend_confidence.get())?,
      max_analysis_time_ms: get_factor(params, "max_analysis_time_ms", d.max_analysis_time_ms as f64)?
        as u64,
      ..d
    };
    config.validate()?;
    Ok(config)
  }

  /// Every named option as `(name, value)`, in `param_meta` naming
  pub fn param_values(&self) -> Vec<(&'static str, f64)> {
    vec![
      ("ema_fast_period", self.ema_fast_period.get() as f64),
      ("ema_slow_period", self.ema_slow_period.get() as f64),
      ("ema_slope_lookback", self.ema_slope_lookback.get() as f64),
      ("ema_breach_threshold", self.ema_breach_threshold.get()),
      ("ema_min_volume_confirmation", self.ema_min_volume_confirmation),
      ("ema_retest_tolerance", self.ema_retest_tolerance.get()),
      ("ema_touch_lookback", self.ema_touch_lookback.get() as f64),
      ("ema_breach_lookback", self.ema_breach_lookback.get() as f64),
      ("ema_active_distance", self.ema_active_distance.get()),
      ("trend_detection_sensitivity", self.trend_detection_sensitivity),
      ("aroon_period", self.aroon_period.get() as f64),
      ("aroon_threshold", self.aroon_threshold),
      ("divergence_swing_strength", self.divergence_swing_strength.get() as f64),
      ("min_swing_separation", self.min_swing_separation.get() as f64),
      ("divergence_threshold", self.divergence_threshold.get()),
      ("validation_swings", self.validation_swings.get() as f64),
      ("rsi_period", self.rsi_period.get() as f64),
      ("macd_fast", self.macd_fast.get() as f64),
      ("macd_slow", self.macd_slow.get() as f64),
      ("macd_signal", self.macd_signal.get() as f64),
      ("structure_break_threshold", self.structure_break_threshold.get()),
      ("min_swing_strength", self.min_swing_strength.get() as f64),
      ("volume_ma_period", self.volume_ma_period.get() as f64),
      ("min_volume_ma", self.min_volume_ma),
      ("volume_lookback", self.volume_lookback.get() as f64),
      ("exhaustion_spike_multiple", self.exhaustion_spike_multiple),
      ("exhaustion_follow_bars", self.exhaustion_follow_bars.get() as f64),
      ("exhaustion_follow_ratio", self.exhaustion_follow_ratio.get()),
      ("breakout_volume_multiple", self.breakout_volume_multiple),
      ("volume_filter_threshold", self.volume_filter_threshold.get()),
      ("volume_rejection_penalty", self.volume_rejection_penalty.get()),
      ("mtf_weight", self.mtf_weight.get()),
      ("mtf_alignment_threshold", self.mtf_alignment_threshold.get()),
      ("mtf_contradiction_penalty", self.mtf_contradiction_penalty.get()),
      ("atr_period", self.atr_period.get() as f64),
      ("adx_period", self.adx_period.get() as f64),
      ("min_trend_confidence", self.min_trend_confidence.get()),
      ("max_analysis_time_ms", self.max_analysis_time_ms as f64),
    ]
  }

  /// Range-check every option and apply the cross-field rules
  pub fn validate(&self) -> Result<()> {
    let meta: Vec<ParamMeta> = Self::param_meta().into_iter().cloned().collect();
    validate_values(&meta, &self.param_values())?;

    if self.ema_fast_period >= self.ema_slow_period {
      return Err(TrendError::InvalidConfig(format!(
        "ema_fast_period ({}) must be < ema_slow_period ({})",
        self.ema_fast_period.get(),
        self.ema_slow_period.get()
      )));
    }
    if self.macd_fast >= self.macd_slow {
      return Err(TrendError::InvalidConfig(format!(
        "macd_fast ({}) must be < macd_slow ({})",
        self.macd_fast.get(),
        self.macd_slow.get()
      )));
    }
    self.detector_weights.validate()?;
    self.mtf_component_weights.validate()?;
    Ok(())
  }
}

// ============================================================
// TESTS
// ============================================================
