//! # YATDE - Yet Another Trend Detection Engine
//!
//! Confidence-scored trend detection over a finite window of OHLCV bars.
//! Five independent leaf detectors (EMA momentum, Aroon, market structure,
//! RSI/MACD divergence, volume) run over the primary window, an optional
//! higher-timeframe window is aligned against it, and everything is merged
//! into one [`TrendAnalysisResult`].
//!
//! ## Quick Start
//!
//! ```rust
//! use yatde::prelude::*;
//!
//! let engine = EngineBuilder::new().build().unwrap();
//!
//! let bars: Vec<PriceBar> = (0..150)
//!     .map(|i| {
//!         let c = 100.0 + i as f64 * 0.5;
//!         PriceBar::new(i, c - 0.2, c + 0.5, c - 0.5, c, 1000.0)
//!     })
//!     .collect();
//!
//! let result = engine.analyze_trend_change(&bars, "EURUSD", None);
//! assert!((0.0..=1.0).contains(&result.confidence));
//! ```
//!
//! The engine never fails on bad input: malformed or short windows produce
//! a neutral result with no signals and zero confidence.

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, trace, warn};

pub mod detectors;
pub mod indicators;
pub mod params;
pub mod window;

pub mod prelude {
    pub use crate::{
        // Detectors
        detectors::*,
        // Indicators
        indicators::{IndicatorParams, IndicatorSeries},
        // Parameters
        params::{
            get_factor, get_period, get_ratio, DetectorWeights, MtfComponentWeights, ParamMeta,
            ParamType, ParameterizedDetector, TrendConfig,
        },
        // Parallel
        analyze_parallel,
        // Aggregation
        aggregate_signals,
        Aggregate,
        // Types
        DetectorId,
        Direction,
        // Engine
        EngineBuilder,
        OHLCVExt,
        Period,
        PriceBar,
        // Window
        PriceWindow,
        Ratio,
        Result,
        Signal,
        SignalKind,
        SignalSource,
        TradeSide,
        TrendAnalysisResult,
        TrendDetectionEngine,
        // Core traits
        TrendDetector,
        // Errors
        TrendError,
        MIN_ANALYSIS_BARS,
        OHLCV,
    };
}

pub use window::PriceWindow;

use detectors::*;
use params::{DetectorWeights, TrendConfig};

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, TrendError>;

/// Errors raised while validating configuration or building a price window.
///
/// None of these cross [`TrendDetectionEngine::analyze_trend_change`]: the
/// engine turns them into a neutral result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrendError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Timestamps not strictly increasing at index {index}")]
    UnsortedTimestamps { index: usize },

    #[error("Missing column: {0}")]
    MissingColumn(&'static str),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(TrendError::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(TrendError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(TrendError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    fn timestamp(&self) -> Option<i64> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Validate one bar.
    ///
    /// NaN fields are accepted here: a gap in a single bar degrades the
    /// indicators around it instead of rejecting the whole window.
    fn validate(&self) -> Result<()> {
        if self.high() < self.low() {
            return Err(TrendError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        if self.open().is_infinite()
            || self.high().is_infinite()
            || self.low().is_infinite()
            || self.close().is_infinite()
            || self.volume().is_infinite()
        {
            return Err(TrendError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if self.volume() < 0.0 {
            return Err(TrendError::InvalidOHLCV {
                index: 0,
                reason: "negative volume",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// Plain OHLCV bar with a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PriceBar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn new(time: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for PriceBar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn timestamp(&self) -> Option<i64> {
        Some(self.time)
    }
}

// ============================================================
// DIRECTION / SIDE
// ============================================================

/// Direction/bias of a signal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    #[default]
    Neutral,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    /// True when one side is bullish and the other bearish.
    #[inline]
    pub fn is_opposite(self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Bullish, Direction::Bearish) | (Direction::Bearish, Direction::Bullish)
        )
    }

    /// Direction from the sign of a value; zero and NaN are neutral.
    pub fn from_sign(value: f64) -> Self {
        if value > 0.0 {
            Direction::Bullish
        } else if value < 0.0 {
            Direction::Bearish
        } else {
            Direction::Neutral
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Neutral => "neutral",
            Direction::Bearish => "bearish",
        }
    }
}

/// Side of a prospective trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    #[inline]
    pub fn direction(self) -> Direction {
        match self {
            TradeSide::Buy => Direction::Bullish,
            TradeSide::Sell => Direction::Bearish,
        }
    }
}

impl std::str::FromStr for TradeSide {
    type Err = TrendError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(TradeSide::Buy),
            "sell" | "short" => Ok(TradeSide::Sell),
            _ => Err(TrendError::InvalidValue("trade side must be 'buy' or 'sell'")),
        }
    }
}

// ============================================================
// SIGNALS
// ============================================================

/// Leaf detector that produced a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorId {
    EmaMomentum,
    MarketStructure,
    Aroon,
    Divergence,
    Volume,
}

impl DetectorId {
    /// Leaf detectors in evaluation order
    pub const ALL: [DetectorId; 5] = [
        DetectorId::EmaMomentum,
        DetectorId::MarketStructure,
        DetectorId::Aroon,
        DetectorId::Divergence,
        DetectorId::Volume,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DetectorId::EmaMomentum => "ema_momentum",
            DetectorId::MarketStructure => "market_structure",
            DetectorId::Aroon => "aroon",
            DetectorId::Divergence => "divergence",
            DetectorId::Volume => "volume",
        }
    }
}

/// Closed set of signal types, one variant family per detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "family", content = "type", rename_all = "snake_case")]
pub enum SignalKind {
    Ema(EmaSignalType),
    EmaBreach(BreachType),
    StructureBreak(Direction),
    Aroon(AroonSignalType),
    Divergence(DivergenceType),
    VolumeExhaustion(Direction),
    VolumeBreakout(Direction),
    VolumePriceDivergence(Direction),
}

impl SignalKind {
    /// Snake-case label, e.g. `strong_bullish_trend` or `bearish_rsi`
    pub fn name(self) -> &'static str {
        match self {
            SignalKind::Ema(t) => t.as_str(),
            SignalKind::EmaBreach(t) => t.as_str(),
            SignalKind::Aroon(t) => t.as_str(),
            SignalKind::Divergence(t) => t.as_str(),
            SignalKind::StructureBreak(d) => match d {
                Direction::Bullish => "bullish_structure_break",
                Direction::Bearish => "bearish_structure_break",
                Direction::Neutral => "structure_break",
            },
            SignalKind::VolumeExhaustion(d) => match d {
                Direction::Bullish => "bullish_volume_exhaustion",
                Direction::Bearish => "bearish_volume_exhaustion",
                Direction::Neutral => "volume_exhaustion",
            },
            SignalKind::VolumeBreakout(d) => match d {
                Direction::Bullish => "bullish_volume_breakout",
                Direction::Bearish => "bearish_volume_breakout",
                Direction::Neutral => "volume_breakout",
            },
            SignalKind::VolumePriceDivergence(d) => match d {
                Direction::Bullish => "bullish_volume_divergence",
                Direction::Bearish => "bearish_volume_divergence",
                Direction::Neutral => "volume_divergence",
            },
        }
    }
}

/// Shared envelope for every detector output the engine aggregates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub source: DetectorId,
    pub kind: SignalKind,
    pub direction: Direction,
    /// Confidence 0.0..=1.0
    pub confidence: f64,
    pub factors: Vec<String>,
}

impl Signal {
    pub fn new(source: DetectorId, kind: SignalKind, direction: Direction, confidence: f64) -> Self {
        Self {
            source,
            kind,
            direction,
            confidence: detectors::helpers::clamp01(confidence),
            factors: Vec::new(),
        }
    }

    pub fn with_factor(mut self, factor: impl Into<String>) -> Self {
        self.factors.push(factor.into());
        self
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    #[inline]
    pub fn matches(&self, side: TradeSide) -> bool {
        self.direction == side.direction()
    }
}

/// Detector output that can be flattened into [`Signal`]s
pub trait SignalSource {
    fn signals(&self) -> Vec<Signal>;
}

// ============================================================
// DETECTOR TRAIT
// ============================================================

/// Leaf detector over a single price window
pub trait TrendDetector: Send + Sync {
    type Output: SignalSource;

    fn id(&self) -> DetectorId;
    fn min_bars(&self) -> usize;
    fn evaluate(&self, window: &PriceWindow) -> Option<Self::Output>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// RESULT
// ============================================================

/// Root aggregate of one analysis call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendAnalysisResult {
    pub symbol: String,
    pub signals: Vec<Signal>,
    /// Confidence 0.0..=1.0 of `dominant_direction`
    pub confidence: f64,
    pub dominant_direction: Direction,
    pub ema_signal: Option<EmaSignal>,
    pub ema_levels: Vec<EmaSupportResistance>,
    pub ema_breaches: Vec<EmaBreachResult>,
    pub divergences: Vec<DivergenceResult>,
    pub market_structure: Option<MarketStructure>,
    pub aroon_signal: Option<AroonSignal>,
    pub volume_confirmation: Option<VolumeConfirmation>,
    pub timeframe_alignment: Option<TimeframeAlignmentResult>,
}

impl TrendAnalysisResult {
    /// Empty result: no signals, zero confidence
    pub fn neutral(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Self::default()
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.signals.is_empty() && self.confidence == 0.0
    }

    /// Signals pointing towards `side`, in detector order
    pub fn signals_for(&self, side: TradeSide) -> Vec<Signal> {
        self.signals
            .iter()
            .filter(|s| s.matches(side))
            .cloned()
            .collect()
    }

    /// Highest-confidence signal in the dominant direction (first wins ties)
    pub fn dominant_signal(&self) -> Option<&Signal> {
        strongest(
            self.signals
                .iter()
                .filter(|s| s.direction == self.dominant_direction && s.direction != Direction::Neutral),
        )
    }
}

fn strongest<'a>(signals: impl Iterator<Item = &'a Signal>) -> Option<&'a Signal> {
    signals.fold(None, |best: Option<&Signal>, s| match best {
        Some(b) if b.confidence >= s.confidence => Some(b),
        _ => Some(s),
    })
}

// ============================================================
// CONFIDENCE AGGREGATION
// ============================================================

/// Outcome of weighting leaf signals against each other
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Aggregate {
    pub direction: Direction,
    pub confidence: f64,
    pub bullish_score: f64,
    pub bearish_score: f64,
}

/// Weighted vote of leaf signals.
///
/// Each detector votes with its strongest bullish and strongest bearish
/// signal, scaled by its weight. With `S_dom`/`S_opp` the weighted scores of
/// the winning and losing directions, `W` the weight of detectors that voted
/// and `W_total` the weight of all detectors:
///
/// ```text
/// confidence = S_dom / W * (1 - S_opp / (S_dom + S_opp)) * (0.6 + 0.4 * W / W_total)
/// ```
///
/// Equal scores are broken by the single strongest directional signal (the
/// earliest one wins equal confidences); if that still leaves no winner the
/// result is neutral with zero confidence.
pub fn aggregate_signals(signals: &[Signal], weights: &DetectorWeights) -> Aggregate {
    let total = weights.total();
    let mut bullish = 0.0;
    let mut bearish = 0.0;
    let mut voting = 0.0;

    for id in DetectorId::ALL {
        let w = weights.weight(id);
        let best = |dir: Direction| {
            signals
                .iter()
                .filter(|s| s.source == id && s.direction == dir)
                .map(|s| s.confidence)
                .fold(0.0_f64, f64::max)
        };
        let (bull, bear) = (best(Direction::Bullish), best(Direction::Bearish));
        if bull > 0.0 || bear > 0.0 {
            voting += w;
        }
        bullish += w * bull;
        bearish += w * bear;
    }

    let mut agg = Aggregate {
        bullish_score: bullish,
        bearish_score: bearish,
        ..Aggregate::default()
    };
    if voting <= 0.0 || total <= 0.0 {
        return agg;
    }

    agg.direction = if bullish > bearish {
        Direction::Bullish
    } else if bearish > bullish {
        Direction::Bearish
    } else {
        match strongest(signals.iter().filter(|s| s.direction != Direction::Neutral)) {
            Some(top)
                if !signals.iter().any(|s| {
                    s.direction.is_opposite(top.direction) && s.confidence == top.confidence
                }) =>
            {
                top.direction
            }
            _ => return agg,
        }
    };

    let (dom, opp) = if agg.direction.is_bullish() {
        (bullish, bearish)
    } else {
        (bearish, bullish)
    };
    if dom <= 0.0 {
        agg.direction = Direction::Neutral;
        return agg;
    }

    let agreement = dom / voting;
    let conflict = opp / (dom + opp);
    let coverage = voting / total;
    agg.confidence = helpers::clamp01(agreement * (1.0 - conflict) * (0.6 + 0.4 * coverage));
    agg
}

// ============================================================
// TREND DETECTION ENGINE
// ============================================================

/// Windows shorter than this are rejected before any detector runs
pub const MIN_ANALYSIS_BARS: usize = 10;

/// Per-call progress; every call starts at `Uninitialized`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum AnalysisStage {
    Uninitialized,
    LeavesEvaluated,
    MtfEvaluated,
    Aggregated,
}

/// Leaf outputs for one window
#[derive(Debug, Default)]
struct LeafReports {
    ema: Option<EmaReport>,
    structure: Option<MarketStructure>,
    aroon: Option<AroonSignal>,
    divergence: Option<DivergenceReport>,
    volume: Option<VolumeReport>,
}

impl LeafReports {
    fn signals(&self) -> Vec<Signal> {
        let mut signals = Vec::new();
        if let Some(r) = &self.ema {
            signals.extend(r.signals());
        }
        if let Some(r) = &self.structure {
            signals.extend(r.signals());
        }
        if let Some(r) = &self.aroon {
            signals.extend(r.signals());
        }
        if let Some(r) = &self.divergence {
            signals.extend(r.signals());
        }
        if let Some(r) = &self.volume {
            signals.extend(r.signals());
        }
        signals
    }
}

/// Orchestrates the leaf detectors and multi-timeframe alignment.
///
/// Immutable after construction; share it across threads freely.
#[derive(Debug, Clone)]
pub struct TrendDetectionEngine {
    config: TrendConfig,
    ema: EmaMomentumAnalyzer,
    structure: MarketStructureAnalyzer,
    aroon: AroonIndicator,
    divergence: DivergenceDetector,
    volume: VolumeAnalyzer,
    timeframe: MultiTimeframeAnalyzer,
}

impl TrendDetectionEngine {
    /// Build an engine from a configuration snapshot
    pub fn new(config: TrendConfig) -> Result<Self> {
        config.validate()?;
        let volume = VolumeAnalyzer::from_config(&config);
        let engine = Self {
            ema: EmaMomentumAnalyzer::from_config(&config).with_volume_confirmation(volume.clone()),
            structure: MarketStructureAnalyzer::from_config(&config),
            aroon: AroonIndicator::from_config(&config),
            divergence: DivergenceDetector::from_config(&config),
            timeframe: MultiTimeframeAnalyzer::from_config(&config),
            volume,
            config,
        };
        engine.validate()?;
        Ok(engine)
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    pub fn ema_analyzer(&self) -> &EmaMomentumAnalyzer {
        &self.ema
    }

    pub fn volume_analyzer(&self) -> &VolumeAnalyzer {
        &self.volume
    }

    pub fn timeframe_analyzer(&self) -> &MultiTimeframeAnalyzer {
        &self.timeframe
    }

    // ===========================================
    // HIGH-LEVEL: full analysis
    // ===========================================

    /// Analyze one window (plus an optional higher-timeframe window).
    ///
    /// Never fails: invalid or short input yields
    /// [`TrendAnalysisResult::neutral`].
    pub fn analyze_trend_change<T: OHLCV>(
        &self,
        bars: &[T],
        symbol: &str,
        higher_bars: Option<&[T]>,
    ) -> TrendAnalysisResult {
        let started = Instant::now();
        let mut stage = AnalysisStage::Uninitialized;

        if !self.config.use_trend_detection {
            debug!(symbol, "trend detection disabled");
            return TrendAnalysisResult::neutral(symbol);
        }

        let window = match self.prepare_window(bars) {
            Ok(window) => window,
            Err(error) => {
                debug!(symbol, %error, "trend analysis skipped");
                return TrendAnalysisResult::neutral(symbol);
            }
        };

        let leaves = self.evaluate_leaves(&window);
        advance(symbol, &mut stage, AnalysisStage::LeavesEvaluated);

        let alignment = match higher_bars {
            Some(higher) if self.config.use_mtf => self.align_timeframes(symbol, &window, higher),
            _ => None,
        };
        advance(symbol, &mut stage, AnalysisStage::MtfEvaluated);

        let result = self.aggregate(symbol, &window, leaves, alignment);
        advance(symbol, &mut stage, AnalysisStage::Aggregated);

        let elapsed_ms = started.elapsed().as_millis();
        if elapsed_ms > u128::from(self.config.max_analysis_time_ms) {
            warn!(
                symbol,
                elapsed_ms = elapsed_ms as u64,
                budget_ms = self.config.max_analysis_time_ms,
                bars = window.len(),
                "trend analysis exceeded time budget"
            );
        }
        debug!(
            symbol,
            signals = result.signals.len(),
            direction = result.dominant_direction.as_str(),
            confidence = result.confidence,
            "trend analysis complete"
        );
        result
    }

    /// Signals of a fresh analysis that point towards `side`
    pub fn get_trend_signals<T: OHLCV>(&self, bars: &[T], side: TradeSide) -> Vec<Signal> {
        self.analyze_trend_change(bars, "", None).signals_for(side)
    }

    /// Binary trade decision plus the analysis confidence.
    ///
    /// True iff the confidence reaches `min_trend_confidence`, at least one
    /// signal points towards `side`, and, when multi-timeframe alignment ran,
    /// the higher timeframe confirms the side.
    pub fn should_trade_trend<T: OHLCV>(
        &self,
        bars: &[T],
        side: TradeSide,
        higher_bars: Option<&[T]>,
    ) -> (bool, f64) {
        let result = self.analyze_trend_change(bars, "", higher_bars);
        let confident = result.confidence >= self.config.min_trend_confidence.get();
        let matching = result.signals.iter().any(|s| s.matches(side));
        let confirmed = result
            .timeframe_alignment
            .as_ref()
            .map_or(true, |a| self.timeframe.should_confirm_signal(a, side));
        (confident && matching && confirmed, result.confidence)
    }

    // ===========================================
    // Internal helpers
    // ===========================================

    fn prepare_window<T: OHLCV>(&self, bars: &[T]) -> Result<PriceWindow> {
        let window = PriceWindow::from_bars(bars)?;
        if window.len() < MIN_ANALYSIS_BARS {
            return Err(TrendError::InsufficientData {
                need: MIN_ANALYSIS_BARS,
                got: window.len(),
            });
        }
        Ok(window)
    }

    fn evaluate_leaves(&self, window: &PriceWindow) -> LeafReports {
        LeafReports {
            ema: run_detector(&self.ema, window),
            structure: run_detector(&self.structure, window),
            aroon: run_detector(&self.aroon, window),
            divergence: run_detector(&self.divergence, window),
            volume: run_detector(&self.volume, window),
        }
    }

    fn align_timeframes<T: OHLCV>(
        &self,
        symbol: &str,
        primary: &PriceWindow,
        higher_bars: &[T],
    ) -> Option<TimeframeAlignmentResult> {
        let higher = match PriceWindow::from_bars(higher_bars) {
            Ok(w) => w,
            Err(error) => {
                debug!(symbol, %error, "higher timeframe ignored");
                return None;
            }
        };
        self.timeframe.analyze_timeframe_alignment(primary, &higher)
    }

    fn aggregate(
        &self,
        symbol: &str,
        window: &PriceWindow,
        leaves: LeafReports,
        alignment: Option<TimeframeAlignmentResult>,
    ) -> TrendAnalysisResult {
        let signals = leaves.signals();
        let agg = aggregate_signals(&signals, &self.config.detector_weights);
        let mut confidence = agg.confidence;

        if agg.direction != Direction::Neutral {
            if let Some(a) = &alignment {
                let w = self.config.mtf_weight.get();
                let score = self.timeframe.alignment_score_for(a, agg.direction);
                confidence = confidence * (1.0 - w) + score * w;
                if a.higher_signal.direction.is_opposite(agg.direction) {
                    confidence *= 1.0 - self.config.mtf_contradiction_penalty.get();
                }
            }

            let dominant = strongest(signals.iter().filter(|s| s.direction == agg.direction));
            if let Some(dominant) = dominant {
                let kept = self.volume.filter_signals_by_volume(
                    std::slice::from_ref(dominant),
                    window,
                    self.config.volume_filter_threshold.get(),
                );
                if kept.is_empty() {
                    trace!(symbol, signal = dominant.name(), "dominant signal lacks volume");
                    confidence *= 1.0 - self.config.volume_rejection_penalty.get();
                }
            }
        }

        TrendAnalysisResult {
            symbol: symbol.to_string(),
            confidence: helpers::clamp01(confidence),
            dominant_direction: agg.direction,
            signals,
            ema_signal: leaves.ema.as_ref().and_then(|r| r.signal),
            ema_levels: leaves.ema.as_ref().map(|r| r.levels.clone()).unwrap_or_default(),
            ema_breaches: leaves.ema.map(|r| r.breaches).unwrap_or_default(),
            divergences: leaves.divergence.map(|r| r.divergences).unwrap_or_default(),
            market_structure: leaves.structure,
            aroon_signal: leaves.aroon,
            volume_confirmation: leaves.volume.and_then(|r| r.confirmation),
            timeframe_alignment: alignment,
        }
    }

    fn validate(&self) -> Result<()> {
        self.ema.validate_config()?;
        self.structure.validate_config()?;
        self.aroon.validate_config()?;
        self.divergence.validate_config()?;
        self.volume.validate_config()?;
        self.timeframe.validate_config()?;
        Ok(())
    }
}

fn run_detector<D: TrendDetector>(detector: &D, window: &PriceWindow) -> Option<D::Output> {
    if window.len() < detector.min_bars() {
        trace!(
            detector = detector.id().as_str(),
            need = detector.min_bars(),
            got = window.len(),
            "detector skipped: insufficient data"
        );
        return None;
    }
    detector.evaluate(window)
}

fn advance(symbol: &str, stage: &mut AnalysisStage, next: AnalysisStage) {
    debug_assert!(next > *stage);
    trace!(symbol, from = ?stage, to = ?next, "analysis stage");
    *stage = next;
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating TrendDetectionEngine instances
#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: TrendConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: TrendConfig) -> Self {
        self.config = config;
        self
    }

    /// Set fast/slow EMA periods
    pub fn ema_periods(mut self, fast: usize, slow: usize) -> Result<Self> {
        self.config.ema_fast_period = Period::new(fast)?;
        self.config.ema_slow_period = Period::new(slow)?;
        Ok(self)
    }

    /// Set the confidence required by `should_trade_trend`
    pub fn min_trend_confidence(mut self, confidence: f64) -> Result<Self> {
        self.config.min_trend_confidence = Ratio::new(confidence)?;
        Ok(self)
    }

    /// Enable/disable the volume filter
    pub fn volume_filter(mut self, enable: bool) -> Self {
        self.config.volume_filter_enabled = enable;
        self
    }

    /// Enable/disable multi-timeframe alignment
    pub fn multi_timeframe(mut self, enable: bool) -> Self {
        self.config.use_mtf = enable;
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<TrendDetectionEngine> {
        TrendDetectionEngine::new(self.config)
    }
}

// ============================================================
// PARALLEL ANALYSIS
// ============================================================

use rayon::prelude::*;

/// Analyze many instruments in parallel, one independent call each.
///
/// Results come back in input order.
pub fn analyze_parallel<'a, T, I>(
    engine: &TrendDetectionEngine,
    instruments: I,
) -> Vec<TrendAnalysisResult>
where
    T: OHLCV + Sync + 'a,
    I: IntoParallelIterator<Item = (&'a str, &'a [T], Option<&'a [T]>)>,
{
    instruments
        .into_par_iter()
        .map(|(symbol, bars, higher)| engine.analyze_trend_change(bars, symbol, higher))
        .collect()
}

// ============================================================
// TESTS
// ============================================================
