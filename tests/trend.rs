//! Integration tests for the YATDE trend detection engine.
//!
//! Scenario tests drive the public API end to end with synthetic series.

use yatde::prelude::*;

/// Simple test bar structure
#[derive(Debug, Clone, Copy)]
struct TestBar {
    t: Option<i64>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

impl TestBar {
    fn new(o: f64, h: f64, l: f64, c: f64, v: f64) -> Self {
        Self { t: None, o, h, l, c, v }
    }
}

impl OHLCV for TestBar {
    fn open(&self) -> f64 {
        self.o
    }

    fn high(&self) -> f64 {
        self.h
    }

    fn low(&self) -> f64 {
        self.l
    }

    fn close(&self) -> f64 {
        self.c
    }

    fn volume(&self) -> f64 {
        self.v
    }

    fn timestamp(&self) -> Option<i64> {
        self.t
    }
}

/// Steady trend, `step` per bar
fn make_trend(n: usize, start: f64, step: f64) -> Vec<TestBar> {
    (0..n)
        .map(|i| {
            let c = start + step * i as f64;
            TestBar::new(c - step * 0.4, c + 0.5, c - 0.5, c, 1000.0)
        })
        .collect()
}

/// Closes alternating between two nearby values
fn make_sideways(n: usize) -> Vec<TestBar> {
    (0..n)
        .map(|i| {
            let c = if i % 2 == 0 { 100.0 } else { 100.05 };
            TestBar::new(100.0, c + 0.5, c - 0.5, c, 1000.0)
        })
        .collect()
}

fn window(bars: &[TestBar]) -> PriceWindow {
    PriceWindow::from_bars(bars).unwrap()
}

// ============================================================
// SCENARIOS
// ============================================================

#[test]
fn test_rising_series_is_strong_bullish() {
    let engine = EngineBuilder::new().ema_periods(10, 20).unwrap().build().unwrap();
    let bars = make_trend(150, 100.0, 0.5);
    let result = engine.analyze_trend_change(&bars, "RISE", None);

    let ema = result.ema_signal.unwrap();
    assert_eq!(ema.signal_type, EmaSignalType::StrongBullishTrend);
    assert!(!ema.crossover);
    assert_eq!(result.dominant_direction, Direction::Bullish);
    assert!(result.confidence > engine.config().min_trend_confidence.get());
    assert!(result.ema_breaches.is_empty());
    assert!(result.divergences.is_empty());
    assert_eq!(result.aroon_signal.unwrap().signal_type, AroonSignalType::StrongUptrend);
    assert_eq!(result.symbol, "RISE");

    let (trade, confidence) = engine.should_trade_trend(&bars, TradeSide::Buy, None);
    assert!(trade);
    assert_eq!(confidence, result.confidence);
    let (trade, _) = engine.should_trade_trend(&bars, TradeSide::Sell, None);
    assert!(!trade);
}

#[test]
fn test_falling_series_is_bearish() {
    let engine = TrendDetectionEngine::new(TrendConfig::default()).unwrap();
    let bars = make_trend(150, 200.0, -0.5);
    let result = engine.analyze_trend_change(&bars, "FALL", None);
    assert_eq!(result.dominant_direction, Direction::Bearish);
    assert_eq!(result.ema_signal.unwrap().signal_type, EmaSignalType::StrongBearishTrend);

    let sells = engine.get_trend_signals(&bars, TradeSide::Sell);
    assert!(!sells.is_empty());
    assert!(sells.iter().all(|s| s.direction == Direction::Bearish));
    assert!(engine.get_trend_signals(&bars, TradeSide::Buy).is_empty());
}

#[test]
fn test_sideways_series_is_consolidation() {
    let engine = TrendDetectionEngine::new(TrendConfig::default()).unwrap();
    let bars = make_sideways(120);
    let result = engine.analyze_trend_change(&bars, "FLAT", None);

    let ema = result.ema_signal.unwrap();
    assert!(matches!(
        ema.signal_type,
        EmaSignalType::Consolidation | EmaSignalType::WeakBullish | EmaSignalType::WeakBearish
    ));
    assert!(result.confidence < engine.config().min_trend_confidence.get());
    assert!(!engine.should_trade_trend(&bars, TradeSide::Buy, None).0);
    assert!(!engine.should_trade_trend(&bars, TradeSide::Sell, None).0);
}

#[test]
fn test_higher_timeframe_contradiction_lowers_confidence() {
    let engine = TrendDetectionEngine::new(TrendConfig::default()).unwrap();
    let primary = make_trend(150, 100.0, 0.5);
    let higher = make_trend(150, 200.0, -0.5);

    let alone = engine.analyze_trend_change(&primary, "MTF", None);
    let against = engine.analyze_trend_change(&primary, "MTF", Some(higher.as_slice()));

    let alignment = against.timeframe_alignment.as_ref().unwrap();
    assert!(alignment.contradiction);
    assert_eq!(alignment.higher_signal.direction, Direction::Bearish);
    assert!(alignment.confirmation_level < ConfirmationLevel::Moderate);
    assert!(against.confidence < alone.confidence);
    assert!(!engine.should_trade_trend(&primary, TradeSide::Buy, Some(higher.as_slice())).0);

    let agreeing = make_trend(150, 50.0, 1.0);
    let with = engine.analyze_trend_change(&primary, "MTF", Some(agreeing.as_slice()));
    let alignment = with.timeframe_alignment.unwrap();
    assert!(!alignment.contradiction);
    assert!(engine.timeframe_analyzer().should_confirm_signal(&alignment, TradeSide::Buy));
}

#[test]
fn test_mtf_disabled_ignores_higher_bars() {
    let engine = EngineBuilder::new().multi_timeframe(false).build().unwrap();
    let primary = make_trend(150, 100.0, 0.5);
    let higher = make_trend(150, 200.0, -0.5);
    let result = engine.analyze_trend_change(&primary, "", Some(higher.as_slice()));
    assert!(result.timeframe_alignment.is_none());
    assert_eq!(result, engine.analyze_trend_change(&primary, "", None));
}

#[test]
fn test_exhaustion_after_selloff() {
    // 36 falling bars, one climactic bar, then three quiet bars
    let mut bars = make_trend(36, 120.0, -0.5);
    let spike_close = 102.0;
    bars.push(TestBar::new(103.0, 104.0, 100.0, spike_close, 5000.0));
    for k in 0..3 {
        let c = spike_close + 0.05 * k as f64;
        bars.push(TestBar::new(c, c + 0.3, c - 0.3, c, 1200.0));
    }

    let analyzer = VolumeAnalyzer::with_defaults();
    let w = window(&bars);
    let exhaustion = analyzer.detect_exhaustion_volume(&w, 20);
    assert!(exhaustion.detected);
    assert_eq!(exhaustion.spike_index, Some(36));
    assert_eq!(exhaustion.direction, Direction::Bullish);
    assert!(exhaustion.volume_ratio >= 2.0);
    assert!(exhaustion.strength > 0.0 && exhaustion.strength <= 1.0);

    let report = analyzer.evaluate(&w).unwrap();
    let names: Vec<&str> = report.signals().iter().map(|s| s.name()).collect();
    assert!(names.contains(&"bullish_volume_exhaustion"));
}

#[test]
fn test_exhaustion_needs_quiet_follow_through() {
    let mut bars = make_trend(36, 120.0, -0.5);
    bars.push(TestBar::new(103.0, 104.0, 100.0, 102.0, 5000.0));
    for k in 1..=3 {
        let c = 102.0 - 1.0 * k as f64;
        bars.push(TestBar::new(c + 1.0, c + 1.2, c - 0.2, c, 1200.0));
    }
    let exhaustion = VolumeAnalyzer::with_defaults().detect_exhaustion_volume(&window(&bars), 20);
    assert_eq!(exhaustion.spike_index, Some(36));
    assert!(!exhaustion.detected);
}

#[test]
fn test_breakout_on_volume() {
    let mut bars: Vec<TestBar> = (0..40).map(|_| TestBar::new(100.0, 101.0, 99.0, 100.0, 1000.0)).collect();
    bars.push(TestBar::new(100.5, 103.5, 100.0, 103.0, 2000.0));
    let analyzer = VolumeAnalyzer::with_defaults();
    let w = window(&bars);

    let confirmed = analyzer.confirm_breakout_volume(&w, 101.0, Direction::Bullish, 20);
    assert!(confirmed.confirmed);
    assert_eq!(confirmed.volume_ratio, 2.0);
    assert!(!analyzer.confirm_breakout_volume(&w, 101.0, Direction::Bearish, 20).confirmed);

    let report = analyzer.evaluate(&w).unwrap();
    let setup = report.breakout.unwrap();
    assert_eq!(setup.direction, Direction::Bullish);
    assert_eq!(setup.level, 101.0);
    assert!(setup.volume.confirmed);

    // same move on ordinary volume
    let last = bars.len() - 1;
    bars[last].v = 1100.0;
    let thin = analyzer.confirm_breakout_volume(&window(&bars), 101.0, Direction::Bullish, 20);
    assert!(!thin.confirmed);
    assert!(thin.strength < confirmed.strength);
}

// ============================================================
// ROBUSTNESS
// ============================================================

#[test]
fn test_empty_and_short_inputs_are_neutral() {
    let engine = TrendDetectionEngine::new(TrendConfig::default()).unwrap();
    let empty: Vec<TestBar> = Vec::new();
    let result = engine.analyze_trend_change(&empty, "X", None);
    assert!(result.is_neutral());
    assert!(result.signals.is_empty());
    assert_eq!(result.confidence, 0.0);

    let short = make_trend(MIN_ANALYSIS_BARS - 1, 100.0, 0.5);
    let result = engine.analyze_trend_change(&short, "X", None);
    assert!(result.is_neutral());
    assert_eq!(engine.should_trade_trend(&short, TradeSide::Buy, None), (false, 0.0));
}

#[test]
fn test_missing_column_is_neutral() {
    let mut bars = make_trend(60, 100.0, 0.5);
    for b in &mut bars {
        b.v = f64::NAN;
    }
    assert!(matches!(PriceWindow::from_bars(&bars), Err(TrendError::MissingColumn("volume"))));

    let engine = TrendDetectionEngine::new(TrendConfig::default()).unwrap();
    let result = engine.analyze_trend_change(&bars, "X", None);
    assert!(result.is_neutral());
}

#[test]
fn test_invalid_bars_rejected() {
    let mut bars = make_trend(20, 100.0, 0.5);
    bars[7].h = bars[7].l - 1.0;
    assert!(matches!(
        PriceWindow::from_bars(&bars),
        Err(TrendError::InvalidOHLCV { index: 7, .. })
    ));

    let mut bars = make_trend(20, 100.0, 0.5);
    for (i, b) in bars.iter_mut().enumerate() {
        b.t = Some(i as i64 * 60);
    }
    bars[12].t = Some(0);
    assert!(matches!(
        PriceWindow::from_bars(&bars),
        Err(TrendError::UnsortedTimestamps { index: 12 })
    ));
}

#[test]
fn test_isolated_nan_is_tolerated() {
    let mut bars = make_trend(150, 100.0, 0.5);
    bars[40].c = f64::NAN;
    let engine = TrendDetectionEngine::new(TrendConfig::default()).unwrap();
    let result = engine.analyze_trend_change(&bars, "GAP", None);
    assert!(!result.is_neutral());
    assert!((0.0..=1.0).contains(&result.confidence));
}

// ============================================================
// DETERMINISM / PARALLEL
// ============================================================

#[test]
fn test_deterministic_results() {
    let engine = TrendDetectionEngine::new(TrendConfig::default()).unwrap();
    let primary = make_trend(150, 100.0, 0.5);
    let higher = make_trend(80, 90.0, 1.0);

    let a = engine.analyze_trend_change(&primary, "DET", Some(higher.as_slice()));
    let b = engine.analyze_trend_change(&primary, "DET", Some(higher.as_slice()));
    assert_eq!(format!("{a:?}"), format!("{b:?}"));
    assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
}

#[test]
fn test_parallel_matches_sequential() {
    let engine = TrendDetectionEngine::new(TrendConfig::default()).unwrap();
    let up = make_trend(150, 100.0, 0.5);
    let down = make_trend(150, 200.0, -0.5);
    let flat = make_sideways(150);

    let instruments: Vec<(&str, &[TestBar], Option<&[TestBar]>)> = vec![
        ("UP", &up, None),
        ("DOWN", &down, Some(up.as_slice())),
        ("FLAT", &flat, None),
    ];
    let results = analyze_parallel(&engine, instruments.clone());
    assert_eq!(results.len(), 3);
    for ((symbol, bars, higher), result) in instruments.into_iter().zip(&results) {
        assert_eq!(result, &engine.analyze_trend_change(bars, symbol, higher));
    }
}

#[test]
fn test_result_serializes() {
    let engine = TrendDetectionEngine::new(TrendConfig::default()).unwrap();
    let result = engine.analyze_trend_change(&make_trend(150, 100.0, 0.5), "JSON", None);
    let json: serde_json::Value = serde_json::to_value(&result).unwrap();
    assert_eq!(json["symbol"], "JSON");
    assert_eq!(json["dominant_direction"], "bullish");
    assert!(json["signals"].as_array().is_some_and(|s| !s.is_empty()));
}
