//! Immutable columnar price window
//!
//! Every analysis copies the caller's bars once into a [`PriceWindow`];
//! detectors read its columns by shared reference and never mutate them.

use crate::{OHLCVExt, PriceBar, Result, TrendError, OHLCV};

/// Validated, time-ordered OHLCV columns
#[derive(Debug, Clone, PartialEq)]
pub struct PriceWindow {
    time: Vec<i64>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
}

impl PriceWindow {
    /// Copy and validate a bar sequence.
    ///
    /// Timestamps must be supplied for every bar or for none; bars without
    /// timestamps are ordered by position. A column without a single finite
    /// value is reported as missing.
    pub fn from_bars<T: OHLCV>(bars: &[T]) -> Result<Self> {
        let Some(first) = bars.first() else {
            return Err(TrendError::InsufficientData { need: 1, got: 0 });
        };
        let stamped = first.timestamp().is_some();
        let n = bars.len();
        let mut window = Self {
            time: Vec::with_capacity(n),
            open: Vec::with_capacity(n),
            high: Vec::with_capacity(n),
            low: Vec::with_capacity(n),
            close: Vec::with_capacity(n),
            volume: Vec::with_capacity(n),
        };

        for (index, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|e| match e {
                TrendError::InvalidOHLCV { reason, .. } => TrendError::InvalidOHLCV { index, reason },
                other => other,
            })?;

            let time = match (stamped, bar.timestamp()) {
                (true, Some(t)) => t,
                (false, None) => index as i64,
                _ => return Err(TrendError::MissingColumn("time")),
            };
            if let Some(&prev) = window.time.last() {
                if time <= prev {
                    return Err(TrendError::UnsortedTimestamps { index });
                }
            }

            window.time.push(time);
            window.open.push(bar.open());
            window.high.push(bar.high());
            window.low.push(bar.low());
            window.close.push(bar.close());
            window.volume.push(bar.volume());
        }

        let columns = [
            ("open", &window.open),
            ("high", &window.high),
            ("low", &window.low),
            ("close", &window.close),
            ("volume", &window.volume),
        ];
        for (name, column) in columns {
            if !column.iter().any(|v| v.is_finite()) {
                return Err(TrendError::MissingColumn(name));
            }
        }

        Ok(window)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.close.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    pub fn time(&self) -> &[i64] {
        &self.time
    }

    pub fn open(&self) -> &[f64] {
        &self.open
    }

    pub fn high(&self) -> &[f64] {
        &self.high
    }

    pub fn low(&self) -> &[f64] {
        &self.low
    }

    pub fn close(&self) -> &[f64] {
        &self.close
    }

    pub fn volume(&self) -> &[f64] {
        &self.volume
    }

    /// Row view of one bar
    pub fn bar(&self, index: usize) -> Option<PriceBar> {
        if index >= self.len() {
            return None;
        }
        Some(PriceBar::new(
            self.time[index],
            self.open[index],
            self.high[index],
            self.low[index],
            self.close[index],
            self.volume[index],
        ))
    }

    /// Close of the final bar, if finite
    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied().filter(|c| c.is_finite())
    }
}
