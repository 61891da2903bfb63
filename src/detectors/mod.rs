//! Trend detectors
//!
//! Five leaf detectors read one [`PriceWindow`](crate::PriceWindow) each and
//! share no state; the multi-timeframe analyzer compares two windows.
//!
//! - **EMA momentum**: fast/slow state, crossovers, EMA levels and breaches
//! - **Market structure**: swing highs/lows and structure breaks
//! - **Aroon**: time since the latest extremes
//! - **Divergence**: price swings against RSI and MACD swings
//! - **Volume**: exhaustion, breakout confirmation, volume/price divergence
//! - **Timeframe**: agreement between a primary and a higher timeframe

pub mod helpers;

/// Generate `with_defaults()` -> `Self::default()` for multiple detector types.
macro_rules! impl_with_defaults {
  ($($detector:ty),* $(,)?) => {
    $(impl $detector {
      pub fn with_defaults() -> Self { Self::default() }
    })*
  };
}

pub mod aroon;
pub mod divergence;
pub mod ema;
pub mod structure;
pub mod timeframe;
pub mod volume;

// Re-export all detectors for convenience
pub use aroon::*;
pub use divergence::*;
pub use ema::*;
pub use helpers::{find_swing_points, SwingKind, SwingPoint};
pub use structure::*;
pub use timeframe::*;
pub use volume::*;
