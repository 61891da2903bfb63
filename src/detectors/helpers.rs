//! Shared detector geometry and statistics
//!
//! Swing-point detection used by market structure and divergence, plus the
//! small numeric helpers every detector leans on.

use serde::Serialize;

// ============================================================
// NUMERIC HELPERS
// ============================================================

/// Clamp to [0, 1]; NaN maps to 0
#[inline]
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Mean of the finite values, `None` when there are none
pub fn mean_finite(values: &[f64]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// `|to - from| / |from|`, `None` for non-finite input or a zero base
#[inline]
pub fn relative_change(from: f64, to: f64) -> Option<f64> {
    if !from.is_finite() || !to.is_finite() || from == 0.0 {
        return None;
    }
    Some((to - from).abs() / from.abs())
}

/// Largest finite value in `values`
pub fn max_finite(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
}

/// Smallest finite value in `values`
pub fn min_finite(values: &[f64]) -> Option<f64> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
}

// ============================================================
// SWING POINTS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingKind {
    High,
    Low,
}

impl SwingKind {
    /// `a` is strictly more extreme than `b` for this kind (false on NaN)
    #[inline]
    pub fn beyond(self, a: f64, b: f64) -> bool {
        match self {
            SwingKind::High => a > b,
            SwingKind::Low => a < b,
        }
    }
}

/// Local extreme of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
    /// Bars on each side over which the point stays the extreme, capped at
    /// twice the detection window
    pub strength: usize,
}

/// Local extremes of `values`.
///
/// A candidate at `i` must be strictly beyond every value in
/// `[i - strength, i + strength]`. Swings closer than `min_separation` bars
/// collapse into the more extreme one (the earlier one on equal values).
pub fn find_swing_points(
    values: &[f64],
    kind: SwingKind,
    strength: usize,
    min_separation: usize,
) -> Vec<SwingPoint> {
    let w = strength.max(1);
    let n = values.len();
    let mut swings: Vec<SwingPoint> = Vec::new();
    if n < 2 * w + 1 {
        return swings;
    }

    for i in w..n - w {
        let v = values[i];
        if !v.is_finite() || !(1..=w).all(|k| kind.beyond(v, values[i - k]) && kind.beyond(v, values[i + k])) {
            continue;
        }
        let point = SwingPoint {
            index: i,
            price: v,
            kind,
            strength: extent(values, i, kind, 2 * w),
        };
        match swings.last_mut() {
            Some(last) if i - last.index < min_separation => {
                if kind.beyond(v, last.price) {
                    *last = point;
                }
            }
            _ => swings.push(point),
        }
    }
    swings
}

/// Bars on both sides over which `values[i]` stays strictly extreme
fn extent(values: &[f64], i: usize, kind: SwingKind, cap: usize) -> usize {
    let v = values[i];
    let mut k = 0;
    while k < cap {
        let next = k + 1;
        let (Some(left), Some(right)) = (i.checked_sub(next), values.get(i + next)) else {
            break;
        };
        if !(kind.beyond(v, values[left]) && kind.beyond(v, *right)) {
            break;
        }
        k = next;
    }
    k
}
