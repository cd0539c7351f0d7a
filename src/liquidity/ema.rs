// =============================================================================
// Outlier-robust EMA — 1.5·IQR cleaning, then EMA with alpha = 2/21
// =============================================================================
//
// A single anomalous session (a block trade, a fat-finger bulletin row) can
// drag a plain EMA for weeks. The aggregation therefore drops points outside
// the 1.5·IQR box before smoothing. If cleaning removes every point the raw
// series is used as-is.
//
// Formula:
//   alpha = 2 / (period + 1), period = 20
//   EMA_t = x_t * alpha + EMA_{t-1} * (1 - alpha)
//
// The EMA is seeded with the first value of the (cleaned) series.
// =============================================================================

/// Smoothing factor for the 20-period EMA.
const EMA_ALPHA: f64 = 2.0 / 21.0;

/// Linearly interpolated quantile of an already **sorted** slice.
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Drop values outside the `[Q1 - 1.5·IQR, Q3 + 1.5·IQR]` box.
///
/// Order of surviving values is preserved. May return an empty vec when the
/// input is empty or degenerate; callers fall back to the raw series.
pub fn iqr_clean(series: &[f64]) -> Vec<f64> {
    if series.len() < 4 {
        // Too short for meaningful quartiles.
        return series.to_vec();
    }

    let mut sorted: Vec<f64> = series.iter().copied().filter(|x| x.is_finite()).collect();
    if sorted.is_empty() {
        return Vec::new();
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let q1 = quantile_sorted(&sorted, 0.25);
    let q3 = quantile_sorted(&sorted, 0.75);
    let iqr = q3 - q1;
    let lo = q1 - 1.5 * iqr;
    let hi = q3 + 1.5 * iqr;

    series
        .iter()
        .copied()
        .filter(|x| x.is_finite() && *x >= lo && *x <= hi)
        .collect()
}

/// Plain EMA over `series`, seeded with the first value. Returns the final
/// smoothed value, or `None` for an empty series.
pub fn ema(series: &[f64], alpha: f64) -> Option<f64> {
    let mut iter = series.iter().copied().filter(|x| x.is_finite());
    let seed = iter.next()?;
    let mut value = seed;
    for x in iter {
        value = x * alpha + value * (1.0 - alpha);
    }
    Some(value)
}

/// IQR-cleaned EMA with alpha = 2/21. Falls back to the raw series when
/// cleaning removes every point. Returns `None` only for an empty input.
pub fn robust_ema(series: &[f64]) -> Option<f64> {
    let cleaned = iqr_clean(series);
    if cleaned.is_empty() {
        ema(series, EMA_ALPHA)
    } else {
        ema(&cleaned, EMA_ALPHA)
    }
}
