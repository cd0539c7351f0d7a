// =============================================================================
// Safe trade sizes — participation model with a continuity damper
// =============================================================================
//
// A trade participating in a bounded share of the typical daily traded value
// moves the price by roughly gamma times that participation. Inverting for a
// target impact `i` gives the allowed notional:
//
//   safe(i) = avg_value · (i / gamma) · continuity
//
// Continuity damps the size because a symbol that trades three days out of
// twenty cannot absorb its nominal daily value on demand. Thresholds are
// reported in whole IQD. A POOR-quality series gets zeros across the board
// while its score is still reported.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::types::DataQuality;

/// Price-impact coefficient of the participation model.
const GAMMA: f64 = 0.1;

/// Target impact for the optimal (headline) trade size.
const OPTIMAL_IMPACT: f64 = 0.015;

/// Maximum IQD notionals for the three target impacts, plus the headline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeTradeThresholds {
    /// Notional moving the price by at most 0.5 %.
    pub half_percent: f64,
    /// Notional moving the price by at most 1 %.
    pub one_percent: f64,
    /// Notional moving the price by at most 2 %.
    pub two_percent: f64,
    /// Recommended single-trade notional (1.5 % target impact).
    pub optimal: f64,
}

impl SafeTradeThresholds {
    pub const ZERO: Self = Self {
        half_percent: 0.0,
        one_percent: 0.0,
        two_percent: 0.0,
        optimal: 0.0,
    };

    /// Compute thresholds from the trailing average traded value and the
    /// continuity fraction. POOR quality zeroes everything.
    pub fn compute(avg_value: f64, continuity: f64, quality: DataQuality) -> Self {
        if quality == DataQuality::Poor || avg_value <= 0.0 {
            return Self::ZERO;
        }
        let continuity = continuity.clamp(0.0, 1.0);
        let size = |impact: f64| (avg_value * (impact / GAMMA) * continuity).round();
        Self {
            half_percent: size(0.005),
            one_percent: size(0.01),
            two_percent: size(0.02),
            optimal: size(OPTIMAL_IMPACT),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.half_percent == 0.0
            && self.one_percent == 0.0
            && self.two_percent == 0.0
            && self.optimal == 0.0
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poor_quality_zeroes_all_thresholds() {
        let t = SafeTradeThresholds::compute(1_000_000_000.0, 0.9, DataQuality::Poor);
        assert!(t.is_zero());
    }

    #[test]
    fn thresholds_are_monotone_in_target_impact() {
        let t = SafeTradeThresholds::compute(100_000_000.0, 0.8, DataQuality::Good);
        assert!(t.half_percent < t.one_percent);
        assert!(t.one_percent < t.optimal);
        assert!(t.optimal < t.two_percent);
    }

    #[test]
    fn thresholds_are_monotone_in_value_and_continuity() {
        let small = SafeTradeThresholds::compute(10_000_000.0, 0.5, DataQuality::Good);
        let bigger_value = SafeTradeThresholds::compute(20_000_000.0, 0.5, DataQuality::Good);
        let better_continuity = SafeTradeThresholds::compute(10_000_000.0, 0.9, DataQuality::Good);
        assert!(bigger_value.optimal > small.optimal);
        assert!(better_continuity.optimal > small.optimal);
    }

    #[test]
    fn known_values() {
        // 100M avg value, full continuity: 0.5% impact allows 5% participation.
        let t = SafeTradeThresholds::compute(100_000_000.0, 1.0, DataQuality::Good);
        assert_eq!(t.half_percent, 5_000_000.0);
        assert_eq!(t.one_percent, 10_000_000.0);
        assert_eq!(t.two_percent, 20_000_000.0);
        assert_eq!(t.optimal, 15_000_000.0);
    }

    #[test]
    fn zero_value_yields_zero() {
        let t = SafeTradeThresholds::compute(0.0, 0.8, DataQuality::Good);
        assert!(t.is_zero());
    }

    #[test]
    fn continuity_clamped() {
        let t = SafeTradeThresholds::compute(100_000_000.0, 1.7, DataQuality::Fair);
        // Clamped to 1.0, same as full continuity.
        assert_eq!(t.half_percent, 5_000_000.0);
    }
}
