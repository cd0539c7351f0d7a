// =============================================================================
// Liquidity points — per (symbol, date) analytic rows
// =============================================================================
//
// One point per day of *real* activity. The three raw components:
//
//   illiq_raw      Amihud illiquidity, |daily return %| / traded value.
//                  Days with zero traded value produce no point.
//   value_raw      IQD traded that day.
//   continuity_raw fraction of the trailing window with real trading,
//                  computed over the dense calendar series.
//
// Scaled components, the hybrid score, thresholds, and the quality bucket
// are filled in by the engine once the whole cross-section is known.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::bulletin::record::TradeRecord;
use crate::liquidity::safe_trade::SafeTradeThresholds;
use crate::types::DataQuality;

/// Guard against division by a vanishing traded value.
const VALUE_EPSILON: f64 = 1e-9;

/// Fully populated analytic row for one (symbol, date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityPoint {
    pub symbol: String,
    pub date: NaiveDate,
    pub illiq_raw: f64,
    pub value_raw: f64,
    pub continuity_raw: f64,
    pub illiq_scaled: f64,
    pub value_scaled: f64,
    pub continuity_scaled: f64,
    /// 0.40·illiq + 0.35·value + 0.25·continuity, rounded to 1 dp.
    pub hybrid_score: f64,
    #[serde(flatten)]
    pub thresholds: SafeTradeThresholds,
    pub data_quality: DataQuality,
    /// Shares traded that day; feeds the per-mode daily_volume metric.
    pub volume: u64,
}

/// Raw per-day basis produced before cross-sectional scaling.
#[derive(Debug, Clone)]
pub struct PointBasis {
    pub symbol: String,
    pub date: NaiveDate,
    pub illiq_raw: f64,
    pub value_raw: f64,
    pub continuity_raw: f64,
    /// Trailing mean of `value_raw` over up to 20 points; threshold input.
    pub avg_value: f64,
    pub volume: u64,
}

/// Number of points the trailing value average looks back over.
const VALUE_AVG_WINDOW: usize = 20;

/// Compute the raw per-day bases for one symbol.
///
/// `records` is the symbol's dense calendar series sorted ascending by date;
/// `continuity_window` is the trailing span (in calendar rows) the continuity
/// fraction is measured over. Days without activity or with zero traded value
/// yield no basis but still count toward continuity denominators.
pub fn compute_bases(
    records: &[TradeRecord],
    continuity_window: usize,
) -> Vec<PointBasis> {
    let window = continuity_window.max(1);
    let mut bases: Vec<PointBasis> = Vec::new();
    let mut recent_values: Vec<f64> = Vec::new();

    for (idx, record) in records.iter().enumerate() {
        if !record.has_activity() || record.value <= 0.0 {
            continue;
        }

        // Trailing continuity over the dense calendar, current day included.
        let start = (idx + 1).saturating_sub(window);
        let span = &records[start..=idx];
        let trading_days = span.iter().filter(|r| r.trading_status).count();
        let continuity_raw = trading_days as f64 / span.len() as f64;

        let illiq_raw = record.change_percent.abs() / record.value.max(VALUE_EPSILON);

        recent_values.push(record.value);
        let tail_start = recent_values.len().saturating_sub(VALUE_AVG_WINDOW);
        let tail = &recent_values[tail_start..];
        let avg_value = tail.iter().sum::<f64>() / tail.len() as f64;

        bases.push(PointBasis {
            symbol: record.symbol.clone(),
            date: record.date,
            illiq_raw,
            value_raw: record.value,
            continuity_raw,
            avg_value,
            volume: record.volume,
        });
    }

    bases
}
