// =============================================================================
// Ticker Summarizer — per-ticker aggregates over *actual* trading days
// =============================================================================
//
// The correctness contract of this module: `last_date` reflects the last day
// the ticker really traded, never a forward-filled calendar row. The dense
// stream deliberately contains synthetic rows with `trading_status = false`;
// every aggregate here works off the activity predicate, not row presence.
//
// Selection of the "last real trading record" scans from the end:
//   1. most recent row with trading_status == true,
//   2. else most recent row with volume > 0 or num_trades > 0,
//   3. else the final calendar row, reported with last_trading_status = false
//      and zeroed change fields.
// =============================================================================

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bulletin::record::TradeRecord;
use crate::runtime_config::SummaryParams;

/// Artifact schema version stamped into every summary.
const SUMMARY_VERSION: &str = "1.0.0";
/// Where the numbers came from.
const DATA_SOURCE: &str = "isx_daily_bulletin";

/// Trading days per year; bounds the 52-week scan.
const TRADING_DAYS_PER_YEAR: usize = 252;
/// Look-back offsets for the extended period changes.
const WEEKLY_OFFSET: usize = 5;
const MONTHLY_OFFSET: usize = 21;

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Extended per-ticker aggregates, emitted only when enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtendedSummary {
    pub total_volume: u64,
    pub total_value: f64,
    pub average_price: f64,
    pub highest: f64,
    pub lowest: f64,
    pub daily_change_percent: f64,
    pub weekly_change_percent: f64,
    pub monthly_change_percent: f64,
    pub previous_close: f64,
    pub week_52_high: f64,
    pub week_52_low: f64,
    pub daily_volume: u64,
    pub daily_value: f64,
}

/// One per-ticker summary row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSummary {
    pub ticker: String,
    pub company_name: String,
    /// Close of the last real trading day, 3 dp.
    pub last_price: f64,
    /// Date of the last row with real activity — never a filled date.
    pub last_date: NaiveDate,
    /// Count of rows with real activity.
    pub trading_days: usize,
    /// Up to N most-recent actual closes, chronological, 3 dp.
    pub last_10_days: Vec<f64>,
    pub change: f64,
    pub change_percent: f64,
    pub last_trading_status: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub extended: Option<ExtendedSummary>,
    pub generated_at: DateTime<Utc>,
    pub version: String,
    pub data_source: String,
}

/// S4: tickers are 2–10 uppercase ASCII letters.
fn is_valid_ticker(symbol: &str) -> bool {
    (2..=10).contains(&symbol.len()) && symbol.bytes().all(|b| b.is_ascii_uppercase())
}

/// Percent change of `current` vs `base`; zero when the base is zero.
fn pct_change(current: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        (current - base) / base * 100.0
    }
}

/// Summarize one symbol's records. Records may arrive in any order; they are
/// sorted ascending by date internally. Returns `None` for an empty slice.
pub fn summarize_symbol(
    symbol: &str,
    records: &[TradeRecord],
    params: &SummaryParams,
    generated_at: DateTime<Utc>,
) -> Option<TickerSummary> {
    if records.is_empty() {
        return None;
    }

    let mut sorted: Vec<&TradeRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.date);

    // Last real trading record, with the documented fallback chain.
    let last_real = sorted
        .iter()
        .rev()
        .find(|r| r.trading_status)
        .or_else(|| {
            sorted
                .iter()
                .rev()
                .find(|r| r.volume > 0 || r.num_trades > 0)
        })
        .copied();

    let active: Vec<&TradeRecord> = sorted.iter().filter(|r| r.has_activity()).copied().collect();
    let trading_days = active.len();

    let n = params.max_last_n_days.min(trading_days);
    let last_n_days: Vec<f64> = active[trading_days - n..]
        .iter()
        .map(|r| round3(r.close))
        .collect();

    let (anchor, last_trading_status, change, change_percent) = match last_real {
        Some(real) => (real, true, round3(real.change), round2(real.change_percent)),
        // No activity at all: fall back to the final calendar row with
        // zeroed change fields.
        None => (*sorted.last()?, false, 0.0, 0.0),
    };

    let extended = params.include_extended.then(|| {
        let daily_change_percent = if last_n_days.len() >= 2 {
            pct_change(
                last_n_days[last_n_days.len() - 1],
                last_n_days[last_n_days.len() - 2],
            )
        } else {
            0.0
        };

        // Period changes compare against the element `offset` back in the
        // window, clamping to the earliest element when history is short.
        let period_change = |offset: usize| -> f64 {
            if last_n_days.len() < 2 {
                return 0.0;
            }
            let last_idx = last_n_days.len() - 1;
            let base_idx = last_idx.saturating_sub(offset);
            pct_change(last_n_days[last_idx], last_n_days[base_idx])
        };

        // 52-week range over the most recent 252 active records.
        let year_slice = &active[trading_days.saturating_sub(TRADING_DAYS_PER_YEAR)..];
        let week_52_high = year_slice.iter().map(|r| r.high).fold(0.0_f64, f64::max);
        let week_52_low = year_slice
            .iter()
            .map(|r| r.low)
            .fold(f64::INFINITY, f64::min);

        let total_volume: u64 = active.iter().map(|r| r.volume).sum();
        let total_value: f64 = active.iter().map(|r| r.value).sum();
        let average_price = if trading_days > 0 {
            active.iter().map(|r| r.close).sum::<f64>() / trading_days as f64
        } else {
            0.0
        };
        let highest = active.iter().map(|r| r.high).fold(0.0_f64, f64::max);
        let lowest = active
            .iter()
            .map(|r| r.low)
            .fold(f64::INFINITY, f64::min);

        ExtendedSummary {
            total_volume,
            total_value: round3(total_value),
            average_price: round3(average_price),
            highest: round3(highest),
            lowest: round3(if lowest.is_finite() { lowest } else { 0.0 }),
            daily_change_percent: round2(daily_change_percent),
            weekly_change_percent: round2(period_change(WEEKLY_OFFSET)),
            monthly_change_percent: round2(period_change(MONTHLY_OFFSET)),
            previous_close: round3(anchor.prev_close),
            week_52_high: round3(week_52_high),
            week_52_low: round3(if week_52_low.is_finite() { week_52_low } else { 0.0 }),
            daily_volume: anchor.volume,
            daily_value: round3(anchor.value),
        }
    });

    debug!(
        %symbol,
        trading_days,
        last_date = %anchor.date,
        "ticker summarized"
    );

    Some(TickerSummary {
        ticker: symbol.to_string(),
        company_name: anchor.company_name.clone(),
        last_price: round3(anchor.close),
        last_date: anchor.date,
        trading_days,
        last_10_days: last_n_days,
        change,
        change_percent,
        last_trading_status,
        extended,
        generated_at,
        version: SUMMARY_VERSION.to_string(),
        data_source: DATA_SOURCE.to_string(),
    })
}

/// Summarize a dense stream covering many symbols. Output is sorted by
/// ticker ascending; symbols violating the ticker pattern are skipped.
pub fn summarize_all(records: &[TradeRecord], params: &SummaryParams) -> Vec<TickerSummary> {
    let generated_at = Utc::now();

    let mut by_symbol: std::collections::BTreeMap<&str, Vec<TradeRecord>> =
        std::collections::BTreeMap::new();
    for record in records {
        by_symbol
            .entry(record.symbol.as_str())
            .or_default()
            .push(record.clone());
    }

    let mut summaries = Vec::with_capacity(by_symbol.len());
    for (symbol, rows) in by_symbol {
        if !is_valid_ticker(symbol) {
            warn!(%symbol, "skipping ticker outside the 2-10 uppercase pattern");
            continue;
        }
        if let Some(summary) = summarize_symbol(symbol, &rows, params, generated_at) {
            summaries.push(summary);
        }
    }
    summaries
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SummaryParams {
        SummaryParams::default()
    }

    fn record(
        symbol: &str,
        date: (i32, u32, u32),
        close: f64,
        volume: u64,
        trades: u64,
        status: bool,
    ) -> TradeRecord {
        TradeRecord {
            symbol: symbol.to_string(),
            company_name: format!("{symbol} Co."),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            avg: close,
            prev_close: close,
            prev_avg: close,
            change: 0.0,
            change_percent: 0.0,
            volume,
            num_trades: trades,
            value: close * volume as f64,
            trading_status: status,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    // -- The correctness contract: last_date reflects real trading ----------

    #[test]
    fn last_date_skips_forward_filled_rows() {
        // BASH trades on the 11th; the 12th and 13th are filled rows.
        let records = vec![
            record("BASH", (2024, 8, 11), 1.5, 1000, 10, true),
            record("BASH", (2024, 8, 12), 1.5, 0, 0, false),
            record("BASH", (2024, 8, 13), 1.5, 0, 0, false),
        ];
        let summary = summarize_symbol("BASH", &records, &params(), now()).unwrap();

        assert_eq!(
            summary.last_date,
            NaiveDate::from_ymd_opt(2024, 8, 11).unwrap()
        );
        assert_eq!(summary.trading_days, 1);
        assert_eq!(summary.last_10_days, vec![1.5]);
        assert_eq!(summary.last_price, 1.5);
        assert!(summary.last_trading_status);
    }

    #[test]
    fn fallback_to_volume_when_status_flag_stale() {
        // No row carries trading_status=true, but one has volume.
        let records = vec![
            record("BASH", (2024, 8, 11), 1.5, 500, 0, false),
            record("BASH", (2024, 8, 12), 1.5, 0, 0, false),
        ];
        let summary = summarize_symbol("BASH", &records, &params(), now()).unwrap();
        assert_eq!(
            summary.last_date,
            NaiveDate::from_ymd_opt(2024, 8, 11).unwrap()
        );
        assert_eq!(summary.trading_days, 1);
        assert!(summary.last_trading_status);
    }

    #[test]
    fn fallback_to_final_row_when_never_traded() {
        let records = vec![
            record("BASH", (2024, 8, 11), 1.5, 0, 0, false),
            record("BASH", (2024, 8, 12), 1.5, 0, 0, false),
        ];
        let summary = summarize_symbol("BASH", &records, &params(), now()).unwrap();
        assert_eq!(
            summary.last_date,
            NaiveDate::from_ymd_opt(2024, 8, 12).unwrap()
        );
        assert_eq!(summary.trading_days, 0);
        assert!(summary.last_10_days.is_empty());
        assert!(!summary.last_trading_status);
        assert_eq!(summary.change, 0.0);
        assert_eq!(summary.change_percent, 0.0);
    }

    // -- Window behaviour ----------------------------------------------------

    #[test]
    fn last_n_window_is_min_of_n_and_trading_days() {
        let mut records = Vec::new();
        for day in 1..=15 {
            records.push(record("TASC", (2024, 7, day), day as f64, 100, 2, true));
        }
        // Interleave inactive rows that must not enter the window.
        records.push(record("TASC", (2024, 7, 20), 99.0, 0, 0, false));

        let summary = summarize_symbol("TASC", &records, &params(), now()).unwrap();
        assert_eq!(summary.trading_days, 15);
        assert_eq!(summary.last_10_days.len(), 10);
        // Chronological, most recent last, actual closes only.
        assert_eq!(summary.last_10_days[0], 6.0);
        assert_eq!(summary.last_10_days[9], 15.0);
    }

    #[test]
    fn window_shorter_than_n_keeps_all_active_closes() {
        let records = vec![
            record("TASC", (2024, 7, 1), 2.0, 10, 1, true),
            record("TASC", (2024, 7, 2), 2.1, 10, 1, true),
            record("TASC", (2024, 7, 3), 2.2, 0, 0, false),
        ];
        let summary = summarize_symbol("TASC", &records, &params(), now()).unwrap();
        assert_eq!(summary.last_10_days, vec![2.0, 2.1]);
        assert_eq!(summary.last_10_days.len(), summary.trading_days.min(10));
    }

    #[test]
    fn unsorted_input_is_sorted_internally() {
        let records = vec![
            record("TASC", (2024, 7, 3), 3.0, 10, 1, true),
            record("TASC", (2024, 7, 1), 1.0, 10, 1, true),
            record("TASC", (2024, 7, 2), 2.0, 10, 1, true),
        ];
        let summary = summarize_symbol("TASC", &records, &params(), now()).unwrap();
        assert_eq!(summary.last_10_days, vec![1.0, 2.0, 3.0]);
        assert_eq!(
            summary.last_date,
            NaiveDate::from_ymd_opt(2024, 7, 3).unwrap()
        );
    }

    // -- Extended aggregates -------------------------------------------------

    #[test]
    fn extended_totals_cover_active_rows_only() {
        let mut p = params();
        p.include_extended = true;

        let records = vec![
            record("BASH", (2024, 8, 11), 2.0, 100, 5, true),
            record("BASH", (2024, 8, 12), 4.0, 300, 6, true),
            record("BASH", (2024, 8, 13), 9.0, 0, 0, false), // filled
        ];
        let summary = summarize_symbol("BASH", &records, &p, now()).unwrap();
        let ext = summary.extended.unwrap();

        assert_eq!(ext.total_volume, 400);
        assert_eq!(ext.total_value, 2.0 * 100.0 + 4.0 * 300.0);
        assert_eq!(ext.average_price, 3.0);
        assert_eq!(ext.daily_volume, 300);
        assert_eq!(ext.daily_value, 1200.0);
        // Daily change: 4.0 vs 2.0.
        assert_eq!(ext.daily_change_percent, 100.0);
    }

    #[test]
    fn period_changes_clamp_to_earliest() {
        let mut p = params();
        p.include_extended = true;
        let records = vec![
            record("BASH", (2024, 8, 11), 2.0, 10, 1, true),
            record("BASH", (2024, 8, 12), 3.0, 10, 1, true),
        ];
        let summary = summarize_symbol("BASH", &records, &p, now()).unwrap();
        let ext = summary.extended.unwrap();
        // Both weekly and monthly fall back to the earliest element (2.0).
        assert_eq!(ext.weekly_change_percent, 50.0);
        assert_eq!(ext.monthly_change_percent, 50.0);
    }

    #[test]
    fn zero_base_daily_change_is_zero() {
        let mut p = params();
        p.include_extended = true;
        let records = vec![
            record("BASH", (2024, 8, 11), 0.0, 10, 1, true),
            record("BASH", (2024, 8, 12), 3.0, 10, 1, true),
        ];
        let summary = summarize_symbol("BASH", &records, &p, now()).unwrap();
        assert_eq!(summary.extended.unwrap().daily_change_percent, 0.0);
    }

    // -- Collection behaviour ------------------------------------------------

    #[test]
    fn summaries_sorted_by_ticker_and_pattern_enforced() {
        let records = vec![
            record("TASC", (2024, 8, 11), 8.0, 10, 1, true),
            record("BASH", (2024, 8, 11), 1.5, 10, 1, true),
            record("X", (2024, 8, 11), 1.0, 10, 1, true), // too short
            record("BMNS", (2024, 8, 11), 2.0, 10, 1, true),
        ];
        let summaries = summarize_all(&records, &params());
        let tickers: Vec<&str> = summaries.iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["BASH", "BMNS", "TASC"]);
    }

    #[test]
    fn empty_symbol_slice_yields_none() {
        assert!(summarize_symbol("BASH", &[], &params(), now()).is_none());
    }
}
