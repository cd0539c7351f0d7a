// =============================================================================
// TradeRecord — one canonical row per (ticker, date)
// =============================================================================
//
// Invariants:
//   T1: trading_status == false implies volume == 0 and num_trades == 0.
//   T2: within a symbol series, dates are unique and strictly increasing once
//       sorted.
// =============================================================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A single daily trade record for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Uppercased exchange ticker.
    pub symbol: String,
    pub company_name: String,
    /// Trading day (UTC midnight by construction).
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub avg: f64,
    pub prev_close: f64,
    pub prev_avg: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: u64,
    pub num_trades: u64,
    /// Trade notional in IQD.
    pub value: f64,
    /// True iff the ticker actually traded that day.
    pub trading_status: bool,
}

impl TradeRecord {
    /// Whether this row shows real activity. Some bulletins carry a stale
    /// status flag, so positive volume or trade count also counts.
    pub fn has_activity(&self) -> bool {
        self.trading_status || self.volume > 0 || self.num_trades > 0
    }

    /// Synthesize the non-trading row for `date` from the last known real
    /// row. All price fields flatten to the last close; volume, trades,
    /// value, and both change fields are zero; `trading_status` is false.
    pub fn forward_filled_from(last: &TradeRecord, date: NaiveDate) -> Self {
        let carried = last.close;
        Self {
            symbol: last.symbol.clone(),
            company_name: last.company_name.clone(),
            date,
            open: carried,
            high: carried,
            low: carried,
            close: carried,
            avg: carried,
            prev_close: carried,
            prev_avg: carried,
            change: 0.0,
            change_percent: 0.0,
            volume: 0,
            num_trades: 0,
            value: 0.0,
            trading_status: false,
        }
    }

    /// Normalize a raw symbol cell: trim and uppercase.
    pub fn normalize_symbol(raw: &str) -> String {
        raw.trim().to_uppercase()
    }
}
