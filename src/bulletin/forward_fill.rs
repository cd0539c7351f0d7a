// =============================================================================
// Forward-fill processor — dense (date, symbol) record stream
// =============================================================================
//
// The exchange only publishes rows for tickers that appeared in that day's
// bulletin. Downstream analytics need a dense calendar: for every observed
// bulletin date, every symbol that has traded at or before that date gets a
// row. Missing rows are synthesized from the symbol's last known real row
// with zero activity and `trading_status = false`.
//
// Synthetic rows never feed back into the fill state: a symbol absent for a
// month keeps carrying its last *real* close, not a chain of copies.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::info;

use crate::bulletin::record::TradeRecord;

/// Statistics reported alongside the filled stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FillStats {
    pub rows_in: usize,
    pub rows_out: usize,
    pub filled_rows: usize,
    pub symbols: usize,
    pub dates: usize,
}

/// Fill non-trading calendar days from the last known state.
///
/// Input order does not matter. The output is sorted by (date, symbol) and
/// covers every (symbol, date) pair where the date was observed in the input
/// and the symbol has at least one real record at or before that date.
///
/// This function never fails; malformed inputs are the reader's problem.
pub fn forward_fill(records: Vec<TradeRecord>) -> (Vec<TradeRecord>, FillStats) {
    let rows_in = records.len();

    // Group into date -> symbol -> record. BTreeMap gives ascending dates.
    let mut by_date: BTreeMap<chrono::NaiveDate, HashMap<String, TradeRecord>> = BTreeMap::new();
    for record in records {
        by_date
            .entry(record.date)
            .or_default()
            .insert(record.symbol.clone(), record);
    }

    // Sorted symbol universe, so per-date iteration yields sorted output.
    let mut symbols: Vec<String> = by_date
        .values()
        .flat_map(|day| day.keys().cloned())
        .collect();
    symbols.sort();
    symbols.dedup();

    let mut last_known: HashMap<String, TradeRecord> = HashMap::new();
    let mut output = Vec::new();
    let mut filled_rows = 0usize;
    let dates = by_date.len();

    for (date, mut day) in by_date {
        for symbol in &symbols {
            match day.remove(symbol) {
                Some(real) => {
                    // Real row: pass through verbatim, refresh fill state.
                    last_known.insert(symbol.clone(), real.clone());
                    output.push(real);
                }
                None => {
                    // Absent: synthesize from the last real row if the symbol
                    // has been seen; otherwise it has not listed yet — skip.
                    if let Some(last) = last_known.get(symbol) {
                        output.push(TradeRecord::forward_filled_from(last, date));
                        filled_rows += 1;
                    }
                }
            }
        }
    }

    let stats = FillStats {
        rows_in,
        rows_out: output.len(),
        filled_rows,
        symbols: symbols.len(),
        dates,
    };

    info!(
        rows_in = stats.rows_in,
        rows_out = stats.rows_out,
        filled = stats.filled_rows,
        symbols = stats.symbols,
        dates = stats.dates,
        "forward fill complete"
    );

    (output, stats)
}
