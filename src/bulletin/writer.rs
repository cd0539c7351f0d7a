// =============================================================================
// Combined trade artifact — canonical combined_trades.csv writer
// =============================================================================
//
// The canonical intermediate artifact downstream steps read. Header and
// column order are fixed; the reader's alias matching accepts this header
// verbatim, so write-then-read is lossless at 3-decimal price precision.
// =============================================================================

use std::path::Path;

use tracing::info;

use crate::artifacts::atomic_write;
use crate::bulletin::record::TradeRecord;
use crate::errors::{PulseError, PulseResult};

const COMBINED_HEADER: [&str; 16] = [
    "Symbol",
    "CompanyName",
    "Date (YYYY-MM-DD)",
    "OpenPrice",
    "HighPrice",
    "LowPrice",
    "AveragePrice",
    "PrevAveragePrice",
    "ClosePrice",
    "PrevClosePrice",
    "Change",
    "ChangePercent",
    "NumTrades",
    "Volume",
    "Value",
    "TradingStatus",
];

/// Write the canonical combined artifact. Records should already be sorted
/// by (date, symbol) — the forward-fill output order.
pub fn write_combined_csv(path: impl AsRef<Path>, records: &[TradeRecord]) -> PulseResult<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(COMBINED_HEADER)?;

    for r in records {
        writer.write_record(&[
            r.symbol.clone(),
            r.company_name.clone(),
            r.date.to_string(),
            format!("{:.3}", r.open),
            format!("{:.3}", r.high),
            format!("{:.3}", r.low),
            format!("{:.3}", r.avg),
            format!("{:.3}", r.prev_avg),
            format!("{:.3}", r.close),
            format!("{:.3}", r.prev_close),
            format!("{:.3}", r.change),
            format!("{:.2}", r.change_percent),
            r.num_trades.to_string(),
            r.volume.to_string(),
            format!("{:.3}", r.value),
            r.trading_status.to_string(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| PulseError::Storage(format!("csv buffer flush: {e}")))?;
    atomic_write(&path, &bytes)?;

    info!(
        path = %path.as_ref().display(),
        rows = records.len(),
        "combined trades written"
    );
    Ok(())
}
