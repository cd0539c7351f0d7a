// =============================================================================
// Bulletin CSV reader — tolerant adapter onto canonical TradeRecords
// =============================================================================
//
// Reads daily bulletin files and the combined artifact. The exchange is not
// consistent about header casing or spelling, so columns are matched after
// normalisation (lowercase, alphanumerics only), which makes `Symbol`,
// `symbol`, and `SYMBOL ` equivalent and maps `Date (YYYY-MM-DD)` onto the
// date column. A UTF-8 byte-order mark on the first header is stripped.
//
// Malformed rows never fail the read: each one is reported on the returned
// error channel (line number + reason) and skipped.
// =============================================================================

use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::bulletin::record::TradeRecord;
use crate::errors::{PulseError, PulseResult};

/// One skipped row: 1-based line number (header = line 1) and the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub line: u64,
    pub reason: String,
}

// =============================================================================
// Header resolution
// =============================================================================

/// Collapse a header cell to lowercase alphanumerics so that
/// `ClosePrice`, `close_price`, and `Close Price` all compare equal.
fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Column indexes resolved from the header row. Only symbol, date, and close
/// are mandatory; every other column falls back to zero when absent.
#[derive(Debug, Default)]
struct ColumnMap {
    symbol: Option<usize>,
    company_name: Option<usize>,
    date: Option<usize>,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    avg: Option<usize>,
    prev_avg: Option<usize>,
    close: Option<usize>,
    prev_close: Option<usize>,
    change: Option<usize>,
    change_percent: Option<usize>,
    num_trades: Option<usize>,
    volume: Option<usize>,
    value: Option<usize>,
    trading_status: Option<usize>,
}

impl ColumnMap {
    fn resolve(headers: &csv::StringRecord) -> PulseResult<Self> {
        let mut map = Self::default();
        for (idx, raw) in headers.iter().enumerate() {
            let slot = match normalize_header(raw).as_str() {
                "symbol" | "ticker" | "code" => &mut map.symbol,
                "companyname" | "company" | "name" => &mut map.company_name,
                "date" | "dateyyyymmdd" | "tradingdate" => &mut map.date,
                "openprice" | "open" => &mut map.open,
                "highprice" | "high" => &mut map.high,
                "lowprice" | "low" => &mut map.low,
                "averageprice" | "avgprice" | "average" | "avg" => &mut map.avg,
                "prevaverageprice" | "prevavgprice" | "prevaverage" | "prevavg"
                | "previousaverageprice" => &mut map.prev_avg,
                "closeprice" | "close" => &mut map.close,
                "prevcloseprice" | "prevclose" | "previousclose" | "previouscloseprice" => {
                    &mut map.prev_close
                }
                "change" => &mut map.change,
                "changepercent" | "changepct" => &mut map.change_percent,
                "numtrades" | "nooftrades" | "numoftrades" | "trades" => &mut map.num_trades,
                "volume" | "tradedvolume" => &mut map.volume,
                "value" | "tradedvalue" => &mut map.value,
                "tradingstatus" | "status" | "traded" => &mut map.trading_status,
                _ => continue,
            };
            // First match wins when a file carries duplicate aliases.
            if slot.is_none() {
                *slot = Some(idx);
            }
        }

        if map.symbol.is_none() || map.date.is_none() || map.close.is_none() {
            return Err(PulseError::Parse(format!(
                "bulletin header is missing a required column (symbol/date/close): {:?}",
                headers.iter().collect::<Vec<_>>()
            )));
        }
        Ok(map)
    }
}

// =============================================================================
// Cell parsing
// =============================================================================

/// Parse a numeric cell tolerating thousands separators and blanks.
fn parse_numeric(raw: &str) -> Result<f64, String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || cleaned == "-" {
        return Ok(0.0);
    }
    cleaned
        .parse::<f64>()
        .map_err(|_| format!("not a number: {raw:?}"))
}

/// Parse a non-negative count cell (volume, number of trades).
fn parse_count(raw: &str) -> Result<u64, String> {
    let n = parse_numeric(raw)?;
    if n < 0.0 {
        return Err(format!("negative count: {raw:?}"));
    }
    Ok(n.round() as u64)
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let trimmed = raw.trim();
    for fmt in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(date);
        }
    }
    Err(format!("unparseable date: {raw:?}"))
}

/// Parse the source trading-status flag. `None` means the cell was blank or
/// the column absent; the caller then falls back to the activity heuristic.
fn parse_status(raw: Option<&str>) -> Result<Option<bool>, String> {
    let Some(raw) = raw else { return Ok(None) };
    let cell = raw.trim().to_lowercase();
    match cell.as_str() {
        "" => Ok(None),
        "true" | "1" | "yes" | "y" | "t" => Ok(Some(true)),
        "false" | "0" | "no" | "n" | "f" => Ok(Some(false)),
        _ => Err(format!("unrecognised trading status: {raw:?}")),
    }
}

// =============================================================================
// Record extraction
// =============================================================================

fn cell<'a>(row: &'a csv::StringRecord, idx: Option<usize>) -> Option<&'a str> {
    idx.and_then(|i| row.get(i))
}

fn numeric_cell(row: &csv::StringRecord, idx: Option<usize>) -> Result<f64, String> {
    match cell(row, idx) {
        Some(raw) => parse_numeric(raw),
        None => Ok(0.0),
    }
}

fn count_cell(row: &csv::StringRecord, idx: Option<usize>) -> Result<u64, String> {
    match cell(row, idx) {
        Some(raw) => parse_count(raw),
        None => Ok(0),
    }
}

fn extract_record(row: &csv::StringRecord, cols: &ColumnMap) -> Result<TradeRecord, String> {
    let symbol = TradeRecord::normalize_symbol(
        cell(row, cols.symbol).ok_or_else(|| "missing symbol cell".to_string())?,
    );
    if symbol.is_empty() {
        return Err("empty symbol".to_string());
    }

    let date = parse_date(cell(row, cols.date).ok_or_else(|| "missing date cell".to_string())?)?;

    let open = numeric_cell(row, cols.open)?;
    let high = numeric_cell(row, cols.high)?;
    let low = numeric_cell(row, cols.low)?;
    let avg = numeric_cell(row, cols.avg)?;
    let prev_avg = numeric_cell(row, cols.prev_avg)?;
    let close = numeric_cell(row, cols.close)?;
    let prev_close = numeric_cell(row, cols.prev_close)?;
    let value = numeric_cell(row, cols.value)?;

    for (name, price) in [
        ("open", open),
        ("high", high),
        ("low", low),
        ("avg", avg),
        ("prev_avg", prev_avg),
        ("close", close),
        ("prev_close", prev_close),
        ("value", value),
    ] {
        if price < 0.0 {
            return Err(format!("negative {name}: {price}"));
        }
    }

    let change = numeric_cell(row, cols.change)?;
    let change_percent = numeric_cell(row, cols.change_percent)?;
    let volume = count_cell(row, cols.volume)?;
    let num_trades = count_cell(row, cols.num_trades)?;

    let trading_status = match parse_status(cell(row, cols.trading_status))? {
        Some(flag) => flag,
        // No source flag: infer from activity.
        None => volume > 0 || num_trades > 0,
    };

    Ok(TradeRecord {
        symbol,
        company_name: cell(row, cols.company_name).unwrap_or("").trim().to_string(),
        date,
        open,
        high,
        low,
        close,
        avg,
        prev_close,
        prev_avg,
        change,
        change_percent,
        volume,
        num_trades,
        value,
        trading_status,
    })
}

// =============================================================================
// Entry points
// =============================================================================

/// Read trade records from any byte stream (bulletin or combined artifact).
///
/// Returns the parsed records plus the per-row error channel. Only an
/// unreadable stream or an unusable header fails the whole read.
pub fn read_trade_records_from<R: Read>(
    reader: R,
) -> PulseResult<(Vec<TradeRecord>, Vec<RowError>)> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let cols = ColumnMap::resolve(csv_reader.headers().map_err(PulseError::from)?)?;

    let mut records = Vec::new();
    let mut errors = Vec::new();

    // Header occupies line 1; data starts at line 2.
    for (i, row) in csv_reader.records().enumerate() {
        let line = (i + 2) as u64;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                debug!(line, error = %e, "bulletin row unreadable — skipped");
                errors.push(RowError {
                    line,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match extract_record(&row, &cols) {
            Ok(record) => records.push(record),
            Err(reason) => {
                debug!(line, %reason, "bulletin row rejected — skipped");
                errors.push(RowError { line, reason });
            }
        }
    }

    if !errors.is_empty() {
        warn!(
            skipped = errors.len(),
            parsed = records.len(),
            "bulletin read completed with skipped rows"
        );
    }

    Ok((records, errors))
}

/// Read trade records from a file on disk.
pub fn read_trade_records(path: impl AsRef<Path>) -> PulseResult<(Vec<TradeRecord>, Vec<RowError>)> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(|e| {
        PulseError::Storage(format!("failed to open {}: {e}", path.display()))
    })?;
    read_trade_records_from(std::io::BufReader::new(file))
}
