// =============================================================================
// Summary artifact writers — ticker_summary.csv / ticker_summary.json
// =============================================================================
//
// Both artifacts carry the same values; the JSON document adds `generated_at`
// and a `format` tag. The CSV encodes `last_10_days` as a comma-joined field
// of 3-decimal closes; `parse_last_n` is its exact inverse for vectors of up
// to ten non-negative reals at that precision.
// =============================================================================

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::artifacts::atomic_write;
use crate::errors::{PulseError, PulseResult};
use crate::summary::summarizer::TickerSummary;

/// Format tag stamped into the JSON artifact.
const SUMMARY_FORMAT: &str = "ticker_summary_v1";

// =============================================================================
// last_10_days field codec
// =============================================================================

/// Join closes into the CSV cell form: 3 decimals, comma-separated.
pub fn format_last_n(closes: &[f64]) -> String {
    closes
        .iter()
        .map(|c| format!("{c:.3}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Inverse of [`format_last_n`].
pub fn parse_last_n(cell: &str) -> PulseResult<Vec<f64>> {
    if cell.trim().is_empty() {
        return Ok(Vec::new());
    }
    cell.split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| PulseError::Parse(format!("bad last-N close: {part:?}")))
        })
        .collect()
}

// =============================================================================
// CSV artifact
// =============================================================================

const BASE_HEADER: [&str; 9] = [
    "Ticker",
    "CompanyName",
    "LastPrice",
    "LastDate",
    "TradingDays",
    "Last10Days",
    "Change",
    "ChangePercent",
    "LastTradingStatus",
];

const EXTENDED_HEADER: [&str; 13] = [
    "TotalVolume",
    "TotalValue",
    "AveragePrice",
    "Highest",
    "Lowest",
    "DailyChangePercent",
    "WeeklyChangePercent",
    "MonthlyChangePercent",
    "PreviousClose",
    "Week52High",
    "Week52Low",
    "DailyVolume",
    "DailyValue",
];

/// Write `ticker_summary.csv`. Summaries must already be sorted by ticker;
/// the extended columns are appended when any summary carries them.
pub fn write_summary_csv(
    path: impl AsRef<Path>,
    summaries: &[TickerSummary],
    date_format: &str,
) -> PulseResult<()> {
    let extended = summaries.iter().any(|s| s.extended.is_some());

    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header: Vec<&str> = BASE_HEADER.to_vec();
    if extended {
        header.extend(EXTENDED_HEADER);
    }
    writer.write_record(&header)?;

    for summary in summaries {
        let mut row = vec![
            summary.ticker.clone(),
            summary.company_name.clone(),
            format!("{:.3}", summary.last_price),
            summary.last_date.format(date_format).to_string(),
            summary.trading_days.to_string(),
            format_last_n(&summary.last_10_days),
            format!("{:.3}", summary.change),
            format!("{:.2}", summary.change_percent),
            summary.last_trading_status.to_string(),
        ];
        if extended {
            match &summary.extended {
                Some(ext) => row.extend([
                    ext.total_volume.to_string(),
                    format!("{:.3}", ext.total_value),
                    format!("{:.3}", ext.average_price),
                    format!("{:.3}", ext.highest),
                    format!("{:.3}", ext.lowest),
                    format!("{:.2}", ext.daily_change_percent),
                    format!("{:.2}", ext.weekly_change_percent),
                    format!("{:.2}", ext.monthly_change_percent),
                    format!("{:.3}", ext.previous_close),
                    format!("{:.3}", ext.week_52_high),
                    format!("{:.3}", ext.week_52_low),
                    ext.daily_volume.to_string(),
                    format!("{:.3}", ext.daily_value),
                ]),
                None => row.extend(EXTENDED_HEADER.iter().map(|_| String::new())),
            }
        }
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| PulseError::Storage(format!("csv buffer flush: {e}")))?;
    atomic_write(&path, &bytes)?;

    info!(
        path = %path.as_ref().display(),
        tickers = summaries.len(),
        extended,
        "ticker summary CSV written"
    );
    Ok(())
}

// =============================================================================
// JSON artifact
// =============================================================================

#[derive(Serialize)]
struct SummaryDocument<'a> {
    tickers: &'a [TickerSummary],
    count: usize,
    generated_at: DateTime<Utc>,
    format: &'static str,
}

/// Write `ticker_summary.json`: `{tickers, count, generated_at, format}`,
/// two-space indented.
pub fn write_summary_json(
    path: impl AsRef<Path>,
    summaries: &[TickerSummary],
) -> PulseResult<()> {
    let document = SummaryDocument {
        tickers: summaries,
        count: summaries.len(),
        generated_at: Utc::now(),
        format: SUMMARY_FORMAT,
    };

    let json = serde_json::to_string_pretty(&document)?;
    atomic_write(&path, json.as_bytes())?;

    info!(
        path = %path.as_ref().display(),
        tickers = summaries.len(),
        "ticker summary JSON written"
    );
    Ok(())
}
