// =============================================================================
// Liquidity artifact writers — liquidity_scores_<date>.csv / insights.json
// =============================================================================

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::artifacts::atomic_write;
use crate::errors::{PulseError, PulseResult};
use crate::liquidity::engine::LiquidityReport;
use crate::liquidity::recommend::{tickers_in_category, StockRecommendation};

const SCORES_HEADER: [&str; 14] = [
    "Symbol",
    "Date",
    "ILLIQRaw",
    "ValueRaw",
    "ContinuityRaw",
    "ILLIQScaled",
    "ValueScaled",
    "ContinuityScaled",
    "HybridScore",
    "SafeTrade0.5Pct",
    "SafeTrade1Pct",
    "SafeTrade2Pct",
    "OptimalTrade",
    "DataQuality",
];

/// Write the per-day per-symbol score rows.
///
/// The artifact name embeds the most recent point date
/// (`liquidity_scores_<YYYY-MM-DD>.csv`); the path written is returned so the
/// operation result can report it.
pub fn write_scores_csv(
    reports_dir: impl AsRef<Path>,
    report: &LiquidityReport,
) -> PulseResult<PathBuf> {
    let latest_date = report
        .points
        .iter()
        .map(|p| p.date)
        .max()
        .ok_or_else(|| PulseError::Validation("no liquidity points to write".to_string()))?;

    let path = reports_dir
        .as_ref()
        .join(format!("liquidity_scores_{latest_date}.csv"));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(SCORES_HEADER)?;

    for p in &report.points {
        writer.write_record(&[
            p.symbol.clone(),
            p.date.to_string(),
            format!("{:.9}", p.illiq_raw),
            format!("{:.3}", p.value_raw),
            format!("{:.4}", p.continuity_raw),
            format!("{:.2}", p.illiq_scaled),
            format!("{:.2}", p.value_scaled),
            format!("{:.2}", p.continuity_scaled),
            format!("{:.1}", p.hybrid_score),
            format!("{:.0}", p.thresholds.half_percent),
            format!("{:.0}", p.thresholds.one_percent),
            format!("{:.0}", p.thresholds.two_percent),
            format!("{:.0}", p.thresholds.optimal),
            p.data_quality.to_string(),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| PulseError::Storage(format!("csv buffer flush: {e}")))?;
    atomic_write(&path, &bytes)?;

    info!(path = %path.display(), rows = report.points.len(), "liquidity scores written");
    Ok(path)
}

// =============================================================================
// insights.json
// =============================================================================

#[derive(Serialize)]
struct InsightsDocument<'a> {
    generated_at: DateTime<Utc>,
    market_health_score: f64,
    total_stocks: usize,
    high_quality_stocks: usize,
    average_continuity: f64,
    median_daily_volume: f64,
    all_stocks: &'a [StockRecommendation],
    top_opportunities: Vec<&'a str>,
    best_for_large_trades: Vec<&'a str>,
    best_for_day_trading: Vec<&'a str>,
    high_risk: Vec<&'a str>,
}

/// Write `insights.json`: the market summary, every ranked recommendation,
/// and the four category ticker lists. Two-space indented.
pub fn write_insights_json(
    reports_dir: impl AsRef<Path>,
    report: &LiquidityReport,
) -> PulseResult<PathBuf> {
    let path = reports_dir.as_ref().join("insights.json");

    let document = InsightsDocument {
        generated_at: Utc::now(),
        market_health_score: report.market.market_health_score,
        total_stocks: report.market.total_stocks,
        high_quality_stocks: report.market.high_quality_stocks,
        average_continuity: report.market.average_continuity,
        median_daily_volume: report.market.median_daily_volume,
        all_stocks: &report.recommendations,
        top_opportunities: tickers_in_category(&report.recommendations, "opportunities"),
        best_for_large_trades: tickers_in_category(&report.recommendations, "large"),
        best_for_day_trading: tickers_in_category(&report.recommendations, "daytrading"),
        high_risk: tickers_in_category(&report.recommendations, "risk"),
    };

    let json = serde_json::to_string_pretty(&document)?;
    atomic_write(&path, json.as_bytes())?;

    info!(
        path = %path.display(),
        stocks = report.recommendations.len(),
        "insights written"
    );
    Ok(path)
}
