// =============================================================================
// Liquidity engine — dense record stream in, scored report out
// =============================================================================
//
// Pipeline per run:
//   1. Group the dense stream by symbol, clamp to the analysis window.
//   2. Compute raw per-day bases (ILLIQ, value, continuity) per symbol.
//   3. Scale each raw series 0–100 against the whole cross-section.
//   4. Build per-day points: hybrid score (0.40/0.35/0.25, 1 dp) and
//      safe-trade thresholds (zeroed for POOR symbols).
//   5. Collapse per symbol into recommendations, rank, categorize, and
//      derive the market summary.
//
// Per-symbol aggregation is independent, so `analyze_parallel` fans it out
// over a semaphore-bounded set of tasks with cooperative cancellation.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bulletin::record::TradeRecord;
use crate::errors::{PulseError, PulseResult};
use crate::liquidity::point::{compute_bases, LiquidityPoint, PointBasis};
use crate::liquidity::quality::{ActivityQualityClassifier, QualityClassifier};
use crate::liquidity::recommend::{
    assign_categories, market_summary, recommend_symbol, MarketSummary, StockRecommendation,
};
use crate::liquidity::safe_trade::SafeTradeThresholds;
use crate::liquidity::scaling::percentile_rank_scale;
use crate::runtime_config::LiquidityParams;
use crate::types::DataQuality;

/// Hybrid score component weights.
const WEIGHT_ILLIQ: f64 = 0.40;
const WEIGHT_VALUE: f64 = 0.35;
const WEIGHT_CONTINUITY: f64 = 0.25;

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Full output of one liquidity run.
#[derive(Debug, Clone)]
pub struct LiquidityReport {
    /// All per-day points, sorted by (date, symbol).
    pub points: Vec<LiquidityPoint>,
    /// Recommendations in ranking order (EMA desc, best desc, ticker asc).
    pub recommendations: Vec<StockRecommendation>,
    pub market: MarketSummary,
}

/// Intermediate per-symbol state between scaling and aggregation.
struct SymbolSeries {
    symbol: String,
    points: Vec<LiquidityPoint>,
    quality: DataQuality,
}

/// Group, window-clamp, compute bases, scale, and assemble per-day points.
fn build_series(records: &[TradeRecord], params: &LiquidityParams) -> Vec<SymbolSeries> {
    let classifier = ActivityQualityClassifier::default();

    // Group by symbol; BTreeMap keeps the symbol order deterministic.
    let mut by_symbol: BTreeMap<String, Vec<TradeRecord>> = BTreeMap::new();
    for record in records {
        by_symbol
            .entry(record.symbol.clone())
            .or_default()
            .push(record.clone());
    }

    // Per-symbol raw bases over the clamped window.
    let mut bases_by_symbol: Vec<(String, Vec<PointBasis>)> = Vec::new();
    for (symbol, mut rows) in by_symbol {
        rows.sort_by_key(|r| r.date);
        let start = rows.len().saturating_sub(params.analysis_window_days);
        let bases = compute_bases(&rows[start..], params.continuity_window);
        bases_by_symbol.push((symbol, bases));
    }

    // Cross-sectional scaling across every symbol-day at once.
    let all: Vec<&PointBasis> = bases_by_symbol
        .iter()
        .flat_map(|(_, b)| b.iter())
        .collect();
    let illiq_scaled = percentile_rank_scale(
        &all.iter().map(|b| b.illiq_raw).collect::<Vec<_>>(),
        true, // lower raw ILLIQ means better liquidity
    );
    let value_scaled =
        percentile_rank_scale(&all.iter().map(|b| b.value_raw).collect::<Vec<_>>(), false);
    let continuity_scaled = percentile_rank_scale(
        &all.iter().map(|b| b.continuity_raw).collect::<Vec<_>>(),
        false,
    );

    // Assemble per-symbol point series, walking the flat scaled arrays.
    let mut series = Vec::with_capacity(bases_by_symbol.len());
    let mut offset = 0usize;
    for (symbol, bases) in bases_by_symbol {
        let count = bases.len();
        let mean_continuity = if count == 0 {
            0.0
        } else {
            bases.iter().map(|b| b.continuity_raw).sum::<f64>() / count as f64
        };
        let quality = classifier.classify(count, mean_continuity);

        let points: Vec<LiquidityPoint> = bases
            .into_iter()
            .enumerate()
            .map(|(i, basis)| {
                let illiq_s = illiq_scaled[offset + i];
                let value_s = value_scaled[offset + i];
                let continuity_s = continuity_scaled[offset + i];
                let hybrid = round1(
                    WEIGHT_ILLIQ * illiq_s
                        + WEIGHT_VALUE * value_s
                        + WEIGHT_CONTINUITY * continuity_s,
                );
                LiquidityPoint {
                    symbol: basis.symbol,
                    date: basis.date,
                    illiq_raw: basis.illiq_raw,
                    value_raw: basis.value_raw,
                    continuity_raw: basis.continuity_raw,
                    illiq_scaled: illiq_s,
                    value_scaled: value_s,
                    continuity_scaled: continuity_s,
                    hybrid_score: hybrid,
                    thresholds: SafeTradeThresholds::compute(
                        basis.avg_value,
                        basis.continuity_raw,
                        quality,
                    ),
                    data_quality: quality,
                    volume: basis.volume,
                }
            })
            .collect();
        offset += count;

        debug!(%symbol, points = count, %quality, "symbol series built");
        series.push(SymbolSeries {
            symbol,
            points,
            quality,
        });
    }

    series
}

fn finish_report(
    series: &[SymbolSeries],
    mut recommendations: Vec<StockRecommendation>,
    params: &LiquidityParams,
) -> LiquidityReport {
    assign_categories(&mut recommendations);
    let market = market_summary(&recommendations, params.market_top_n);

    let mut points: Vec<LiquidityPoint> = series
        .iter()
        .flat_map(|s| s.points.iter().cloned())
        .collect();
    points.sort_by(|a, b| a.date.cmp(&b.date).then(a.symbol.cmp(&b.symbol)));

    info!(
        symbols = recommendations.len(),
        points = points.len(),
        health = market.market_health_score,
        "liquidity analysis complete"
    );

    LiquidityReport {
        points,
        recommendations,
        market,
    }
}

/// Synchronous analysis over a dense record stream.
pub fn analyze(records: &[TradeRecord], params: &LiquidityParams) -> LiquidityReport {
    let series = build_series(records, params);
    let recommendations = series
        .iter()
        .map(|s| recommend_symbol(&s.symbol, &s.points, s.quality))
        .collect();
    finish_report(&series, recommendations, params)
}

/// Analysis with bounded per-symbol parallelism and cooperative cancellation.
///
/// `max_workers` sizes the semaphore; cancellation aborts between symbols
/// and the partial result is discarded.
pub async fn analyze_parallel(
    records: &[TradeRecord],
    params: &LiquidityParams,
    max_workers: usize,
    cancel: &CancellationToken,
) -> PulseResult<LiquidityReport> {
    let series = build_series(records, params);

    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut handles = Vec::with_capacity(series.len());

    for s in &series {
        if cancel.is_cancelled() {
            return Err(PulseError::Cancelled);
        }
        let permit_sem = semaphore.clone();
        let symbol = s.symbol.clone();
        let points = s.points.clone();
        let quality = s.quality;
        let token = cancel.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit_sem
                .acquire_owned()
                .await
                .map_err(|_| PulseError::Cancelled)?;
            if token.is_cancelled() {
                return Err(PulseError::Cancelled);
            }
            Ok(recommend_symbol(&symbol, &points, quality))
        }));
    }

    let mut recommendations = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(Ok(rec)) => recommendations.push(rec),
            Ok(Err(e)) => return Err(e),
            Err(join_err) => {
                return Err(PulseError::Storage(format!(
                    "liquidity worker panicked: {join_err}"
                )))
            }
        }
    }

    if cancel.is_cancelled() {
        return Err(PulseError::Cancelled);
    }

    Ok(finish_report(&series, recommendations, params))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record(
        symbol: &str,
        day_offset: u32,
        value: f64,
        change_pct: f64,
        status: bool,
    ) -> TradeRecord {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
            + chrono::Duration::days(day_offset as i64);
        TradeRecord {
            symbol: symbol.to_string(),
            company_name: format!("{symbol} Co."),
            date,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            avg: 1.0,
            prev_close: 1.0,
            prev_avg: 1.0,
            change: 0.0,
            change_percent: change_pct,
            volume: if status { 1000 } else { 0 },
            num_trades: if status { 10 } else { 0 },
            value: if status { value } else { 0.0 },
            trading_status: status,
        }
    }

    /// Two symbols, one liquid (traded every day, large value, small moves)
    /// and one thin (rare trading, small value, big moves).
    fn market() -> Vec<TradeRecord> {
        let mut records = Vec::new();
        for day in 0..30 {
            records.push(record("LIQD", day, 500_000_000.0, 0.2, true));
            let thin_trades = day % 6 == 0;
            records.push(record("THIN", day, 2_000_000.0, 3.0, thin_trades));
        }
        records
    }

    #[test]
    fn hybrid_weighting_holds_on_every_point() {
        let report = analyze(&market(), &LiquidityParams::default());
        assert!(!report.points.is_empty());
        for p in &report.points {
            let expected = round1(
                WEIGHT_ILLIQ * p.illiq_scaled
                    + WEIGHT_VALUE * p.value_scaled
                    + WEIGHT_CONTINUITY * p.continuity_scaled,
            );
            assert!(
                (p.hybrid_score - expected).abs() < 1e-9,
                "hybrid mismatch for {} on {}",
                p.symbol,
                p.date
            );
        }
    }

    #[test]
    fn liquid_symbol_outranks_thin_symbol() {
        let report = analyze(&market(), &LiquidityParams::default());
        assert_eq!(report.recommendations[0].ticker, "LIQD");
        let liqd = &report.recommendations[0];
        let thin = report
            .recommendations
            .iter()
            .find(|r| r.ticker == "THIN")
            .unwrap();
        assert!(liqd.ema20_score > thin.ema20_score);
    }

    #[test]
    fn poor_symbol_keeps_score_but_zero_thresholds() {
        let report = analyze(&market(), &LiquidityParams::default());
        let thin = report
            .recommendations
            .iter()
            .find(|r| r.ticker == "THIN")
            .unwrap();
        // 5 active days over 30 calendar rows at ~0.17 continuity: FAIR by
        // day count; force the POOR case with a thinner series below.
        assert_ne!(thin.data_quality, DataQuality::Good);

        let mut thin_market = Vec::new();
        for day in 0..30 {
            thin_market.push(record("LIQD", day, 500_000_000.0, 0.2, true));
            thin_market.push(record("RARE", day, 1_000_000.0, 2.0, day % 10 == 0));
        }
        let report = analyze(&thin_market, &LiquidityParams::default());
        let rare = report
            .recommendations
            .iter()
            .find(|r| r.ticker == "RARE")
            .unwrap();
        assert_eq!(rare.data_quality, DataQuality::Poor);
        // P7: thresholds zero in every mode, score still reported.
        assert!(rare.ema.thresholds.is_zero());
        assert!(rare.latest.thresholds.is_zero());
        assert!(rare.average.thresholds.is_zero());
        assert!(rare.ema20_score > 0.0 || rare.latest_score > 0.0);
        assert_eq!(rare.action, crate::types::TradeAction::Avoid);
    }

    #[test]
    fn points_sorted_by_date_then_symbol() {
        let report = analyze(&market(), &LiquidityParams::default());
        let keys: Vec<(NaiveDate, String)> = report
            .points
            .iter()
            .map(|p| (p.date, p.symbol.clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn analysis_window_clamps_history() {
        let mut params = LiquidityParams::default();
        params.analysis_window_days = 10;
        let report = analyze(&market(), &params);
        let liqd_points = report
            .points
            .iter()
            .filter(|p| p.symbol == "LIQD")
            .count();
        assert_eq!(liqd_points, 10);
    }

    #[tokio::test]
    async fn parallel_analysis_matches_sync() {
        let records = market();
        let params = LiquidityParams::default();
        let sync_report = analyze(&records, &params);
        let parallel_report =
            analyze_parallel(&records, &params, 4, &CancellationToken::new())
                .await
                .unwrap();

        let sync_order: Vec<(&str, f64)> = sync_report
            .recommendations
            .iter()
            .map(|r| (r.ticker.as_str(), r.ema20_score))
            .collect();
        let parallel_order: Vec<(&str, f64)> = parallel_report
            .recommendations
            .iter()
            .map(|r| (r.ticker.as_str(), r.ema20_score))
            .collect();
        assert_eq!(sync_order, parallel_order);
        assert_eq!(sync_report.points.len(), parallel_report.points.len());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_parallel_analysis() {
        let token = CancellationToken::new();
        token.cancel();
        let err = analyze_parallel(&market(), &LiquidityParams::default(), 2, &token)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "CANCELLED");
    }

    #[test]
    fn empty_stream_gives_empty_report() {
        let report = analyze(&[], &LiquidityParams::default());
        assert!(report.points.is_empty());
        assert!(report.recommendations.is_empty());
        assert_eq!(report.market.total_stocks, 0);
    }
}
