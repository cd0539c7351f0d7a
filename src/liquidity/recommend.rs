// =============================================================================
// Recommendations — per-symbol aggregation, actions, capped categories
// =============================================================================
//
// Every symbol's point series is collapsed three ways:
//
//   LATEST   the most recent point verbatim,
//   AVERAGE  arithmetic means,
//   EMA      outlier-robust EMA (1.5·IQR clean, alpha = 2/21), applied to the
//            score, the continuity, the daily volume, and to each threshold
//            series independently.
//
// The action and the category assignment always work off the EMA bundle, so
// switching the *display* mode never moves a symbol between categories.
// Category ranking is deterministic: EMA score desc, then best score desc,
// then ticker asc.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::liquidity::ema::robust_ema;
use crate::liquidity::point::LiquidityPoint;
use crate::liquidity::safe_trade::SafeTradeThresholds;
use crate::types::{DataQuality, TradeAction};

/// Category caps applied during the ranking pass.
const MAX_OPPORTUNITIES: usize = 10;
const MAX_LARGE_TRADES: usize = 5;
const MAX_DAY_TRADING: usize = 5;
const MAX_HIGH_RISK: usize = 10;

/// Aggregated metrics bundle for one display mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockMetrics {
    pub score: f64,
    pub thresholds: SafeTradeThresholds,
    pub continuity: f64,
    pub daily_volume: f64,
}

/// Per-symbol recommendation across all three modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRecommendation {
    pub ticker: String,
    pub best_score: f64,
    pub ema20_score: f64,
    pub latest_score: f64,
    pub average_score: f64,
    pub ema: StockMetrics,
    pub latest: StockMetrics,
    pub average: StockMetrics,
    pub action: TradeAction,
    pub rationale: String,
    pub categories: Vec<String>,
    pub data_quality: DataQuality,
}

/// Market-wide summary derived from the ranked recommendations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSummary {
    /// Mean of the top-N EMA scores.
    pub market_health_score: f64,
    pub total_stocks: usize,
    /// Count of non-POOR symbols.
    pub high_quality_stocks: usize,
    /// Mean non-POOR continuity, as a percentage.
    pub average_continuity: f64,
    /// Median daily volume across non-POOR symbols.
    pub median_daily_volume: f64,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn aggregate_thresholds<F>(points: &[LiquidityPoint], collapse: F) -> SafeTradeThresholds
where
    F: Fn(&[f64]) -> f64,
{
    let series = |pick: fn(&SafeTradeThresholds) -> f64| -> Vec<f64> {
        points.iter().map(|p| pick(&p.thresholds)).collect()
    };
    SafeTradeThresholds {
        half_percent: collapse(&series(|t| t.half_percent)),
        one_percent: collapse(&series(|t| t.one_percent)),
        two_percent: collapse(&series(|t| t.two_percent)),
        optimal: collapse(&series(|t| t.optimal)),
    }
}

/// LATEST: the most recent point, verbatim.
fn latest_metrics(points: &[LiquidityPoint]) -> StockMetrics {
    match points.last() {
        Some(last) => StockMetrics {
            score: last.hybrid_score,
            thresholds: last.thresholds,
            continuity: last.continuity_raw,
            daily_volume: last.volume as f64,
        },
        None => StockMetrics::default(),
    }
}

/// AVERAGE: arithmetic means of every series.
fn average_metrics(points: &[LiquidityPoint]) -> StockMetrics {
    let scores: Vec<f64> = points.iter().map(|p| p.hybrid_score).collect();
    let continuities: Vec<f64> = points.iter().map(|p| p.continuity_raw).collect();
    let volumes: Vec<f64> = points.iter().map(|p| p.volume as f64).collect();
    StockMetrics {
        score: mean(&scores),
        thresholds: aggregate_thresholds(points, mean),
        continuity: mean(&continuities),
        daily_volume: mean(&volumes),
    }
}

/// EMA: outlier-robust EMA per series, falling back to zero on empty input.
fn ema_metrics(points: &[LiquidityPoint]) -> StockMetrics {
    let collapse = |series: &[f64]| robust_ema(series).unwrap_or(0.0);
    let scores: Vec<f64> = points.iter().map(|p| p.hybrid_score).collect();
    let continuities: Vec<f64> = points.iter().map(|p| p.continuity_raw).collect();
    let volumes: Vec<f64> = points.iter().map(|p| p.volume as f64).collect();
    StockMetrics {
        score: collapse(&scores),
        thresholds: aggregate_thresholds(points, collapse),
        continuity: collapse(&continuities),
        daily_volume: collapse(&volumes),
    }
}

/// Derive the action and rationale from the EMA bundle.
fn derive_action(quality: DataQuality, m: &StockMetrics) -> (TradeAction, String) {
    if quality == DataQuality::Poor {
        return (
            TradeAction::Avoid,
            "insufficient data for a reliable liquidity assessment".to_string(),
        );
    }

    let score = m.score;
    if score >= 85.0 {
        if m.thresholds.optimal >= 10_000_000.0 {
            return (
                TradeAction::BuyLarge,
                format!(
                    "top-tier liquidity (score {score:.1}) with capacity for {:.0} IQD trades",
                    m.thresholds.optimal
                ),
            );
        }
        return (
            TradeAction::Buy,
            format!("top-tier liquidity (score {score:.1})"),
        );
    }
    if m.continuity >= 0.7 && score >= 60.0 {
        return (
            TradeAction::DayTrade,
            format!(
                "trades {:.0}% of sessions at score {score:.1}; suited to intraday turns",
                m.continuity * 100.0
            ),
        );
    }
    if score >= 50.0 {
        return (TradeAction::Hold, format!("adequate liquidity (score {score:.1})"));
    }
    if score >= 30.0 {
        return (
            TradeAction::Caution,
            format!("thin book (score {score:.1}); size down and work orders"),
        );
    }
    (
        TradeAction::Avoid,
        format!("illiquid (score {score:.1}); exits may take sessions"),
    )
}

/// Collapse one symbol's points into a recommendation. `points` must be
/// sorted ascending by date. Categories are assigned later, market-wide.
pub fn recommend_symbol(
    ticker: &str,
    points: &[LiquidityPoint],
    quality: DataQuality,
) -> StockRecommendation {
    let ema = ema_metrics(points);
    let latest = latest_metrics(points);
    let average = average_metrics(points);

    let best_score = points
        .iter()
        .map(|p| p.hybrid_score)
        .fold(0.0_f64, f64::max);

    let (action, rationale) = derive_action(quality, &ema);

    debug!(
        %ticker,
        points = points.len(),
        ema_score = ema.score,
        %action,
        "symbol recommendation computed"
    );

    StockRecommendation {
        ticker: ticker.to_string(),
        best_score,
        ema20_score: ema.score,
        latest_score: latest.score,
        average_score: average.score,
        ema,
        latest,
        average,
        action,
        rationale,
        categories: Vec::new(),
        data_quality: quality,
    }
}

/// Rank recommendations and assign capped categories in one pass.
///
/// Sorts `recs` by EMA score desc, then best score desc, then ticker asc
/// (the deterministic tie-break), then walks the ranking once filling:
///   opportunities (score >= 50, cap 10), large (optimal >= 5M, non-POOR,
///   cap 5), daytrading (continuity >= 0.7 and score >= 50, cap 5), and
///   risk (POOR or score < 30, cap 10).
pub fn assign_categories(recs: &mut [StockRecommendation]) {
    recs.sort_by(|a, b| {
        b.ema20_score
            .partial_cmp(&a.ema20_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.best_score
                    .partial_cmp(&a.best_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.ticker.cmp(&b.ticker))
    });

    let mut opportunities = 0usize;
    let mut large = 0usize;
    let mut daytrading = 0usize;
    let mut risk = 0usize;

    for rec in recs.iter_mut() {
        rec.categories.clear();

        if opportunities < MAX_OPPORTUNITIES && rec.ema20_score >= 50.0 {
            rec.categories.push("opportunities".to_string());
            opportunities += 1;
        }
        if large < MAX_LARGE_TRADES
            && rec.data_quality != DataQuality::Poor
            && rec.ema.thresholds.optimal >= 5_000_000.0
        {
            rec.categories.push("large".to_string());
            large += 1;
        }
        if daytrading < MAX_DAY_TRADING && rec.ema.continuity >= 0.7 && rec.ema20_score >= 50.0 {
            rec.categories.push("daytrading".to_string());
            daytrading += 1;
        }
        if risk < MAX_HIGH_RISK
            && (rec.data_quality == DataQuality::Poor || rec.ema20_score < 30.0)
        {
            rec.categories.push("risk".to_string());
            risk += 1;
        }
    }
}

/// Collect the tickers carrying `category`, in ranking order.
pub fn tickers_in_category<'a>(recs: &'a [StockRecommendation], category: &str) -> Vec<&'a str> {
    recs.iter()
        .filter(|r| r.categories.iter().any(|c| c == category))
        .map(|r| r.ticker.as_str())
        .collect()
}

/// Market-wide summary over ranked recommendations.
pub fn market_summary(recs: &[StockRecommendation], top_n: usize) -> MarketSummary {
    let mut scores: Vec<f64> = recs.iter().map(|r| r.ema20_score).collect();
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let top = &scores[..top_n.min(scores.len())];

    let healthy: Vec<&StockRecommendation> = recs
        .iter()
        .filter(|r| r.data_quality != DataQuality::Poor)
        .collect();

    let continuities: Vec<f64> = healthy.iter().map(|r| r.ema.continuity).collect();

    let mut volumes: Vec<f64> = healthy.iter().map(|r| r.ema.daily_volume).collect();
    volumes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median_daily_volume = if volumes.is_empty() {
        0.0
    } else if volumes.len() % 2 == 1 {
        volumes[volumes.len() / 2]
    } else {
        (volumes[volumes.len() / 2 - 1] + volumes[volumes.len() / 2]) / 2.0
    };

    MarketSummary {
        market_health_score: mean(top),
        total_stocks: recs.len(),
        high_quality_stocks: healthy.len(),
        average_continuity: mean(&continuities) * 100.0,
        median_daily_volume,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn point(day: u32, score: f64, continuity: f64, optimal: f64, volume: u64) -> LiquidityPoint {
        LiquidityPoint {
            symbol: "BASH".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 8, day).unwrap(),
            illiq_raw: 0.001,
            value_raw: 1_000_000.0,
            continuity_raw: continuity,
            illiq_scaled: score,
            value_scaled: score,
            continuity_scaled: score,
            hybrid_score: score,
            thresholds: SafeTradeThresholds {
                half_percent: optimal / 3.0,
                one_percent: optimal / 1.5,
                two_percent: optimal * 4.0 / 3.0,
                optimal,
            },
            data_quality: DataQuality::Good,
            volume,
        }
    }

    fn rec(ticker: &str, ema_score: f64, optimal: f64, continuity: f64, quality: DataQuality) -> StockRecommendation {
        let mut metrics = StockMetrics {
            score: ema_score,
            thresholds: SafeTradeThresholds {
                half_percent: optimal / 3.0,
                one_percent: optimal / 1.5,
                two_percent: optimal * 4.0 / 3.0,
                optimal,
            },
            continuity,
            daily_volume: 1000.0,
        };
        if quality == DataQuality::Poor {
            metrics.thresholds = SafeTradeThresholds::ZERO;
        }
        StockRecommendation {
            ticker: ticker.to_string(),
            best_score: ema_score,
            ema20_score: ema_score,
            latest_score: ema_score,
            average_score: ema_score,
            ema: metrics.clone(),
            latest: metrics.clone(),
            average: metrics,
            action: TradeAction::Hold,
            rationale: String::new(),
            categories: Vec::new(),
            data_quality: quality,
        }
    }

    // -- Mode aggregation ----------------------------------------------------

    #[test]
    fn latest_takes_most_recent_point_verbatim() {
        let points = vec![
            point(1, 40.0, 0.5, 1_000_000.0, 100),
            point(2, 80.0, 0.9, 2_000_000.0, 500),
        ];
        let rec = recommend_symbol("BASH", &points, DataQuality::Good);
        assert_eq!(rec.latest.score, 80.0);
        assert_eq!(rec.latest.continuity, 0.9);
        assert_eq!(rec.latest.thresholds.optimal, 2_000_000.0);
        assert_eq!(rec.latest.daily_volume, 500.0);
        assert_eq!(rec.latest_score, 80.0);
    }

    #[test]
    fn average_is_arithmetic_mean_of_every_series() {
        let points = vec![
            point(1, 40.0, 0.4, 1_000_000.0, 100),
            point(2, 80.0, 0.8, 3_000_000.0, 300),
        ];
        let rec = recommend_symbol("BASH", &points, DataQuality::Good);
        assert_eq!(rec.average.score, 60.0);
        assert!((rec.average.continuity - 0.6).abs() < 1e-12);
        assert_eq!(rec.average.thresholds.optimal, 2_000_000.0);
        assert_eq!(rec.average.daily_volume, 200.0);
    }

    #[test]
    fn ema_ignores_outlier_sessions() {
        let mut points: Vec<LiquidityPoint> = (1..=28)
            .map(|d| point(d, 60.0, 0.8, 2_000_000.0, 100))
            .collect();
        // One absurd spike that IQR cleaning should drop.
        points[10].hybrid_score = 100_000.0;
        let rec = recommend_symbol("BASH", &points, DataQuality::Good);
        assert!((rec.ema20_score - 60.0).abs() < 1e-9);
    }

    #[test]
    fn best_score_is_series_max() {
        let points = vec![
            point(1, 40.0, 0.5, 1_000_000.0, 100),
            point(2, 91.0, 0.5, 1_000_000.0, 100),
            point(3, 70.0, 0.5, 1_000_000.0, 100),
        ];
        let rec = recommend_symbol("BASH", &points, DataQuality::Good);
        assert_eq!(rec.best_score, 91.0);
    }

    #[test]
    fn empty_series_degenerates_to_zero_metrics() {
        let rec = recommend_symbol("BASH", &[], DataQuality::Poor);
        assert_eq!(rec.ema20_score, 0.0);
        assert_eq!(rec.latest_score, 0.0);
        assert!(rec.ema.thresholds.is_zero());
        assert_eq!(rec.action, TradeAction::Avoid);
    }

    // -- Actions -------------------------------------------------------------

    #[test]
    fn poor_quality_forces_avoid_with_insufficient_data() {
        let points = vec![point(1, 95.0, 0.9, 20_000_000.0, 100)];
        let rec = recommend_symbol("BASH", &points, DataQuality::Poor);
        assert_eq!(rec.action, TradeAction::Avoid);
        assert!(rec.rationale.contains("insufficient data"));
    }

    #[test]
    fn action_thresholds() {
        let cases = [
            (95.0, 20_000_000.0, 0.9, TradeAction::BuyLarge),
            (95.0, 5_000_000.0, 0.9, TradeAction::Buy),
            (65.0, 1_000_000.0, 0.9, TradeAction::DayTrade),
            (65.0, 1_000_000.0, 0.3, TradeAction::Hold),
            (55.0, 1_000_000.0, 0.3, TradeAction::Hold),
            (35.0, 1_000_000.0, 0.3, TradeAction::Caution),
            (10.0, 1_000_000.0, 0.3, TradeAction::Avoid),
        ];
        for (score, optimal, continuity, expected) in cases {
            let m = StockMetrics {
                score,
                thresholds: SafeTradeThresholds {
                    half_percent: 0.0,
                    one_percent: 0.0,
                    two_percent: 0.0,
                    optimal,
                },
                continuity,
                daily_volume: 0.0,
            };
            let (action, _) = derive_action(DataQuality::Good, &m);
            assert_eq!(action, expected, "score {score} optimal {optimal}");
        }
    }

    // -- Categories ----------------------------------------------------------

    #[test]
    fn categorization_ordering_scenario() {
        // 15 symbols with EMA scores 90..=76, all non-POOR, optimal 20M,
        // continuity 0.8.
        let mut recs: Vec<StockRecommendation> = (0..15)
            .map(|i| {
                rec(
                    &format!("SY{:02}", i),
                    90.0 - i as f64,
                    20_000_000.0,
                    0.8,
                    DataQuality::Good,
                )
            })
            .collect();
        assign_categories(&mut recs);

        let opportunities = tickers_in_category(&recs, "opportunities");
        let large = tickers_in_category(&recs, "large");
        let daytrading = tickers_in_category(&recs, "daytrading");

        let expected_top10: Vec<String> = (0..10).map(|i| format!("SY{:02}", i)).collect();
        assert_eq!(opportunities, expected_top10.iter().map(|s| s.as_str()).collect::<Vec<_>>());

        let expected_top5: Vec<String> = (0..5).map(|i| format!("SY{:02}", i)).collect();
        assert_eq!(large, expected_top5.iter().map(|s| s.as_str()).collect::<Vec<_>>());
        assert_eq!(daytrading, expected_top5.iter().map(|s| s.as_str()).collect::<Vec<_>>());

        assert!(tickers_in_category(&recs, "risk").is_empty());
    }

    #[test]
    fn ties_break_by_best_score_then_ticker() {
        let mut a = rec("TASC", 70.0, 1_000_000.0, 0.5, DataQuality::Good);
        a.best_score = 75.0;
        let mut b = rec("BASH", 70.0, 1_000_000.0, 0.5, DataQuality::Good);
        b.best_score = 75.0;
        let mut c = rec("BMNS", 70.0, 1_000_000.0, 0.5, DataQuality::Good);
        c.best_score = 80.0;

        let mut recs = vec![a, b, c];
        assign_categories(&mut recs);

        let order: Vec<&str> = recs.iter().map(|r| r.ticker.as_str()).collect();
        // BMNS wins on best score; BASH beats TASC alphabetically.
        assert_eq!(order, vec!["BMNS", "BASH", "TASC"]);
    }

    #[test]
    fn display_mode_changes_metrics_never_identity() {
        let points = vec![
            point(1, 60.0, 0.4, 1_000_000.0, 100),
            point(2, 80.0, 0.8, 3_000_000.0, 300),
        ];
        let mut recs = vec![recommend_symbol("BASH", &points, DataQuality::Good)];
        assign_categories(&mut recs);
        let rec = &recs[0];

        // The bundles disagree on every displayed metric...
        assert_ne!(rec.latest.score, rec.average.score);
        assert_ne!(rec.latest.thresholds.optimal, rec.average.thresholds.optimal);
        assert_ne!(rec.latest.continuity, rec.average.continuity);
        assert_ne!(rec.latest.daily_volume, rec.average.daily_volume);

        // ...but the symbol identity and its categories are computed once
        // and shared by all modes: there is exactly one recommendation per
        // ticker carrying one category list.
        assert_eq!(rec.ticker, "BASH");
        assert_eq!(rec.categories, vec!["opportunities".to_string()]);
    }

    #[test]
    fn poor_symbols_fill_risk_not_large() {
        let mut recs = vec![
            rec("AAAA", 95.0, 20_000_000.0, 0.9, DataQuality::Good),
            rec("BBBB", 20.0, 20_000_000.0, 0.9, DataQuality::Poor),
            rec("CCCC", 10.0, 0.0, 0.1, DataQuality::Good),
        ];
        assign_categories(&mut recs);

        assert_eq!(tickers_in_category(&recs, "large"), vec!["AAAA"]);
        assert_eq!(tickers_in_category(&recs, "risk"), vec!["BBBB", "CCCC"]);
    }

    #[test]
    fn risk_cap_is_ten() {
        let mut recs: Vec<StockRecommendation> = (0..15)
            .map(|i| rec(&format!("RS{:02}", i), 5.0, 0.0, 0.1, DataQuality::Poor))
            .collect();
        assign_categories(&mut recs);
        assert_eq!(tickers_in_category(&recs, "risk").len(), 10);
    }

    #[test]
    fn reassignment_is_stable_across_runs() {
        let build = || {
            let mut recs = vec![
                rec("TASC", 70.0, 8_000_000.0, 0.8, DataQuality::Good),
                rec("BASH", 55.0, 2_000_000.0, 0.5, DataQuality::Fair),
                rec("BMNS", 20.0, 0.0, 0.2, DataQuality::Poor),
            ];
            assign_categories(&mut recs);
            recs.iter()
                .map(|r| (r.ticker.clone(), r.categories.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(build(), build());
    }

    // -- Market summary ------------------------------------------------------

    #[test]
    fn market_summary_aggregates() {
        let recs = vec![
            rec("AAAA", 90.0, 10_000_000.0, 0.8, DataQuality::Good),
            rec("BBBB", 60.0, 5_000_000.0, 0.6, DataQuality::Fair),
            rec("CCCC", 10.0, 0.0, 0.1, DataQuality::Poor),
        ];
        let summary = market_summary(&recs, 2);

        assert_eq!(summary.market_health_score, 75.0);
        assert_eq!(summary.total_stocks, 3);
        assert_eq!(summary.high_quality_stocks, 2);
        assert!((summary.average_continuity - 70.0).abs() < 1e-9);
        assert_eq!(summary.median_daily_volume, 1000.0);
    }

    #[test]
    fn market_summary_empty_market() {
        let summary = market_summary(&[], 20);
        assert_eq!(summary.market_health_score, 0.0);
        assert_eq!(summary.total_stocks, 0);
        assert_eq!(summary.median_daily_volume, 0.0);
    }
}
