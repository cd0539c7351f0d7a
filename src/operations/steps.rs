// =============================================================================
// Concrete operation steps — scrape, process, index, liquidity
// =============================================================================
//
// Each operation type runs a prefix of the same pipeline:
//
//   scraping    = [scrape]
//   processing  = [scrape, process]
//   indexing    = [scrape, process, index]
//   liquidity   = [scrape, process, index, liquidity]
//
// Steps publish fine-grained progress through the reporter, observe the
// cancellation token between items, and hand back the artifacts they wrote.
// =============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc, Weekday};
use futures_util::future::BoxFuture;
use serde_json::json;
use tracing::{debug, warn};

use crate::bulletin::forward_fill::forward_fill;
use crate::bulletin::reader::read_trade_records;
use crate::bulletin::record::TradeRecord;
use crate::bulletin::writer::write_combined_csv;
use crate::errors::{PulseError, PulseResult};
use crate::liquidity::engine::analyze_parallel;
use crate::liquidity::writer::{write_insights_json, write_scores_csv};
use crate::operations::operation::OperationConfig;
use crate::operations::orchestrator::{StepContext, StepOutcome, StepWork};
use crate::summary::summarizer::summarize_all;
use crate::summary::writer::{write_summary_csv, write_summary_json};
use crate::types::{OperationMode, OperationType};

/// Build the step chain for an operation type.
pub fn steps_for(op_type: OperationType) -> Vec<Box<dyn StepWork>> {
    let mut steps: Vec<Box<dyn StepWork>> = vec![Box::new(ScrapeStep::new())];
    if op_type == OperationType::Scraping {
        return steps;
    }
    steps.push(Box::new(ProcessStep));
    if op_type == OperationType::Processing {
        return steps;
    }
    steps.push(Box::new(IndexStep));
    if op_type == OperationType::Indexing {
        return steps;
    }
    steps.push(Box::new(LiquidityStep));
    steps
}

// =============================================================================
// Date helpers
// =============================================================================

/// Exchange sessions run Sunday through Thursday; Friday and Saturday are
/// the weekend and never have a bulletin.
pub fn session_dates(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut day = from;
    while day <= to {
        if !matches!(day.weekday(), Weekday::Fri | Weekday::Sat) {
            dates.push(day);
        }
        day = day.succ_opt().unwrap_or(day);
        if dates.len() > 20_000 {
            break; // runaway range guard
        }
    }
    dates
}

/// Most recent bulletin date already on disk (`<YYYY-MM-DD>.csv` filenames).
fn latest_local_date(dir: &std::path::Path) -> Option<NaiveDate> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            let stem = name.strip_suffix(".csv")?;
            NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
        })
        .max()
}

// =============================================================================
// Scrape step
// =============================================================================

/// Downloads daily bulletin files into the downloads directory.
pub struct ScrapeStep {
    client: reqwest::Client,
}

impl ScrapeStep {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Resolve the date range this run covers.
    fn resolve_range(
        &self,
        config: &OperationConfig,
        history_start: NaiveDate,
        downloads_dir: &std::path::Path,
    ) -> (NaiveDate, NaiveDate) {
        let to = config.to.unwrap_or_else(|| Utc::now().date_naive());
        let from = config.from.unwrap_or(match config.mode {
            OperationMode::Initial | OperationMode::Full => history_start,
            OperationMode::Accumulative => latest_local_date(downloads_dir)
                .and_then(|d| d.succ_opt())
                .unwrap_or(history_start),
        });
        (from, to)
    }

    async fn fetch_one(
        &self,
        base_url: &str,
        date: NaiveDate,
        target: &std::path::Path,
    ) -> PulseResult<bool> {
        let url = format!("{}/{date}.csv", base_url.trim_end_matches('/'));
        let response = self.client.get(&url).send().await?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let bytes = response.bytes().await?;
                crate::artifacts::atomic_write(target, &bytes)?;
                debug!(%date, bytes = bytes.len(), "bulletin downloaded");
                Ok(true)
            }
            reqwest::StatusCode::NOT_FOUND => {
                // No session that day (holiday); nothing to store.
                debug!(%date, "no bulletin published");
                Ok(false)
            }
            status => Err(PulseError::Network(format!(
                "bulletin fetch for {date} returned {status}"
            ))),
        }
    }
}

impl Default for ScrapeStep {
    fn default() -> Self {
        Self::new()
    }
}

impl StepWork for ScrapeStep {
    fn id(&self) -> &str {
        "scrape"
    }

    fn name(&self) -> &str {
        "Fetch daily bulletins"
    }

    fn validate(&self, config: &OperationConfig) -> PulseResult<()> {
        if let (Some(from), Some(to)) = (config.from, config.to) {
            if from > to {
                return Err(PulseError::Validation(format!(
                    "date range is inverted: {from} > {to}"
                )));
            }
        }
        Ok(())
    }

    fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>> {
        Box::pin(async move {
            let downloads = ctx.runtime.downloads_dir();
            std::fs::create_dir_all(&downloads)?;

            let history_start =
                NaiveDate::parse_from_str(&ctx.runtime.history_start, "%Y-%m-%d")
                    .map_err(|e| {
                        PulseError::Validation(format!("bad history_start: {e}"))
                    })?;
            let (from, to) = self.resolve_range(&ctx.config, history_start, &downloads);
            let dates = session_dates(from, to);
            let total = dates.len() as u64;

            let mut fetched = 0u64;
            let mut already_present = 0u64;
            let mut absent = 0u64;

            for (i, date) in dates.iter().enumerate() {
                if ctx.cancel.is_cancelled() {
                    return Err(PulseError::Cancelled);
                }

                let target = downloads.join(format!("{date}.csv"));
                if target.exists() && ctx.config.mode != OperationMode::Full {
                    already_present += 1;
                } else if self
                    .fetch_one(&ctx.runtime.bulletin_base_url, *date, &target)
                    .await?
                {
                    fetched += 1;
                } else {
                    absent += 1;
                }

                let done = (i + 1) as u64;
                ctx.reporter.report(
                    done as f64 / total.max(1) as f64 * 100.0,
                    done,
                    total,
                    Some(&format!("bulletin {date}")),
                );
            }

            Ok(StepOutcome {
                items_processed: fetched + already_present,
                items_failed: 0,
                files_written: Vec::new(),
                message: Some(format!(
                    "fetched {fetched}, kept {already_present}, no session on {absent} dates"
                )),
            })
        })
    }
}

// =============================================================================
// Process step
// =============================================================================

/// Combines every downloaded bulletin into the dense canonical stream.
pub struct ProcessStep;

impl StepWork for ProcessStep {
    fn id(&self) -> &str {
        "process"
    }

    fn name(&self) -> &str {
        "Combine and forward-fill"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["scrape".to_string()]
    }

    fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>> {
        Box::pin(async move {
            let downloads = ctx.runtime.downloads_dir();
            let mut files: Vec<PathBuf> = std::fs::read_dir(&downloads)
                .map_err(|e| {
                    PulseError::Storage(format!(
                        "cannot list {}: {e}",
                        downloads.display()
                    ))
                })?
                .flatten()
                .map(|entry| entry.path())
                .filter(|p| p.extension().map(|ext| ext == "csv").unwrap_or(false))
                .collect();
            files.sort();

            if files.is_empty() {
                return Err(PulseError::Validation(format!(
                    "no bulletin files in {}",
                    downloads.display()
                )));
            }

            let total = files.len() as u64;
            let mut records: Vec<TradeRecord> = Vec::new();
            let mut skipped_rows = 0u64;

            for (i, file) in files.iter().enumerate() {
                if ctx.cancel.is_cancelled() {
                    return Err(PulseError::Cancelled);
                }
                let (mut rows, errors) = read_trade_records(file)?;
                if !errors.is_empty() {
                    skipped_rows += errors.len() as u64;
                    ctx.reporter.output(
                        "warn",
                        &format!(
                            "{}: skipped {} malformed rows",
                            file.display(),
                            errors.len()
                        ),
                    );
                }
                records.append(&mut rows);

                let done = (i + 1) as u64;
                ctx.reporter.report(
                    done as f64 / total as f64 * 90.0,
                    done,
                    total,
                    Some(&format!("reading {}", file.display())),
                );
            }

            let (dense, stats) = forward_fill(records);
            let combined_path = ctx.runtime.combined_csv_path();
            write_combined_csv(&combined_path, &dense)?;

            ctx.reporter.report(100.0, total, total, Some("combined artifact written"));
            ctx.reporter.data_update(
                "combined_trades",
                json!({
                    "rows": stats.rows_out,
                    "filled": stats.filled_rows,
                    "symbols": stats.symbols,
                    "dates": stats.dates,
                }),
            );

            Ok(StepOutcome {
                items_processed: total,
                items_failed: skipped_rows,
                files_written: vec![combined_path.display().to_string()],
                message: Some(format!(
                    "{} rows ({} filled) across {} symbols / {} dates",
                    stats.rows_out, stats.filled_rows, stats.symbols, stats.dates
                )),
            })
        })
    }
}

// =============================================================================
// Index step
// =============================================================================

/// Produces the per-ticker summary artifacts from the combined stream.
pub struct IndexStep;

impl StepWork for IndexStep {
    fn id(&self) -> &str {
        "index"
    }

    fn name(&self) -> &str {
        "Summarize tickers"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["process".to_string()]
    }

    fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>> {
        Box::pin(async move {
            let (records, _) = read_trade_records(ctx.runtime.combined_csv_path())?;
            if ctx.cancel.is_cancelled() {
                return Err(PulseError::Cancelled);
            }

            let summaries = summarize_all(&records, &ctx.runtime.summary);
            ctx.reporter.report(
                50.0,
                summaries.len() as u64,
                summaries.len() as u64,
                Some("summaries computed"),
            );

            let reports = ctx.runtime.reports_dir();
            let csv_path = reports.join("ticker_summary.csv");
            let json_path = reports.join("ticker_summary.json");
            write_summary_csv(&csv_path, &summaries, &ctx.runtime.summary.date_format)?;
            write_summary_json(&json_path, &summaries)?;

            ctx.reporter.report(
                100.0,
                summaries.len() as u64,
                summaries.len() as u64,
                Some("summary artifacts written"),
            );
            ctx.reporter
                .data_update("ticker_summary", json!({ "count": summaries.len() }));

            Ok(StepOutcome {
                items_processed: summaries.len() as u64,
                items_failed: 0,
                files_written: vec![
                    csv_path.display().to_string(),
                    json_path.display().to_string(),
                ],
                message: Some(format!("{} tickers summarized", summaries.len())),
            })
        })
    }
}

// =============================================================================
// Liquidity step
// =============================================================================

/// Scores market liquidity and writes the insight artifacts.
pub struct LiquidityStep;

impl StepWork for LiquidityStep {
    fn id(&self) -> &str {
        "liquidity"
    }

    fn name(&self) -> &str {
        "Score liquidity"
    }

    fn dependencies(&self) -> Vec<String> {
        vec!["index".to_string()]
    }

    fn run<'a>(&'a self, ctx: &'a StepContext) -> BoxFuture<'a, PulseResult<StepOutcome>> {
        Box::pin(async move {
            let (records, _) = read_trade_records(ctx.runtime.combined_csv_path())?;

            let report = analyze_parallel(
                &records,
                &ctx.runtime.liquidity,
                ctx.config.max_workers,
                &ctx.cancel,
            )
            .await?;

            let symbols = report.recommendations.len() as u64;
            ctx.reporter
                .report(70.0, symbols, symbols, Some("liquidity scored"));

            let reports_dir = ctx.runtime.reports_dir();
            let mut files_written = Vec::new();

            if report.points.is_empty() {
                warn!("no liquidity points produced — scores artifact skipped");
                ctx.reporter
                    .output("warn", "no liquidity points produced for this window");
            } else {
                let scores_path = write_scores_csv(&reports_dir, &report)?;
                files_written.push(scores_path.display().to_string());
            }

            let insights_path = write_insights_json(&reports_dir, &report)?;
            files_written.push(insights_path.display().to_string());

            ctx.reporter
                .report(100.0, symbols, symbols, Some("insight artifacts written"));
            ctx.reporter.data_update(
                "insights",
                json!({
                    "total_stocks": report.market.total_stocks,
                    "market_health_score": report.market.market_health_score,
                }),
            );

            Ok(StepOutcome {
                items_processed: symbols,
                items_failed: 0,
                files_written,
                message: Some(format!(
                    "{} symbols scored, market health {:.1}",
                    symbols, report.market.market_health_score
                )),
            })
        })
    }
}
