// =============================================================================
// Ticker summaries — single source of truth for per-ticker aggregates
// =============================================================================

pub mod summarizer;
pub mod writer;

pub use summarizer::{summarize_all, summarize_symbol, ExtendedSummary, TickerSummary};
pub use writer::{format_last_n, parse_last_n, write_summary_csv, write_summary_json};
