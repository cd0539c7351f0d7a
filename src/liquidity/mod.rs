// =============================================================================
// Liquidity engine — per-symbol time series to scores, thresholds, insights
// =============================================================================

pub mod ema;
pub mod engine;
pub mod point;
pub mod quality;
pub mod recommend;
pub mod safe_trade;
pub mod scaling;
pub mod writer;

pub use engine::{analyze, analyze_parallel, LiquidityReport};
pub use point::LiquidityPoint;
pub use recommend::{MarketSummary, StockMetrics, StockRecommendation};
pub use safe_trade::SafeTradeThresholds;
