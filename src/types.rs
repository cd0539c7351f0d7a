// =============================================================================
// Shared types used across the ISX Pulse backend
// =============================================================================

use serde::{Deserialize, Serialize};

/// Which multi-step workflow an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Scraping,
    Processing,
    Indexing,
    Liquidity,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scraping => write!(f, "scraping"),
            Self::Processing => write!(f, "processing"),
            Self::Indexing => write!(f, "indexing"),
            Self::Liquidity => write!(f, "liquidity"),
        }
    }
}

/// Lifecycle state shared by operations and their steps.
///
/// Terminal states (`Completed`, `Failed`, `Cancelled`) are immutable; the
/// only backward transitions allowed elsewhere are `Retrying -> Running` and
/// `Paused <-> Running`. `Skipped` is used by steps only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
    Retrying,
    Skipped,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl RunStatus {
    /// A terminal status can never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped)
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => matches!(
                next,
                Self::Running | Self::Cancelled | Self::Skipped | Self::Failed
            ),
            Self::Running => matches!(
                next,
                Self::Completed
                    | Self::Failed
                    | Self::Cancelled
                    | Self::Paused
                    | Self::Retrying
            ),
            Self::Retrying => matches!(next, Self::Running | Self::Failed | Self::Cancelled),
            Self::Paused => matches!(next, Self::Running | Self::Cancelled),
            // Terminal states are immutable.
            Self::Completed | Self::Failed | Self::Cancelled | Self::Skipped => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused => "paused",
            Self::Retrying => "retrying",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// How much history an operation covers.
///
/// `Initial` backfills from the configured start date, `Accumulative` only
/// fetches what is missing since the last run, `Full` re-fetches everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    Initial,
    Accumulative,
    Full,
}

impl Default for OperationMode {
    fn default() -> Self {
        Self::Accumulative
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial"),
            Self::Accumulative => write!(f, "accumulative"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Quality bucket assigned to a per-symbol liquidity series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataQuality {
    Good,
    Fair,
    Poor,
}

impl std::fmt::Display for DataQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Good => write!(f, "GOOD"),
            Self::Fair => write!(f, "FAIR"),
            Self::Poor => write!(f, "POOR"),
        }
    }
}

/// Recommended action derived from a symbol's aggregated liquidity metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeAction {
    BuyLarge,
    Buy,
    DayTrade,
    Hold,
    Caution,
    Avoid,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BuyLarge => "BUY_LARGE",
            Self::Buy => "BUY",
            Self::DayTrade => "DAY_TRADE",
            Self::Hold => "HOLD",
            Self::Caution => "CAUTION",
            Self::Avoid => "AVOID",
        };
        write!(f, "{s}")
    }
}

/// Which aggregation of the liquidity series a metrics bundle reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisMode {
    Ema,
    Latest,
    Average,
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ema => write!(f, "EMA"),
            Self::Latest => write!(f, "LATEST"),
            Self::Average => write!(f, "AVERAGE"),
        }
    }
}
