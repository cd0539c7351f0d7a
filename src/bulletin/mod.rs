// =============================================================================
// Bulletin ingestion — canonical trade records from daily exchange bulletins
// =============================================================================

pub mod forward_fill;
pub mod reader;
pub mod record;
pub mod writer;

pub use forward_fill::{forward_fill, FillStats};
pub use reader::{read_trade_records, read_trade_records_from, RowError};
pub use record::TradeRecord;
pub use writer::write_combined_csv;
