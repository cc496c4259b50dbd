//! Daily rollups of scheduled results and the trend between them.

mod aggregator;

pub use aggregator::{SummaryAggregator, calculate_trend, summarize_items};
