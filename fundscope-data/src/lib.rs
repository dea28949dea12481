/// Fundscope Data - Dashboard Core Library
///
/// This library provides the data layer shared by the fundscope binaries:
/// - `fundscope-collector`: polls the exchange API and maintains the
///   on-disk history files plus the summary feed JSON
/// - `fundscope-tui`: terminal dashboard rendering the summary table and
///   per-coin charts with a synchronised crosshair
///
/// The library includes:
/// - SerDe types for the summary feed and the hourly history files
/// - The entity merger combining the eight feed shards into one row per coin
/// - The hourly timeline reconstructor (present / missing / out-of-range)
/// - The highlight coordinator shared by all chart panels
/// - Session state (display mode, chart range, ADV window, fetch generation)
pub mod error;
pub mod feed;
pub mod highlight;
pub mod history;
pub mod session;
pub mod summary;
pub mod timeline;

// Re-export commonly used types for convenience
pub use error::DataError;

pub use feed::{AverageRow, CurrentRow, SummaryFeed, Window, build_summary_feed};

pub use history::{
    ANNUALIZATION_FACTOR, MarketHistoryRow, Metric, RateHistoryRow, RawSample,
    load_market_history, load_rate_history,
};

pub use summary::{AdvWindow, EntitySummary, merge};

pub use timeline::{ChartRange, PointValue, TimelinePoint, reconstruct};

pub use highlight::{HighlightCoordinator, HighlightState, PanelId, nearest_present_index};

pub use session::{DisplayMode, SessionState};
