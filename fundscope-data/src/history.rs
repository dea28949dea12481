//! Hourly history rows and the raw samples charts are built from.
//!
//! Two files feed the charts: the funding history (one row per coin per
//! hour, rate as a per-hour fraction, timestamp at the END of the covered
//! hour) and the market history (hourly candles, timestamp at the START of
//! the covered hour). Both are plain CSV with a header row.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::DataError;

/// Multiplier turning a per-hour funding fraction into percent APR.
pub const ANNUALIZATION_FACTOR: f64 = 24.0 * 365.0 * 100.0;

/// One timestamped observation for a single coin and metric stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub coin: String,
    /// Milliseconds since the Unix epoch, in the stream's own convention.
    pub time_ms: i64,
    pub value: f64,
}

/// A metric stream a chart panel can display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Funding,
    Volume,
    Price,
}

impl Metric {
    /// Offset applied to sample timestamps before bucketing.
    ///
    /// Funding rows stamp the end of the covered hour; volume and price
    /// rows stamp the start. Shifting the latter forward one hour puts all
    /// three streams on the same hour-label convention.
    pub fn alignment(&self) -> Duration {
        match self {
            Metric::Funding => Duration::zero(),
            Metric::Volume | Metric::Price => Duration::hours(1),
        }
    }

    /// Panel title.
    pub fn title(&self) -> &'static str {
        match self {
            Metric::Funding => "Funding Rate",
            Metric::Volume => "Volume (USD)",
            Metric::Price => "Price",
        }
    }
}

/// One row of the funding history file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateHistoryRow {
    pub coin: String,
    /// Per-hour funding fraction (e.g. `0.0000125`), NOT annualized.
    #[serde(rename = "fundingRate")]
    pub funding_rate: f64,
    /// Milliseconds since epoch; marks the END of the covered hour.
    pub time: i64,
}

impl RateHistoryRow {
    /// Annualized percent-APR sample for charting.
    pub fn to_sample(&self) -> RawSample {
        RawSample {
            coin: self.coin.clone(),
            time_ms: self.time,
            value: self.funding_rate * ANNUALIZATION_FACTOR,
        }
    }
}

/// One row of the market history file (hourly candle).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketHistoryRow {
    pub coin: String,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub close_price: f64,
    pub volume_usd: f64,
    pub trade_count: u64,
    /// Milliseconds since epoch; marks the START of the covered hour.
    pub time: i64,
}

impl MarketHistoryRow {
    pub fn volume_sample(&self) -> RawSample {
        RawSample {
            coin: self.coin.clone(),
            time_ms: self.time,
            value: self.volume_usd,
        }
    }

    pub fn price_sample(&self) -> RawSample {
        RawSample {
            coin: self.coin.clone(),
            time_ms: self.time,
            value: self.close_price,
        }
    }
}

/// Load the funding history file.
///
/// Unknown columns are ignored; a missing expected column surfaces as
/// [`DataError::FormatUnrecognized`] so the caller can hide the chart
/// rather than render garbage.
pub fn load_rate_history(path: impl AsRef<Path>) -> Result<Vec<RateHistoryRow>, DataError> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: RateHistoryRow = record?;
        rows.push(row);
    }
    Ok(rows)
}

/// Load the market history file.
pub fn load_market_history(path: impl AsRef<Path>) -> Result<Vec<MarketHistoryRow>, DataError> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: MarketHistoryRow = record?;
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_annualization() {
        let row = RateHistoryRow {
            coin: "BTC".to_string(),
            funding_rate: 0.0000125,
            time: 1_700_000_000_000,
        };
        let sample = row.to_sample();
        // 0.0000125/h -> 10.95% APR
        assert!((sample.value - 10.95).abs() < 1e-9);
        assert_eq!(sample.time_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_metric_alignment() {
        assert_eq!(Metric::Funding.alignment(), Duration::zero());
        assert_eq!(Metric::Volume.alignment(), Duration::hours(1));
        assert_eq!(Metric::Price.alignment(), Duration::hours(1));
    }

    #[test]
    fn test_load_rate_history_ignores_extra_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "coin,fundingRate,premium,time").unwrap();
        writeln!(file, "BTC,0.0000125,0.0001,1700000000000").unwrap();
        writeln!(file, "ETH,-0.0000030,0.0,1700000000000").unwrap();

        let rows = load_rate_history(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].coin, "BTC");
        assert!(rows[1].funding_rate < 0.0);
    }

    #[test]
    fn test_load_rate_history_missing_column_is_format_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "coin,time").unwrap();
        writeln!(file, "BTC,1700000000000").unwrap();

        let err = load_rate_history(file.path()).unwrap_err();
        assert!(matches!(err, DataError::FormatUnrecognized { .. }));
    }

    #[test]
    fn test_load_missing_file_is_unavailable() {
        let err = load_market_history("/nonexistent/market_history.csv").unwrap_err();
        assert!(matches!(err, DataError::FeedUnavailable(_)));
    }

    #[test]
    fn test_market_row_samples() {
        let row = MarketHistoryRow {
            coin: "SOL".to_string(),
            open_price: 99.0,
            high_price: 102.0,
            low_price: 98.5,
            close_price: 101.0,
            volume_usd: 1_234_567.0,
            trade_count: 420,
            time: 1_700_003_600_000,
        };
        assert_eq!(row.volume_sample().value, 1_234_567.0);
        assert_eq!(row.price_sample().value, 101.0);
        assert_eq!(row.price_sample().time_ms, row.time);
    }
}
