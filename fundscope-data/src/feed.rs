//! The summary feed: eight pre-split shards of per-coin funding rates plus
//! an average-daily-volume side table.
//!
//! The feed is produced by `fundscope-collector` and consumed by the TUI.
//! Current rates and the 1d/3d/5d rolling averages each arrive split by
//! sign into a positive and a negative shard; the split is a serving-layer
//! artifact and carries no information of its own (the merger treats the
//! two shards as halves of one logical set).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::DataError;
use crate::history::{ANNUALIZATION_FACTOR, MarketHistoryRow, RateHistoryRow};

/// Rolling-average window of the summary feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Window {
    OneDay,
    ThreeDay,
    FiveDay,
}

impl Window {
    pub const ALL: [Window; 3] = [Window::OneDay, Window::ThreeDay, Window::FiveDay];

    pub fn days(&self) -> i64 {
        match self {
            Window::OneDay => 1,
            Window::ThreeDay => 3,
            Window::FiveDay => 5,
        }
    }

    /// Hourly data points a coin must have inside the window for its
    /// average to be published.
    pub fn required_points(&self) -> usize {
        (self.days() * 24) as usize
    }
}

/// One row of a `positive_current` / `negative_current` shard.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CurrentRow {
    pub coin: String,
    #[serde(rename = "fundingRate_annualized", default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(rename = "isNew", default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
}

/// One row of a `positive_{w}` / `negative_{w}` rolling-average shard.
///
/// Each shard populates exactly one of the three average fields; the row
/// type carries all three so one definition serves every shard.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AverageRow {
    pub coin: String,
    #[serde(rename = "fundingRate_avg_1d", default, skip_serializing_if = "Option::is_none")]
    pub avg_1d: Option<f64>,
    #[serde(rename = "fundingRate_avg_3d", default, skip_serializing_if = "Option::is_none")]
    pub avg_3d: Option<f64>,
    #[serde(rename = "fundingRate_avg_5d", default, skip_serializing_if = "Option::is_none")]
    pub avg_5d: Option<f64>,
    #[serde(rename = "isNew", default, skip_serializing_if = "Option::is_none")]
    pub is_new: Option<bool>,
}

impl AverageRow {
    pub fn value(&self, window: Window) -> Option<f64> {
        match window {
            Window::OneDay => self.avg_1d,
            Window::ThreeDay => self.avg_3d,
            Window::FiveDay => self.avg_5d,
        }
    }
}

/// The whole summary feed document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SummaryFeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,

    #[serde(default)]
    pub positive_current: Vec<CurrentRow>,
    #[serde(default)]
    pub negative_current: Vec<CurrentRow>,

    #[serde(default)]
    pub positive_1d: Vec<AverageRow>,
    #[serde(default)]
    pub negative_1d: Vec<AverageRow>,
    #[serde(default)]
    pub positive_3d: Vec<AverageRow>,
    #[serde(default)]
    pub negative_3d: Vec<AverageRow>,
    #[serde(default)]
    pub positive_5d: Vec<AverageRow>,
    #[serde(default)]
    pub negative_5d: Vec<AverageRow>,

    /// `"{N}d"` -> coin -> average daily USD volume (null when the coin
    /// lacks full coverage for that window).
    #[serde(default)]
    pub adv_data: BTreeMap<String, BTreeMap<String, Option<f64>>>,
}

impl SummaryFeed {
    /// Positive and negative average shards for a window, in scan order.
    pub fn average_shards(&self, window: Window) -> [&[AverageRow]; 2] {
        match window {
            Window::OneDay => [&self.positive_1d, &self.negative_1d],
            Window::ThreeDay => [&self.positive_3d, &self.negative_3d],
            Window::FiveDay => [&self.positive_5d, &self.negative_5d],
        }
    }

    /// Average daily volume for a coin under an `N`-day window, if the
    /// side table covers both the window and the coin.
    pub fn adv_for(&self, days: u8, coin: &str) -> Option<f64> {
        self.adv_data
            .get(&format!("{days}d"))
            .and_then(|per_coin| per_coin.get(coin))
            .copied()
            .flatten()
    }

    /// Parse a feed document. Shape violations are format errors; absent
    /// shards simply come back empty.
    pub fn from_json_str(raw: &str) -> Result<Self, DataError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Read and parse a feed file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> Result<String, DataError> {
        Ok(serde_json::to_string(self)?)
    }
}

const FEED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Days of history below which a coin counts as newly listed.
const NEW_COIN_DAYS: i64 = 7;

/// Build the summary feed from the raw history files.
///
/// - The "current" shards snapshot the rows at the latest funding
///   timestamp, annualized to percent APR.
/// - A window average is published only when the coin has the full
///   `days * 24` hourly points inside the window.
/// - Positive/negative shards split on sign (exact zeros fall out), sorted
///   strongest-first on each side.
/// - The ADV table covers every window length 1..=30 days, with `null` for
///   coins lacking full coverage.
pub fn build_summary_feed(
    rates: &[RateHistoryRow],
    market: &[MarketHistoryRow],
    now: DateTime<Utc>,
) -> SummaryFeed {
    let mut feed = SummaryFeed {
        generated_at: Some(now.format(FEED_TIME_FORMAT).to_string()),
        ..SummaryFeed::default()
    };

    let Some(latest_ms) = rates.iter().map(|r| r.time).max() else {
        return feed;
    };
    let latest_time = DateTime::from_timestamp_millis(latest_ms).unwrap_or(now);
    feed.timestamp = Some(latest_time.format(FEED_TIME_FORMAT).to_string());

    let coins: Vec<&str> = rates
        .iter()
        .map(|r| r.coin.as_str())
        .unique()
        .sorted()
        .collect();

    // A coin is new when its earliest funding row is inside the last week.
    let new_cutoff_ms = latest_ms - Duration::days(NEW_COIN_DAYS).num_milliseconds();
    let mut earliest: HashMap<&str, i64> = HashMap::new();
    for row in rates {
        earliest
            .entry(row.coin.as_str())
            .and_modify(|t| *t = (*t).min(row.time))
            .or_insert(row.time);
    }
    let is_new =
        |coin: &str| -> bool { earliest.get(coin).is_some_and(|&t| t >= new_cutoff_ms) };

    // Current shards: latest-hour snapshot, split by sign.
    for row in rates.iter().filter(|r| r.time == latest_ms) {
        let annualized = row.funding_rate * ANNUALIZATION_FACTOR;
        if !annualized.is_finite() {
            continue;
        }
        let entry = CurrentRow {
            coin: row.coin.clone(),
            rate: Some(annualized),
            is_new: Some(is_new(&row.coin)),
        };
        if annualized > 0.0 {
            feed.positive_current.push(entry);
        } else if annualized < 0.0 {
            feed.negative_current.push(entry);
        }
    }
    feed.positive_current
        .sort_by(|a, b| b.rate.partial_cmp(&a.rate).unwrap_or(std::cmp::Ordering::Equal));
    feed.negative_current
        .sort_by(|a, b| a.rate.partial_cmp(&b.rate).unwrap_or(std::cmp::Ordering::Equal));

    // Rolling-average shards, gated on full hourly coverage.
    for window in Window::ALL {
        let start_ms = latest_ms - Duration::days(window.days()).num_milliseconds();
        let mut positive = Vec::new();
        let mut negative = Vec::new();

        for &coin in &coins {
            let in_window: Vec<f64> = rates
                .iter()
                .filter(|r| r.coin == coin && r.time >= start_ms && r.funding_rate.is_finite())
                .map(|r| r.funding_rate)
                .collect();
            if in_window.len() < window.required_points() {
                continue;
            }
            let avg =
                in_window.iter().sum::<f64>() / in_window.len() as f64 * ANNUALIZATION_FACTOR;

            let mut row = AverageRow {
                coin: coin.to_string(),
                avg_1d: None,
                avg_3d: None,
                avg_5d: None,
                is_new: Some(is_new(coin)),
            };
            match window {
                Window::OneDay => row.avg_1d = Some(avg),
                Window::ThreeDay => row.avg_3d = Some(avg),
                Window::FiveDay => row.avg_5d = Some(avg),
            }
            if avg > 0.0 {
                positive.push(row);
            } else if avg < 0.0 {
                negative.push(row);
            }
        }

        let value = |r: &AverageRow| r.value(window).unwrap_or(0.0);
        positive.sort_by(|a, b| value(b).partial_cmp(&value(a)).unwrap_or(std::cmp::Ordering::Equal));
        negative.sort_by(|a, b| value(a).partial_cmp(&value(b)).unwrap_or(std::cmp::Ordering::Equal));

        match window {
            Window::OneDay => {
                feed.positive_1d = positive;
                feed.negative_1d = negative;
            }
            Window::ThreeDay => {
                feed.positive_3d = positive;
                feed.negative_3d = negative;
            }
            Window::FiveDay => {
                feed.positive_5d = positive;
                feed.negative_5d = negative;
            }
        }
    }

    // ADV side table for every selectable window length.
    if let Some(latest_volume_ms) = market.iter().map(|r| r.time).max() {
        let volume_coins: Vec<&str> = market
            .iter()
            .map(|r| r.coin.as_str())
            .unique()
            .sorted()
            .collect();

        for days in 1..=30i64 {
            let start_ms = latest_volume_ms - Duration::days(days).num_milliseconds();
            let required = (days * 24) as usize;
            let mut per_coin = BTreeMap::new();

            for &coin in &volume_coins {
                let volumes: Vec<f64> = market
                    .iter()
                    .filter(|r| r.coin == coin && r.time > start_ms)
                    .map(|r| r.volume_usd)
                    .collect();
                let adv = (volumes.len() >= required)
                    .then(|| volumes.iter().sum::<f64>() / days as f64);
                per_coin.insert(coin.to_string(), adv);
            }
            feed.adv_data.insert(format!("{days}d"), per_coin);
        }
    }

    feed
}
