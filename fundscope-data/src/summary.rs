//! The entity merger: eight feed shards in, one row per coin out.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::feed::{SummaryFeed, Window};

/// Selected average-daily-volume lookback, clamped to the range the feed
/// side table covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvWindow(u8);

impl AdvWindow {
    pub const MIN_DAYS: u8 = 1;
    pub const MAX_DAYS: u8 = 30;

    pub fn new(days: u8) -> Self {
        Self(days.clamp(Self::MIN_DAYS, Self::MAX_DAYS))
    }

    pub fn days(&self) -> u8 {
        self.0
    }

    pub fn widen(&self) -> Self {
        Self::new(self.0.saturating_add(1))
    }

    pub fn narrow(&self) -> Self {
        Self::new(self.0.saturating_sub(1))
    }
}

impl Default for AdvWindow {
    fn default() -> Self {
        Self(Self::MAX_DAYS)
    }
}

/// One merged row of the overview table.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySummary {
    pub coin: String,
    pub is_new: bool,
    pub is_delisted: bool,
    /// Latest annualized funding rate (percent APR).
    pub latest_rate: Option<f64>,
    pub avg_1d: Option<f64>,
    pub avg_3d: Option<f64>,
    pub avg_5d: Option<f64>,
    /// Average daily USD volume for the selected [`AdvWindow`].
    pub adv: Option<f64>,
}

/// Merge the feed shards into one summary row per coin.
///
/// Scan precedence is fixed and documented rather than incidental: for
/// every window the positive shard is scanned before the negative shard,
/// and within the `isNew` hints the current shards are scanned before the
/// 1d/3d/5d shards. The last value scanned for a coin wins; duplicate ids
/// across (or within) shards are never an error.
///
/// A coin with no explicit `isNew` hint anywhere falls back to "no 5-day
/// average means newly listed" with a diagnostic, never a failure.
pub fn merge(feed: &SummaryFeed, adv_window: AdvWindow) -> Vec<EntitySummary> {
    // Universe: every coin appearing in any shard.
    let mut coins: BTreeSet<&str> = BTreeSet::new();
    for row in feed.positive_current.iter().chain(&feed.negative_current) {
        coins.insert(&row.coin);
    }
    for window in Window::ALL {
        for shard in feed.average_shards(window) {
            for row in shard {
                coins.insert(&row.coin);
            }
        }
    }

    // Per-window lookups, positive scanned before negative, last write wins.
    let mut current: HashMap<&str, f64> = HashMap::new();
    for row in feed.positive_current.iter().chain(&feed.negative_current) {
        if let Some(rate) = row.rate {
            current.insert(&row.coin, rate);
        }
    }

    let mut averages: HashMap<Window, HashMap<&str, f64>> = HashMap::new();
    for window in Window::ALL {
        let lookup: &mut HashMap<&str, f64> = averages.entry(window).or_default();
        for shard in feed.average_shards(window) {
            for row in shard {
                if let Some(value) = row.value(window) {
                    lookup.insert(&row.coin, value);
                }
            }
        }
    }

    // isNew hints, same precedence: current shards first, then each window.
    let mut new_hints: HashMap<&str, bool> = HashMap::new();
    for row in feed.positive_current.iter().chain(&feed.negative_current) {
        if let Some(hint) = row.is_new {
            new_hints.insert(&row.coin, hint);
        }
    }
    for window in Window::ALL {
        for shard in feed.average_shards(window) {
            for row in shard {
                if let Some(hint) = row.is_new {
                    new_hints.insert(&row.coin, hint);
                }
            }
        }
    }

    coins
        .into_iter()
        .map(|coin| {
            let avg_1d = averages[&Window::OneDay].get(coin).copied();
            let avg_3d = averages[&Window::ThreeDay].get(coin).copied();
            let avg_5d = averages[&Window::FiveDay].get(coin).copied();

            let is_new = match new_hints.get(coin) {
                Some(&hint) => hint,
                None => {
                    warn!(coin, "isNew hint missing from feed, deriving from 5d history");
                    avg_5d.is_none()
                }
            };
            let is_delisted = avg_5d.is_some() && avg_1d.is_none() && !is_new;

            EntitySummary {
                coin: coin.to_string(),
                is_new,
                is_delisted,
                latest_rate: current.get(coin).copied(),
                avg_1d,
                avg_3d,
                avg_5d,
                adv: feed.adv_for(adv_window.days(), coin),
            }
        })
        .collect()
}
