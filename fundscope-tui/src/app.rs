//! Application state and the data-loading tasks that feed it.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use fundscope_data::{
    ChartRange, DataError, EntitySummary, HighlightCoordinator, MarketHistoryRow, Metric, PanelId,
    RateHistoryRow, RawSample, SessionState, SummaryFeed, TimelinePoint, load_market_history,
    load_rate_history, merge, reconstruct,
};
use ratatui::layout::Rect;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const SUMMARY_FILE: &str = "funding_summary.json";
pub const FUNDING_FILE: &str = "funding_history.csv";
pub const MARKET_FILE: &str = "market_history.csv";

pub const FUNDING_PANEL: PanelId = PanelId(0);
pub const VOLUME_PANEL: PanelId = PanelId(1);
pub const PRICE_PANEL: PanelId = PanelId(2);
pub const ALL_PANELS: [PanelId; 3] = [FUNDING_PANEL, VOLUME_PANEL, PRICE_PANEL];

/// Which screen the operator is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Table,
    Charts,
}

/// One reconstructed series, or the reason its panel is hidden.
pub type SeriesResult = Result<Vec<TimelinePoint>, String>;

/// The three per-coin series. Each one fails independently so a broken
/// market file never takes the funding panel down with it.
#[derive(Debug)]
pub struct ChartData {
    pub funding: SeriesResult,
    pub volume: SeriesResult,
    pub price: SeriesResult,
}

#[derive(Debug)]
pub enum ChartStage {
    Loading,
    Ready(ChartData),
}

#[derive(Debug)]
pub struct ChartView {
    pub coin: String,
    pub stage: ChartStage,
}

pub struct AppState {
    pub data_dir: PathBuf,
    pub session: SessionState,
    pub highlight: HighlightCoordinator,

    pub feed: Option<SummaryFeed>,
    pub summaries: Vec<EntitySummary>,
    pub feed_error: Option<String>,
    pub last_refresh: Option<DateTime<Local>>,

    pub view: View,
    pub selected: usize,
    pub search: String,
    pub searching: bool,

    pub charts: Option<ChartView>,
    pub show_volume: bool,
    pub show_price: bool,

    /// Chart panel hit-boxes from the most recent draw, for mouse routing.
    pub panel_rects: Vec<(PanelId, Rect)>,
}

impl AppState {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            session: SessionState::new(),
            highlight: HighlightCoordinator::new(),
            feed: None,
            summaries: Vec::new(),
            feed_error: None,
            last_refresh: None,
            view: View::Table,
            selected: 0,
            search: String::new(),
            searching: false,
            charts: None,
            show_volume: false,
            show_price: false,
            panel_rects: Vec::new(),
        }
    }

    /// Swap in a fresh feed: summaries are rebuilt wholesale.
    pub fn apply_feed(&mut self, feed: SummaryFeed) {
        self.summaries = merge(&feed, self.session.adv_window);
        self.feed = Some(feed);
        self.feed_error = None;
        self.last_refresh = Some(Local::now());
    }

    /// The ADV window changed: only the `adv` field is refreshed, the rest
    /// of every row stays as merged.
    pub fn refresh_adv(&mut self) {
        let Some(feed) = &self.feed else {
            return;
        };
        let days = self.session.adv_window.days();
        for row in &mut self.summaries {
            row.adv = feed.adv_for(days, &row.coin);
        }
    }

    /// Table rows passing the search filter, strongest current rate first,
    /// rate-less coins at the bottom.
    pub fn filtered_rows(&self) -> Vec<&EntitySummary> {
        let needle = self.search.to_uppercase();
        let mut rows: Vec<&EntitySummary> = self
            .summaries
            .iter()
            .filter(|row| needle.is_empty() || row.coin.to_uppercase().contains(&needle))
            .collect();
        rows.sort_by(|a, b| match (a.latest_rate, b.latest_rate) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.coin.cmp(&b.coin),
        });
        rows
    }

    pub fn selected_coin(&self) -> Option<String> {
        self.filtered_rows()
            .get(self.selected)
            .map(|row| row.coin.clone())
    }

    /// Summary row for the coin whose charts are open.
    pub fn chart_summary(&self) -> Option<&EntitySummary> {
        let coin = &self.charts.as_ref()?.coin;
        self.summaries.iter().find(|row| &row.coin == coin)
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = self.filtered_rows().len();
        if len == 0 {
            self.selected = 0;
            return;
        }
        let max = len - 1;
        self.selected = self
            .selected
            .saturating_add_signed(delta)
            .min(max);
    }

    /// Open charts for the selected coin. Returns the generation stamp for
    /// the load the caller spawns.
    pub fn open_charts(&mut self) -> Option<(String, u64)> {
        let coin = self.selected_coin()?;
        let stamped = self.session.bump_generation();
        self.view = View::Charts;
        self.charts = Some(ChartView {
            coin: coin.clone(),
            stage: ChartStage::Loading,
        });
        self.highlight = HighlightCoordinator::new();
        Some((coin, stamped))
    }

    /// Reload the open charts (range change, manual refresh). Supersedes
    /// any in-flight load.
    pub fn reload_charts(&mut self) -> Option<(String, u64)> {
        let view = self.charts.as_mut()?;
        view.stage = ChartStage::Loading;
        let stamped = self.session.bump_generation();
        Some((view.coin.clone(), stamped))
    }

    pub fn close_charts(&mut self) {
        self.view = View::Table;
        self.charts = None;
        self.panel_rects.clear();
        self.highlight = HighlightCoordinator::new();
    }

    /// The series a panel draws, when it is loaded and healthy.
    pub fn panel_points(&self, panel: PanelId) -> Option<&[TimelinePoint]> {
        let ChartStage::Ready(data) = &self.charts.as_ref()?.stage else {
            return None;
        };
        let series = match panel {
            FUNDING_PANEL => &data.funding,
            VOLUME_PANEL => &data.volume,
            PRICE_PANEL => &data.price,
            _ => return None,
        };
        series.as_deref().ok()
    }
}

/// Reconstruct all three series from whatever the history loaders yielded.
///
/// Kept separate from the file I/O so the range/alignment plumbing is
/// testable with synthetic rows and a fixed clock.
pub fn build_chart_data<Tz: TimeZone>(
    rates: Result<Vec<RateHistoryRow>, DataError>,
    market: Result<Vec<MarketHistoryRow>, DataError>,
    coin: &str,
    range: ChartRange,
    now: DateTime<Tz>,
) -> ChartData
where
    Tz::Offset: std::fmt::Display,
{
    let funding = rates
        .map(|rows| {
            let samples: Vec<RawSample> = rows.iter().map(RateHistoryRow::to_sample).collect();
            reconstruct_metric(&samples, coin, range, now.clone(), Metric::Funding)
        })
        .map_err(|err| err.to_string());

    let (volume, price) = match market {
        Ok(rows) => {
            let volume_samples: Vec<RawSample> =
                rows.iter().map(MarketHistoryRow::volume_sample).collect();
            let price_samples: Vec<RawSample> =
                rows.iter().map(MarketHistoryRow::price_sample).collect();
            (
                Ok(reconstruct_metric(
                    &volume_samples,
                    coin,
                    range,
                    now.clone(),
                    Metric::Volume,
                )),
                Ok(reconstruct_metric(
                    &price_samples,
                    coin,
                    range,
                    now,
                    Metric::Price,
                )),
            )
        }
        Err(err) => {
            let msg = err.to_string();
            (Err(msg.clone()), Err(msg))
        }
    };

    ChartData {
        funding,
        volume,
        price,
    }
}

fn reconstruct_metric<Tz: TimeZone>(
    samples: &[RawSample],
    coin: &str,
    range: ChartRange,
    now: DateTime<Tz>,
    metric: Metric,
) -> Vec<TimelinePoint>
where
    Tz::Offset: std::fmt::Display,
{
    let entity_has_history = samples.iter().any(|s| s.coin == coin);
    reconstruct(
        samples,
        coin,
        range.lookback(),
        now,
        entity_has_history,
        metric.alignment(),
    )
}

/// Blocking file loads + reconstruction for one coin.
pub fn load_chart_data(data_dir: &Path, coin: &str, range: ChartRange) -> ChartData {
    build_chart_data(
        load_rate_history(data_dir.join(FUNDING_FILE)),
        load_market_history(data_dir.join(MARKET_FILE)),
        coin,
        range,
        Local::now(),
    )
}

/// Kick off a chart load stamped with `generation`. The result is dropped
/// on arrival if the session has moved on.
pub fn spawn_chart_load(state: Arc<Mutex<AppState>>, coin: String, generation: u64) {
    tokio::spawn(async move {
        let (data_dir, range) = {
            let app = state.lock().await;
            (app.data_dir.clone(), app.session.chart_range)
        };

        let coin_for_load = coin.clone();
        let loaded =
            tokio::task::spawn_blocking(move || load_chart_data(&data_dir, &coin_for_load, range))
                .await;

        let mut app = state.lock().await;
        if !app.session.is_current(generation) {
            debug!("discarding superseded chart load for {} (gen {})", coin, generation);
            return;
        }
        let Some(view) = app.charts.as_mut() else {
            return;
        };
        if view.coin != coin {
            return;
        }
        match loaded {
            Ok(data) => view.stage = ChartStage::Ready(data),
            Err(join_err) => {
                warn!("chart load task failed for {}: {}", coin, join_err);
                view.stage = ChartStage::Ready(ChartData {
                    funding: Err(join_err.to_string()),
                    volume: Err(join_err.to_string()),
                    price: Err(join_err.to_string()),
                });
            }
        }
    });
}

/// Reload the summary feed once; on failure the previous table stays up.
pub async fn refresh_feed(state: &Arc<Mutex<AppState>>) {
    let path = {
        let app = state.lock().await;
        app.data_dir.join(SUMMARY_FILE)
    };
    let loaded = tokio::task::spawn_blocking(move || SummaryFeed::load(&path)).await;

    let mut app = state.lock().await;
    match loaded {
        Ok(Ok(feed)) => app.apply_feed(feed),
        Ok(Err(err)) => {
            warn!("summary feed refresh failed: {}", err);
            app.feed_error = Some(err.to_string());
        }
        Err(join_err) => {
            warn!("summary feed task failed: {}", join_err);
            app.feed_error = Some(join_err.to_string());
        }
    }
}

/// Periodic feed refresh; the first tick fires immediately.
pub fn spawn_feed_refresh(state: Arc<Mutex<AppState>>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            refresh_feed(&state).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fundscope_data::PointValue;
    use fundscope_data::feed::{CurrentRow, SummaryFeed};

    const HOUR_MS: i64 = 3_600_000;
    /// 2025-05-12 08:00:00 UTC
    const T0: i64 = 1_747_036_800_000;

    fn feed_with(rows: Vec<CurrentRow>) -> SummaryFeed {
        SummaryFeed {
            positive_current: rows,
            ..SummaryFeed::default()
        }
    }

    fn current(coin: &str, rate: f64) -> CurrentRow {
        CurrentRow {
            coin: coin.to_string(),
            rate: Some(rate),
            is_new: Some(false),
        }
    }

    #[test]
    fn test_filtered_rows_sorted_by_rate() {
        let mut app = AppState::new(PathBuf::from("."));
        app.apply_feed(feed_with(vec![
            current("AAA", 1.0),
            current("BBB", 9.0),
            current("CCC", 4.0),
        ]));

        let rows = app.filtered_rows();
        let coins: Vec<&str> = rows.iter().map(|r| r.coin.as_str()).collect();
        assert_eq!(coins, vec!["BBB", "CCC", "AAA"]);
    }

    #[test]
    fn test_search_filters_rows() {
        let mut app = AppState::new(PathBuf::from("."));
        app.apply_feed(feed_with(vec![
            current("BTC", 1.0),
            current("ETH", 9.0),
            current("BTT", 4.0),
        ]));
        app.search = "bt".to_string();

        let coins: Vec<String> = app
            .filtered_rows()
            .iter()
            .map(|r| r.coin.clone())
            .collect();
        assert_eq!(coins, vec!["BTT", "BTC"]);
    }

    #[test]
    fn test_refresh_adv_touches_only_adv() {
        let mut feed = feed_with(vec![current("BTC", 1.0)]);
        feed.adv_data
            .entry("30d".to_string())
            .or_default()
            .insert("BTC".to_string(), Some(30.0));
        feed.adv_data
            .entry("7d".to_string())
            .or_default()
            .insert("BTC".to_string(), Some(7.0));

        let mut app = AppState::new(PathBuf::from("."));
        app.apply_feed(feed);
        assert_eq!(app.summaries[0].adv, Some(30.0));
        let before = app.summaries[0].clone();

        app.session.adv_window = fundscope_data::AdvWindow::new(7);
        app.refresh_adv();
        assert_eq!(app.summaries[0].adv, Some(7.0));
        assert_eq!(app.summaries[0].latest_rate, before.latest_rate);
        assert_eq!(app.summaries[0].is_new, before.is_new);
    }

    #[test]
    fn test_open_charts_bumps_generation() {
        let mut app = AppState::new(PathBuf::from("."));
        app.apply_feed(feed_with(vec![current("BTC", 1.0)]));

        let before = app.session.generation();
        let (coin, stamped) = app.open_charts().unwrap();
        assert_eq!(coin, "BTC");
        assert!(stamped > before);
        assert!(app.session.is_current(stamped));
        assert_eq!(app.view, View::Charts);

        // A range change supersedes the stamp.
        app.session.bump_generation();
        assert!(!app.session.is_current(stamped));
    }

    #[test]
    fn test_move_selection_clamps() {
        let mut app = AppState::new(PathBuf::from("."));
        app.apply_feed(feed_with(vec![current("BTC", 1.0), current("ETH", 2.0)]));

        app.move_selection(5);
        assert_eq!(app.selected, 1);
        app.move_selection(-5);
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn test_build_chart_data_isolates_market_failure() {
        let rates = Ok(vec![RateHistoryRow {
            coin: "BTC".to_string(),
            funding_rate: 0.0000125,
            time: T0,
        }]);
        let market = Err(DataError::format("market history", "missing column `volume_usd`"));

        let now = DateTime::from_timestamp_millis(T0 + HOUR_MS).unwrap();
        let data = build_chart_data(rates, market, "BTC", ChartRange::OneDay, now);

        let funding = data.funding.unwrap();
        assert!(funding.iter().any(|p| p.value.is_present()));
        assert!(data.volume.is_err());
        assert!(data.price.is_err());
    }

    #[test]
    fn test_build_chart_data_aligns_market_streams() {
        let rates: Result<Vec<RateHistoryRow>, DataError> = Ok(Vec::new());
        let market = Ok(vec![MarketHistoryRow {
            coin: "BTC".to_string(),
            open_price: 1.0,
            high_price: 1.0,
            low_price: 1.0,
            close_price: 100.0,
            volume_usd: 5_000.0,
            trade_count: 10,
            // Hour-start stamp for the hour ending at T0.
            time: T0 - HOUR_MS,
        }]);

        let now = DateTime::<Utc>::from_timestamp_millis(T0).unwrap();
        let data = build_chart_data(rates, market, "BTC", ChartRange::OneDay, now);

        // Funding file empty: reconstructed but all out-of-range.
        let funding = data.funding.unwrap();
        assert!(funding.iter().all(|p| p.value == PointValue::OutOfRange));

        // The volume sample lands on the final (aligned) bucket.
        let volume = data.volume.unwrap();
        assert_eq!(volume.last().unwrap().value, PointValue::Present(5_000.0));
        let price = data.price.unwrap();
        assert_eq!(price.last().unwrap().value, PointValue::Present(100.0));
    }
}
