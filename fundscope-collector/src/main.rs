use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, DurationRound, Utc};
use fundscope_data::{
    DataError, MarketHistoryRow, RateHistoryRow, build_summary_feed, load_market_history,
    load_rate_history,
};
use itertools::Itertools;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tracing::{debug, error, info, warn};

const FUNDING_FILE: &str = "funding_history.csv";
const MARKET_FILE: &str = "market_history.csv";
const SUMMARY_FILE: &str = "funding_summary.json";

/// Days of funding history kept on disk.
const FUNDING_RETENTION_DAYS: i64 = 90;
/// Days of market (candle) history kept on disk; covers the widest ADV window.
const MARKET_RETENTION_DAYS: i64 = 31;

/// Hours re-checked for gaps on every cycle, against the reference coin.
const GAP_CHECK_HOURS: i64 = 24;

/// BTC is the oldest listing and always reports, so its on-file hours tell
/// us which hours are genuinely missing for everyone.
const REFERENCE_COIN: &str = "BTC";

const MAX_RETRIES: u32 = 5;
const INITIAL_RETRY_DELAY: StdDuration = StdDuration::from_secs(2);

/// Pause between per-coin requests to stay inside the API rate limit.
const REQUEST_SPACING: StdDuration = StdDuration::from_millis(250);

#[derive(Debug, thiserror::Error)]
enum CollectError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("rate limited after {0} retries")]
    RateLimited(u32),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Deserialize a numeric string field (the API quotes its decimals).
fn de_str_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse::<f64>().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    universe: Vec<UniverseEntry>,
}

#[derive(Debug, Deserialize)]
struct UniverseEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FundingHistoryEntry {
    coin: String,
    #[serde(rename = "fundingRate", deserialize_with = "de_str_f64")]
    funding_rate: f64,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct Candle {
    #[serde(rename = "t")]
    time: i64,
    #[serde(rename = "o", deserialize_with = "de_str_f64")]
    open: f64,
    #[serde(rename = "h", deserialize_with = "de_str_f64")]
    high: f64,
    #[serde(rename = "l", deserialize_with = "de_str_f64")]
    low: f64,
    #[serde(rename = "c", deserialize_with = "de_str_f64")]
    close: f64,
    #[serde(rename = "v", deserialize_with = "de_str_f64")]
    volume: f64,
    #[serde(rename = "n")]
    trade_count: u64,
}

impl Candle {
    fn into_row(self, coin: &str) -> MarketHistoryRow {
        MarketHistoryRow {
            coin: coin.to_string(),
            open_price: self.open,
            high_price: self.high,
            low_price: self.low,
            close_price: self.close,
            // The API reports base-denominated volume.
            volume_usd: self.volume * self.close,
            trade_count: self.trade_count,
            time: self.time,
        }
    }
}

struct ApiClient {
    client: Client,
    info_url: String,
}

impl ApiClient {
    fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            info_url: format!("{}/info", base_url.trim_end_matches('/')),
        }
    }

    /// POST an info request, retrying with exponential backoff on HTTP 429.
    async fn post_info<T: serde::de::DeserializeOwned>(
        &self,
        body: serde_json::Value,
    ) -> Result<T, CollectError> {
        let mut delay = INITIAL_RETRY_DELAY;
        for attempt in 0..MAX_RETRIES {
            let response = self.client.post(&self.info_url).json(&body).send().await?;
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                warn!(
                    "rate limited (attempt {}/{}), retrying in {:?}",
                    attempt + 1,
                    MAX_RETRIES,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                continue;
            }
            let response = response.error_for_status()?;
            return Ok(response.json::<T>().await?);
        }
        Err(CollectError::RateLimited(MAX_RETRIES))
    }

    async fn universe(&self) -> Result<Vec<String>, CollectError> {
        let meta: MetaResponse = self.post_info(serde_json::json!({"type": "meta"})).await?;
        Ok(meta.universe.into_iter().map(|entry| entry.name).collect())
    }

    /// Funding entries for `coin` with timestamps in `[start_ms, end_ms)`.
    async fn funding_history(
        &self,
        coin: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<RateHistoryRow>, CollectError> {
        let entries: Vec<FundingHistoryEntry> = self
            .post_info(serde_json::json!({
                "type": "fundingHistory",
                "coin": coin,
                "startTime": start_ms,
            }))
            .await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.time >= start_ms && entry.time < end_ms)
            .map(|entry| RateHistoryRow {
                coin: entry.coin,
                funding_rate: entry.funding_rate,
                time: entry.time,
            })
            .collect())
    }

    /// Hourly candles for `coin` covering `[start_ms, end_ms)`.
    async fn hourly_candles(
        &self,
        coin: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<MarketHistoryRow>, CollectError> {
        let candles: Vec<Candle> = self
            .post_info(serde_json::json!({
                "type": "candleSnapshot",
                "req": {
                    "coin": coin,
                    "interval": "1h",
                    "startTime": start_ms,
                    "endTime": end_ms,
                }
            }))
            .await?;
        Ok(candles
            .into_iter()
            .filter(|candle| candle.time >= start_ms && candle.time < end_ms)
            .map(|candle| candle.into_row(coin))
            .collect())
    }
}

/// The last `GAP_CHECK_HOURS` completed hours ending at `latest_hour`.
fn expected_hours(latest_hour: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    (0..GAP_CHECK_HOURS)
        .rev()
        .map(|back| latest_hour - Duration::hours(back))
        .collect()
}

fn floor_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::hours(1)).unwrap_or(t)
}

/// Hours of the reference coin present on file, floored.
fn reference_hours(times_ms: impl IntoIterator<Item = i64>) -> HashSet<i64> {
    times_ms
        .into_iter()
        .filter_map(|ms| DateTime::from_timestamp_millis(ms))
        .map(|t| floor_hour(t).timestamp_millis())
        .collect()
}

/// Fetch window covering every missing hour, or just the newest hours when
/// nothing is missing. Returns `(start_ms, end_ms)`.
fn fetch_window(
    expected: &[DateTime<Utc>],
    on_file: &HashSet<i64>,
    latest_hour: DateTime<Utc>,
) -> (i64, i64) {
    let missing: Vec<&DateTime<Utc>> = expected
        .iter()
        .filter(|hour| !on_file.contains(&hour.timestamp_millis()))
        .collect();

    let end_ms = (latest_hour + Duration::hours(1)).timestamp_millis();
    match missing.first() {
        Some(first) => {
            debug!("{} missing hour(s), refetching from {}", missing.len(), first);
            (first.timestamp_millis(), end_ms)
        }
        // Nothing missing: still refresh the newest two hours so the
        // latest entry lands as soon as the exchange publishes it.
        None => ((latest_hour - Duration::hours(1)).timestamp_millis(), end_ms),
    }
}

/// Merge new rows into existing, first occurrence of (coin, time) winning,
/// dropping rows older than the retention cutoff.
fn merge_rows<R>(
    existing: Vec<R>,
    fetched: Vec<R>,
    key: impl Fn(&R) -> (String, i64),
    cutoff_ms: i64,
) -> Vec<R> {
    let mut seen = HashSet::new();
    existing
        .into_iter()
        .chain(fetched)
        .filter(|row| {
            let (coin, time) = key(row);
            time >= cutoff_ms && seen.insert((coin, time))
        })
        .sorted_by_key(|row| key(row).1)
        .collect()
}

fn write_csv<R: serde::Serialize>(path: &Path, rows: &[R]) -> Result<(), CollectError> {
    let mut writer = csv::Writer::from_path(path).map_err(DataError::from)?;
    for row in rows {
        writer.serialize(row).map_err(DataError::from)?;
    }
    writer.flush().map_err(DataError::from)?;
    Ok(())
}

struct Collector {
    api: ApiClient,
    data_dir: PathBuf,
}

impl Collector {
    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<(), CollectError> {
        let universe = self.api.universe().await?;
        info!("universe has {} coins", universe.len());

        let rates = self.collect_funding(&universe, now).await?;
        let market = self.collect_market(&universe, now).await?;

        let feed = build_summary_feed(&rates, &market, now);
        let path = self.data_dir.join(SUMMARY_FILE);
        std::fs::write(&path, feed.to_json_string()?).map_err(DataError::from)?;
        info!("summary feed written to {}", path.display());
        Ok(())
    }

    async fn collect_funding(
        &self,
        universe: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<RateHistoryRow>, CollectError> {
        let path = self.data_dir.join(FUNDING_FILE);
        let existing = match load_rate_history(&path) {
            Ok(rows) => rows,
            Err(DataError::FeedUnavailable(_)) => {
                info!("no funding history on file yet, starting fresh");
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };

        // Funding rows stamp the end of the hour, so the current floored
        // hour is already expected on file.
        let latest_hour = floor_hour(now);
        let on_file = reference_hours(
            existing
                .iter()
                .filter(|row| row.coin == REFERENCE_COIN)
                .map(|row| row.time),
        );
        let (start_ms, end_ms) = fetch_window(&expected_hours(latest_hour), &on_file, latest_hour);

        let mut fetched = Vec::new();
        for coin in universe {
            match self.api.funding_history(coin, start_ms, end_ms).await {
                Ok(rows) => {
                    debug!("collected {} funding entries for {}", rows.len(), coin);
                    fetched.extend(rows);
                }
                // One coin failing never aborts the cycle.
                Err(err) => warn!("funding fetch failed for {}: {}", coin, err),
            }
            tokio::time::sleep(REQUEST_SPACING).await;
        }
        info!("fetched {} funding entries", fetched.len());

        let cutoff_ms = (now - Duration::days(FUNDING_RETENTION_DAYS)).timestamp_millis();
        let merged = merge_rows(
            existing,
            fetched,
            |row: &RateHistoryRow| (row.coin.clone(), row.time),
            cutoff_ms,
        );
        write_csv(&path, &merged)?;
        info!("funding history now {} rows", merged.len());
        Ok(merged)
    }

    async fn collect_market(
        &self,
        universe: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<MarketHistoryRow>, CollectError> {
        let path = self.data_dir.join(MARKET_FILE);
        let existing = match load_market_history(&path) {
            Ok(rows) => rows,
            Err(DataError::FeedUnavailable(_)) => {
                info!("no market history on file yet, starting fresh");
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };

        // Candles stamp the start of the hour; the newest complete candle
        // is the previous hour's.
        let latest_hour = floor_hour(now) - Duration::hours(1);
        let on_file = reference_hours(
            existing
                .iter()
                .filter(|row| row.coin == REFERENCE_COIN)
                .map(|row| row.time),
        );
        let (start_ms, end_ms) = fetch_window(&expected_hours(latest_hour), &on_file, latest_hour);

        let mut fetched = Vec::new();
        for coin in universe {
            match self.api.hourly_candles(coin, start_ms, end_ms).await {
                Ok(rows) => {
                    debug!("collected {} candles for {}", rows.len(), coin);
                    fetched.extend(rows);
                }
                Err(err) => warn!("candle fetch failed for {}: {}", coin, err),
            }
            tokio::time::sleep(REQUEST_SPACING).await;
        }
        info!("fetched {} candles", fetched.len());

        let cutoff_ms = (now - Duration::days(MARKET_RETENTION_DAYS)).timestamp_millis();
        let merged = merge_rows(
            existing,
            fetched,
            |row: &MarketHistoryRow| (row.coin.clone(), row.time),
            cutoff_ms,
        );
        write_csv(&path, &merged)?;
        info!("market history now {} rows", merged.len());
        Ok(merged)
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let base_url = std::env::var("FUNDSCOPE_API_URL")
        .unwrap_or_else(|_| "https://api.hyperliquid.xyz".to_string());
    let data_dir = PathBuf::from(
        std::env::var("FUNDSCOPE_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
    );
    let run_once = std::env::args().any(|arg| arg == "--once" || arg == "once");

    if let Err(err) = std::fs::create_dir_all(&data_dir) {
        error!("cannot create data dir {}: {}", data_dir.display(), err);
        return;
    }

    info!(
        "starting fundscope collector (api: {}, data dir: {})",
        base_url,
        data_dir.display()
    );

    let collector = Collector {
        api: ApiClient::new(&base_url),
        data_dir,
    };

    loop {
        let cycle_start = Utc::now();
        match collector.run_cycle(cycle_start).await {
            Ok(()) => info!("cycle complete in {}s", (Utc::now() - cycle_start).num_seconds()),
            Err(err) => error!("cycle failed: {}", err),
        }

        if run_once {
            break;
        }

        // Sleep until a couple of minutes past the next hour boundary, so
        // the exchange has published the new funding entry by the time we
        // ask for it.
        let next_hour = floor_hour(Utc::now()) + Duration::hours(1) + Duration::minutes(2);
        let wait = (next_hour - Utc::now())
            .to_std()
            .unwrap_or(StdDuration::from_secs(60));
        info!("next cycle at {}", next_hour.format("%H:%M:%S UTC"));
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }
}

/// Initialize logging
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
