//! Dense hourly timeline reconstruction from sparse samples.
//!
//! Chart panels need one point per wall-clock hour across the whole
//! requested range, with every hour classified so the operator can tell
//! "data should exist but doesn't" (a gap worth noticing) from "this is
//! simply before the coin existed".

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike};

use crate::history::RawSample;

/// Classification of one hourly bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointValue {
    Present(f64),
    Missing,
    OutOfRange,
}

impl PointValue {
    pub fn is_present(&self) -> bool {
        matches!(self, PointValue::Present(_))
    }

    pub fn present(&self) -> Option<f64> {
        match self {
            PointValue::Present(v) => Some(*v),
            _ => None,
        }
    }
}

/// One hourly bucket of a reconstructed series.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePoint {
    /// Bucket instant, milliseconds since epoch.
    pub hour_ms: i64,
    /// Display label; names the hour one back from the bucket, i.e. the
    /// start of the collection period the bucket's value covers.
    pub label: String,
    pub value: PointValue,
}

/// Selectable charting range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartRange {
    OneDay,
    OneWeek,
    TwoWeeks,
    OneMonth,
    TwoMonths,
    ThreeMonths,
}

impl ChartRange {
    pub const ALL: [ChartRange; 6] = [
        ChartRange::OneDay,
        ChartRange::OneWeek,
        ChartRange::TwoWeeks,
        ChartRange::OneMonth,
        ChartRange::TwoMonths,
        ChartRange::ThreeMonths,
    ];

    pub fn lookback(&self) -> Duration {
        match self {
            ChartRange::OneDay => Duration::days(1),
            ChartRange::OneWeek => Duration::days(7),
            ChartRange::TwoWeeks => Duration::days(14),
            ChartRange::OneMonth => Duration::days(30),
            ChartRange::TwoMonths => Duration::days(60),
            ChartRange::ThreeMonths => Duration::days(90),
        }
    }

    /// Hours between axis labels at this range.
    pub fn label_stride(&self) -> usize {
        match self {
            ChartRange::OneDay => 1,
            ChartRange::OneWeek => 6,
            ChartRange::TwoWeeks => 12,
            ChartRange::OneMonth => 24,
            ChartRange::TwoMonths => 48,
            ChartRange::ThreeMonths => 72,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartRange::OneDay => "1d",
            ChartRange::OneWeek => "1w",
            ChartRange::TwoWeeks => "2w",
            ChartRange::OneMonth => "1m",
            ChartRange::TwoMonths => "2m",
            ChartRange::ThreeMonths => "3m",
        }
    }
}

/// Hours of gap immediately before the newest sample that are always
/// flagged as missing rather than out-of-range.
const RECENT_GAP_HOURS: i64 = 24;

/// Reconstruct a dense hour-by-hour series for one coin and one metric.
///
/// `align` shifts every sample timestamp before bucketing (see
/// [`crate::history::Metric::alignment`]). `entity_has_history` tells the
/// classifier whether any sample survived filtering; when false, every
/// non-present hour is out-of-range rather than missing.
///
/// Buckets are matched on wall-clock calendar components (hour, day,
/// month, year) in the zone of `now`, not by integer-dividing epoch
/// millis. Across a DST transition a wall-clock hour can repeat or vanish,
/// and the bucket match follows the wall clock.
///
/// Pure function: identical inputs always yield the identical sequence.
pub fn reconstruct<Tz: TimeZone>(
    samples: &[RawSample],
    coin: &str,
    lookback: Duration,
    now: DateTime<Tz>,
    entity_has_history: bool,
    align: Duration,
) -> Vec<TimelinePoint>
where
    Tz::Offset: std::fmt::Display,
{
    let range_start = floor_to_hour(&(now.clone() - lookback));
    let range_end = floor_to_hour(&now);

    // Align, filter and stably sort the samples for this coin.
    let mut aligned: Vec<(DateTime<Tz>, f64)> = samples
        .iter()
        .filter(|s| s.coin == coin && s.value.is_finite())
        .filter_map(|s| {
            let shifted = DateTime::from_timestamp_millis(s.time_ms)? + align;
            let local = shifted.with_timezone(&now.timezone());
            (local >= range_start && local <= now).then_some((local, s.value))
        })
        .collect();
    aligned.sort_by_key(|(t, _)| t.timestamp_millis());

    // First sample per wall-clock hour wins.
    let mut by_hour: HashMap<(i32, u32, u32, u32), f64> = HashMap::new();
    for (t, value) in &aligned {
        by_hour
            .entry((t.year(), t.month(), t.day(), t.hour()))
            .or_insert(*value);
    }

    let bounds = match (aligned.first(), aligned.last()) {
        (Some((first, _)), Some((last, _))) => {
            Some((floor_to_hour(first), floor_to_hour(last)))
        }
        _ => None,
    };

    let mut points = Vec::new();
    let mut hour = range_start;
    while hour <= range_end {
        let key = (hour.year(), hour.month(), hour.day(), hour.hour());
        let value = match by_hour.get(&key) {
            Some(&v) => PointValue::Present(v),
            None => classify_gap(&hour, &range_end, entity_has_history, bounds.as_ref()),
        };

        points.push(TimelinePoint {
            hour_ms: hour.timestamp_millis(),
            label: (hour.clone() - Duration::hours(1))
                .format("%I %p %d/%m")
                .to_string(),
            value,
        });
        hour = hour + Duration::hours(1);
    }

    points
}

/// Classify an hour with no matching sample.
///
/// Missing over-approximates "data should exist" on purpose: gaps after
/// the newest sample, gaps in the 24 hours before it, and gaps anywhere
/// inside the sampled span are all flagged rather than hidden.
fn classify_gap<Tz: TimeZone>(
    hour: &DateTime<Tz>,
    range_end: &DateTime<Tz>,
    entity_has_history: bool,
    bounds: Option<&(DateTime<Tz>, DateTime<Tz>)>,
) -> PointValue {
    let Some((earliest, latest)) = bounds else {
        return PointValue::OutOfRange;
    };
    if !entity_has_history {
        return PointValue::OutOfRange;
    }

    let after_latest = hour > latest && hour <= range_end;
    let recent_gap =
        *hour >= latest.clone() - Duration::hours(RECENT_GAP_HOURS) && hour <= latest;
    let inside_span = hour >= earliest && hour <= latest;

    if after_latest || recent_gap || inside_span {
        PointValue::Missing
    } else {
        PointValue::OutOfRange
    }
}

fn floor_to_hour<Tz: TimeZone>(t: &DateTime<Tz>) -> DateTime<Tz> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or_else(|| t.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const HOUR_MS: i64 = 3_600_000;

    fn sample(coin: &str, time_ms: i64, value: f64) -> RawSample {
        RawSample {
            coin: coin.to_string(),
            time_ms,
            value,
        }
    }

    /// 2025-05-12 08:00:00 UTC, an exact hour boundary.
    const T0: i64 = 1_747_036_800_000;

    fn utc(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn test_point_count_and_monotonic_hours() {
        let now = utc(T0 + 30 * 60 * 1000); // half past, exercises flooring
        let points = reconstruct(
            &[],
            "BTC",
            Duration::days(1),
            now,
            false,
            Duration::zero(),
        );
        assert_eq!(points.len(), 25);
        for pair in points.windows(2) {
            assert_eq!(pair[1].hour_ms - pair[0].hour_ms, HOUR_MS);
        }
        assert_eq!(points[0].hour_ms, T0 - 24 * HOUR_MS);
        assert_eq!(points.last().unwrap().hour_ms, T0);
    }

    #[test]
    fn test_gap_classification_scenario() {
        // Samples at t0 and t0+3h, a 4-hour span ending at t0+4h:
        // present, missing, missing, present, missing.
        let samples = vec![sample("BTC", T0, 1.0), sample("BTC", T0 + 3 * HOUR_MS, 2.0)];
        let points = reconstruct(
            &samples,
            "BTC",
            Duration::hours(4),
            utc(T0 + 4 * HOUR_MS),
            true,
            Duration::zero(),
        );

        assert_eq!(points.len(), 5);
        assert_eq!(points[0].value, PointValue::Present(1.0));
        assert_eq!(points[1].value, PointValue::Missing);
        assert_eq!(points[2].value, PointValue::Missing);
        assert_eq!(points[3].value, PointValue::Present(2.0));
        // After the last sample but not after now: a gap, not pre-history.
        assert_eq!(points[4].value, PointValue::Missing);
    }

    #[test]
    fn test_idempotent() {
        let samples = vec![
            sample("BTC", T0 - 5 * HOUR_MS, 1.5),
            sample("BTC", T0, 2.5),
        ];
        let now = utc(T0 + 2 * HOUR_MS);
        let a = reconstruct(
            &samples,
            "BTC",
            Duration::days(1),
            now,
            true,
            Duration::zero(),
        );
        let b = reconstruct(
            &samples,
            "BTC",
            Duration::days(1),
            now,
            true,
            Duration::zero(),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_no_history_is_all_out_of_range() {
        let points = reconstruct(
            &[],
            "GHOST",
            Duration::days(1),
            utc(T0),
            false,
            Duration::zero(),
        );
        assert!(points.iter().all(|p| p.value == PointValue::OutOfRange));
    }

    #[test]
    fn test_other_coins_are_filtered_out() {
        let samples = vec![sample("ETH", T0, 9.0)];
        let points = reconstruct(
            &samples,
            "BTC",
            Duration::days(1),
            utc(T0),
            false,
            Duration::zero(),
        );
        assert!(points.iter().all(|p| p.value == PointValue::OutOfRange));
    }

    #[test]
    fn test_last_sample_hour_present_then_missing_after() {
        let samples = vec![sample("BTC", T0, 3.0)];
        let points = reconstruct(
            &samples,
            "BTC",
            Duration::hours(2),
            utc(T0 + HOUR_MS),
            true,
            Duration::zero(),
        );
        // t0-1h, t0, t0+1h
        assert_eq!(points.len(), 3);
        assert_eq!(points[1].value, PointValue::Present(3.0));
        assert_eq!(points[2].value, PointValue::Missing);
    }

    #[test]
    fn test_pre_history_is_out_of_range_beyond_recent_window() {
        // One sample far into a 1-week range: hours more than 24h before
        // it and before any sample are out-of-range, the 24h immediately
        // preceding it are missing.
        let samples = vec![sample("BTC", T0, 3.0)];
        let points = reconstruct(
            &samples,
            "BTC",
            Duration::days(7),
            utc(T0),
            true,
            Duration::zero(),
        );
        assert_eq!(points.len(), 7 * 24 + 1);

        let present_idx = points
            .iter()
            .position(|p| p.value.is_present())
            .unwrap();
        assert_eq!(present_idx, 7 * 24);
        // 24 hours immediately before the sample: missing.
        for p in &points[present_idx - 24..present_idx] {
            assert_eq!(p.value, PointValue::Missing);
        }
        // Earlier than that: before the coin existed.
        for p in &points[..present_idx - 24] {
            assert_eq!(p.value, PointValue::OutOfRange);
        }
    }

    #[test]
    fn test_interior_gap_inside_span_is_missing() {
        // Samples 40h apart: the interior gap is missing even where it is
        // more than 24h before the newest sample.
        let samples = vec![
            sample("BTC", T0 - 40 * HOUR_MS, 1.0),
            sample("BTC", T0, 2.0),
        ];
        let points = reconstruct(
            &samples,
            "BTC",
            Duration::days(3),
            utc(T0),
            true,
            Duration::zero(),
        );
        let first_present = points.iter().position(|p| p.value.is_present()).unwrap();
        let last = points.len() - 1;
        assert_eq!(points[last].value, PointValue::Present(2.0));
        for p in &points[first_present + 1..last] {
            assert_eq!(p.value, PointValue::Missing);
        }
        // Before the earliest sample and outside its 24h shadow of the
        // newest: out-of-range.
        assert_eq!(points[0].value, PointValue::OutOfRange);
    }

    #[test]
    fn test_alignment_shifts_start_stamped_streams() {
        // A volume-style sample stamped at hour START aligns to the same
        // bucket as a funding sample stamped at the matching hour END.
        let volume = vec![sample("BTC", T0 - HOUR_MS, 500.0)];
        let funding = vec![sample("BTC", T0, 1.0)];
        let now = utc(T0);

        let v = reconstruct(
            &volume,
            "BTC",
            Duration::hours(2),
            now,
            true,
            Duration::hours(1),
        );
        let f = reconstruct(
            &funding,
            "BTC",
            Duration::hours(2),
            now,
            true,
            Duration::zero(),
        );
        let v_idx = v.iter().position(|p| p.value.is_present()).unwrap();
        let f_idx = f.iter().position(|p| p.value.is_present()).unwrap();
        assert_eq!(v_idx, f_idx);
        assert_eq!(v[v_idx].label, f[f_idx].label);
    }

    #[test]
    fn test_first_sample_in_hour_wins() {
        let samples = vec![
            sample("BTC", T0 + 60_000, 1.0),
            sample("BTC", T0 + 120_000, 2.0),
        ];
        let points = reconstruct(
            &samples,
            "BTC",
            Duration::hours(1),
            utc(T0 + HOUR_MS),
            true,
            Duration::zero(),
        );
        assert_eq!(points[0].value, PointValue::Present(1.0));
    }

    #[test]
    fn test_non_finite_values_are_discarded() {
        let samples = vec![sample("BTC", T0, f64::NAN)];
        let points = reconstruct(
            &samples,
            "BTC",
            Duration::hours(1),
            utc(T0),
            true,
            Duration::zero(),
        );
        assert!(points.iter().all(|p| !p.value.is_present()));
    }

    #[test]
    fn test_labels_name_previous_hour() {
        let points = reconstruct(
            &[],
            "BTC",
            Duration::hours(1),
            utc(T0),
            false,
            Duration::zero(),
        );
        // T0 is 2025-05-12 08:00 UTC; its bucket is labeled 07 AM.
        assert_eq!(points.last().unwrap().label, "07 AM 12/05");
    }

    #[test]
    fn test_range_lookbacks() {
        assert_eq!(ChartRange::OneDay.lookback(), Duration::days(1));
        assert_eq!(ChartRange::ThreeMonths.lookback(), Duration::days(90));
        assert_eq!(ChartRange::OneWeek.label_stride(), 6);
        assert_eq!(ChartRange::TwoMonths.as_str(), "2m");
    }
}
