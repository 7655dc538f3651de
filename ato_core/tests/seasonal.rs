use std::time::Duration;

use ato_core::{ActivationRecord, Season, SeasonalAggregator};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use rstest::rstest;

fn activation(at: DateTime<Utc>) -> ActivationRecord {
    ActivationRecord {
        timestamp: at,
        duration: Duration::from_secs(25),
        volume_dispensed: 0.05,
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 12, 15, 0, 0, 0).unwrap()
}

#[test]
fn buckets_follow_month_classification() {
    let mut agg = SeasonalAggregator::new();
    for (m, n) in [(1u32, 3usize), (4, 2), (7, 5), (10, 1)] {
        for _ in 0..n {
            agg.record(activation(Utc.with_ymd_and_hms(2024, m, 10, 8, 0, 0).unwrap()));
        }
    }
    let buckets = agg.compute_seasonal_stats(0.1, now());
    let counts: Vec<(Season, u64)> = buckets.iter().map(|b| (b.season, b.activation_count)).collect();
    assert_eq!(
        counts,
        vec![
            (Season::Spring, 2),
            (Season::Summer, 5),
            (Season::Autumn, 1),
            (Season::Winter, 3),
        ]
    );
}

#[test]
fn summer_rates_are_rounded() {
    let mut agg = SeasonalAggregator::new();
    for i in 0..1000 {
        agg.record(activation(
            Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(i),
        ));
    }
    let summer = agg
        .compute_seasonal_stats(0.05, now())
        .into_iter()
        .find(|b| b.season == Season::Summer)
        .unwrap();
    assert_eq!(summer.liters_total, 50.0);
    assert_eq!(summer.days_in_period, 91);
    assert_eq!(summer.avg_liters_per_day, 0.55);
    assert_eq!(summer.avg_liters_per_hour, 0.023);
}

#[rstest]
#[case(364, 1)]
#[case(365, 1)]
#[case(366, 0)]
fn trailing_year_boundary(#[case] days_ago: i64, #[case] expected: u64) {
    let mut agg = SeasonalAggregator::new();
    agg.record(activation(now() - ChronoDuration::days(days_ago)));
    let total: u64 = agg
        .compute_seasonal_stats(0.05, now())
        .iter()
        .map(|b| b.activation_count)
        .sum();
    assert_eq!(total, expected);
}

#[test]
fn recalibration_rescales_history() {
    let mut agg = SeasonalAggregator::new();
    for _ in 0..10 {
        agg.record(activation(now() - ChronoDuration::days(3)));
    }
    let winter = |rate| {
        agg.compute_seasonal_stats(rate, now())
            .into_iter()
            .find(|b| b.season == Season::Winter)
            .map(|b| b.liters_total)
    };
    assert_eq!(winter(0.05), Some(0.5));
    assert_eq!(winter(0.1), Some(1.0));
}

#[test]
fn expected_daily_baseline_averages_covered_days() {
    let mut agg = SeasonalAggregator::new();
    // Two fills a day, Dec 1..=Dec 14; "now" is the start of Dec 15.
    for day in 1..=14 {
        for hour in [8, 20] {
            agg.record(activation(Utc.with_ymd_and_hms(2024, 12, day, hour, 0, 0).unwrap()));
        }
    }
    assert_eq!(agg.expected_daily_liters(Season::Winter, 0.5, now()), 1.0);
    assert_eq!(agg.expected_daily_liters(Season::Summer, 0.5, now()), 0.0);
}

#[rstest]
#[case(3, 0.0)]
#[case(6, 0.0)]
#[case(7, 1.0)]
fn baseline_waits_for_enough_history(#[case] days: i64, #[case] expected: f64) {
    let mut agg = SeasonalAggregator::new();
    for d in 1..=days {
        for hour in [6, 18] {
            agg.record(activation(now() - ChronoDuration::days(d) + ChronoDuration::hours(hour)));
        }
    }
    assert_eq!(agg.expected_daily_liters(Season::Winter, 0.5, now()), expected);
}

#[test]
fn todays_fills_are_not_part_of_the_baseline() {
    let mut agg = SeasonalAggregator::new();
    for d in 1..=10 {
        agg.record(activation(now() - ChronoDuration::days(d) + ChronoDuration::hours(12)));
    }
    let later = now() + ChronoDuration::hours(12);
    for m in 0..30 {
        agg.record(activation(now() + ChronoDuration::minutes(m)));
    }
    assert_eq!(agg.expected_daily_liters(Season::Winter, 1.0, later), 1.0);
}

proptest! {
    #[test]
    fn liters_are_conserved(
        offsets in proptest::collection::vec(0i64..(2 * 365 * 24), 0..300),
        rate in 0.001f64..1.0,
    ) {
        let mut agg = SeasonalAggregator::new();
        for h in &offsets {
            agg.record(activation(now() - ChronoDuration::hours(*h)));
        }
        let in_window = offsets
            .iter()
            .filter(|h| now() - ChronoDuration::hours(**h) >= now() - ChronoDuration::days(365))
            .count();
        let buckets = agg.compute_seasonal_stats(rate, now());
        let total: f64 = buckets.iter().map(|b| b.liters_total).sum();
        prop_assert!((total - in_window as f64 * rate).abs() < 1e-9);
        let count: u64 = buckets.iter().map(|b| b.activation_count).sum();
        prop_assert_eq!(count as usize, in_window);
    }
}
