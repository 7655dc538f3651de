//! Seasonal evaporation aggregation over the activation history.
//!
//! Liters are always derived from activation counts at the *current*
//! calibrated rate, so a recalibration rescales past seasons too. The
//! per-activation volume stored on each record is informational only.

use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::season::{DAYS_PER_SEASON, Season, season_at, season_of};
use crate::util::{round_to, round2};

/// Trailing window the seasonal buckets are computed over.
pub const SEASONAL_WINDOW_DAYS: i64 = 365;

/// Completed days of a season the history must span before it serves as
/// a dosing baseline.
pub const MIN_BASELINE_DAYS: usize = 7;

/// One completed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub volume_dispensed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalBucket {
    pub season: Season,
    pub activation_count: u64,
    pub liters_total: f64,
    pub days_in_period: u32,
    pub avg_liters_per_day: f64,
    pub avg_liters_per_hour: f64,
}

impl SeasonalBucket {
    fn from_count(season: Season, count: u64, rate: f64) -> Self {
        let liters_total = count as f64 * rate;
        let per_day = liters_total / f64::from(DAYS_PER_SEASON);
        Self {
            season,
            activation_count: count,
            liters_total,
            days_in_period: DAYS_PER_SEASON,
            avg_liters_per_day: round2(per_day),
            avg_liters_per_hour: round_to(per_day / 24.0, 3),
        }
    }
}

/// Owns the append-only activation history.
#[derive(Debug, Clone, Default)]
pub struct SeasonalAggregator {
    activations: Vec<ActivationRecord>,
}

impl SeasonalAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_history(activations: Vec<ActivationRecord>) -> Self {
        Self { activations }
    }

    pub fn record(&mut self, rec: ActivationRecord) {
        self.activations.push(rec);
    }

    pub fn activations(&self) -> &[ActivationRecord] {
        &self.activations
    }

    pub fn total_activations(&self) -> usize {
        self.activations.len()
    }

    fn counts_since(&self, start: DateTime<Utc>) -> [u64; 4] {
        let mut counts = [0u64; 4];
        for a in self.activations.iter().filter(|a| a.timestamp >= start) {
            counts[season_at(a.timestamp).index()] += 1;
        }
        counts
    }

    /// One bucket per season (in [`Season::ALL`] order) over the trailing year.
    pub fn compute_seasonal_stats(&self, rate: f64, now: DateTime<Utc>) -> Vec<SeasonalBucket> {
        let counts = self.counts_since(now - ChronoDuration::days(SEASONAL_WINDOW_DAYS));
        Season::ALL
            .into_iter()
            .map(|s| SeasonalBucket::from_count(s, counts[s.index()], rate))
            .collect()
    }

    /// Liters pumped on a calendar day (UTC) at the current rate.
    pub fn liters_on(&self, date: NaiveDate, rate: f64) -> f64 {
        let n = self
            .activations
            .iter()
            .filter(|a| a.timestamp.date_naive() == date)
            .count();
        round2(n as f64 * rate)
    }

    /// Baseline daily consumption for `season`: activations on completed days
    /// of that season within the trailing year, divided by the number of
    /// such days the history actually covers. `0.0` (no baseline) until at
    /// least [`MIN_BASELINE_DAYS`] of them are covered.
    pub fn expected_daily_liters(&self, season: Season, rate: f64, now: DateTime<Utc>) -> f64 {
        let today = now.date_naive();
        let window_start = (now - ChronoDuration::days(SEASONAL_WINDOW_DAYS)).date_naive();
        let Some(first) = self
            .activations
            .iter()
            .map(|a| a.timestamp.date_naive())
            .filter(|d| *d >= window_start)
            .min()
        else {
            return 0.0;
        };

        let covered = first
            .iter_days()
            .take_while(|d| *d < today)
            .filter(|d| season_of(d.month()) == season)
            .count();
        if covered < MIN_BASELINE_DAYS {
            return 0.0;
        }
        let count = self
            .activations
            .iter()
            .filter(|a| {
                let d = a.timestamp.date_naive();
                d >= first && d < today && season_at(a.timestamp) == season
            })
            .count();
        round2(count as f64 * rate / covered as f64)
    }
}
