//! Fixed Northern-hemisphere season convention.
//!
//! Dec–Feb winter, Mar–May spring, Jun–Aug summer, Sep–Nov autumn. Not
//! configurable; both temperature records and the seasonal dosing buckets
//! classify through [`season_of`].

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Nominal length of each season bucket in days.
pub const DAYS_PER_SEASON: u32 = 91;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    pub const ALL: [Season; 4] = [Season::Spring, Season::Summer, Season::Autumn, Season::Winter];

    pub fn name(self) -> &'static str {
        match self {
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Autumn => "Autumn",
            Season::Winter => "Winter",
        }
    }

    /// Lowercase form used in telemetry topics.
    pub fn key(self) -> &'static str {
        match self {
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Autumn => "autumn",
            Season::Winter => "winter",
        }
    }

    /// Position in [`Season::ALL`].
    pub fn index(self) -> usize {
        match self {
            Season::Spring => 0,
            Season::Summer => 1,
            Season::Autumn => 2,
            Season::Winter => 3,
        }
    }
}

impl std::fmt::Display for Season {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Season for a calendar month (1 = January).
///
/// Months outside 1..=12 fall through to autumn, matching the catch-all arm
/// of the classification; chrono never produces them.
pub fn season_of(month: u32) -> Season {
    match month {
        12 | 1 | 2 => Season::Winter,
        3..=5 => Season::Spring,
        6..=8 => Season::Summer,
        _ => Season::Autumn,
    }
}

pub fn season_at(ts: DateTime<Utc>) -> Season {
    season_of(ts.month())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_month_maps_to_its_quarter() {
        let expected = [
            Season::Winter,
            Season::Winter,
            Season::Spring,
            Season::Spring,
            Season::Spring,
            Season::Summer,
            Season::Summer,
            Season::Summer,
            Season::Autumn,
            Season::Autumn,
            Season::Autumn,
            Season::Winter,
        ];
        for (i, season) in expected.iter().enumerate() {
            assert_eq!(season_of(i as u32 + 1), *season, "month {}", i + 1);
        }
    }

    #[test]
    fn index_matches_all_order() {
        for (i, s) in Season::ALL.iter().enumerate() {
            assert_eq!(s.index(), i);
        }
    }
}
