//! Common time and rounding helpers for ato_core.

/// Round to `places` decimal places, half away from zero.
/// Non-finite values pass through unchanged.
#[inline]
pub fn round_to(x: f64, places: i32) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let factor = 10f64.powi(places);
    (x * factor).round() / factor
}

/// Two-decimal rounding used for every temperature and volume we report.
#[inline]
pub fn round2(x: f64) -> f64 {
    round_to(x, 2)
}

/// Whole milliseconds in `d`, saturating.
#[inline]
pub fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Whole ticks needed to cover `interval_ms` at `poll_ms`, at least 1.
#[inline]
pub fn ticks_for(interval_ms: u64, poll_ms: u64) -> u64 {
    interval_ms.div_ceil(poll_ms.max(1)).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round2(25.125), 25.13);
        assert_eq!(round2(-0.005), -0.01);
        assert_eq!(round_to(0.0004, 3), 0.0);
    }

    #[test]
    fn ticks_cover_interval() {
        assert_eq!(ticks_for(60_000, 500), 120);
        assert_eq!(ticks_for(1_001, 500), 3);
        assert_eq!(ticks_for(0, 500), 1);
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(std::time::Duration::from_millis(1_500)), 1_500);
        assert_eq!(millis(std::time::Duration::MAX), u64::MAX);
    }
}
