//! Temperature probes: per-role calibration, bounded history, and stats.
//!
//! Three fixed roles replace free-form sensor names. Probe text comes from
//! the one-wire bus in the kernel `w1_slave` format:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! A failed read never clears the last known temperature; it marks the
//! channel stale and counts consecutive failures for the alert evaluator.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use ato_traits::SensorBus;

use crate::config::TemperatureCfg;
use crate::error::AtoError;
use crate::history::BoundedHistory;
use crate::hw_error::map_hw_error;
use crate::season::{Season, season_at};
use crate::util::round2;

/// Largest accepted calibration offset, in degrees C.
pub const MAX_OFFSET_C: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorRole {
    /// Role 1: display tank.
    Display,
    /// Role 2: sump.
    Sump,
    /// Role 3: top-off reservoir.
    Reservoir,
}

impl SensorRole {
    /// Fixed role order used for auto-assignment.
    pub const ALL: [SensorRole; 3] = [SensorRole::Display, SensorRole::Sump, SensorRole::Reservoir];

    pub fn key(self) -> &'static str {
        match self {
            SensorRole::Display => "display",
            SensorRole::Sump => "sump",
            SensorRole::Reservoir => "ato",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SensorRole::Display => "Display Tank",
            SensorRole::Sump => "Sump",
            SensorRole::Reservoir => "ATO Reservoir",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.key() == key)
    }

    pub fn index(self) -> usize {
        match self {
            SensorRole::Display => 0,
            SensorRole::Sump => 1,
            SensorRole::Reservoir => 2,
        }
    }

    /// Display and sump readings guard livestock; the reservoir is informational.
    pub fn is_safety_critical(self) -> bool {
        !matches!(self, SensorRole::Reservoir)
    }
}

impl std::fmt::Display for SensorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// One recorded probe sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub role: SensorRole,
    pub raw_temperature: f64,
    pub calibration_offset: f64,
    pub calibrated_temperature: f64,
    pub timestamp: DateTime<Utc>,
    pub season: Season,
}

/// Trailing-window statistics. Empty windows are `None`, never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TempStats {
    pub avg_24h: Option<f64>,
    pub min_24h: Option<f64>,
    pub max_24h: Option<f64>,
    pub avg_7d: Option<f64>,
    pub min_7d: Option<f64>,
    pub max_7d: Option<f64>,
}

/// Outcome counts of one `read_all` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub ok: usize,
    pub failed: usize,
    pub unassigned: usize,
}

/// Read-only view of one channel for alerts and telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorStatus {
    pub role: SensorRole,
    pub device_id: Option<String>,
    pub current_temperature: Option<f64>,
    pub calibration_offset: f64,
    pub stale: bool,
    pub consecutive_failures: u32,
    pub safety_critical: bool,
}

/// Measurement range of DS18B20-class probes.
pub const PROBE_MIN_C: f64 = -55.0;
pub const PROBE_MAX_C: f64 = 125.0;

/// Parse `w1_slave` text into degrees C rounded to two places.
pub fn parse_w1_slave(text: &str) -> Result<f64, AtoError> {
    let mut lines = text.lines();
    let crc = lines
        .next()
        .ok_or_else(|| AtoError::SensorUnavailable("empty probe output".into()))?;
    if !crc.trim_end().ends_with("YES") {
        return Err(AtoError::SensorUnavailable("probe crc check failed".into()));
    }
    let data = lines
        .next()
        .ok_or_else(|| AtoError::SensorUnavailable("probe output truncated".into()))?;
    let pos = data
        .find("t=")
        .ok_or_else(|| AtoError::SensorUnavailable("probe output has no t= field".into()))?;
    let milli: f64 = data[pos + 2..]
        .trim()
        .parse()
        .map_err(|_| AtoError::SensorUnavailable("probe temperature is not a number".into()))?;
    let celsius = milli / 1000.0;
    if !(PROBE_MIN_C..=PROBE_MAX_C).contains(&celsius) {
        return Err(AtoError::SensorUnavailable(format!(
            "probe temperature {celsius} C outside sensor range"
        )));
    }
    Ok(round2(celsius))
}

fn validate_offset(offset: f64) -> Result<f64, AtoError> {
    let offset = round2(offset);
    if !offset.is_finite() || offset.abs() > MAX_OFFSET_C {
        return Err(AtoError::InvalidCalibrationInput(format!(
            "temperature offset {offset} outside +/-{MAX_OFFSET_C}"
        )));
    }
    Ok(offset)
}

#[derive(Debug, Clone)]
pub struct SensorChannel {
    role: SensorRole,
    device_id: Option<String>,
    configured_id: Option<String>,
    raw_temperature: Option<f64>,
    current_temperature: Option<f64>,
    calibration_offset: f64,
    safety_critical: bool,
    stale: bool,
    consecutive_failures: u32,
    history: BoundedHistory<SensorReading>,
}

impl SensorChannel {
    fn new(role: SensorRole) -> Self {
        Self {
            role,
            device_id: None,
            configured_id: None,
            raw_temperature: None,
            current_temperature: None,
            calibration_offset: 0.0,
            safety_critical: role.is_safety_critical(),
            stale: false,
            consecutive_failures: 0,
            history: BoundedHistory::default(),
        }
    }

    pub fn role(&self) -> SensorRole {
        self.role
    }
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }
    pub fn current_temperature(&self) -> Option<f64> {
        self.current_temperature
    }
    pub fn raw_temperature(&self) -> Option<f64> {
        self.raw_temperature
    }
    pub fn calibration_offset(&self) -> f64 {
        self.calibration_offset
    }
    pub fn is_stale(&self) -> bool {
        self.stale
    }
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
    pub fn history(&self) -> &BoundedHistory<SensorReading> {
        &self.history
    }

    fn status(&self) -> SensorStatus {
        SensorStatus {
            role: self.role,
            device_id: self.device_id.clone(),
            current_temperature: self.current_temperature,
            calibration_offset: self.calibration_offset,
            stale: self.stale,
            consecutive_failures: self.consecutive_failures,
            safety_critical: self.safety_critical,
        }
    }
}

/// Running sum/min/max over one window.
#[derive(Default)]
struct Window {
    n: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl Window {
    fn add(&mut self, t: f64) {
        if self.n == 0 {
            self.min = t;
            self.max = t;
        } else {
            self.min = self.min.min(t);
            self.max = self.max.max(t);
        }
        self.n += 1;
        self.sum += t;
    }

    fn avg(&self) -> Option<f64> {
        (self.n > 0).then(|| round2(self.sum / self.n as f64))
    }
    fn min(&self) -> Option<f64> {
        (self.n > 0).then(|| round2(self.min))
    }
    fn max(&self) -> Option<f64> {
        (self.n > 0).then(|| round2(self.max))
    }
}

#[derive(Debug, Clone)]
pub struct TemperatureSubsystem {
    channels: [SensorChannel; 3],
    auto_detect: bool,
}

impl TemperatureSubsystem {
    pub fn new(cfg: &TemperatureCfg) -> Result<Self, AtoError> {
        let mut channels = SensorRole::ALL.map(SensorChannel::new);
        for rc in &cfg.roles {
            let ch = &mut channels[rc.role.index()];
            ch.calibration_offset = validate_offset(rc.offset_c)?;
            ch.safety_critical = rc.safety_critical;
            ch.configured_id = rc.device_id.clone();
        }
        Ok(Self {
            channels,
            auto_detect: cfg.auto_detect,
        })
    }

    pub fn channel(&self, role: SensorRole) -> &SensorChannel {
        &self.channels[role.index()]
    }

    fn channel_mut(&mut self, role: SensorRole) -> &mut SensorChannel {
        &mut self.channels[role.index()]
    }

    pub fn assign_device(&mut self, role: SensorRole, device_id: impl Into<String>) {
        let id = device_id.into();
        tracing::info!(role = %role, device = %id, "temperature probe assigned");
        self.channel_mut(role).device_id = Some(id);
    }

    /// Assign roles in fixed order to the lexicographically sorted ids.
    ///
    /// The sort order says nothing about where a probe is physically mounted;
    /// operators who care should configure ids per role instead.
    pub fn auto_assign(&mut self, mut ids: Vec<String>) -> usize {
        ids.sort();
        if ids.len() < SensorRole::ALL.len() {
            tracing::warn!(
                found = ids.len(),
                "fewer temperature probes than roles; some roles stay unassigned"
            );
        }
        let mut assigned = 0;
        for (role, id) in SensorRole::ALL.into_iter().zip(ids) {
            self.assign_device(role, id);
            assigned += 1;
        }
        assigned
    }

    /// Match each configured id (or id fragment) against the discovered ids.
    pub fn manual_assign(&mut self, discovered: &[String]) -> usize {
        let mut assigned = 0;
        for role in SensorRole::ALL {
            let Some(wanted) = self.channel(role).configured_id.clone() else {
                continue;
            };
            match discovered.iter().find(|id| id.contains(wanted.as_str())) {
                Some(id) => {
                    self.assign_device(role, id.clone());
                    assigned += 1;
                }
                None => {
                    tracing::warn!(role = %role, wanted = %wanted, "configured probe not found on bus")
                }
            }
        }
        assigned
    }

    /// Scan the bus and assign probes to roles. Returns the number assigned.
    pub fn discover<B: SensorBus + ?Sized>(&mut self, bus: &mut B) -> Result<usize, AtoError> {
        let ids = bus.discover().map_err(|e| map_hw_error(&*e))?;
        if ids.is_empty() {
            tracing::warn!("no temperature probes detected");
            return Ok(0);
        }
        let assigned = if self.auto_detect {
            self.auto_assign(ids)
        } else {
            self.manual_assign(&ids)
        };
        tracing::info!(assigned, "temperature probes configured");
        Ok(assigned)
    }

    /// Read every assigned probe once.
    pub fn read_all<B: SensorBus + ?Sized>(&mut self, bus: &mut B) -> ReadSummary {
        let mut summary = ReadSummary::default();
        for role in SensorRole::ALL {
            let Some(id) = self.channel(role).device_id.clone() else {
                summary.unassigned += 1;
                continue;
            };
            let result = bus
                .read_raw(&id)
                .map_err(|e| map_hw_error(&*e))
                .and_then(|text| parse_w1_slave(&text));
            if self.apply_reading(role, result) {
                summary.ok += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }

    /// Fold one raw read result into a channel. Returns `true` on success.
    pub fn apply_reading(&mut self, role: SensorRole, raw: Result<f64, AtoError>) -> bool {
        let ch = self.channel_mut(role);
        match raw {
            Ok(raw_c) => {
                let raw_c = round2(raw_c);
                ch.raw_temperature = Some(raw_c);
                ch.current_temperature = Some(round2(raw_c + ch.calibration_offset));
                ch.stale = false;
                ch.consecutive_failures = 0;
                tracing::debug!(role = %role, raw_c, temp_c = ?ch.current_temperature, "probe read");
                true
            }
            Err(e) => {
                ch.stale = true;
                ch.consecutive_failures = ch.consecutive_failures.saturating_add(1);
                tracing::warn!(
                    role = %role,
                    failures = ch.consecutive_failures,
                    error = %e,
                    "probe read failed; keeping last temperature"
                );
                false
            }
        }
    }

    /// Set a role's calibration offset. Offsets beyond +/-5.0 are rejected
    /// and leave the previous offset in place.
    pub fn set_calibration_offset(&mut self, role: SensorRole, offset: f64) -> Result<f64, AtoError> {
        let offset = validate_offset(offset).inspect_err(|e| {
            tracing::warn!(role = %role, requested = offset, error = %e, "offset rejected");
        })?;
        let ch = self.channel_mut(role);
        ch.calibration_offset = offset;
        tracing::info!(role = %role, offset, "temperature offset set");
        Ok(offset)
    }

    /// Append the current temperature of `role` to its history.
    pub fn record_reading(
        &mut self,
        role: SensorRole,
        now: DateTime<Utc>,
    ) -> Result<SensorReading, AtoError> {
        let ch = self.channel_mut(role);
        let (Some(raw), Some(cal)) = (ch.raw_temperature, ch.current_temperature) else {
            return Err(AtoError::sensor(role, "no reading to record"));
        };
        let reading = SensorReading {
            role,
            raw_temperature: raw,
            calibration_offset: ch.calibration_offset,
            calibrated_temperature: cal,
            timestamp: now,
            season: season_at(now),
        };
        ch.history.push(reading.clone());
        Ok(reading)
    }

    /// Record every channel that produced a fresh reading.
    pub fn record_fresh(&mut self, now: DateTime<Utc>) -> usize {
        let fresh: Vec<SensorRole> = self
            .channels
            .iter()
            .filter(|c| !c.stale && c.current_temperature.is_some())
            .map(|c| c.role)
            .collect();
        fresh
            .into_iter()
            .filter(|r| self.record_reading(*r, now).is_ok())
            .count()
    }

    pub fn compute_stats(&self, role: SensorRole, now: DateTime<Utc>) -> TempStats {
        let day_ago = now - ChronoDuration::hours(24);
        let week_ago = now - ChronoDuration::days(7);
        let mut day = Window::default();
        let mut week = Window::default();
        for r in self.channel(role).history.iter() {
            if r.timestamp >= week_ago {
                week.add(r.calibrated_temperature);
                if r.timestamp >= day_ago {
                    day.add(r.calibrated_temperature);
                }
            }
        }
        TempStats {
            avg_24h: day.avg(),
            min_24h: day.min(),
            max_24h: day.max(),
            avg_7d: week.avg(),
            min_7d: week.min(),
            max_7d: week.max(),
        }
    }

    /// |display - sump|, `None` unless both have a temperature.
    pub fn temperature_differential(&self) -> Option<f64> {
        let display = self.channel(SensorRole::Display).current_temperature?;
        let sump = self.channel(SensorRole::Sump).current_temperature?;
        Some(round2((display - sump).abs()))
    }

    pub fn statuses(&self) -> Vec<SensorStatus> {
        self.channels.iter().map(SensorChannel::status).collect()
    }

    /// Reload persisted offset and history for a role.
    pub fn restore(
        &mut self,
        role: SensorRole,
        offset: f64,
        history: impl IntoIterator<Item = SensorReading>,
    ) -> Result<(), AtoError> {
        let offset = validate_offset(offset)?;
        let ch = self.channel_mut(role);
        ch.calibration_offset = offset;
        ch.history.clear();
        ch.history.extend(history.into_iter().filter(|r| r.role == role));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn subsystem() -> TemperatureSubsystem {
        TemperatureSubsystem::new(&TemperatureCfg::default()).unwrap()
    }

    #[test]
    fn parses_kernel_output() {
        let text = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        assert_eq!(parse_w1_slave(text).unwrap(), 23.13);
    }

    #[test]
    fn rejects_failed_crc() {
        let text = "72 01 4b 46 7f ff 0e 10 57 : crc=57 NO\n72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        assert!(matches!(
            parse_w1_slave(text),
            Err(AtoError::SensorUnavailable(_))
        ));
    }

    #[test]
    fn negative_temperatures_parse() {
        let text = "ff : crc=1 YES\nff t=-1250\n";
        assert_eq!(parse_w1_slave(text).unwrap(), -1.25);
    }

    #[test]
    fn rejects_values_outside_probe_range() {
        for t in ["t=127000", "t=-60000", "t=1e400", "t=NaN"] {
            let text = format!("aa : crc=1 YES\naa {t}\n");
            assert!(parse_w1_slave(&text).is_err(), "{t}");
        }
    }

    #[test]
    fn failure_keeps_last_value_and_flags_stale() {
        let mut t = subsystem();
        assert!(t.apply_reading(SensorRole::Sump, Ok(25.0)));
        assert!(!t.apply_reading(SensorRole::Sump, Err(AtoError::SensorUnavailable("x".into()))));
        let ch = t.channel(SensorRole::Sump);
        assert_eq!(ch.current_temperature(), Some(25.0));
        assert!(ch.is_stale());
        assert_eq!(ch.consecutive_failures(), 1);

        assert!(t.apply_reading(SensorRole::Sump, Ok(25.2)));
        assert!(!t.channel(SensorRole::Sump).is_stale());
        assert_eq!(t.channel(SensorRole::Sump).consecutive_failures(), 0);
    }

    #[test]
    fn offset_applies_on_next_read() {
        let mut t = subsystem();
        t.set_calibration_offset(SensorRole::Display, -0.4).unwrap();
        t.apply_reading(SensorRole::Display, Ok(25.55));
        assert_eq!(t.channel(SensorRole::Display).current_temperature(), Some(25.15));
    }

    #[test]
    fn record_requires_a_reading() {
        let mut t = subsystem();
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(t.record_reading(SensorRole::Display, now).is_err());
        t.apply_reading(SensorRole::Display, Ok(25.0));
        let r = t.record_reading(SensorRole::Display, now).unwrap();
        assert_eq!(r.season, Season::Winter);
        assert_eq!(t.channel(SensorRole::Display).history().len(), 1);
    }
}
