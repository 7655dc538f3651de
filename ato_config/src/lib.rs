#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and refill-log parsing for the top-off controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The refill log CSV loader enforces headers and rejects rows that could
//!   never feed the dosage estimator (zero activations, non-positive volume).
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Refill log CSV schema.
///
/// Expected headers:
/// timestamp,liters,activations
///
/// Example:
/// timestamp,liters,activations
/// 2024-06-01T08:00:00Z,4.8,96
/// 2024-06-09T08:00:00Z,5.1,101
#[derive(Debug, Deserialize, Clone)]
pub struct RefillRow {
    pub timestamp: DateTime<Utc>,
    pub liters: f64,
    pub activations: u32,
}

#[derive(Debug, Deserialize)]
pub struct Pins {
    pub float_switch: u8,
    pub pump_relay: u8,
    /// Float switch pin level that means "water low". The usual wiring
    /// (switch to ground, internal pull-up, switch opens when the float drops)
    /// reads HIGH when low.
    #[serde(default = "default_true")]
    pub float_low_when_high: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PumpCfg {
    /// Control tick period; the float switch is sampled once per tick.
    pub poll_ms: u64,
    /// Consecutive identical float samples required before acting.
    pub debounce_samples: u8,
    /// A fill running longer than this is declared stuck.
    pub stuck_timeout_s: u64,
    /// Run time of a manually triggered fill when the float never reports full.
    pub manual_run_s: u64,
    /// Stuck fills inside `stuck_window_h` that disable the pump.
    pub max_stuck_events: u32,
    pub stuck_window_h: u64,
    /// Completed fills per calendar day before the pump is disabled.
    pub max_activations_per_day: u32,
}

impl Default for PumpCfg {
    fn default() -> Self {
        Self {
            poll_ms: 500,
            debounce_samples: 2,
            stuck_timeout_s: 120,
            manual_run_s: 10,
            max_stuck_events: 3,
            stuck_window_h: 24,
            max_activations_per_day: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Dose assumed per activation until the first refill is confirmed.
    pub seed_liters_per_activation: f64,
    pub reservoir_capacity_l: f64,
    /// Confidence gained per agreeing refill sample.
    pub confidence_step: f64,
    /// Floor on the estimator's learning rate once confidence is high.
    pub min_learning_rate: f64,
    /// Relative disagreement that counts as a contradicting sample.
    pub disagreement_ratio: f64,
    pub max_refill_history: usize,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            seed_liters_per_activation: 0.05,
            reservoir_capacity_l: 10.0,
            confidence_step: 0.2,
            min_learning_rate: 0.1,
            disagreement_ratio: 0.5,
            max_refill_history: 100,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SensorCfg {
    /// Manual device id (or a unique fragment of it). Ignored when auto-detecting.
    pub id: Option<String>,
    /// Calibration offset in degrees C, limited to +/-5.0.
    pub offset_c: f64,
    /// Override whether out-of-band readings raise alerts.
    pub alerts_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TemperatureCfg {
    /// Assign discovered probes to roles by sorted id instead of `[temperature.<role>].id`.
    pub auto_detect: bool,
    pub read_interval_s: u64,
    pub w1_root: String,
    /// Read probes on a background thread so slow one-wire reads never delay a tick.
    pub background: bool,
    pub display: SensorCfg,
    pub sump: SensorCfg,
    pub ato: SensorCfg,
}

impl Default for TemperatureCfg {
    fn default() -> Self {
        Self {
            auto_detect: true,
            read_interval_s: 60,
            w1_root: "/sys/bus/w1/devices".to_string(),
            background: false,
            display: SensorCfg::default(),
            sump: SensorCfg::default(),
            ato: SensorCfg::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AlertCfg {
    /// Minimum spacing between two alerts of the same kind for the same subject.
    pub cooldown_s: u64,
    /// Consecutive failed reads before a sensor is reported lost.
    pub stale_cycles: u32,
    pub safe_min_c: f64,
    pub safe_max_c: f64,
    /// Display/sump differential that hints at a heater or circulation fault.
    pub max_differential_c: f64,
    pub min_confidence: f64,
    /// Activations that must have happened before low confidence is alarming.
    pub min_activations: u64,
    /// Today's usage above this multiple of the seasonal daily baseline is anomalous.
    pub anomaly_factor: f64,
}

impl Default for AlertCfg {
    fn default() -> Self {
        Self {
            cooldown_s: 3600,
            stale_cycles: 5,
            safe_min_c: 24.0,
            safe_max_c: 27.0,
            max_differential_c: 1.0,
            min_confidence: 0.5,
            min_activations: 50,
            anomaly_factor: 2.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryCfg {
    pub prefix: String,
    pub publish_interval_s: u64,
}

impl Default for TelemetryCfg {
    fn default() -> Self {
        Self {
            prefix: "aquarium".to_string(),
            publish_interval_s: 30,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Persistence {
    /// State file; persistence is disabled when absent.
    pub path: Option<String>,
    pub save_interval_s: u64,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            path: None,
            save_interval_s: 300,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pins: Pins,
    #[serde(default)]
    pub pump: PumpCfg,
    #[serde(default)]
    pub calibration: CalibrationCfg,
    #[serde(default)]
    pub temperature: TemperatureCfg,
    #[serde(default)]
    pub alerts: AlertCfg,
    #[serde(default)]
    pub telemetry: TelemetryCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub persistence: Persistence,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Maximum magnitude of a temperature calibration offset.
pub const MAX_OFFSET_C: f64 = 5.0;

pub fn load_refill_csv(path: &std::path::Path) -> eyre::Result<Vec<RefillRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open refill CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["timestamp", "liters", "activations"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "refill CSV must have headers 'timestamp,liters,activations', got: {}",
            actual.join(",")
        );
    }

    let mut rows: Vec<RefillRow> = Vec::new();
    for (idx, rec) in rdr.deserialize::<RefillRow>().enumerate() {
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        if row.activations == 0 {
            eyre::bail!("invalid CSV row {}: activations must be >= 1", idx + 2);
        }
        if !(row.liters.is_finite() && row.liters > 0.0) {
            eyre::bail!("invalid CSV row {}: liters must be > 0", idx + 2);
        }
        if let Some(prev) = rows.last()
            && row.timestamp < prev.timestamp
        {
            eyre::bail!(
                "invalid CSV row {}: timestamps must be in chronological order",
                idx + 2
            );
        }
        rows.push(row);
    }
    Ok(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pins
        if self.pins.float_switch == self.pins.pump_relay {
            eyre::bail!("pins.float_switch and pins.pump_relay must differ");
        }

        // Pump
        if self.pump.poll_ms == 0 {
            eyre::bail!("pump.poll_ms must be >= 1");
        }
        if self.pump.poll_ms > 60_000 {
            eyre::bail!("pump.poll_ms is unreasonably large (>60s)");
        }
        if self.pump.debounce_samples == 0 {
            eyre::bail!("pump.debounce_samples must be >= 1");
        }
        if self.pump.stuck_timeout_s == 0 {
            eyre::bail!("pump.stuck_timeout_s must be >= 1");
        }
        if self.pump.stuck_timeout_s.saturating_mul(1000) <= self.pump.poll_ms {
            eyre::bail!("pump.stuck_timeout_s must span more than one poll period");
        }
        if self.pump.manual_run_s == 0 || self.pump.manual_run_s >= self.pump.stuck_timeout_s {
            eyre::bail!("pump.manual_run_s must be in [1, stuck_timeout_s)");
        }
        if self.pump.max_stuck_events == 0 {
            eyre::bail!("pump.max_stuck_events must be >= 1");
        }
        if self.pump.stuck_window_h == 0 {
            eyre::bail!("pump.stuck_window_h must be >= 1");
        }
        if self.pump.max_activations_per_day == 0 {
            eyre::bail!("pump.max_activations_per_day must be >= 1");
        }

        // Calibration
        let c = &self.calibration;
        if !(c.seed_liters_per_activation.is_finite() && c.seed_liters_per_activation > 0.0) {
            eyre::bail!("calibration.seed_liters_per_activation must be > 0");
        }
        if !(c.reservoir_capacity_l.is_finite() && c.reservoir_capacity_l > 0.0) {
            eyre::bail!("calibration.reservoir_capacity_l must be > 0");
        }
        if !(c.confidence_step > 0.0 && c.confidence_step <= 1.0) {
            eyre::bail!("calibration.confidence_step must be in (0.0, 1.0]");
        }
        if !(c.min_learning_rate > 0.0 && c.min_learning_rate <= 1.0) {
            eyre::bail!("calibration.min_learning_rate must be in (0.0, 1.0]");
        }
        if !(c.disagreement_ratio.is_finite() && c.disagreement_ratio > 0.0) {
            eyre::bail!("calibration.disagreement_ratio must be > 0");
        }
        if c.max_refill_history == 0 {
            eyre::bail!("calibration.max_refill_history must be >= 1");
        }

        // Temperature
        if self.temperature.read_interval_s == 0 {
            eyre::bail!("temperature.read_interval_s must be >= 1");
        }
        for (key, s) in [
            ("display", &self.temperature.display),
            ("sump", &self.temperature.sump),
            ("ato", &self.temperature.ato),
        ] {
            if !s.offset_c.is_finite() || s.offset_c.abs() > MAX_OFFSET_C {
                eyre::bail!("temperature.{key}.offset_c must be within +/-5.0");
            }
            if !self.temperature.auto_detect
                && let Some(id) = &s.id
                && id.trim().is_empty()
            {
                eyre::bail!("temperature.{key}.id must not be empty");
            }
        }

        // Alerts
        let a = &self.alerts;
        if a.stale_cycles == 0 {
            eyre::bail!("alerts.stale_cycles must be >= 1");
        }
        if !(a.safe_min_c.is_finite() && a.safe_max_c.is_finite()) || a.safe_min_c >= a.safe_max_c
        {
            eyre::bail!("alerts.safe_min_c must be below alerts.safe_max_c");
        }
        if !(a.max_differential_c.is_finite() && a.max_differential_c > 0.0) {
            eyre::bail!("alerts.max_differential_c must be > 0");
        }
        if !(0.0..=1.0).contains(&a.min_confidence) {
            eyre::bail!("alerts.min_confidence must be in [0.0, 1.0]");
        }
        if !(a.anomaly_factor.is_finite() && a.anomaly_factor >= 1.0) {
            eyre::bail!("alerts.anomaly_factor must be >= 1.0");
        }

        // Telemetry
        let prefix = self.telemetry.prefix.trim();
        if prefix.is_empty() || prefix.contains(['#', '+']) {
            eyre::bail!("telemetry.prefix must be non-empty and free of wildcards");
        }
        if self.telemetry.publish_interval_s == 0 {
            eyre::bail!("telemetry.publish_interval_s must be >= 1");
        }

        // Persistence
        if self.persistence.path.is_some() && self.persistence.save_interval_s == 0 {
            eyre::bail!("persistence.save_interval_s must be >= 1");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
