//! Runtime configuration for the controller components.
//!
//! These are the structs the components are built from. They are separate
//! from the TOML-deserialized config in `ato_config`; see `conversions`.

use std::time::Duration;

use crate::temperature::SensorRole;

/// Pump state machine timing and safety limits.
#[derive(Debug, Clone)]
pub struct PumpCfg {
    /// Consecutive identical float samples required before acting.
    pub debounce_samples: u8,
    /// A fill running longer than this is declared stuck.
    pub stuck_timeout: Duration,
    /// Maximum run of a manually triggered fill.
    pub manual_run: Duration,
    /// Stuck fills inside `stuck_window` that force the pump disabled.
    pub max_stuck_events: u32,
    pub stuck_window: Duration,
    /// Fills per calendar day (UTC) before the pump is disabled.
    pub max_activations_per_day: u32,
}

impl Default for PumpCfg {
    fn default() -> Self {
        Self {
            debounce_samples: 2,
            stuck_timeout: Duration::from_secs(120),
            manual_run: Duration::from_secs(10),
            max_stuck_events: 3,
            stuck_window: Duration::from_secs(24 * 3600),
            max_activations_per_day: 50,
        }
    }
}

/// Dosage estimator tuning.
#[derive(Debug, Clone)]
pub struct CalibrationCfg {
    pub seed_liters_per_activation: f64,
    pub reservoir_capacity_l: f64,
    pub confidence_step: f64,
    pub min_learning_rate: f64,
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

/// Per-role probe settings.
#[derive(Debug, Clone)]
pub struct RoleCfg {
    pub role: SensorRole,
    /// Manual device id or fragment; unused with auto-detection.
    pub device_id: Option<String>,
    pub offset_c: f64,
    /// Out-of-band readings from this probe raise alerts.
    pub safety_critical: bool,
}

impl RoleCfg {
    pub fn for_role(role: SensorRole) -> Self {
        Self {
            role,
            device_id: None,
            offset_c: 0.0,
            safety_critical: role.is_safety_critical(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemperatureCfg {
    pub auto_detect: bool,
    pub read_interval: Duration,
    pub roles: Vec<RoleCfg>,
}

impl Default for TemperatureCfg {
    fn default() -> Self {
        Self {
            auto_detect: true,
            read_interval: Duration::from_secs(60),
            roles: SensorRole::ALL.iter().map(|r| RoleCfg::for_role(*r)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertCfg {
    pub cooldown: Duration,
    pub stale_cycles: u32,
    pub safe_min_c: f64,
    pub safe_max_c: f64,
    pub max_differential_c: f64,
    pub min_confidence: f64,
    pub min_activations: u64,
    pub anomaly_factor: f64,
}

impl Default for AlertCfg {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(3600),
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

#[derive(Debug, Clone)]
pub struct TelemetryCfg {
    /// Topic root, e.g. `aquarium` -> `aquarium/pump/state`.
    pub prefix: String,
    pub publish_interval: Duration,
}

impl Default for TelemetryCfg {
    fn default() -> Self {
        Self {
            prefix: "aquarium".to_string(),
            publish_interval: Duration::from_secs(30),
        }
    }
}

/// Tick cadence of the control loop.
#[derive(Debug, Clone)]
pub struct LoopCfg {
    pub poll: Duration,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(500),
        }
    }
}
