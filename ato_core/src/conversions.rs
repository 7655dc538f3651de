//! `From` implementations bridging `ato_config` types to `ato_core` types.

use std::time::Duration;

use crate::config::{
    AlertCfg, CalibrationCfg, LoopCfg, PumpCfg, RoleCfg, TelemetryCfg, TemperatureCfg,
};
use crate::temperature::SensorRole;

// ── PumpCfg ──────────────────────────────────────────────────────────────────

impl From<&ato_config::PumpCfg> for PumpCfg {
    fn from(c: &ato_config::PumpCfg) -> Self {
        Self {
            debounce_samples: c.debounce_samples,
            stuck_timeout: Duration::from_secs(c.stuck_timeout_s),
            manual_run: Duration::from_secs(c.manual_run_s),
            max_stuck_events: c.max_stuck_events,
            stuck_window: Duration::from_secs(c.stuck_window_h.saturating_mul(3600)),
            max_activations_per_day: c.max_activations_per_day,
        }
    }
}

impl From<&ato_config::PumpCfg> for LoopCfg {
    fn from(c: &ato_config::PumpCfg) -> Self {
        Self {
            poll: Duration::from_millis(c.poll_ms),
        }
    }
}

// ── CalibrationCfg ───────────────────────────────────────────────────────────

impl From<&ato_config::CalibrationCfg> for CalibrationCfg {
    fn from(c: &ato_config::CalibrationCfg) -> Self {
        Self {
            seed_liters_per_activation: c.seed_liters_per_activation,
            reservoir_capacity_l: c.reservoir_capacity_l,
            confidence_step: c.confidence_step,
            min_learning_rate: c.min_learning_rate,
            disagreement_ratio: c.disagreement_ratio,
            max_refill_history: c.max_refill_history,
        }
    }
}

// ── TemperatureCfg ───────────────────────────────────────────────────────────

fn role_cfg(role: SensorRole, c: &ato_config::SensorCfg) -> RoleCfg {
    RoleCfg {
        role,
        device_id: c.id.clone(),
        offset_c: c.offset_c,
        safety_critical: c.alerts_enabled.unwrap_or(role.is_safety_critical()),
    }
}

impl From<&ato_config::TemperatureCfg> for TemperatureCfg {
    fn from(c: &ato_config::TemperatureCfg) -> Self {
        Self {
            auto_detect: c.auto_detect,
            read_interval: Duration::from_secs(c.read_interval_s),
            roles: vec![
                role_cfg(SensorRole::Display, &c.display),
                role_cfg(SensorRole::Sump, &c.sump),
                role_cfg(SensorRole::Reservoir, &c.ato),
            ],
        }
    }
}

// ── AlertCfg ─────────────────────────────────────────────────────────────────

impl From<&ato_config::AlertCfg> for AlertCfg {
    fn from(c: &ato_config::AlertCfg) -> Self {
        Self {
            cooldown: Duration::from_secs(c.cooldown_s),
            stale_cycles: c.stale_cycles,
            safe_min_c: c.safe_min_c,
            safe_max_c: c.safe_max_c,
            max_differential_c: c.max_differential_c,
            min_confidence: c.min_confidence,
            min_activations: c.min_activations,
            anomaly_factor: c.anomaly_factor,
        }
    }
}

// ── TelemetryCfg ─────────────────────────────────────────────────────────────

impl From<&ato_config::TelemetryCfg> for TelemetryCfg {
    fn from(c: &ato_config::TelemetryCfg) -> Self {
        Self {
            prefix: c.prefix.trim().trim_end_matches('/').to_string(),
            publish_interval: Duration::from_secs(c.publish_interval_s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservoir_probe_alerts_default_off() {
        let cfg = ato_config::load_toml("[pins]\nfloat_switch = 1\npump_relay = 2\n").unwrap();
        let t: TemperatureCfg = (&cfg.temperature).into();
        let flags: Vec<bool> = t.roles.iter().map(|r| r.safety_critical).collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[test]
    fn stuck_window_hours_become_duration() {
        let c = ato_config::PumpCfg {
            stuck_window_h: 2,
            ..ato_config::PumpCfg::default()
        };
        let p: PumpCfg = (&c).into();
        assert_eq!(p.stuck_window, Duration::from_secs(7200));
    }
}
