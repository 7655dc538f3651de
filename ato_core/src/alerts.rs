//! Alert evaluation with per-(kind, subject) cooldown.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AlertCfg;
use crate::error::DisableReason;
use crate::pump::{PumpPhase, PumpSnapshot};
use crate::temperature::SensorStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PumpStuck,
    PumpDisabled,
    SensorStale,
    TemperatureOutOfRange,
    LowConfidence,
    DosageAnomaly,
    TemperatureDifferential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    /// What the alert is about: `pump`, a sensor role key, `calibration`, ...
    pub subject: String,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything the evaluator looks at in one pass.
#[derive(Debug, Clone)]
pub struct AlertInputs<'a> {
    pub pump: &'a PumpSnapshot,
    pub sensors: &'a [SensorStatus],
    pub differential: Option<f64>,
    pub confidence: f64,
    pub total_activations: u64,
    pub liters_today: f64,
    pub expected_daily_liters: f64,
}

#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    cfg: AlertCfg,
    last_fired: HashMap<(AlertKind, String), DateTime<Utc>>,
}

impl AlertEvaluator {
    pub fn new(cfg: AlertCfg) -> Self {
        Self {
            cfg,
            last_fired: HashMap::new(),
        }
    }

    /// Alerts whose condition holds and whose cooldown has expired.
    pub fn evaluate(&mut self, inputs: &AlertInputs<'_>, now: DateTime<Utc>) -> Vec<Alert> {
        let candidates = self.conditions(inputs);
        let cooldown = chrono::Duration::from_std(self.cfg.cooldown).unwrap_or(chrono::Duration::MAX);
        let mut fired = Vec::new();
        for (kind, subject, severity, message) in candidates {
            let key = (kind, subject);
            let due = self
                .last_fired
                .get(&key)
                .is_none_or(|last| now.signed_duration_since(*last) >= cooldown);
            if !due {
                tracing::trace!(?kind, subject = %key.1, "alert suppressed by cooldown");
                continue;
            }
            self.last_fired.insert(key.clone(), now);
            tracing::warn!(?kind, subject = %key.1, %message, "alert");
            fired.push(Alert {
                kind,
                subject: key.1,
                severity,
                message,
                timestamp: now,
            });
        }
        fired
    }

    fn conditions(&self, i: &AlertInputs<'_>) -> Vec<(AlertKind, String, Severity, String)> {
        let c = &self.cfg;
        let mut out = Vec::new();

        match i.pump.phase {
            PumpPhase::Stuck => out.push((
                AlertKind::PumpStuck,
                "pump".to_string(),
                Severity::Critical,
                i.pump
                    .stuck_detail
                    .clone()
                    .unwrap_or_else(|| "pump ran past the stuck timeout and was forced off".to_string()),
            )),
            PumpPhase::Disabled => {
                if let Some(reason) = i.pump.disabled_reason.filter(|r| *r != DisableReason::Command) {
                    out.push((
                        AlertKind::PumpDisabled,
                        "pump".to_string(),
                        Severity::Critical,
                        format!("pump disabled: {reason:?}"),
                    ));
                }
            }
            PumpPhase::Idle | PumpPhase::Filling => {}
        }

        for s in i.sensors {
            let key = s.role.key().to_string();
            if s.device_id.is_some() && s.consecutive_failures >= c.stale_cycles {
                out.push((
                    AlertKind::SensorStale,
                    key.clone(),
                    Severity::Warning,
                    format!(
                        "{} probe failed {} consecutive reads",
                        s.role.name(),
                        s.consecutive_failures
                    ),
                ));
            }
            if !s.safety_critical || s.stale {
                continue;
            }
            let Some(t) = s.current_temperature else {
                continue;
            };
            if t < c.safe_min_c || t > c.safe_max_c {
                out.push((
                    AlertKind::TemperatureOutOfRange,
                    key,
                    Severity::Critical,
                    format!(
                        "{} at {t:.2} C outside {:.1}-{:.1} C",
                        s.role.name(),
                        c.safe_min_c,
                        c.safe_max_c
                    ),
                ));
            }
        }

        if let Some(d) = i.differential.filter(|d| *d > c.max_differential_c) {
            out.push((
                AlertKind::TemperatureDifferential,
                "differential".to_string(),
                Severity::Warning,
                format!("display/sump differential {d:.2} C exceeds {:.2} C", c.max_differential_c),
            ));
        }

        if i.total_activations >= c.min_activations && i.confidence < c.min_confidence {
            out.push((
                AlertKind::LowConfidence,
                "calibration".to_string(),
                Severity::Warning,
                format!(
                    "calibration confidence {:.2} after {} activations",
                    i.confidence, i.total_activations
                ),
            ));
        }

        if i.expected_daily_liters > 0.0 && i.liters_today > c.anomaly_factor * i.expected_daily_liters {
            out.push((
                AlertKind::DosageAnomaly,
                "dosage".to_string(),
                Severity::Warning,
                format!(
                    "{:.2} L dosed today vs {:.2} L seasonal baseline",
                    i.liters_today, i.expected_daily_liters
                ),
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temperature::SensorRole;
    use chrono::TimeZone;

    fn idle() -> PumpSnapshot {
        PumpSnapshot {
            phase: PumpPhase::Idle,
            pump_on: false,
            filling_duration_ms: None,
            manual: false,
            disabled_reason: None,
            fills_today: 0,
            stuck_events_in_window: 0,
            stuck_detail: None,
        }
    }

    fn inputs<'a>(pump: &'a PumpSnapshot, sensors: &'a [SensorStatus]) -> AlertInputs<'a> {
        AlertInputs {
            pump,
            sensors,
            differential: None,
            confidence: 1.0,
            total_activations: 0,
            liters_today: 0.0,
            expected_daily_liters: 0.0,
        }
    }

    #[test]
    fn command_disable_is_not_an_alert() {
        let mut ev = AlertEvaluator::new(AlertCfg::default());
        let mut pump = idle();
        pump.phase = PumpPhase::Disabled;
        pump.disabled_reason = Some(DisableReason::Command);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(ev.evaluate(&inputs(&pump, &[]), now).is_empty());
    }

    #[test]
    fn reservoir_probe_never_raises_range_alert() {
        let mut ev = AlertEvaluator::new(AlertCfg::default());
        let pump = idle();
        let sensors = [SensorStatus {
            role: SensorRole::Reservoir,
            device_id: Some("28-x".into()),
            current_temperature: Some(18.0),
            calibration_offset: 0.0,
            stale: false,
            consecutive_failures: 0,
            safety_critical: false,
        }];
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(ev.evaluate(&inputs(&pump, &sensors), now).is_empty());
    }
}
