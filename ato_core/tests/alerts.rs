use std::time::Duration;

use ato_core::alerts::AlertInputs;
use ato_core::temperature::SensorStatus;
use ato_core::{AlertCfg, AlertEvaluator, AlertKind, DisableReason, PumpPhase, PumpSnapshot, SensorRole};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rstest::rstest;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 5, 6, 0, 0).unwrap()
}

fn pump(phase: PumpPhase, reason: Option<DisableReason>) -> PumpSnapshot {
    PumpSnapshot {
        phase,
        pump_on: phase == PumpPhase::Filling,
        filling_duration_ms: None,
        manual: false,
        disabled_reason: reason,
        fills_today: 0,
        stuck_events_in_window: 0,
        stuck_detail: None,
    }
}

fn sensor(role: SensorRole, temp: Option<f64>, failures: u32) -> SensorStatus {
    SensorStatus {
        role,
        device_id: Some(format!("28-{}", role.key())),
        current_temperature: temp,
        calibration_offset: 0.0,
        stale: failures > 0,
        consecutive_failures: failures,
        safety_critical: role.is_safety_critical(),
    }
}

struct Scene {
    pump: PumpSnapshot,
    sensors: Vec<SensorStatus>,
    differential: Option<f64>,
    confidence: f64,
    total_activations: u64,
    liters_today: f64,
    expected: f64,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            pump: pump(PumpPhase::Idle, None),
            sensors: vec![
                sensor(SensorRole::Display, Some(25.5), 0),
                sensor(SensorRole::Sump, Some(25.4), 0),
                sensor(SensorRole::Reservoir, Some(21.0), 0),
            ],
            differential: Some(0.1),
            confidence: 0.9,
            total_activations: 500,
            liters_today: 1.0,
            expected: 1.0,
        }
    }
}

impl Scene {
    fn inputs(&self) -> AlertInputs<'_> {
        AlertInputs {
            pump: &self.pump,
            sensors: &self.sensors,
            differential: self.differential,
            confidence: self.confidence,
            total_activations: self.total_activations,
            liters_today: self.liters_today,
            expected_daily_liters: self.expected,
        }
    }
}

fn kinds(scene: &Scene) -> Vec<AlertKind> {
    let mut ev = AlertEvaluator::new(AlertCfg::default());
    ev.evaluate(&scene.inputs(), t0()).into_iter().map(|a| a.kind).collect()
}

#[test]
fn healthy_system_is_quiet() {
    assert!(kinds(&Scene::default()).is_empty());
}

#[rstest]
#[case(PumpPhase::Stuck, None, Some(AlertKind::PumpStuck))]
#[case(PumpPhase::Disabled, Some(DisableReason::DailyCeiling), Some(AlertKind::PumpDisabled))]
#[case(PumpPhase::Disabled, Some(DisableReason::RepeatedStuck), Some(AlertKind::PumpDisabled))]
#[case(PumpPhase::Disabled, Some(DisableReason::Command), None)]
#[case(PumpPhase::Filling, None, None)]
fn pump_conditions(
    #[case] phase: PumpPhase,
    #[case] reason: Option<DisableReason>,
    #[case] expected: Option<AlertKind>,
) {
    let scene = Scene {
        pump: pump(phase, reason),
        ..Scene::default()
    };
    assert_eq!(kinds(&scene), expected.into_iter().collect::<Vec<_>>());
}

#[rstest]
#[case(23.9, true)]
#[case(24.0, false)]
#[case(27.0, false)]
#[case(27.1, true)]
fn display_temperature_band(#[case] t: f64, #[case] alert: bool) {
    let mut scene = Scene::default();
    scene.sensors[0] = sensor(SensorRole::Display, Some(t), 0);
    scene.differential = None;
    assert_eq!(kinds(&scene).contains(&AlertKind::TemperatureOutOfRange), alert);
}

#[test]
fn stale_after_configured_failures() {
    let mut scene = Scene::default();
    scene.sensors[1] = sensor(SensorRole::Sump, Some(25.4), 4);
    assert!(kinds(&scene).is_empty());
    scene.sensors[1] = sensor(SensorRole::Sump, Some(25.4), 5);
    assert_eq!(kinds(&scene), vec![AlertKind::SensorStale]);
}

#[test]
fn low_confidence_needs_enough_history() {
    let mut scene = Scene {
        confidence: 0.2,
        total_activations: 49,
        ..Scene::default()
    };
    assert!(kinds(&scene).is_empty());
    scene.total_activations = 50;
    assert_eq!(kinds(&scene), vec![AlertKind::LowConfidence]);
}

#[test]
fn dosage_anomaly_against_seasonal_baseline() {
    let mut scene = Scene {
        liters_today: 2.5,
        expected: 1.0,
        ..Scene::default()
    };
    assert_eq!(kinds(&scene), vec![AlertKind::DosageAnomaly]);
    scene.expected = 0.0;
    assert!(kinds(&scene).is_empty(), "no baseline, no anomaly");
}

#[test]
fn differential_alert() {
    let scene = Scene {
        differential: Some(1.3),
        ..Scene::default()
    };
    assert_eq!(kinds(&scene), vec![AlertKind::TemperatureDifferential]);
}

#[test]
fn cooldown_deduplicates_per_subject() {
    let cfg = AlertCfg {
        cooldown: Duration::from_secs(600),
        ..AlertCfg::default()
    };
    let mut ev = AlertEvaluator::new(cfg);
    let mut scene = Scene::default();
    scene.sensors[0] = sensor(SensorRole::Display, Some(28.0), 0);
    scene.differential = None;

    assert_eq!(ev.evaluate(&scene.inputs(), t0()).len(), 1);
    assert!(ev.evaluate(&scene.inputs(), t0() + ChronoDuration::seconds(599)).is_empty());

    // Same kind, different subject is not suppressed.
    scene.sensors[1] = sensor(SensorRole::Sump, Some(28.0), 0);
    let fired = ev.evaluate(&scene.inputs(), t0() + ChronoDuration::seconds(599));
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].subject, "sump");

    let again = ev.evaluate(&scene.inputs(), t0() + ChronoDuration::seconds(600));
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].subject, "display");
}
