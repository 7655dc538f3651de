use std::sync::atomic::AtomicBool;
use std::time::Duration;

use ato_core::mocks::{MemoryTelemetry, ScriptedFloat, SpyRelay, UnreachableTelemetry};
use ato_core::runner::{RunOptions, run};
use ato_core::{
    ActivationRecord, AlertKind, Command, Controller, ControllerBuilder, DisableReason, LoopCfg, PersistedState,
    PumpCfg, PumpEvent, PumpPhase, TelemetryCfg, TemperatureCfg,
};
use ato_hardware::{SimulatedSensorBus, SimulatedSump};
use ato_traits::{Clock, ManualClock, TelemetrySink};
use chrono::{TimeZone, Utc};
use crossbeam_channel as xch;

const POLL: Duration = Duration::from_secs(1);

fn clock() -> ManualClock {
    ManualClock::starting_at(Utc.with_ymd_and_hms(2024, 7, 4, 9, 0, 0).unwrap())
}

fn base(clock: &ManualClock, sink: impl TelemetrySink + Send + 'static) -> ControllerBuilder {
    Controller::builder()
        .with_sensor_bus(SimulatedSensorBus::reef_defaults())
        .with_telemetry(sink)
        .with_clock(clock.clone())
        .with_loop(LoopCfg { poll: POLL })
        .with_temperature(TemperatureCfg {
            read_interval: Duration::from_secs(10),
            ..TemperatureCfg::default()
        })
        .with_telemetry_cfg(TelemetryCfg {
            prefix: "aquarium".into(),
            publish_interval: Duration::from_secs(5),
        })
}

fn sump_controller(clock: &ManualClock, sink: impl TelemetrySink + Send + 'static) -> (Controller, SimulatedSump) {
    let sump = SimulatedSump::default();
    let ctrl = base(clock, sink)
        .with_float_switch(sump.float_switch())
        .with_relay(sump.relay())
        .try_build()
        .unwrap();
    (ctrl, sump)
}

fn tick_n(ctrl: &mut Controller, clock: &ManualClock, n: usize) -> Vec<PumpEvent> {
    let mut events = Vec::new();
    for _ in 0..n {
        events.extend(ctrl.tick().events);
        clock.advance(POLL);
    }
    events
}

fn activations(events: &[PumpEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PumpEvent::Activation(_)))
        .count()
}

#[test]
fn missing_parts_fail_to_build() {
    let err = Controller::builder()
        .with_relay(SpyRelay::new())
        .with_sensor_bus(SimulatedSensorBus::new())
        .with_telemetry(MemoryTelemetry::new())
        .try_build()
        .unwrap_err();
    assert!(format!("{err}").contains("missing float switch"));
}

#[test]
fn simulated_sump_cycles_and_learns() {
    let clock = clock();
    let sink = MemoryTelemetry::new();
    let (mut ctrl, sump) = sump_controller(&clock, sink.clone());

    let mut n_act = 0;
    for _ in 0..500 {
        let report = ctrl.tick();
        clock.advance(POLL);
        n_act += activations(&report.events);
        let phase = ctrl.pump_snapshot().phase;
        assert_eq!(sump.snapshot().pump_on, phase == PumpPhase::Filling);
        assert_eq!(report.pump_on, phase == PumpPhase::Filling);
    }
    assert!(n_act >= 10, "only {n_act} activations");
    assert_eq!(ctrl.calibration().activations_since_refill(), n_act as u64);
    assert_eq!(ctrl.seasonal().total_activations(), n_act);
    assert!(sump.snapshot().level_mm > 98.0);

    assert!(!sink.payloads("aquarium/pump/state").is_empty());
    assert_eq!(sink.payloads("aquarium/temp/display").last().map(String::as_str), Some("25.5"));
    assert!(!sink.payloads("aquarium/seasonal/summer").is_empty());
    assert!(!sink.payloads("aquarium/temp/sump/stats").is_empty());
    assert_eq!(sink.payloads("aquarium/temp/differential").last().map(String::as_str), Some("0.3"));

    ctrl.apply_command(Command::Refill { liters: n_act as f64 * 0.06 }).unwrap();
    assert!((ctrl.calibration().liters_per_activation() - 0.06).abs() < 1e-9);
    assert_eq!(
        sink.payloads("aquarium/calibration/liters_per_activation").last().map(String::as_str),
        Some("0.06")
    );
}

#[test]
fn queued_commands_apply_between_ticks() {
    let clock = clock();
    let sink = MemoryTelemetry::new();
    let float = ScriptedFloat::new([Some(false)]);
    let relay = SpyRelay::new();
    let (tx, rx) = xch::unbounded();
    let mut ctrl = base(&clock, sink.clone())
        .with_float_switch(float.clone())
        .with_relay(relay.clone())
        .with_commands(rx)
        .try_build()
        .unwrap();

    tx.send(Command::Disable).unwrap();
    tx.send(Command::SetOffset {
        role: ato_core::SensorRole::Display,
        offset: -0.5,
    })
    .unwrap();
    tick_n(&mut ctrl, &clock, 1);
    assert_eq!(ctrl.pump_snapshot().phase, PumpPhase::Disabled);
    assert_eq!(ctrl.pump_snapshot().disabled_reason, Some(DisableReason::Command));
    assert_eq!(
        sink.payloads("aquarium/temp/display_calibration").first().map(String::as_str),
        Some("-0.5")
    );

    for _ in 0..4 {
        float.push(Some(true));
    }
    tick_n(&mut ctrl, &clock, 4);
    assert!(!relay.pump_on(), "disabled pump must not start");

    tx.send(Command::Enable).unwrap();
    float.push(Some(true));
    float.push(Some(true));
    let events = tick_n(&mut ctrl, &clock, 2);
    assert!(events.contains(&PumpEvent::Enabled));
    assert!(events.contains(&PumpEvent::FillStarted { manual: false }));
    assert!(relay.pump_on());

    // Display probe reads 25.5 raw, offset -0.5.
    tick_n(&mut ctrl, &clock, 10);
    let display = ctrl.temperatures().channel(ato_core::SensorRole::Display);
    assert_eq!(display.current_temperature(), Some(25.0));
}

#[test]
fn rejected_command_does_not_stop_the_loop() {
    let clock = clock();
    let (tx, rx) = xch::unbounded();
    let mut ctrl = base(&clock, MemoryTelemetry::new())
        .with_float_switch(ScriptedFloat::new([Some(false)]))
        .with_relay(SpyRelay::new())
        .with_commands(rx)
        .try_build()
        .unwrap();
    tx.send(Command::Refill { liters: 3.0 }).unwrap();
    tx.send(Command::SetOffset {
        role: ato_core::SensorRole::Sump,
        offset: 9.0,
    })
    .unwrap();
    let report = ctrl.tick();
    assert_eq!(report.tick, 0);
    assert_eq!(ctrl.calibration().confidence(), 0.0);
    assert_eq!(ctrl.temperatures().channel(ato_core::SensorRole::Sump).calibration_offset(), 0.0);
}

#[test]
fn unreachable_telemetry_never_blocks_control() {
    let clock = clock();
    let (mut ctrl, sump) = sump_controller(&clock, UnreachableTelemetry);
    let events = tick_n(&mut ctrl, &clock, 200);
    assert!(activations(&events) > 0);
    assert!(ctrl.telemetry_failures() > 0);
    assert!(!sump.snapshot().pump_on || ctrl.pump_snapshot().phase == PumpPhase::Filling);
}

#[test]
fn stuck_pump_raises_alert_once_per_cooldown() {
    let clock = clock();
    let sink = MemoryTelemetry::new();
    let relay = SpyRelay::new();
    let mut ctrl = base(&clock, sink.clone())
        .with_float_switch(ScriptedFloat::new([Some(true)]))
        .with_relay(relay.clone())
        .try_build()
        .unwrap();
    let events = tick_n(&mut ctrl, &clock, 200);
    assert!(events.iter().any(|e| matches!(e, PumpEvent::Stuck { .. })));
    assert_eq!(ctrl.pump_snapshot().phase, PumpPhase::Stuck);
    assert!(!relay.pump_on());
    let alerts: Vec<String> = sink
        .payloads("aquarium/alert")
        .into_iter()
        .filter(|p| p.contains("pump_stuck"))
        .collect();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains("pump stuck: filling for 121000 ms (limit 120000 ms)"), "{}", alerts[0]);
}

#[test]
fn state_survives_restart() {
    let clock = clock();
    let (mut ctrl, _sump) = sump_controller(&clock, MemoryTelemetry::new());
    tick_n(&mut ctrl, &clock, 300);
    let n = ctrl.calibration().activations_since_refill();
    ctrl.apply_command(Command::Refill { liters: n as f64 * 0.07 }).unwrap();
    tick_n(&mut ctrl, &clock, 50);
    let snapshot = ctrl.snapshot_state();
    let rate = ctrl.calibration().liters_per_activation();
    let confidence = ctrl.calibration().confidence();
    drop(ctrl);

    let sump = SimulatedSump::default();
    let restored = base(&clock, MemoryTelemetry::new())
        .with_float_switch(sump.float_switch())
        .with_relay(sump.relay())
        .with_restored_state(snapshot.clone())
        .try_build()
        .unwrap();
    assert_eq!(restored.calibration().liters_per_activation(), rate);
    assert_eq!(restored.calibration().confidence(), confidence);
    assert_eq!(restored.seasonal().total_activations(), snapshot.activations.len());
    assert_eq!(
        restored
            .temperatures()
            .channel(ato_core::SensorRole::Display)
            .history()
            .len(),
        snapshot.sensors[0].history.len()
    );
}

fn low_float_controller(clock: &ManualClock, relay: &SpyRelay, restored: Option<PersistedState>) -> Controller {
    let mut b = base(clock, MemoryTelemetry::new())
        .with_float_switch(ScriptedFloat::new([Some(true)]))
        .with_relay(relay.clone());
    if let Some(state) = restored {
        b = b.with_restored_state(state);
    }
    b.try_build().unwrap()
}

#[test]
fn disabled_pump_stays_disabled_after_restart() {
    let clock = clock();
    let relay = SpyRelay::new();
    let mut ctrl = low_float_controller(&clock, &relay, None);
    ctrl.apply_command(Command::Disable).unwrap();
    let snapshot = ctrl.snapshot_state();
    drop(ctrl);

    let relay = SpyRelay::new();
    let mut ctrl = low_float_controller(&clock, &relay, Some(snapshot));
    tick_n(&mut ctrl, &clock, 5);
    let pump = ctrl.pump_snapshot();
    assert_eq!(pump.phase, PumpPhase::Disabled);
    assert_eq!(pump.disabled_reason, Some(DisableReason::Command));
    assert!(!relay.pump_on());

    ctrl.apply_command(Command::Enable).unwrap();
    tick_n(&mut ctrl, &clock, 2);
    assert_eq!(ctrl.pump_snapshot().phase, PumpPhase::Filling);
}

#[test]
fn stuck_pump_stays_stuck_after_restart() {
    let clock = clock();
    let relay = SpyRelay::new();
    let mut ctrl = low_float_controller(&clock, &relay, None);
    tick_n(&mut ctrl, &clock, 200);
    assert_eq!(ctrl.pump_snapshot().phase, PumpPhase::Stuck);
    let snapshot = ctrl.snapshot_state();
    assert!(snapshot.pump.stuck);
    drop(ctrl);

    let relay = SpyRelay::new();
    let mut ctrl = low_float_controller(&clock, &relay, Some(snapshot));
    tick_n(&mut ctrl, &clock, 10);
    assert_eq!(ctrl.pump_snapshot().phase, PumpPhase::Stuck);
    assert_eq!(ctrl.pump_snapshot().stuck_events_in_window, 1);
    assert_eq!(relay.levels(), vec![true]);
}

#[test]
fn daily_ceiling_counts_fills_from_before_restart() {
    let clock = clock();
    let mut state = PersistedState::fresh(0.05, clock.wall());
    for h in 1..=3 {
        state.activations.push(ActivationRecord {
            timestamp: clock.wall() - chrono::Duration::hours(h),
            duration: Duration::from_secs(30),
            volume_dispensed: 0.05,
        });
    }
    // Yesterday's fills do not count.
    state.activations.push(ActivationRecord {
        timestamp: clock.wall() - chrono::Duration::days(1),
        duration: Duration::from_secs(30),
        volume_dispensed: 0.05,
    });
    let relay = SpyRelay::new();
    let mut ctrl = base(&clock, MemoryTelemetry::new())
        .with_float_switch(ScriptedFloat::new([Some(true)]))
        .with_relay(relay.clone())
        .with_pump(PumpCfg {
            max_activations_per_day: 3,
            ..PumpCfg::default()
        })
        .with_restored_state(state)
        .try_build()
        .unwrap();
    assert_eq!(ctrl.pump_snapshot().fills_today, 3);
    tick_n(&mut ctrl, &clock, 2);
    assert_eq!(ctrl.pump_snapshot().disabled_reason, Some(DisableReason::DailyCeiling));
    assert!(!relay.pump_on());
}

/// Twelve scripted fills today on top of `history_days` days of two fills a
/// day; returns whether a dosage anomaly was raised.
fn dosage_anomaly_after(history_days: i64) -> bool {
    let clock = clock();
    let mut state = PersistedState::fresh(0.05, clock.wall());
    for d in 1..=history_days {
        for h in [1, 7] {
            state.activations.push(ActivationRecord {
                timestamp: clock.wall() - chrono::Duration::days(d) - chrono::Duration::hours(h),
                duration: Duration::from_secs(30),
                volume_dispensed: 0.05,
            });
        }
    }
    let float = ScriptedFloat::new(std::iter::repeat_n([Some(true), Some(true), Some(false), Some(false)], 12).flatten());
    let mut ctrl = base(&clock, MemoryTelemetry::new())
        .with_float_switch(float)
        .with_relay(SpyRelay::new())
        .with_restored_state(state)
        .try_build()
        .unwrap();

    let mut fills = 0;
    let mut anomaly = false;
    for _ in 0..48 {
        let report = ctrl.tick();
        clock.advance(POLL);
        fills += activations(&report.events);
        anomaly |= report.alerts.iter().any(|a| a.kind == AlertKind::DosageAnomaly);
    }
    assert_eq!(fills, 12);
    anomaly
}

#[test]
fn first_day_dosing_is_not_an_anomaly() {
    assert!(!dosage_anomaly_after(0));
    assert!(!dosage_anomaly_after(3));
}

#[test]
fn dosing_far_above_an_established_baseline_is_an_anomaly() {
    assert!(dosage_anomaly_after(14));
}

#[test]
fn runner_stops_pump_and_persists() {
    let clock = clock();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let (mut ctrl, sump) = sump_controller(&clock, MemoryTelemetry::new());
    let stop = AtomicBool::new(false);
    let opts = RunOptions {
        max_ticks: Some(123),
        state_path: Some(path.clone()),
        save_interval: Duration::from_secs(60),
    };
    let summary = run(&mut ctrl, &stop, &opts).unwrap();
    assert_eq!(summary.ticks, 123);
    assert_eq!(summary.activations as usize, ctrl.seasonal().total_activations());
    assert!(!sump.snapshot().pump_on);

    let saved = PersistedState::load(&path).unwrap().unwrap();
    assert_eq!(saved.activations.len(), ctrl.seasonal().total_activations());
}

#[test]
fn runner_honours_shutdown_flag() {
    let clock = clock();
    let (mut ctrl, _sump) = sump_controller(&clock, MemoryTelemetry::new());
    let stop = AtomicBool::new(true);
    let summary = run(&mut ctrl, &stop, &RunOptions::default()).unwrap();
    assert_eq!(summary.ticks, 0);
}

#[test]
fn background_sampling_feeds_the_tick() {
    use ato_traits::MonotonicClock;

    let mut ctrl = Controller::builder()
        .with_float_switch(ScriptedFloat::new([Some(false)]))
        .with_relay(SpyRelay::new())
        .with_sensor_bus(SimulatedSensorBus::reef_defaults())
        .with_telemetry(MemoryTelemetry::new())
        .with_clock(MonotonicClock::new())
        .with_loop(LoopCfg {
            poll: Duration::from_millis(10),
        })
        .with_temperature(TemperatureCfg {
            read_interval: Duration::from_millis(20),
            ..TemperatureCfg::default()
        })
        .with_background_sampling(true)
        .try_build()
        .unwrap();

    let mut reading = None;
    for _ in 0..200 {
        ctrl.tick();
        reading = ctrl
            .temperatures()
            .channel(ato_core::SensorRole::Reservoir)
            .current_temperature();
        if reading.is_some() {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(reading, Some(22.1));
    ctrl.shutdown().unwrap();
}
