//! The control tick: wires the five components to the hardware seams.
//!
//! Tick order is fixed:
//! 1. apply queued operator commands
//! 2. sample the float switch and step the pump (relay write happens here)
//! 3. fold completed fills into calibration and seasonal state
//! 4. on read ticks, take temperatures and record them
//! 5. evaluate alerts (published immediately)
//! 6. on publish ticks, publish the full telemetry set

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel as xch;
use eyre::WrapErr;

use ato_traits::{Clock, FloatSwitch, MonotonicClock, PumpRelay, SensorBus, TelemetrySink};

use crate::alerts::{Alert, AlertEvaluator, AlertInputs};
use crate::calibration::CalibrationEngine;
use crate::config::{AlertCfg, CalibrationCfg, LoopCfg, PumpCfg, TelemetryCfg, TemperatureCfg};
use crate::error::{AtoError, BuildError, DisableReason, Result};
use crate::hw_error::map_hw_error;
use crate::persist::{PersistedState, STATE_VERSION, SensorState};
use crate::pump::{PumpEvent, PumpSnapshot, PumpStateMachine};
use crate::sampler::TemperatureSampler;
use crate::season::season_at;
use crate::seasonal::SeasonalAggregator;
use crate::telemetry::{Command, Publisher, Topics};
use crate::temperature::{SensorRole, TemperatureSubsystem};
use crate::util::{millis, round_to, round2, ticks_for};

/// Where temperature readings come from.
enum TemperatureSource {
    /// Read on the control thread at read ticks.
    Inline(Box<dyn SensorBus + Send>),
    /// Read by a background thread; the tick applies the latest batch.
    Background(TemperatureSampler),
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    pub pump_on: bool,
    pub events: Vec<PumpEvent>,
    pub temperatures_read: bool,
    pub published: bool,
    pub alerts: Vec<Alert>,
}

pub struct Controller {
    clock: Arc<dyn Clock + Send + Sync>,
    float: Box<dyn FloatSwitch + Send>,
    pump: PumpStateMachine,
    calibration: CalibrationEngine,
    seasonal: SeasonalAggregator,
    temps: TemperatureSubsystem,
    alerts: AlertEvaluator,
    publisher: Publisher<Box<dyn TelemetrySink + Send>>,
    source: TemperatureSource,
    commands: Option<xch::Receiver<Command>>,
    poll: Duration,
    read_interval: Duration,
    read_every: u64,
    publish_every: u64,
    ticks: u64,
}

impl core::fmt::Debug for Controller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("pump", &self.pump)
            .field("ticks", &self.ticks)
            .field("read_every", &self.read_every)
            .field("publish_every", &self.publish_every)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn builder() -> ControllerBuilder {
        ControllerBuilder::default()
    }

    pub fn poll(&self) -> Duration {
        self.poll
    }
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }
    pub fn pump_snapshot(&self) -> PumpSnapshot {
        self.pump.snapshot()
    }
    pub fn calibration(&self) -> &CalibrationEngine {
        &self.calibration
    }
    pub fn seasonal(&self) -> &SeasonalAggregator {
        &self.seasonal
    }
    pub fn temperatures(&self) -> &TemperatureSubsystem {
        &self.temps
    }
    pub fn telemetry_failures(&self) -> u64 {
        self.publisher.failures()
    }

    /// Run one control cycle.
    pub fn tick(&mut self) -> TickReport {
        let tick = self.ticks;
        self.ticks = self.ticks.saturating_add(1);
        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };

        let queued: Vec<Command> = self
            .commands
            .as_ref()
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();
        for cmd in queued {
            match self.apply_command(cmd.clone()) {
                Ok(events) => report.events.extend(events),
                Err(e) => tracing::warn!(?cmd, error = %e, "command rejected"),
            }
        }

        let sample = self.float.is_low().map_err(|e| map_hw_error(&*e));
        let step = self.pump.step(sample, self.calibration.liters_per_activation());
        report.pump_on = step.pump_on;
        for ev in &step.events {
            if let PumpEvent::Activation(rec) = ev {
                self.calibration.record_activation();
                self.seasonal.record(rec.clone());
            }
        }
        report.events.extend(step.events);

        let now = self.clock.wall();
        if tick % self.read_every == 0 {
            report.temperatures_read = self.read_temperatures(now);
        }

        report.alerts = self.evaluate_alerts(now);

        if tick % self.publish_every == 0 {
            self.publish_all(now);
            report.published = true;
        }
        report
    }

    /// Apply one operator command immediately.
    pub fn apply_command(&mut self, cmd: Command) -> std::result::Result<Vec<PumpEvent>, AtoError> {
        tracing::info!(?cmd, "command");
        match cmd {
            Command::ManualTrigger => self.pump.manual_trigger(),
            Command::Disable => Ok(self.pump.disable(DisableReason::Command)),
            Command::Enable => Ok(self.pump.enable()),
            Command::SetOffset { role, offset } => {
                let applied = self.temps.set_calibration_offset(role, offset)?;
                let topic = self.publisher.topics().temp_calibration(role);
                self.publisher.publish_number(&topic, applied);
                Ok(Vec::new())
            }
            Command::Refill { liters } => {
                self.calibration.confirm_refill(liters, self.clock.wall())?;
                self.publish_calibration();
                Ok(Vec::new())
            }
        }
    }

    fn read_temperatures(&mut self, now: DateTime<Utc>) -> bool {
        let fresh = match &mut self.source {
            TemperatureSource::Inline(bus) => {
                let summary = self.temps.read_all(bus);
                summary.ok > 0
            }
            TemperatureSource::Background(sampler) => match sampler.latest() {
                Some(batch) => {
                    let mut any = false;
                    for (role, r) in batch {
                        any |= self.temps.apply_reading(role, r);
                    }
                    any
                }
                None => {
                    let stalled = sampler.stalled_for(self.clock.now());
                    if stalled > millis(self.read_interval).saturating_mul(2) {
                        for role in SensorRole::ALL {
                            if self.temps.channel(role).device_id().is_some() {
                                self.temps.apply_reading(
                                    role,
                                    Err(AtoError::sensor(role, format!("sampler stalled {stalled} ms"))),
                                );
                            }
                        }
                    }
                    false
                }
            },
        };
        if fresh {
            self.temps.record_fresh(now);
        }
        fresh
    }

    fn evaluate_alerts(&mut self, now: DateTime<Utc>) -> Vec<Alert> {
        let rate = self.calibration.liters_per_activation();
        let pump = self.pump.snapshot();
        let sensors = self.temps.statuses();
        let inputs = AlertInputs {
            pump: &pump,
            sensors: &sensors,
            differential: self.temps.temperature_differential(),
            confidence: self.calibration.confidence(),
            total_activations: self.seasonal.total_activations() as u64,
            liters_today: self.seasonal.liters_on(now.date_naive(), rate),
            expected_daily_liters: self.seasonal.expected_daily_liters(season_at(now), rate, now),
        };
        let fired = self.alerts.evaluate(&inputs, now);
        let topic = self.publisher.topics().alert();
        for a in &fired {
            self.publisher.publish_json(&topic, a);
        }
        fired
    }

    fn publish_calibration(&mut self) {
        let topics = self.publisher.topics().clone();
        self.publisher
            .publish_number(&topics.confidence(), round2(self.calibration.confidence()));
        self.publisher.publish_number(
            &topics.liters_per_activation(),
            round_to(self.calibration.liters_per_activation(), 4),
        );
        self.publisher
            .publish_number(&topics.reservoir_level(), round2(self.calibration.reservoir_level()));
    }

    fn publish_all(&mut self, now: DateTime<Utc>) {
        let topics = self.publisher.topics().clone();
        for role in SensorRole::ALL {
            let ch = self.temps.channel(role);
            if ch.device_id().is_none() {
                continue;
            }
            let current = ch.current_temperature();
            let offset = ch.calibration_offset();
            if let Some(t) = current {
                self.publisher.publish_number(&topics.temp(role), t);
            }
            self.publisher
                .publish_number(&topics.temp_calibration(role), offset);
            let stats = self.temps.compute_stats(role, now);
            self.publisher.publish_json(&topics.temp_stats(role), &stats);
        }
        if let Some(d) = self.temps.temperature_differential() {
            self.publisher.publish_number(&topics.differential(), d);
        }

        let pump = self.pump.snapshot();
        self.publisher.publish_json(&topics.pump_state(), &pump);
        self.publish_calibration();

        let rate = self.calibration.liters_per_activation();
        for bucket in self.seasonal.compute_seasonal_stats(rate, now) {
            self.publisher.publish_json(&topics.seasonal(bucket.season), &bucket);
        }
    }

    /// Capture everything that must survive a restart.
    pub fn snapshot_state(&self) -> PersistedState {
        PersistedState {
            version: STATE_VERSION,
            saved_at: self.clock.wall(),
            calibration: self.calibration.state().clone(),
            sensors: SensorRole::ALL
                .into_iter()
                .map(|role| {
                    let ch = self.temps.channel(role);
                    SensorState {
                        role,
                        device_id: ch.device_id().map(str::to_string),
                        offset_c: ch.calibration_offset(),
                        history: ch.history().to_vec(),
                    }
                })
                .collect(),
            activations: self.seasonal.activations().to_vec(),
            pump: self.pump.latch(),
        }
    }

    /// Load persisted state over the freshly built components.
    pub fn restore_state(&mut self, state: PersistedState) -> std::result::Result<(), AtoError> {
        self.calibration.replace_state(state.calibration)?;
        for s in state.sensors {
            self.temps.restore(s.role, s.offset_c, s.history)?;
        }
        self.seasonal = SeasonalAggregator::from_history(state.activations);
        let today = self.clock.wall().date_naive();
        let fills_today = self
            .seasonal
            .activations()
            .iter()
            .filter(|a| a.timestamp.date_naive() == today)
            .count();
        self.pump
            .restore(&state.pump, u32::try_from(fills_today).unwrap_or(u32::MAX));
        tracing::info!(
            rate = self.calibration.liters_per_activation(),
            confidence = self.calibration.confidence(),
            activations = self.seasonal.total_activations(),
            fills_today,
            phase = %self.pump.phase(),
            "state restored"
        );
        Ok(())
    }

    /// Force the pump off. Call before exit; `Drop` on the pump is the backstop.
    pub fn shutdown(&mut self) -> std::result::Result<(), AtoError> {
        self.pump.shutdown()
    }
}

#[derive(Default)]
pub struct ControllerBuilder {
    float: Option<Box<dyn FloatSwitch + Send>>,
    relay: Option<Box<dyn PumpRelay + Send>>,
    bus: Option<Box<dyn SensorBus + Send>>,
    telemetry: Option<Box<dyn TelemetrySink + Send>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    pump: Option<PumpCfg>,
    calibration: Option<CalibrationCfg>,
    temperature: Option<TemperatureCfg>,
    alerts: Option<AlertCfg>,
    telemetry_cfg: Option<TelemetryCfg>,
    loop_cfg: Option<LoopCfg>,
    commands: Option<xch::Receiver<Command>>,
    background_sampling: bool,
    restore: Option<PersistedState>,
}

impl ControllerBuilder {
    pub fn with_float_switch(mut self, f: impl FloatSwitch + Send + 'static) -> Self {
        self.float = Some(Box::new(f));
        self
    }
    pub fn with_relay(mut self, r: impl PumpRelay + Send + 'static) -> Self {
        self.relay = Some(Box::new(r));
        self
    }
    pub fn with_sensor_bus(mut self, b: impl SensorBus + Send + 'static) -> Self {
        self.bus = Some(Box::new(b));
        self
    }
    pub fn with_telemetry(mut self, t: impl TelemetrySink + Send + 'static) -> Self {
        self.telemetry = Some(Box::new(t));
        self
    }
    pub fn with_clock(mut self, c: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(c));
        self
    }
    pub fn with_pump(mut self, cfg: PumpCfg) -> Self {
        self.pump = Some(cfg);
        self
    }
    pub fn with_calibration(mut self, cfg: CalibrationCfg) -> Self {
        self.calibration = Some(cfg);
        self
    }
    pub fn with_temperature(mut self, cfg: TemperatureCfg) -> Self {
        self.temperature = Some(cfg);
        self
    }
    pub fn with_alerts(mut self, cfg: AlertCfg) -> Self {
        self.alerts = Some(cfg);
        self
    }
    pub fn with_telemetry_cfg(mut self, cfg: TelemetryCfg) -> Self {
        self.telemetry_cfg = Some(cfg);
        self
    }
    pub fn with_loop(mut self, cfg: LoopCfg) -> Self {
        self.loop_cfg = Some(cfg);
        self
    }
    pub fn with_commands(mut self, rx: xch::Receiver<Command>) -> Self {
        self.commands = Some(rx);
        self
    }
    pub fn with_background_sampling(mut self, on: bool) -> Self {
        self.background_sampling = on;
        self
    }
    pub fn with_restored_state(mut self, state: PersistedState) -> Self {
        self.restore = Some(state);
        self
    }

    pub fn try_build(self) -> Result<Controller> {
        let ControllerBuilder {
            float,
            relay,
            bus,
            telemetry,
            clock,
            pump,
            calibration,
            temperature,
            alerts,
            telemetry_cfg,
            loop_cfg,
            commands,
            background_sampling,
            restore,
        } = self;

        let float = float.ok_or_else(|| eyre::Report::new(BuildError::MissingFloatSwitch))?;
        let relay = relay.ok_or_else(|| eyre::Report::new(BuildError::MissingRelay))?;
        let mut bus = bus.ok_or_else(|| eyre::Report::new(BuildError::MissingSensorBus))?;
        let telemetry = telemetry.ok_or_else(|| eyre::Report::new(BuildError::MissingTelemetry))?;

        let pump_cfg = pump.unwrap_or_default();
        let calibration_cfg = calibration.unwrap_or_default();
        let temperature_cfg = temperature.unwrap_or_default();
        let telemetry_cfg = telemetry_cfg.unwrap_or_default();
        let loop_cfg = loop_cfg.unwrap_or_default();

        if loop_cfg.poll.is_zero() {
            return Err(eyre::Report::new(BuildError::InvalidConfig("poll interval must be > 0")));
        }
        if pump_cfg.stuck_timeout <= loop_cfg.poll {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "stuck timeout must exceed the poll interval",
            )));
        }
        if telemetry_cfg.prefix.is_empty() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "telemetry prefix must be non-empty",
            )));
        }
        let seed = calibration_cfg.seed_liters_per_activation;
        if !seed.is_finite() || seed <= 0.0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "seed liters per activation must be > 0",
            )));
        }

        let clock: Arc<dyn Clock + Send + Sync> = clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        let mut temps = TemperatureSubsystem::new(&temperature_cfg).wrap_err("temperature config")?;
        if let Err(e) = temps.discover(&mut bus) {
            tracing::warn!(error = %e, "probe discovery failed; continuing without temperatures");
        }

        let pump = PumpStateMachine::new(pump_cfg, relay, clock.clone()).wrap_err("initialize pump relay")?;

        let poll_ms = millis(loop_cfg.poll);
        let read_every = ticks_for(millis(temperature_cfg.read_interval), poll_ms);
        let publish_every = ticks_for(millis(telemetry_cfg.publish_interval), poll_ms);

        let source = if background_sampling {
            let probes: Vec<(SensorRole, String)> = SensorRole::ALL
                .into_iter()
                .filter_map(|r| temps.channel(r).device_id().map(|id| (r, id.to_string())))
                .collect();
            TemperatureSource::Background(TemperatureSampler::spawn(
                bus,
                probes,
                temperature_cfg.read_interval,
                clock.clone(),
            ))
        } else {
            TemperatureSource::Inline(bus)
        };

        let mut controller = Controller {
            clock,
            float,
            pump,
            calibration: CalibrationEngine::new(calibration_cfg),
            seasonal: SeasonalAggregator::new(),
            temps,
            alerts: AlertEvaluator::new(alerts.unwrap_or_default()),
            publisher: Publisher::new(telemetry, Topics::new(telemetry_cfg.prefix)),
            source,
            commands,
            poll: loop_cfg.poll,
            read_interval: temperature_cfg.read_interval,
            read_every,
            publish_every,
            ticks: 0,
        };
        if let Some(state) = restore {
            controller.restore_state(state).wrap_err("restore persisted state")?;
        }
        tracing::info!(
            poll_ms,
            read_every,
            publish_every,
            background_sampling,
            "controller ready"
        );
        Ok(controller)
    }
}
