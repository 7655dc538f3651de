//! Pump state machine: IDLE, FILLING, STUCK, DISABLED.
//!
//! The pump output is commanded only from here. It is OFF at construction,
//! whenever the phase is not FILLING, and on drop. Every transition out of
//! FILLING goes through [`PumpStateMachine::leave_filling`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use ato_traits::{Clock, PumpRelay};

use crate::config::PumpCfg;
use crate::error::{AtoError, DisableReason};
use crate::hw_error::map_hw_error;
use crate::seasonal::ActivationRecord;
use crate::util::millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpPhase {
    Idle,
    Filling,
    Stuck,
    Disabled,
}

impl PumpPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PumpPhase::Idle => "idle",
            PumpPhase::Filling => "filling",
            PumpPhase::Stuck => "stuck",
            PumpPhase::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for PumpPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Things that happened during one step or command.
#[derive(Debug, Clone, PartialEq)]
pub enum PumpEvent {
    FillStarted { manual: bool },
    Activation(ActivationRecord),
    Stuck { elapsed: Duration },
    /// A stuck pump saw the water line restored.
    Recovered,
    Disabled(DisableReason),
    Enabled,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PumpStep {
    pub pump_on: bool,
    pub events: Vec<PumpEvent>,
}

/// Read-only view for telemetry and alerts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PumpSnapshot {
    pub phase: PumpPhase,
    pub pump_on: bool,
    pub filling_duration_ms: Option<u64>,
    pub manual: bool,
    pub disabled_reason: Option<DisableReason>,
    pub fills_today: u32,
    pub stuck_events_in_window: usize,
    /// Description of the fill that tripped the stuck timeout, while STUCK.
    pub stuck_detail: Option<String>,
}

/// Safety state that must outlive the process: an operator or safety
/// disable, a stuck pump, and the stuck occurrences still inside the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PumpLatch {
    pub disabled_reason: Option<DisableReason>,
    pub stuck: bool,
    pub stuck_at: Vec<DateTime<Utc>>,
}

/// Confirms a float level only after `n` identical consecutive samples.
#[derive(Debug, Clone)]
struct Debouncer {
    n: u8,
    last: Option<bool>,
    count: u8,
}

impl Debouncer {
    fn new(n: u8) -> Self {
        Self {
            n: n.max(1),
            last: None,
            count: 0,
        }
    }

    fn feed(&mut self, low: bool) -> Option<bool> {
        if self.last == Some(low) {
            self.count = self.count.saturating_add(1);
        } else {
            self.last = Some(low);
            self.count = 1;
        }
        (self.count >= self.n).then_some(low)
    }

    fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }
}

pub struct PumpStateMachine {
    cfg: PumpCfg,
    relay: Box<dyn PumpRelay + Send>,
    clock: Arc<dyn Clock + Send + Sync>,
    phase: PumpPhase,
    pump_on: bool,
    debounce: Debouncer,
    fill_started: Option<Instant>,
    manual: bool,
    /// The float read low at some point during the current fill.
    saw_low: bool,
    stuck_events: VecDeque<Instant>,
    day: Option<NaiveDate>,
    fills_today: u32,
    disabled_reason: Option<DisableReason>,
    stuck_error: Option<AtoError>,
}

impl core::fmt::Debug for PumpStateMachine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PumpStateMachine")
            .field("phase", &self.phase)
            .field("pump_on", &self.pump_on)
            .field("manual", &self.manual)
            .field("fills_today", &self.fills_today)
            .field("disabled_reason", &self.disabled_reason)
            .finish()
    }
}

impl PumpStateMachine {
    /// Build the machine and drive the relay OFF. Fails if the relay
    /// refuses that first write.
    pub fn new(
        cfg: PumpCfg,
        relay: Box<dyn PumpRelay + Send>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Result<Self, AtoError> {
        let debounce = Debouncer::new(cfg.debounce_samples);
        let mut sm = Self {
            cfg,
            relay,
            clock,
            phase: PumpPhase::Idle,
            pump_on: true,
            debounce,
            fill_started: None,
            manual: false,
            saw_low: false,
            stuck_events: VecDeque::new(),
            day: None,
            fills_today: 0,
            disabled_reason: None,
            stuck_error: None,
        };
        sm.set_pump(false)?;
        Ok(sm)
    }

    pub fn phase(&self) -> PumpPhase {
        self.phase
    }

    pub fn is_pump_on(&self) -> bool {
        self.pump_on
    }

    pub fn disabled_reason(&self) -> Option<DisableReason> {
        self.disabled_reason
    }

    pub fn snapshot(&self) -> PumpSnapshot {
        PumpSnapshot {
            phase: self.phase,
            pump_on: self.pump_on,
            filling_duration_ms: self.fill_started.map(|t| self.clock.ms_since(t)),
            manual: self.manual,
            disabled_reason: self.disabled_reason,
            fills_today: self.fills_today,
            stuck_events_in_window: self.stuck_events.len(),
            stuck_detail: self
                .stuck_error
                .as_ref()
                .filter(|_| self.phase == PumpPhase::Stuck)
                .map(ToString::to_string),
        }
    }

    pub fn latch(&self) -> PumpLatch {
        let now = self.clock.now();
        let wall = self.clock.wall();
        PumpLatch {
            disabled_reason: self.disabled_reason,
            stuck: self.phase == PumpPhase::Stuck,
            stuck_at: self
                .stuck_events
                .iter()
                .filter_map(|t| chrono::Duration::from_std(now.saturating_duration_since(*t)).ok())
                .map(|age| wall - age)
                .collect(),
        }
    }

    /// Re-apply a latch saved before a restart. A disabled or stuck pump stays
    /// that way until an explicit enable; `fills_today` keeps the daily
    /// ceiling counting from where it was.
    pub fn restore(&mut self, latch: &PumpLatch, fills_today: u32) {
        if self.phase == PumpPhase::Filling {
            let mut events = Vec::new();
            self.leave_filling(PumpPhase::Idle, &mut events);
        }
        self.roll_day();
        self.fills_today = fills_today;

        let now = self.clock.now();
        let wall = self.clock.wall();
        self.stuck_events = latch
            .stuck_at
            .iter()
            .map(|at| (wall - *at).to_std().unwrap_or_default())
            .filter(|age| *age <= self.cfg.stuck_window)
            .filter_map(|age| now.checked_sub(age))
            .collect();
        self.stuck_events.make_contiguous().sort();

        if let Some(reason) = latch.disabled_reason {
            self.phase = PumpPhase::Disabled;
            self.disabled_reason = Some(reason);
            tracing::warn!(?reason, "pump restored disabled; waiting for enable");
        } else if latch.stuck {
            self.phase = PumpPhase::Stuck;
            tracing::warn!("pump restored stuck; waiting for full float or enable");
        }
    }

    /// Advance one poll. `sample` is the float-switch reading (`true` = low).
    /// `liters_per_activation` stamps any completed fill.
    pub fn step(&mut self, sample: Result<bool, AtoError>, liters_per_activation: f64) -> PumpStep {
        let now = self.clock.now();
        self.roll_day();
        let mut events = Vec::new();

        if self.phase != PumpPhase::Filling && self.pump_on {
            match self.set_pump(false) {
                Ok(()) => tracing::warn!(phase = %self.phase, "pump stop confirmed on retry"),
                Err(e) => tracing::error!(error = %e, phase = %self.phase, "relay still refuses pump stop"),
            }
        }
        if matches!(sample, Ok(true)) {
            self.saw_low = true;
        }

        let confirmed = match sample {
            Ok(low) => self.debounce.feed(low),
            Err(e) => {
                self.debounce.reset();
                if self.phase == PumpPhase::Filling {
                    tracing::error!(error = %e, "float switch failed while filling; stopping pump");
                    self.disable_into(DisableReason::FloatSwitchFault, &mut events);
                } else {
                    tracing::warn!(error = %e, phase = %self.phase, "float switch read failed");
                }
                return self.finish(events);
            }
        };

        match self.phase {
            PumpPhase::Idle => {
                if confirmed == Some(true) {
                    self.start_fill(false, &mut events);
                }
            }
            PumpPhase::Filling => {
                let elapsed = self
                    .fill_started
                    .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
                if elapsed > self.cfg.stuck_timeout {
                    self.on_stuck(now, elapsed, &mut events);
                } else if confirmed == Some(false) || (self.manual && elapsed >= self.cfg.manual_run) {
                    self.complete_fill(liters_per_activation, &mut events);
                }
            }
            PumpPhase::Stuck => {
                if confirmed == Some(false) {
                    tracing::info!("water line restored; stuck pump returns to idle");
                    self.phase = PumpPhase::Idle;
                    self.stuck_error = None;
                    events.push(PumpEvent::Recovered);
                }
            }
            PumpPhase::Disabled => {}
        }
        self.finish(events)
    }

    /// Operator or safety disable from any phase.
    pub fn disable(&mut self, reason: DisableReason) -> Vec<PumpEvent> {
        let mut events = Vec::new();
        self.disable_into(reason, &mut events);
        events
    }

    /// Return to IDLE from DISABLED or STUCK. Clears the stuck window and the
    /// daily counter so the pump is not immediately re-disabled. The relay
    /// must accept an OFF write first; otherwise the pump stays DISABLED.
    pub fn enable(&mut self) -> Vec<PumpEvent> {
        match self.phase {
            PumpPhase::Disabled | PumpPhase::Stuck => {
                if let Err(e) = self.set_pump(false) {
                    tracing::error!(error = %e, "relay refused pump stop; enable rejected");
                    let mut events = Vec::new();
                    self.disable_into(DisableReason::RelayFault, &mut events);
                    return events;
                }
                tracing::info!(from = %self.phase, "pump enabled");
                self.phase = PumpPhase::Idle;
                self.disabled_reason = None;
                self.stuck_error = None;
                self.stuck_events.clear();
                self.fills_today = 0;
                self.debounce.reset();
                vec![PumpEvent::Enabled]
            }
            PumpPhase::Idle | PumpPhase::Filling => Vec::new(),
        }
    }

    /// Start a timed fill from IDLE regardless of the float level.
    pub fn manual_trigger(&mut self) -> Result<Vec<PumpEvent>, AtoError> {
        if self.phase != PumpPhase::Idle {
            return Err(AtoError::State(format!(
                "manual trigger requires an idle pump (currently {})",
                self.phase
            )));
        }
        self.roll_day();
        let mut events = Vec::new();
        self.start_fill(true, &mut events);
        Ok(events)
    }

    /// Force the pump off. Leaves an active fill as IDLE without recording it.
    pub fn shutdown(&mut self) -> Result<(), AtoError> {
        if self.phase == PumpPhase::Filling {
            let mut events = Vec::new();
            self.leave_filling(PumpPhase::Idle, &mut events);
        }
        self.set_pump(false)
    }

    fn finish(&self, events: Vec<PumpEvent>) -> PumpStep {
        PumpStep {
            pump_on: self.pump_on,
            events,
        }
    }

    fn roll_day(&mut self) {
        let today = self.clock.wall().date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.fills_today = 0;
        }
    }

    fn start_fill(&mut self, manual: bool, events: &mut Vec<PumpEvent>) {
        if self.fills_today >= self.cfg.max_activations_per_day {
            tracing::error!(fills = self.fills_today, "daily activation ceiling reached");
            self.disable_into(DisableReason::DailyCeiling, events);
            return;
        }
        if let Err(e) = self.set_pump(true) {
            tracing::error!(error = %e, "relay refused pump start");
            self.disable_into(DisableReason::RelayFault, events);
            return;
        }
        self.phase = PumpPhase::Filling;
        self.fill_started = Some(self.clock.now());
        self.manual = manual;
        // A manual run needs fresh samples; a saturated "full" would end it at once.
        self.saw_low = !manual;
        if manual {
            self.debounce.reset();
        }
        self.fills_today = self.fills_today.saturating_add(1);
        tracing::info!(manual, fills_today = self.fills_today, "fill started");
        events.push(PumpEvent::FillStarted { manual });
    }

    fn complete_fill(&mut self, liters_per_activation: f64, events: &mut Vec<PumpEvent>) {
        let topped_off = self.saw_low;
        let duration = self.leave_filling(PumpPhase::Idle, events);
        if !topped_off {
            tracing::info!(
                duration_ms = millis(duration),
                "manual run ended without the float reading low; not counted as an activation"
            );
            return;
        }
        let rec = ActivationRecord {
            timestamp: self.clock.wall(),
            duration,
            volume_dispensed: liters_per_activation,
        };
        tracing::info!(duration_ms = millis(duration), "fill complete");
        events.push(PumpEvent::Activation(rec));
    }

    fn on_stuck(&mut self, now: Instant, elapsed: Duration, events: &mut Vec<PumpEvent>) {
        self.leave_filling(PumpPhase::Stuck, events);
        let err = AtoError::StuckPump {
            elapsed_ms: millis(elapsed),
            limit_ms: millis(self.cfg.stuck_timeout),
        };
        tracing::error!(error = %err, "relay forced off");
        self.stuck_error = Some(err);
        events.push(PumpEvent::Stuck { elapsed });

        self.stuck_events.push_back(now);
        while let Some(&first) = self.stuck_events.front() {
            if now.saturating_duration_since(first) > self.cfg.stuck_window {
                self.stuck_events.pop_front();
            } else {
                break;
            }
        }
        if self.stuck_events.len() >= self.cfg.max_stuck_events as usize {
            self.disable_into(DisableReason::RepeatedStuck, events);
        }
    }

    fn disable_into(&mut self, reason: DisableReason, events: &mut Vec<PumpEvent>) {
        if self.phase == PumpPhase::Filling {
            self.leave_filling(PumpPhase::Disabled, events);
        } else if let Err(e) = self.set_pump(false) {
            tracing::error!(error = %e, "relay refused pump stop while disabling");
        }
        if self.phase == PumpPhase::Disabled && self.disabled_reason.is_some() {
            // Keep the first reason; a relay fault during leave_filling wins.
            return;
        }
        self.phase = PumpPhase::Disabled;
        self.disabled_reason = Some(reason);
        tracing::warn!(?reason, "pump disabled");
        events.push(PumpEvent::Disabled(reason));
    }

    /// The only way out of FILLING. Returns how long the fill ran.
    fn leave_filling(&mut self, next: PumpPhase, events: &mut Vec<PumpEvent>) -> Duration {
        let ran = self
            .fill_started
            .take()
            .map_or(Duration::ZERO, |t| self.clock.now().saturating_duration_since(t));
        self.manual = false;
        self.saw_low = false;
        self.phase = next;
        if let Err(e) = self.set_pump(false) {
            tracing::error!(error = %e, "relay refused pump stop");
            self.phase = PumpPhase::Disabled;
            self.disabled_reason = Some(DisableReason::RelayFault);
            events.push(PumpEvent::Disabled(DisableReason::RelayFault));
        }
        ran
    }

    fn set_pump(&mut self, on: bool) -> Result<(), AtoError> {
        // Active-low relay: LOW energizes.
        self.relay
            .set_level(!on)
            .map_err(|e| map_hw_error(&*e))?;
        self.pump_on = on;
        Ok(())
    }
}

impl Drop for PumpStateMachine {
    fn drop(&mut self) {
        if let Err(e) = self.relay.set_level(true) {
            tracing::error!(error = %e, "relay refused pump stop on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ato_traits::ManualClock;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Levels(Arc<Mutex<Vec<bool>>>);

    impl PumpRelay for Levels {
        fn set_level(&mut self, high: bool) -> Result<(), ato_traits::BoxError> {
            self.0.lock().unwrap().push(high);
            Ok(())
        }
    }

    #[test]
    fn construction_writes_off() {
        let levels = Levels::default();
        let sm = PumpStateMachine::new(
            PumpCfg::default(),
            Box::new(levels.clone()),
            Arc::new(ManualClock::new()),
        )
        .unwrap();
        assert!(!sm.is_pump_on());
        assert_eq!(levels.0.lock().unwrap().as_slice(), &[true]);
    }

    #[test]
    fn debouncer_needs_consecutive_samples() {
        let mut d = Debouncer::new(2);
        assert_eq!(d.feed(true), None);
        assert_eq!(d.feed(false), None);
        assert_eq!(d.feed(false), Some(false));
        assert_eq!(d.feed(false), Some(false));
    }

    #[test]
    fn drop_releases_relay() {
        let levels = Levels::default();
        let clock = ManualClock::new();
        {
            let mut sm = PumpStateMachine::new(
                PumpCfg::default(),
                Box::new(levels.clone()),
                Arc::new(clock.clone()),
            )
            .unwrap();
            sm.manual_trigger().unwrap();
            assert!(sm.is_pump_on());
        }
        assert_eq!(levels.0.lock().unwrap().last(), Some(&true));
    }
}
