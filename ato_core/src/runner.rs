//! Paced control loop with periodic and final persistence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eyre::WrapErr;

use crate::controller::Controller;
use crate::error::Result;
use crate::pump::PumpEvent;
use crate::util::{millis, ticks_for};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop after this many ticks; `None` runs until `shutdown` is set.
    pub max_ticks: Option<u64>,
    /// Persist state here periodically and on exit.
    pub state_path: Option<PathBuf>,
    pub save_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_ticks: None,
            state_path: None,
            save_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub activations: u64,
    pub stuck_events: u64,
    pub alerts: u64,
}

fn save(ctrl: &Controller, opts: &RunOptions) -> Result<()> {
    if let Some(path) = &opts.state_path {
        ctrl.snapshot_state()
            .save(path)
            .wrap_err_with(|| format!("persist state to {}", path.display()))?;
    }
    Ok(())
}

/// Tick `ctrl` every poll interval until `shutdown` is raised or
/// `max_ticks` is reached. The pump is forced off and state saved on exit,
/// including when the pump shutdown itself fails.
pub fn run(ctrl: &mut Controller, shutdown: &AtomicBool, opts: &RunOptions) -> Result<RunSummary> {
    let clock = ctrl.clock().clone();
    let poll = ctrl.poll();
    let save_every = ticks_for(millis(opts.save_interval), millis(poll));
    let mut summary = RunSummary::default();

    tracing::info!(poll_ms = millis(poll), max_ticks = ?opts.max_ticks, "control loop started");
    loop {
        if shutdown.load(Ordering::Relaxed) {
            tracing::info!("shutdown requested");
            break;
        }
        if opts.max_ticks.is_some_and(|max| summary.ticks >= max) {
            break;
        }

        let started = clock.now();
        let report = ctrl.tick();
        summary.ticks += 1;
        summary.alerts += report.alerts.len() as u64;
        for ev in &report.events {
            match ev {
                PumpEvent::Activation(_) => summary.activations += 1,
                PumpEvent::Stuck { .. } => summary.stuck_events += 1,
                _ => {}
            }
        }

        if summary.ticks % save_every == 0 {
            if let Err(e) = save(ctrl, opts) {
                tracing::warn!(error = %e, "periodic state save failed");
            }
        }

        let spent = clock.now().saturating_duration_since(started);
        if let Some(rest) = poll.checked_sub(spent) {
            clock.sleep(rest);
        }
    }

    let stopped = ctrl.shutdown();
    let saved = save(ctrl, opts);
    tracing::info!(
        ticks = summary.ticks,
        activations = summary.activations,
        alerts = summary.alerts,
        "control loop stopped"
    );
    stopped.wrap_err("force pump off")?;
    saved?;
    Ok(summary)
}
