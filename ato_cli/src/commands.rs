//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ato_core::persist::PersistedState;
use ato_core::runner::{RunOptions, RunSummary, run as run_loop};
use ato_core::temperature::parse_w1_slave;
use ato_core::{
    AlertCfg, CalibrationCfg, CalibrationEngine, Controller, LoopCfg, PumpCfg, SeasonalAggregator,
    SeasonalBucket, TelemetryCfg, TemperatureCfg,
};
use ato_traits::{FloatSwitch, PumpRelay, SensorBus};
use chrono::Utc;
use eyre::{Result, WrapErr};
use serde_json::json;

use crate::hw;
use crate::io::{StdoutTelemetry, spawn_stdin_commands};

/// Effective state path: `--state` first, then `persistence.path`.
pub fn state_path(cli_state: Option<&Path>, cfg: &ato_config::Config) -> Option<PathBuf> {
    cli_state
        .map(Path::to_path_buf)
        .or_else(|| cfg.persistence.path.as_deref().map(PathBuf::from))
}

fn require_state_path(path: Option<PathBuf>) -> Result<PathBuf> {
    path.ok_or_else(|| {
        eyre::eyre!("no state file: set persistence.path in the config or pass --state")
    })
}

fn load_or_fresh(path: &Path, calib: &CalibrationCfg) -> Result<PersistedState> {
    let state = PersistedState::load(path)
        .wrap_err_with(|| format!("load state {}", path.display()))?;
    Ok(state.unwrap_or_else(|| PersistedState::fresh(calib.seed_liters_per_activation, Utc::now())))
}

pub struct RunArgs {
    pub ticks: Option<u64>,
    pub background_sampling: bool,
    pub stdin_commands: bool,
}

pub fn run(cfg: &ato_config::Config, state: Option<PathBuf>, args: &RunArgs) -> Result<RunSummary> {
    let hardware = hw::open(cfg)?;
    let telemetry: TelemetryCfg = (&cfg.telemetry).into();

    let mut builder = Controller::builder()
        .with_float_switch(hardware.float)
        .with_relay(hardware.relay)
        .with_sensor_bus(hardware.bus)
        .with_telemetry(StdoutTelemetry)
        .with_pump(PumpCfg::from(&cfg.pump))
        .with_loop(LoopCfg::from(&cfg.pump))
        .with_calibration(CalibrationCfg::from(&cfg.calibration))
        .with_temperature(TemperatureCfg::from(&cfg.temperature))
        .with_alerts(AlertCfg::from(&cfg.alerts))
        .with_telemetry_cfg(telemetry.clone())
        .with_background_sampling(args.background_sampling || cfg.temperature.background);
    if args.stdin_commands {
        builder = builder.with_commands(spawn_stdin_commands(telemetry.prefix.clone()));
    }
    if let Some(path) = &state {
        match PersistedState::load(path) {
            Ok(Some(s)) => builder = builder.with_restored_state(s),
            Ok(None) => tracing::info!(path = %path.display(), "no saved state; starting from seed"),
            Err(e) => {
                // Refuse to overwrite a state file we could not read.
                return Err(eyre::Report::new(e).wrap_err(format!("load state {}", path.display())));
            }
        }
    }
    let mut ctrl = builder.try_build()?;
    tracing::info!(backend = hardware.backend, prefix = %telemetry.prefix, "controller ready");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        })
        .wrap_err("install Ctrl-C handler")?;
    }

    let opts = RunOptions {
        max_ticks: args.ticks,
        state_path: state,
        save_interval: Duration::from_secs(cfg.persistence.save_interval_s),
    };
    let summary = run_loop(&mut ctrl, &shutdown, &opts)?;
    tracing::info!(
        ticks = summary.ticks,
        activations = summary.activations,
        stuck = summary.stuck_events,
        alerts = summary.alerts,
        "control loop finished"
    );
    Ok(summary)
}

fn season_line(b: &SeasonalBucket) -> String {
    format!(
        "  {:<7} {:>6} fills {:>8.2} L  {:>6.2} L/day  {:>6.3} L/h",
        b.season.to_string(),
        b.activation_count,
        b.liters_total,
        b.avg_liters_per_day,
        b.avg_liters_per_hour
    )
}

pub fn status(cfg: &ato_config::Config, state: Option<PathBuf>, json_mode: bool) -> Result<()> {
    let path = require_state_path(state)?;
    let calib_cfg = CalibrationCfg::from(&cfg.calibration);
    let saved = load_or_fresh(&path, &calib_cfg)?;
    let now = Utc::now();
    let engine = CalibrationEngine::restore(calib_cfg, saved.calibration)?;
    let seasonal = SeasonalAggregator::from_history(saved.activations);
    let rate = engine.liters_per_activation();
    let buckets = seasonal.compute_seasonal_stats(rate, now);
    let today = seasonal.liters_on(now.date_naive(), rate);

    if json_mode {
        let out = json!({
            "state_file": path.display().to_string(),
            "saved_at": saved.saved_at.to_rfc3339(),
            "liters_per_activation": rate,
            "confidence": engine.confidence(),
            "advisory": engine.is_advisory(),
            "activations_since_refill": engine.activations_since_refill(),
            "reservoir_level_l": engine.reservoir_level(),
            "liters_today": today,
            "seasonal": buckets,
        });
        println!("{out}");
        return Ok(());
    }

    println!("State file: {}", path.display());
    println!(
        "Calibration: {rate:.4} L/activation, confidence {:.2}{}",
        engine.confidence(),
        if engine.is_advisory() { " (advisory)" } else { "" }
    );
    println!(
        "Reservoir: ~{:.2} L ({} activations since refill)",
        engine.reservoir_level(),
        engine.activations_since_refill()
    );
    println!("Today: {today:.2} L");
    println!("Seasonal usage (trailing year):");
    for b in &buckets {
        println!("{}", season_line(b));
    }
    Ok(())
}

pub fn refill(
    cfg: &ato_config::Config,
    state: Option<PathBuf>,
    liters: f64,
    json_mode: bool,
) -> Result<()> {
    let path = require_state_path(state)?;
    let calib_cfg = CalibrationCfg::from(&cfg.calibration);
    let mut saved = load_or_fresh(&path, &calib_cfg)?;
    let now = Utc::now();
    let mut engine = CalibrationEngine::restore(calib_cfg, saved.calibration.clone())?;
    let outcome = engine.confirm_refill(liters, now)?;
    saved.calibration = engine.state().clone();
    saved.saved_at = now;
    saved.save(&path)?;

    if json_mode {
        println!(
            "{}",
            json!({
                "sample": outcome.sample,
                "previous_estimate": outcome.previous_estimate,
                "estimate": outcome.estimate,
                "confidence": outcome.confidence,
                "disagreement": outcome.disagreement,
            })
        );
    } else {
        println!(
            "Refill recorded: {liters:.2} L. Estimate {:.4} -> {:.4} L/activation, confidence {:.2}",
            outcome.previous_estimate, outcome.estimate, outcome.confidence
        );
        if outcome.disagreement {
            println!("Note: this refill disagreed with the learned rate; confidence was reduced.");
        }
    }
    Ok(())
}

pub fn import_refills(
    cfg: &ato_config::Config,
    state: Option<PathBuf>,
    csv: &Path,
    json_mode: bool,
) -> Result<()> {
    let path = require_state_path(state)?;
    let rows = ato_config::load_refill_csv(csv)?;
    let calib_cfg = CalibrationCfg::from(&cfg.calibration);
    let mut saved = load_or_fresh(&path, &calib_cfg)?;
    let mut engine = CalibrationEngine::restore(calib_cfg, saved.calibration.clone())?;
    for (i, row) in rows.iter().enumerate() {
        engine
            .record_refill(row.liters, u64::from(row.activations), row.timestamp)
            .wrap_err_with(|| format!("refill log row {}", i + 2))?;
    }
    saved.calibration = engine.state().clone();
    saved.saved_at = Utc::now();
    saved.save(&path)?;

    if json_mode {
        println!(
            "{}",
            json!({
                "imported": rows.len(),
                "liters_per_activation": engine.liters_per_activation(),
                "confidence": engine.confidence(),
            })
        );
    } else {
        println!(
            "Imported {} refills. Estimate {:.4} L/activation, confidence {:.2}",
            rows.len(),
            engine.liters_per_activation(),
            engine.confidence()
        );
    }
    Ok(())
}

pub fn self_check(cfg: &ato_config::Config, json_mode: bool) -> Result<()> {
    let mut hardware = hw::open(cfg)?;
    // Releasing the relay is always safe and proves the output is writable.
    hardware
        .relay
        .set_level(true)
        .map_err(|e| ato_core::map_hw_error(&*e))
        .wrap_err("pump relay write")?;
    let low = hardware
        .float
        .is_low()
        .map_err(|e| ato_core::map_hw_error(&*e))
        .wrap_err("float switch read")?;
    let ids = match hardware.bus.discover() {
        Ok(ids) => ids,
        Err(e) => {
            tracing::warn!(error = %e, "one-wire discovery failed");
            Vec::new()
        }
    };
    let probes: Vec<(String, Option<f64>)> = ids
        .into_iter()
        .map(|id| {
            let t = hardware
                .bus
                .read_raw(&id)
                .ok()
                .and_then(|raw| parse_w1_slave(&raw).ok());
            (id, t)
        })
        .collect();

    if json_mode {
        let probes: Vec<_> = probes
            .iter()
            .map(|(id, t)| json!({ "id": id, "celsius": t }))
            .collect();
        println!(
            "{}",
            json!({ "backend": hardware.backend, "float_low": low, "probes": probes })
        );
    } else {
        println!("Backend: {}", hardware.backend);
        println!("Float switch: {}", if low { "LOW (needs water)" } else { "ok" });
        if probes.is_empty() {
            println!("Probes: none found");
        }
        for (id, t) in &probes {
            match t {
                Some(c) => println!("Probe {id}: {c:.2} C"),
                None => println!("Probe {id}: unreadable"),
            }
        }
        println!("OK");
    }
    Ok(())
}

pub fn health(cfg: &ato_config::Config, state: Option<PathBuf>, json_mode: bool) -> Result<()> {
    let calib_cfg = CalibrationCfg::from(&cfg.calibration);
    let (state_ok, detail) = match &state {
        None => (true, "persistence disabled".to_string()),
        Some(p) => match PersistedState::load(p) {
            Ok(None) => (true, "no state yet".to_string()),
            Ok(Some(s)) => match CalibrationEngine::restore(calib_cfg, s.calibration) {
                Ok(e) => (
                    true,
                    format!(
                        "calibration {:.4} L/activation, confidence {:.2}",
                        e.liters_per_activation(),
                        e.confidence()
                    ),
                ),
                Err(e) => (false, e.to_string()),
            },
            Err(e) => (false, e.to_string()),
        },
    };

    if json_mode {
        println!(
            "{}",
            json!({
                "status": if state_ok { "ok" } else { "error" },
                "config": "ok",
                "state": detail,
            })
        );
    } else {
        println!("Config: ok");
        println!("State: {detail}");
    }
    if !state_ok {
        eyre::bail!("state file unhealthy: {detail}");
    }
    Ok(())
}
