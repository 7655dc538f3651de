mod cli;
mod commands;
mod error_fmt;
mod hw;
mod io;

use std::path::Path;

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn load_config(path: &Path) -> Result<ato_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = ato_config::load_toml(&text).wrap_err("parse config")?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Console logs go to stderr so stdout stays machine-readable; an optional
/// JSON file layer follows `[logging]`.
fn init_tracing(json: bool, level: &str, logging: &ato_config::Logging) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid log level {level:?}"))?;

    let console = if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed()
    };

    let file = match logging.file.as_deref() {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre::eyre!("logging.file has no file name: {file}"))?;
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .wrap_err("install tracing subscriber")?;
    Ok(())
}

fn real_main(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    let level = cli
        .log_level
        .clone()
        .or_else(|| cfg.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    init_tracing(cli.json, &level, &cfg.logging)?;

    let state = commands::state_path(cli.state.as_deref(), &cfg);
    match cli.cmd {
        Commands::Run {
            ticks,
            background_sampling,
            no_stdin,
        } => {
            let summary = commands::run(
                &cfg,
                state,
                &commands::RunArgs {
                    ticks,
                    background_sampling,
                    stdin_commands: !no_stdin,
                },
            )?;
            // Stdout carries telemetry lines; the summary goes to stderr.
            if cli.json {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "ticks": summary.ticks,
                        "activations": summary.activations,
                        "stuck_events": summary.stuck_events,
                        "alerts": summary.alerts,
                    })
                );
            } else {
                eprintln!(
                    "Stopped after {} ticks: {} activations, {} stuck, {} alerts.",
                    summary.ticks, summary.activations, summary.stuck_events, summary.alerts
                );
            }
            Ok(())
        }
        Commands::Status => commands::status(&cfg, state, cli.json),
        Commands::Refill { liters } => commands::refill(&cfg, state, liters, cli.json),
        Commands::ImportRefills { csv } => commands::import_refills(&cfg, state, &csv, cli.json),
        Commands::SelfCheck => commands::self_check(&cfg, cli.json),
        Commands::Health => commands::health(&cfg, state, cli.json),
    }
}

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    if let Err(err) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        tracing::error!(error = %err, "exiting with error");
        std::process::exit(exit_code_for_error(&err));
    }
}
