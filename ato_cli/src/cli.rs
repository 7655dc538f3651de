//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "ato", version, about = "Aquarium auto top-off controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/ato_config.toml")]
    pub config: PathBuf,

    /// State file; overrides persistence.path from the config
    #[arg(long, value_name = "FILE")]
    pub state: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); defaults to logging.level, then info
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop until Ctrl-C
    Run {
        /// Stop after this many control ticks
        #[arg(long, value_name = "N")]
        ticks: Option<u64>,
        /// Read temperature probes on a background thread
        #[arg(long, action = ArgAction::SetTrue)]
        background_sampling: bool,
        /// Ignore operator commands on stdin
        #[arg(long, action = ArgAction::SetTrue)]
        no_stdin: bool,
    },
    /// Show learned calibration, reservoir estimate and seasonal usage
    Status,
    /// Confirm a reservoir refill of the given volume
    Refill {
        /// Liters poured into the reservoir
        #[arg(long)]
        liters: f64,
    },
    /// Replay a refill log (timestamp,liters,activations) into calibration
    ImportRefills {
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,
    },
    /// Quick hardware check (float switch, relay, probes)
    SelfCheck,
    /// Health check for operational monitoring
    Health,
}
