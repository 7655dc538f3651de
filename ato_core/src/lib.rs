#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss,
    clippy::must_use_candidate
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Top-off control logic (hardware-agnostic).
//!
//! All hardware goes through the `ato_traits` seams: `FloatSwitch`,
//! `PumpRelay`, `SensorBus`, `TelemetrySink`, and `Clock`.
//!
//! ## Architecture
//!
//! - **Pump**: debounced IDLE/FILLING/STUCK/DISABLED state machine; the only
//!   writer of the relay (`pump` module)
//! - **Calibration**: learns liters per activation from refills (`calibration`)
//! - **Seasonal**: evaporation buckets over the trailing year (`seasonal`)
//! - **Temperature**: three fixed probe roles with offsets and stats (`temperature`)
//! - **Alerts**: condition checks with per-subject cooldown (`alerts`)
//! - **Controller**: the periodic tick tying these together (`controller`)
//!
//! Persisted state (`persist`) carries learned calibration, probe history,
//! the activation log, and the pump's safety latch across restarts.

pub mod alerts;
pub mod atomic;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod history;
pub mod hw_error;
pub mod mocks;
pub mod persist;
pub mod pump;
pub mod runner;
pub mod sampler;
pub mod season;
pub mod seasonal;
pub mod telemetry;
pub mod temperature;
pub mod util;

pub use alerts::{Alert, AlertEvaluator, AlertKind, Severity};
pub use calibration::{CalibrationEngine, CalibrationState, RefillRecord};
pub use config::{AlertCfg, CalibrationCfg, LoopCfg, PumpCfg, TelemetryCfg, TemperatureCfg};
pub use controller::{Controller, ControllerBuilder, TickReport};
pub use error::{AtoError, BuildError, DisableReason, Report, Result};
pub use hw_error::map_hw_error;
pub use persist::PersistedState;
pub use pump::{PumpEvent, PumpLatch, PumpPhase, PumpSnapshot, PumpStateMachine};
pub use season::{Season, season_of};
pub use seasonal::{ActivationRecord, SeasonalAggregator, SeasonalBucket};
pub use telemetry::{Command, Topics};
pub use temperature::{SensorReading, SensorRole, TempStats, TemperatureSubsystem};
